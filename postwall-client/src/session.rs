use crate::error::Result;
use postwall_backend::client::Auth;
use postwall_common::model::{
    auth::{AuthEvent, AuthEventKind, Credentials, CredentialsError, Session, SignUp},
    post::Post,
    user::{ANONYMOUS_AUTHOR, DisplayName, User, UserId},
};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, instrument, warn};

/// Who is signed in, kept in step with the auth service's events.
pub struct SessionState<B: Auth + ?Sized> {
    backend: Arc<B>,
    session: Option<Session>,
    events: broadcast::Receiver<AuthEvent>,
}

impl<B: Auth + ?Sized> SessionState<B> {
    pub async fn init(backend: Arc<B>) -> Result<Self> {
        let events = backend.auth_events();
        let session = backend.current_session().await?;
        debug!(signed_in = session.is_some(), "Session loaded");

        Ok(Self {
            backend,
            session,
            events,
        })
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn user(&self) -> Option<&User> {
        self.session.as_ref().map(|session| &session.user)
    }

    /// Name shown on posts and comments written now.
    #[must_use]
    pub fn author_label(&self) -> &str {
        self.user().map_or(ANONYMOUS_AUTHOR, User::author_label)
    }

    #[must_use]
    pub fn author_id(&self) -> Option<UserId> {
        self.user().map(|user| user.id)
    }

    /// Whether the signed in user wrote `post`.
    #[must_use]
    pub fn can_modify(&self, post: &Post) -> bool {
        let Some(user) = self.user() else {
            return false;
        };

        post.author_id == Some(user.id)
            || user.email.as_deref() == Some(post.author.as_str())
            || user
                .display_name
                .as_ref()
                .is_some_and(|name| name.get() == post.author)
    }

    pub fn apply(&mut self, event: AuthEvent) {
        debug!(kind = ?event.kind, "Auth event");
        self.session = match event.kind {
            AuthEventKind::SignedOut => None,
            AuthEventKind::SignedIn | AuthEventKind::TokenRefreshed | AuthEventKind::UserUpdated => {
                event.session
            }
        };
    }

    /// Applies the auth events that arrived since the last call.
    pub fn sync(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.apply(event),
                Err(TryRecvError::Lagged(missed)) => warn!(missed, "Missed auth events"),
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    #[instrument(skip(self, password))]
    pub async fn sign_in(&mut self, email: &str, password: String) -> Result<&Session> {
        let credentials = Credentials::new(email, password)?;
        let session = self.backend.sign_in(&credentials).await?;
        info!("Signed in");

        Ok(&*self.session.insert(session))
    }

    /// Returns `None` when the account has to be confirmed by email first.
    #[instrument(skip(self, password, password_confirmation))]
    pub async fn sign_up(
        &mut self,
        email: &str,
        display_name: &str,
        password: String,
        password_confirmation: &str,
    ) -> Result<Option<&Session>> {
        let sign_up = SignUp::new(email, display_name, password, password_confirmation)?;
        let session = self.backend.sign_up(&sign_up).await?;
        if session.is_none() {
            info!("Sign-up needs email confirmation");
        }
        self.session = session.or(self.session.take());

        Ok(self.session.as_ref())
    }

    /// The local session ends even when the service could not be reached.
    pub async fn sign_out(&mut self) -> Result<()> {
        let result = self.backend.sign_out().await;
        self.session = None;
        Ok(result?)
    }

    #[instrument(skip(self))]
    pub async fn reset_password(&self, email: &str) -> Result<()> {
        let email = email.trim();
        if email.is_empty() {
            return Err(CredentialsError::MissingEmail.into());
        }
        self.backend.reset_password(email).await?;
        Ok(())
    }

    pub async fn update_display_name(&mut self, name: &str) -> Result<User> {
        let name = DisplayName::new(name.to_owned())?;
        let user = self.backend.update_display_name(&name).await?;
        info!("Display name changed");

        if let Some(session) = self.session.as_mut() {
            session.user = user.clone();
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use crate::session::SessionState;
    use postwall_backend::{client::BackendError, memory::MemoryBackend};
    use postwall_common::model::{
        Id,
        post::Post,
        user::{ANONYMOUS_AUTHOR, UserId},
    };
    use std::sync::Arc;
    use time::OffsetDateTime;
    use uuid::Uuid;

    async fn signed_up(backend: &Arc<MemoryBackend>) -> SessionState<MemoryBackend> {
        let mut state = SessionState::init(Arc::clone(backend)).await.unwrap();
        state
            .sign_up("ada@example.com", "ada", "secret1".to_owned(), "secret1")
            .await
            .unwrap();
        state
    }

    fn post_by(author: &str, author_id: Option<UserId>) -> Post {
        Post {
            id: Id::new(1),
            author: author.to_owned(),
            author_id,
            title: "t".to_owned(),
            content: "t".to_owned(),
            file_urls: Vec::new(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            updated_at: None,
            likes: 0,
            comment_count: 0,
            views: 0,
        }
    }

    #[tokio::test]
    async fn anonymous_by_default() {
        let state = SessionState::init(Arc::new(MemoryBackend::new())).await.unwrap();

        assert!(state.session().is_none());
        assert_eq!(state.author_label(), ANONYMOUS_AUTHOR);
        assert!(!state.can_modify(&post_by(ANONYMOUS_AUTHOR, None)));
    }

    #[tokio::test]
    async fn validation_happens_locally() {
        let mut state = SessionState::init(Arc::new(MemoryBackend::new())).await.unwrap();

        let error = state
            .sign_up("ada@example.com", "ada", "secret1".to_owned(), "secret2")
            .await
            .unwrap_err();
        assert!(error.is_validation());

        let error = state.sign_in(" ", "secret1".to_owned()).await.unwrap_err();
        assert!(error.is_validation());
        assert!(state.reset_password("").await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn sign_up_in_and_out() {
        let backend = Arc::new(MemoryBackend::new());
        let mut state = signed_up(&backend).await;
        assert_eq!(state.author_label(), "ada");

        state.sign_out().await.unwrap();
        assert!(state.session().is_none());

        let error = state
            .sign_in("ada@example.com", "wrong!".to_owned())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            crate::error::ClientError::Backend(BackendError::InvalidCredentials)
        ));

        let session = state
            .sign_in("ada@example.com", "secret1".to_owned())
            .await
            .unwrap();
        assert_eq!(session.user.author_label(), "ada");
    }

    #[tokio::test]
    async fn events_from_elsewhere_are_applied() {
        let backend = Arc::new(MemoryBackend::new());
        let mut state = signed_up(&backend).await;
        let mut other = SessionState::init(Arc::clone(&backend)).await.unwrap();
        assert!(other.session().is_some());

        state.sign_out().await.unwrap();
        other.sync();

        assert!(other.session().is_none());
    }

    #[tokio::test]
    async fn ownership_by_id_email_or_name() {
        let backend = Arc::new(MemoryBackend::new());
        let state = signed_up(&backend).await;
        let id = state.author_id();

        assert!(state.can_modify(&post_by("someone", id)));
        assert!(state.can_modify(&post_by("ada@example.com", None)));
        assert!(state.can_modify(&post_by("ada", None)));
        assert!(!state.can_modify(&post_by("grace", Some(UserId(Uuid::nil())))));
    }

    #[tokio::test]
    async fn renaming_updates_the_label() {
        let backend = Arc::new(MemoryBackend::new());
        let mut state = signed_up(&backend).await;

        assert!(state.update_display_name(" ").await.unwrap_err().is_validation());
        state.update_display_name("Ada L.").await.unwrap();

        assert_eq!(state.author_label(), "Ada L.");
    }
}
