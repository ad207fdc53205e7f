use crate::{
    client::{Auth, BackendError, Result},
    record::{SessionRecord, SignUpReply, UserRecord},
    rest::{RestBackend, check},
};
use async_trait::async_trait;
use postwall_common::model::{
    auth::{AuthEvent, AuthEventKind, Credentials, Session, SignUp},
    user::{DisplayName, User},
};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// Tokens closer than this to expiry are refreshed before use.
const REFRESH_MARGIN: Duration = Duration::seconds(60);

#[derive(Serialize)]
struct PasswordGrant<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshGrant<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct Metadata<'a> {
    username: &'a str,
}

#[derive(Serialize)]
struct SignUpBody<'a> {
    email: &'a str,
    password: &'a str,
    data: Metadata<'a>,
}

#[derive(Serialize)]
struct RecoverBody<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct UserUpdateBody<'a> {
    data: Metadata<'a>,
}

impl RestBackend {
    async fn token(&self, grant_type: &str, body: &(impl Serialize + Sync)) -> Result<Session> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);
        let request = self.request(Method::POST, url).await.json(body);
        let record: SessionRecord = check(request.send().await?).await?.json().await?;

        Ok(record.into_session(OffsetDateTime::now_utc())?)
    }

    async fn store_session(&self, kind: AuthEventKind, session: Option<Session>) {
        self.set_session(session.clone()).await;
        self.emit_auth(AuthEvent { kind, session });
    }

    async fn refresh(&self, session: &Session) -> Option<Session> {
        let grant = RefreshGrant {
            refresh_token: session.refresh_token.expose(),
        };

        match self.token("refresh_token", &grant).await {
            Ok(refreshed) => {
                info!("Refreshed access token");
                self.store_session(AuthEventKind::TokenRefreshed, Some(refreshed.clone()))
                    .await;
                Some(refreshed)
            }
            Err(error) => {
                warn!(%error, "Could not refresh session, signing out");
                self.store_session(AuthEventKind::SignedOut, None).await;
                None
            }
        }
    }
}

#[async_trait]
impl Auth for RestBackend {
    #[instrument(skip_all, fields(email = %sign_up.credentials.email))]
    async fn sign_up(&self, sign_up: &SignUp) -> Result<Option<Session>> {
        let body = SignUpBody {
            email: &sign_up.credentials.email,
            password: &sign_up.credentials.password,
            data: Metadata {
                username: sign_up.display_name.get(),
            },
        };
        let request = self
            .request(Method::POST, self.endpoint("auth/v1/signup")?)
            .await
            .json(&body);
        let reply: SignUpReply = check(request.send().await?).await?.json().await?;

        match reply {
            SignUpReply::Session(record) => {
                let session = record.into_session(OffsetDateTime::now_utc())?;
                info!("Signed up");
                self.store_session(AuthEventKind::SignedIn, Some(session.clone()))
                    .await;
                Ok(Some(session))
            }
            SignUpReply::User(_) => {
                info!("Signed up, awaiting email confirmation");
                Ok(None)
            }
        }
    }

    #[instrument(skip_all, fields(email = %credentials.email))]
    async fn sign_in(&self, credentials: &Credentials) -> Result<Session> {
        let grant = PasswordGrant {
            email: &credentials.email,
            password: &credentials.password,
        };
        let session = match self.token("password", &grant).await {
            Err(BackendError::Api { status, .. })
                if status == StatusCode::BAD_REQUEST.as_u16() =>
            {
                return Err(BackendError::InvalidCredentials);
            }
            result => result?,
        };
        info!("Signed in");
        self.store_session(AuthEventKind::SignedIn, Some(session.clone()))
            .await;

        Ok(session)
    }

    async fn sign_out(&self) -> Result<()> {
        let remote = if self.session.read().await.is_some() {
            let request = self
                .request(Method::POST, self.endpoint("auth/v1/logout")?)
                .await;
            match request.send().await {
                Ok(response) => check(response).await.map(drop),
                Err(error) => Err(error.into()),
            }
        } else {
            Ok(())
        };

        // The local session goes away even if the service could not be told.
        self.store_session(AuthEventKind::SignedOut, None).await;
        info!("Signed out");

        remote
    }

    async fn current_session(&self) -> Result<Option<Session>> {
        let Some(session) = self.stored_session().await else {
            return Ok(None);
        };
        if !session.expires_within(OffsetDateTime::now_utc(), REFRESH_MARGIN) {
            return Ok(Some(session));
        }

        Ok(self.refresh(&session).await)
    }

    #[instrument(skip(self))]
    async fn reset_password(&self, email: &str) -> Result<()> {
        let request = self
            .request(Method::POST, self.endpoint("auth/v1/recover")?)
            .await
            .json(&RecoverBody { email });
        check(request.send().await?).await?;
        info!("Requested password reset");

        Ok(())
    }

    async fn update_display_name(&self, display_name: &DisplayName) -> Result<User> {
        let Some(mut session) = self.current_session().await? else {
            return Err(BackendError::NotSignedIn);
        };
        let body = UserUpdateBody {
            data: Metadata {
                username: display_name.get(),
            },
        };
        let request = self
            .request(Method::PUT, self.endpoint("auth/v1/user")?)
            .await
            .json(&body);
        let record: UserRecord = check(request.send().await?).await?.json().await?;
        let user = User::try_from(record)?;

        session.user = user.clone();
        self.store_session(AuthEventKind::UserUpdated, Some(session))
            .await;

        Ok(user)
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_events.subscribe()
    }
}
