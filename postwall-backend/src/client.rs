use crate::change::{ChangeFilter, ChangeStream};
use async_trait::async_trait;
use postwall_common::model::{
    Id, ModelValidationError,
    auth::{AuthEvent, Credentials, Session, SignUp},
    comment::{Comment, NewComment},
    page::{Page, PageRange},
    post::{NewPost, Post, PostEdit, PostMarker},
    sort::SortOrder,
    user::{DisplayName, User},
};
use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;

pub type Result<T, E = BackendError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("An object from the backend was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("The backend replied with status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("The backend sent malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid backend URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("The backend URL {0} cannot carry a path")]
    InvalidBaseUrl(Url),
    #[error("The backend reply lacked an exact row count")]
    MissingCount,
    #[error("The backend reply did not contain the written row")]
    EmptyReply,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("This action requires a signed in user")]
    NotSignedIn,
    #[error("Simulated failure of {0}")]
    Injected(&'static str),
}

/// Row queries and writes against the `posts` and `comments` tables.
#[async_trait]
pub trait Database: Send + Sync {
    /// One page of posts in `sort` order together with the exact post count.
    async fn fetch_posts_page(&self, sort: SortOrder, range: PageRange) -> Result<Page<Post>>;

    async fn fetch_post(&self, id: Id<PostMarker>) -> Result<Option<Post>>;

    async fn fetch_top_posts(&self, sort: SortOrder, limit: u64) -> Result<Vec<Post>>;

    /// Case-insensitive substring match on body or author, newest first.
    async fn search_posts(&self, term: &str, limit: u64) -> Result<Vec<Post>>;

    async fn count_posts(&self) -> Result<u64>;

    async fn count_comments(&self) -> Result<u64>;

    async fn insert_post(&self, post: &NewPost) -> Result<Post>;

    /// Rewrites body and attachments and stamps `updated_at`.
    async fn update_post(&self, id: Id<PostMarker>, edit: &PostEdit) -> Result<Option<Post>>;

    /// Plain column write, not an atomic increment.
    async fn set_post_views(&self, id: Id<PostMarker>, views: u64) -> Result<()>;

    async fn delete_post(&self, id: Id<PostMarker>) -> Result<()>;

    async fn increment_post_likes(&self, id: Id<PostMarker>, delta: i64) -> Result<()>;

    async fn increment_comment_count(&self, id: Id<PostMarker>, delta: i64) -> Result<()>;

    /// All comments of a post, oldest first.
    async fn fetch_comments(&self, post_id: Id<PostMarker>) -> Result<Vec<Comment>>;

    async fn insert_comment(&self, comment: &NewComment) -> Result<Comment>;
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;

    fn public_url(&self, bucket: &str, name: &str) -> Result<Url>;
}

#[async_trait]
pub trait Auth: Send + Sync {
    /// Returns `None` when the account still has to confirm its email.
    async fn sign_up(&self, sign_up: &SignUp) -> Result<Option<Session>>;

    async fn sign_in(&self, credentials: &Credentials) -> Result<Session>;

    async fn sign_out(&self) -> Result<()>;

    /// The current session, refreshed first if its token is about to expire.
    async fn current_session(&self) -> Result<Option<Session>>;

    async fn reset_password(&self, email: &str) -> Result<()>;

    async fn update_display_name(&self, display_name: &DisplayName) -> Result<User>;

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;
}

#[async_trait]
pub trait Realtime: Send + Sync {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeStream>;
}

/// Everything the client needs from the hosted service.
pub trait Backend: Database + Storage + Auth + Realtime {}

impl<T: Database + Storage + Auth + Realtime> Backend for T {}
