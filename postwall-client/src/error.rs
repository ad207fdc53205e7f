use postwall_backend::client::BackendError;
use postwall_common::model::{
    Id, ModelValidationError,
    auth::CredentialsError,
    post::{AttachmentError, EmptyContentError, PostMarker},
    user::InvalidDisplayNameError,
};
use thiserror::Error;

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid input: {0}")]
    Validation(#[from] ModelValidationError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Post with id {0} was not found.")]
    PostNotFound(Id<PostMarker>),
    #[error("The feed is unavailable: {0}")]
    FeedUnavailable(String),
    #[error("Error accessing a local file: {0}")]
    Io(#[from] std::io::Error),
    #[error("The settings file is malformed: {0}")]
    SettingsJson(#[from] serde_json::Error),
}

macro_rules! validation_error {
    ($($error:ty),+ $(,)?) => {
        $(
            impl From<$error> for ClientError {
                fn from(value: $error) -> Self {
                    Self::Validation(value.into())
                }
            }
        )+
    };
}

validation_error!(
    EmptyContentError,
    AttachmentError,
    CredentialsError,
    InvalidDisplayNameError,
);

impl ClientError {
    /// Whether the input was rejected before anything reached the backend.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, ClientError::Validation(_))
    }
}
