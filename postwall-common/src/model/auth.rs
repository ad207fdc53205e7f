use crate::model::user::{DisplayName, User};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use thiserror::Error;
use time::{Duration, OffsetDateTime};

pub const PASSWORD_MIN_LEN: usize = 6;

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
pub enum CredentialsError {
    #[error("An email address is required")]
    MissingEmail,
    #[error("A display name is required")]
    MissingDisplayName,
    #[error("A password is required")]
    MissingPassword,
    #[error("The passwords do not match")]
    PasswordMismatch,
    #[error("The password must be at least {PASSWORD_MIN_LEN} characters long")]
    PasswordTooShort,
}

#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefreshToken(String);

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct Session {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub user: User,
}

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct SignUp {
    pub credentials: Credentials,
    pub display_name: DisplayName,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Pushed by the auth service whenever the session changes.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<Session>,
}

macro_rules! secret_string {
    ($name:ident) => {
        impl $name {
            #[must_use]
            pub fn new(secret: String) -> Self {
                Self(secret)
            }

            #[must_use]
            pub fn expose(&self) -> &str {
                &self.0
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&"[redacted]").finish()
            }
        }
    };
}

secret_string!(AccessToken);
secret_string!(RefreshToken);

impl Session {
    /// Whether the access token runs out within `margin` of `now`.
    #[must_use]
    pub fn expires_within(&self, now: OffsetDateTime, margin: Duration) -> bool {
        self.expires_at - margin <= now
    }
}

impl Credentials {
    pub fn new(email: &str, password: String) -> Result<Self, CredentialsError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(CredentialsError::MissingEmail);
        }
        if password.is_empty() {
            return Err(CredentialsError::MissingPassword);
        }

        Ok(Self {
            email: email.to_owned(),
            password,
        })
    }
}

impl SignUp {
    pub fn new(
        email: &str,
        display_name: &str,
        password: String,
        password_confirmation: &str,
    ) -> Result<Self, CredentialsError> {
        if email.trim().is_empty() {
            return Err(CredentialsError::MissingEmail);
        }
        let display_name = DisplayName::new(display_name.to_owned())
            .map_err(|_| CredentialsError::MissingDisplayName)?;
        if password.is_empty() {
            return Err(CredentialsError::MissingPassword);
        }
        if password != password_confirmation {
            return Err(CredentialsError::PasswordMismatch);
        }
        if password.chars().count() < PASSWORD_MIN_LEN {
            return Err(CredentialsError::PasswordTooShort);
        }

        Ok(Self {
            credentials: Credentials::new(email, password)?,
            display_name,
        })
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .finish()
    }
}

impl Debug for SignUp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignUp")
            .field("credentials", &self.credentials)
            .field("display_name", &self.display_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::model::auth::{AccessToken, Credentials, CredentialsError, SignUp};

    #[test]
    fn sign_in_validation() {
        assert_eq!(
            Credentials::new("  ", "secret".to_owned()),
            Err(CredentialsError::MissingEmail)
        );
        assert_eq!(
            Credentials::new("a@example.com", String::new()),
            Err(CredentialsError::MissingPassword)
        );
        assert_eq!(
            Credentials::new(" a@example.com ", "x".to_owned())
                .unwrap()
                .email,
            "a@example.com"
        );
    }

    #[test]
    fn sign_up_checks_in_order() {
        let sign_up = |email, name, password: &str, confirmation| {
            SignUp::new(email, name, password.to_owned(), confirmation).map(|_| ())
        };

        assert_eq!(
            sign_up("", "", "", "x"),
            Err(CredentialsError::MissingEmail)
        );
        assert_eq!(
            sign_up("a@b.c", " ", "", "x"),
            Err(CredentialsError::MissingDisplayName)
        );
        assert_eq!(
            sign_up("a@b.c", "al", "", "x"),
            Err(CredentialsError::MissingPassword)
        );
        assert_eq!(
            sign_up("a@b.c", "al", "abc", "abd"),
            Err(CredentialsError::PasswordMismatch)
        );
        assert_eq!(
            sign_up("a@b.c", "al", "abc", "abc"),
            Err(CredentialsError::PasswordTooShort)
        );
        assert_eq!(sign_up("a@b.c", "al", "abcdef", "abcdef"), Ok(()));
    }

    #[test]
    fn tokens_are_redacted() {
        let token = AccessToken::new("very-secret".to_owned());
        assert!(!format!("{token:?}").contains("very-secret"));
        assert_eq!(token.expose(), "very-secret");
    }
}
