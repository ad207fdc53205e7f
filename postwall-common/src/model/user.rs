use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use std::fmt::Display;
use thiserror::Error;
use uuid::Uuid;

pub const DISPLAY_NAME_MAX_LEN: usize = 50;
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

/// Id of an account, assigned by the auth service.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct User {
    pub id: UserId,
    pub email: Option<String>,
    pub display_name: Option<DisplayName>,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
#[serde(transparent)]
pub struct DisplayName(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The display name is invalid: {0:?}")]
pub struct InvalidDisplayNameError(String);

impl DisplayName {
    pub fn new(name: String) -> Result<Self, InvalidDisplayNameError> {
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed.chars().count() > DISPLAY_NAME_MAX_LEN {
            Err(InvalidDisplayNameError(name))
        } else {
            Ok(DisplayName(trimmed.to_owned()))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl<'de> Deserialize<'de> for DisplayName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        DisplayName::new(inner)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"DisplayName"))
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl User {
    /// The label shown as a post or comment author.
    #[must_use]
    pub fn author_label(&self) -> &str {
        self.display_name
            .as_ref()
            .map(DisplayName::get)
            .or(self.email.as_deref())
            .unwrap_or(ANONYMOUS_AUTHOR)
    }
}
