//! The small JSON file that keeps the theme and the session between runs.

use crate::error::Result;
use postwall_common::model::{auth::Session, theme::Theme};
use serde::{Deserialize, Serialize};
use std::{io::ErrorKind, path::Path};
use tracing::debug;

#[derive(Clone, Eq, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub theme: Option<Theme>,
    #[serde(default)]
    pub session: Option<Session>,
}

impl Settings {
    /// Reads the file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No settings file found");
                Ok(Self::default())
            }
            Err(error) => Err(error.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load, change and save in one step.
    pub fn update(path: &Path, change: impl FnOnce(&mut Self)) -> Result<Self> {
        let mut settings = Self::load(path)?;
        change(&mut settings);
        settings.save(path)?;
        Ok(settings)
    }
}
