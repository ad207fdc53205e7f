use crate::{error::Result, settings::Settings};
use postwall_common::model::theme::Theme;
use std::path::{Path, PathBuf};
use tracing::info;

/// The light/dark choice, remembered in the settings file.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct ThemeState {
    theme: Theme,
    settings_path: PathBuf,
}

impl ThemeState {
    /// Uses the saved choice, or the system preference if nothing was saved.
    pub fn load(settings_path: &Path, prefers_dark: bool) -> Result<Self> {
        let theme = Settings::load(settings_path)?
            .theme
            .unwrap_or_else(|| Theme::from_dark_preference(prefers_dark));

        Ok(Self {
            theme,
            settings_path: settings_path.to_owned(),
        })
    }

    #[must_use]
    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn toggle(&mut self) -> Result<Theme> {
        let theme = self.theme.toggled();
        Settings::update(&self.settings_path, |settings| settings.theme = Some(theme))?;
        self.theme = theme;
        info!(%theme, "Theme changed");

        Ok(theme)
    }
}

#[cfg(test)]
mod tests {
    use crate::theme::ThemeState;
    use postwall_common::model::theme::Theme;

    #[test]
    fn falls_back_to_preference_then_persists() {
        let path = std::env::temp_dir().join(format!("postwall-theme-{}.json", std::process::id()));

        assert_eq!(ThemeState::load(&path, false).unwrap().theme(), Theme::Light);
        let mut state = ThemeState::load(&path, true).unwrap();
        assert_eq!(state.theme(), Theme::Dark);

        assert_eq!(state.toggle().unwrap(), Theme::Light);
        assert_eq!(ThemeState::load(&path, true).unwrap().theme(), Theme::Light);

        std::fs::remove_file(&path).unwrap();
    }
}
