use serde::Deserialize;
use std::path::PathBuf;
use url::Url;

pub const ENV_PREFIX: &str = "POSTWALL_";

/// Settings read from `POSTWALL_*` environment variables.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
pub struct Env {
    pub backend_url: Url,
    pub anon_key: String,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,
    #[serde(default = "default_prefers_dark")]
    pub prefers_dark: bool,
}

fn default_page_size() -> u64 {
    5
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("postwall.json")
}

fn default_prefers_dark() -> bool {
    true
}

impl Env {
    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed(ENV_PREFIX).from_iter(vars)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Env;
    use std::path::Path;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect()
    }

    #[test]
    fn defaults() {
        let env = Env::from_vars(vars(&[
            ("POSTWALL_BACKEND_URL", "https://demo.example.co"),
            ("POSTWALL_ANON_KEY", "anon"),
            ("UNRELATED", "x"),
        ]))
        .unwrap();

        assert_eq!(env.backend_url.as_str(), "https://demo.example.co/");
        assert_eq!(env.page_size, 5);
        assert_eq!(env.settings_path, Path::new("postwall.json"));
        assert!(env.prefers_dark);
    }

    #[test]
    fn overrides_and_missing_keys() {
        let env = Env::from_vars(vars(&[
            ("POSTWALL_BACKEND_URL", "http://localhost:54321"),
            ("POSTWALL_ANON_KEY", "anon"),
            ("POSTWALL_PAGE_SIZE", "10"),
            ("POSTWALL_PREFERS_DARK", "false"),
        ]))
        .unwrap();
        assert_eq!(env.page_size, 10);
        assert!(!env.prefers_dark);

        assert!(Env::from_vars(vars(&[("POSTWALL_ANON_KEY", "anon")])).is_err());
    }
}
