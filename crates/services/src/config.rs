use std::env;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

pub const BASE_URL_VAR: &str = "LEARN_API_BASE_URL";
pub const TOKEN_VAR: &str = "LEARN_API_TOKEN";
pub const TIMEOUT_VAR: &str = "LEARN_API_TIMEOUT_SECS";

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Connection settings for the remote progress store.
#[derive(Clone, Debug)]
pub struct ProgressApiConfig {
    pub base_url: Url,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl ProgressApiConfig {
    /// Build a config for `base_url` with no token and the default timeout.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the URL does not parse or cannot carry a path.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let base_url = Url::parse(base_url.trim())?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::Invalid {
                name: BASE_URL_VAR,
                reason: format!("{base_url} cannot carry a path"),
            });
        }
        Ok(Self {
            base_url,
            token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = if token.trim().is_empty() {
            None
        } else {
            Some(token)
        };
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read `LEARN_API_BASE_URL`, `LEARN_API_TOKEN` and `LEARN_API_TIMEOUT_SECS`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the base URL is missing or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| env::var(name).ok())
    }

    pub(crate) fn from_vars(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let base_url = lookup(BASE_URL_VAR)
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::Missing { name: BASE_URL_VAR })?;
        let mut config = Self::new(&base_url)?;

        if let Some(token) = lookup(TOKEN_VAR) {
            config = config.with_token(token);
        }
        if let Some(raw) = lookup(TIMEOUT_VAR) {
            let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name: TIMEOUT_VAR,
                reason: format!("expected whole seconds, got {raw:?}"),
            })?;
            config = config.with_timeout(Duration::from_secs(secs.max(1)));
        }
        Ok(config)
    }

    /// Resolve an endpoint below the base URL; segments are percent-encoded.
    #[must_use]
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_base_url_is_reported() {
        let err = ProgressApiConfig::from_vars(vars(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { name: BASE_URL_VAR }));
    }

    #[test]
    fn reads_token_and_timeout() {
        let config = ProgressApiConfig::from_vars(vars(&[
            (BASE_URL_VAR, "https://learn.example.com/api"),
            (TOKEN_VAR, "secret"),
            (TIMEOUT_VAR, "3"),
        ]))
        .unwrap();
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.timeout, Duration::from_secs(3));
    }

    #[test]
    fn rejects_bad_timeout() {
        let err = ProgressApiConfig::from_vars(vars(&[
            (BASE_URL_VAR, "https://learn.example.com"),
            (TIMEOUT_VAR, "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: TIMEOUT_VAR, .. }));
    }

    #[test]
    fn blank_token_is_dropped() {
        let config = ProgressApiConfig::new("https://learn.example.com")
            .unwrap()
            .with_token("  ");
        assert!(config.token.is_none());
    }

    #[test]
    fn endpoint_appends_encoded_segments() {
        let config = ProgressApiConfig::new("https://learn.example.com/api/").unwrap();
        let url = config.endpoint(&["progress", "lesson", "a b"]);
        assert_eq!(
            url.as_str(),
            "https://learn.example.com/api/progress/lesson/a%20b"
        );

        let bare = ProgressApiConfig::new("https://learn.example.com").unwrap();
        assert_eq!(
            bare.endpoint(&["progress", "complete", "l1"]).as_str(),
            "https://learn.example.com/progress/complete/l1"
        );
    }

    #[test]
    fn rejects_non_base_urls() {
        assert!(ProgressApiConfig::new("mailto:someone@example.com").is_err());
        assert!(ProgressApiConfig::new("not a url").is_err());
    }
}
