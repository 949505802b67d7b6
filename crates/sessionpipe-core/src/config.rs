//! Client configuration.
//!
//! Settings come from the process environment (a `.env` file is loaded by
//! the CLI before this runs):
//!
//! | Variable                  | Default                     |
//! |---------------------------|-----------------------------|
//! | `SESSIONPIPE_API_URL`     | `http://localhost:8000/api` |
//! | `SESSIONPIPE_TIMEOUT_MS`  | `30000`                     |
//! | `SESSIONPIPE_CSRF_HEADER` | `X-CSRF-Token`              |
//! | `SESSIONPIPE_ENV`         | `production`                |
//!
//! `SESSIONPIPE_ENV=development` turns on verbose request logging.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Application name used for the storage directory
const APP_NAME: &str = "sessionpipe";

/// Storage file name in the cache directory
const STORAGE_FILE: &str = "session-store.json";

const ENV_API_URL: &str = "SESSIONPIPE_API_URL";
const ENV_TIMEOUT_MS: &str = "SESSIONPIPE_TIMEOUT_MS";
const ENV_CSRF_HEADER: &str = "SESSIONPIPE_CSRF_HEADER";
const ENV_ENVIRONMENT: &str = "SESSIONPIPE_ENV";

const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// 30s allows for slow API responses while failing fast enough for good UX.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

const DEFAULT_CSRF_HEADER: &str = "X-CSRF-Token";

const DEVELOPMENT_ENV: &str = "development";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_base_url: String,
    pub timeout: Duration,
    pub csrf_header: String,
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            csrf_header: DEFAULT_CSRF_HEADER.to_string(),
            verbose_logging: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any variable lookup. Unset or blank variables
    /// fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(url) = get(ENV_API_URL) {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                bail!("{} must be an http(s) URL, got {:?}", ENV_API_URL, url);
            }
            config.api_base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(timeout) = get(ENV_TIMEOUT_MS) {
            let millis: u64 = timeout
                .parse()
                .with_context(|| format!("{} must be a whole number of milliseconds", ENV_TIMEOUT_MS))?;
            config.timeout = Duration::from_millis(millis);
        }

        if let Some(header) = get(ENV_CSRF_HEADER) {
            config.csrf_header = header;
        }

        config.verbose_logging = get(ENV_ENVIRONMENT)
            .map(|env| env.eq_ignore_ascii_case(DEVELOPMENT_ENV))
            .unwrap_or(false);

        Ok(config)
    }

    /// Default location of the persistent session store.
    pub fn storage_path() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join(STORAGE_FILE))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).expect("defaults should load");
        assert_eq!(config, Config::default());
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_reads_all_variables() {
        let config = Config::from_lookup(lookup(&[
            ("SESSIONPIPE_API_URL", "https://api.example.com/v1/"),
            ("SESSIONPIPE_TIMEOUT_MS", "2500"),
            ("SESSIONPIPE_CSRF_HEADER", "X-XSRF-TOKEN"),
            ("SESSIONPIPE_ENV", "Development"),
        ]))
        .expect("config should load");

        assert_eq!(config.api_base_url, "https://api.example.com/v1");
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.csrf_header, "X-XSRF-TOKEN");
        assert!(config.verbose_logging);
    }

    #[test]
    fn test_production_is_quiet() {
        let config = Config::from_lookup(lookup(&[("SESSIONPIPE_ENV", "production")]))
            .expect("config should load");
        assert!(!config.verbose_logging);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::from_lookup(lookup(&[("SESSIONPIPE_TIMEOUT_MS", "soon")])).is_err());
        assert!(Config::from_lookup(lookup(&[("SESSIONPIPE_API_URL", "ftp://example.com")])).is_err());
    }
}
