use std::env;

use thiserror::Error;
use url::Url;

pub const DEFAULT_PAGE_URL: &str = "http://127.0.0.1:3000/";
pub const DEFAULT_WS_PATH: &str = "/ws";
pub const DEFAULT_SESSION_COOKIE: &str = "_csrf_token";
pub const DEFAULT_MAX_RELOADS: u32 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid url: {source}")]
    InvalidUrl {
        var: &'static str,
        source: url::ParseError,
    },
    #[error("{var} must be a non-negative integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
}

/// Riptide client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Page to load first; the live channel is derived from its address.
    pub page_url: Url,
    pub ws_path: String,
    /// Cookie carrying the session id between page load and handshake.
    pub session_cookie: String,
    /// How many server-requested reloads to follow before giving up.
    pub max_reloads: u32,
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(raw) = env::var("RIPTIDE_PAGE_URL") {
            config.page_url = parse_url("RIPTIDE_PAGE_URL", &raw)?;
        }
        if let Ok(path) = env::var("RIPTIDE_WS_PATH") {
            config.ws_path = normalize_path(&path);
        }
        if let Ok(cookie) = env::var("RIPTIDE_SESSION_COOKIE") {
            config.session_cookie = cookie;
        }
        if let Ok(raw) = env::var("RIPTIDE_MAX_RELOADS") {
            config.max_reloads = raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
                var: "RIPTIDE_MAX_RELOADS",
                value: raw.clone(),
            })?;
        }
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_url: Url::parse(DEFAULT_PAGE_URL).expect("default page url is valid"),
            ws_path: DEFAULT_WS_PATH.to_string(),
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            max_reloads: DEFAULT_MAX_RELOADS,
        }
    }
}

pub fn parse_url(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    // Normalize localhost to IPv4 to avoid IPv6 (::1) preference
    let raw = raw.trim().replacen("://localhost", "://127.0.0.1", 1);
    Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl { var, source })
}

pub fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Mutex to ensure environment variable tests don't run in parallel
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const VARS: &[&str] = &[
        "RIPTIDE_PAGE_URL",
        "RIPTIDE_WS_PATH",
        "RIPTIDE_SESSION_COOKIE",
        "RIPTIDE_MAX_RELOADS",
    ];

    fn clear_vars() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.page_url.as_str(), "http://127.0.0.1:3000/");
        assert_eq!(config.ws_path, "/ws");
        assert_eq!(config.session_cookie, "_csrf_token");
        assert_eq!(config.max_reloads, 3);
    }

    #[test]
    fn test_config_from_env_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();
        assert_eq!(Config::from_env().unwrap(), Config::default());
    }

    #[test]
    fn test_config_from_env_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();
        unsafe {
            env::set_var("RIPTIDE_PAGE_URL", "https://localhost:8443/app");
            env::set_var("RIPTIDE_WS_PATH", "live");
            env::set_var("RIPTIDE_SESSION_COOKIE", "sid");
            env::set_var("RIPTIDE_MAX_RELOADS", "0");
        }
        let config = Config::from_env().unwrap();
        clear_vars();

        assert_eq!(config.page_url.as_str(), "https://127.0.0.1:8443/app");
        assert_eq!(config.ws_path, "/live");
        assert_eq!(config.session_cookie, "sid");
        assert_eq!(config.max_reloads, 0);
    }

    #[test]
    fn test_config_from_env_rejects_bad_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();
        unsafe {
            env::set_var("RIPTIDE_MAX_RELOADS", "lots");
        }
        let result = Config::from_env();
        clear_vars();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidNumber { var: "RIPTIDE_MAX_RELOADS", .. })
        ));

        assert!(matches!(
            parse_url("RIPTIDE_PAGE_URL", "not a url"),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }
}
