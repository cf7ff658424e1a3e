//! Connection settings for the control-plane client.
//!
//! Read from the environment: `TFE_HOSTNAME` (default `app.terraform.io`),
//! `TFE_TOKEN` (required) and `TFE_SSL_SKIP_VERIFY`.

use std::fmt;
use std::time::Duration;

use crate::error::{Result, ServiceError};

pub const DEFAULT_HOSTNAME: &str = "app.terraform.io";
const API_PATH: &str = "/api/v2";

#[derive(Clone)]
pub struct ClientConfig {
    pub hostname: String,
    pub token: String,
    pub ssl_skip_verify: bool,
    pub timeout: Duration,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("hostname", &self.hostname)
            .field("token", &"[redacted]")
            .field("ssl_skip_verify", &self.ssl_skip_verify)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let hostname = lookup("TFE_HOSTNAME")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_HOSTNAME.to_string());
        let token = lookup("TFE_TOKEN")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ServiceError::InvalidConfig("TFE_TOKEN is not set".to_string()))?;
        let ssl_skip_verify = lookup("TFE_SSL_SKIP_VERIFY")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Ok(Self {
            hostname,
            token,
            ssl_skip_verify,
            timeout: Duration::from_secs(30),
        })
    }

    /// `https://<hostname>/api/v2`, keeping an explicit scheme if one was given.
    pub fn base_url(&self) -> String {
        let host = self.hostname.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}{API_PATH}")
        } else {
            format!("https://{host}{API_PATH}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_hostname_and_requires_token() {
        let config = ClientConfig::from_lookup(lookup(&[("TFE_TOKEN", "abc")])).unwrap();
        assert_eq!(config.hostname, DEFAULT_HOSTNAME);
        assert_eq!(config.base_url(), "https://app.terraform.io/api/v2");
        assert!(!config.ssl_skip_verify);

        let err = ClientConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("TFE_TOKEN"));
    }

    #[test]
    fn keeps_explicit_scheme() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("TFE_TOKEN", "abc"),
            ("TFE_HOSTNAME", "http://127.0.0.1:8080/"),
            ("TFE_SSL_SKIP_VERIFY", "true"),
        ]))
        .unwrap();
        assert_eq!(config.base_url(), "http://127.0.0.1:8080/api/v2");
        assert!(config.ssl_skip_verify);
    }

    #[test]
    fn debug_output_hides_token() {
        let config = ClientConfig::from_lookup(lookup(&[("TFE_TOKEN", "secret-token")])).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("[redacted]"));
    }
}
