//! Caller-supplied run request, loadable from a YAML or JSON file.
//!
//! ```yaml
//! workspace: prod
//! organization: acme
//! apply:
//!   manual_confirm: false
//!   retry_attempts: 3
//! destroy:
//!   wait_for_run: true
//! polling:
//!   backoff_min_ms: 1000
//!   backoff_max_ms: 3000
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::backoff;
use crate::error::ConfigError;
use crate::poller::PollSettings;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MIN_SECS: u64 = 1;
pub const DEFAULT_RETRY_BACKOFF_MAX_SECS: u64 = 30;

fn default_true() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_backoff_min() -> u64 {
    DEFAULT_RETRY_BACKOFF_MIN_SECS
}

fn default_retry_backoff_max() -> u64 {
    DEFAULT_RETRY_BACKOFF_MAX_SECS
}

/// Settings for one direction of run (apply or destroy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default)]
    pub manual_confirm: bool,
    #[serde(default = "default_true")]
    pub retry: bool,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Seconds.
    #[serde(default = "default_retry_backoff_min")]
    pub retry_backoff_min: u64,
    /// Seconds.
    #[serde(default = "default_retry_backoff_max")]
    pub retry_backoff_max: u64,
    #[serde(default = "default_true")]
    pub wait_for_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            manual_confirm: false,
            retry: true,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_backoff_min: DEFAULT_RETRY_BACKOFF_MIN_SECS,
            retry_backoff_max: DEFAULT_RETRY_BACKOFF_MAX_SECS,
            wait_for_run: true,
            message: None,
        }
    }
}

impl RunOptions {
    /// Wait before retry `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        backoff(
            self.retry_backoff_min.saturating_mul(1_000),
            self.retry_backoff_max.saturating_mul(1_000),
            attempt,
        )
    }

    fn validate(&self, label: &str) -> Result<(), ConfigError> {
        if self.retry_backoff_min > self.retry_backoff_max {
            return Err(ConfigError::Invalid(format!(
                "{label}.retry_backoff_min ({}) is greater than {label}.retry_backoff_max ({})",
                self.retry_backoff_min, self.retry_backoff_max
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub workspace: String,
    pub organization: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply: Option<RunOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destroy: Option<RunOptions>,
    #[serde(default)]
    pub polling: PollSettings,
}

impl RunRequest {
    pub fn new(workspace: impl Into<String>, organization: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            organization: organization.into(),
            apply: None,
            destroy: None,
            polling: PollSettings::default(),
        }
    }

    /// The block selected by `is_destroy`; `None` makes the invocation a no-op.
    pub fn options(&self, is_destroy: bool) -> Option<&RunOptions> {
        if is_destroy {
            self.destroy.as_ref()
        } else {
            self.apply.as_ref()
        }
    }

    pub fn options_mut(&mut self, is_destroy: bool) -> &mut Option<RunOptions> {
        if is_destroy {
            &mut self.destroy
        } else {
            &mut self.apply
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workspace.trim().is_empty() {
            return Err(ConfigError::Invalid("workspace must not be empty".to_string()));
        }
        if self.organization.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "organization must not be empty".to_string(),
            ));
        }
        if self.polling.backoff_min_ms > self.polling.backoff_max_ms {
            return Err(ConfigError::Invalid(format!(
                "polling.backoff_min_ms ({}) is greater than polling.backoff_max_ms ({})",
                self.polling.backoff_min_ms, self.polling.backoff_max_ms
            )));
        }
        if let Some(apply) = &self.apply {
            apply.validate("apply")?;
        }
        if let Some(destroy) = &self.destroy {
            destroy.validate("destroy")?;
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        raw.parse()
    }
}

/// Parses YAML (and therefore JSON) text.
impl FromStr for RunRequest {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(serde_yaml::from_str(raw)?)
    }
}
