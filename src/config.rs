//! Environment-driven configuration
//!
//! Every setting has a default, so an empty environment yields a working
//! configuration for a stock node.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::controller::error::{Error, Result};
use crate::controller::reconciler::ReconciliationMode;
use crate::retry::{DEFAULT_ATTEMPTS, DEFAULT_DELAY, RetryPolicy};

pub const ENV_PROFILE: &str = "PSP_RECONCILER_PROFILE";
pub const ENV_KUBECONFIG: &str = "PSP_RECONCILER_KUBECONFIG";
pub const ENV_API_TIMEOUT: &str = "PSP_RECONCILER_API_TIMEOUT_SECS";
pub const ENV_DEPLOY_ATTEMPTS: &str = "PSP_RECONCILER_DEPLOY_ATTEMPTS";
pub const ENV_DEPLOY_DELAY: &str = "PSP_RECONCILER_DEPLOY_DELAY_SECS";
pub const ENV_POLL_INTERVAL: &str = "PSP_RECONCILER_POLL_INTERVAL_SECS";
pub const ENV_DEADLINE: &str = "PSP_RECONCILER_DEADLINE_SECS";
pub const ENV_LOG_FORMAT: &str = "PSP_RECONCILER_LOG_FORMAT";

/// Admin kubeconfig written by the server on a stock node
pub const DEFAULT_KUBECONFIG: &str = "/etc/rancher/rke2/rke2.yaml";
/// Timeout applied to every API request
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);
/// Sleep between API availability probes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::InvalidConfig(format!(
                "{}: unknown log format {:?}",
                ENV_LOG_FORMAT, other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Security profile; empty selects CIS mode
    pub profile: String,
    pub kubeconfig: PathBuf,
    pub api_timeout: Duration,
    pub deploy_attempts: u32,
    pub deploy_delay: Duration,
    pub poll_interval: Duration,
    /// Give up on the whole run after this long
    pub deadline: Option<Duration>,
    pub log_format: LogFormat,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            profile: String::new(),
            kubeconfig: PathBuf::from(DEFAULT_KUBECONFIG),
            api_timeout: DEFAULT_API_TIMEOUT,
            deploy_attempts: DEFAULT_ATTEMPTS,
            deploy_delay: DEFAULT_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            deadline: None,
            log_format: LogFormat::Text,
        }
    }
}

impl ReconcilerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let kubeconfig = lookup(ENV_KUBECONFIG)
            .or_else(|| lookup("KUBECONFIG"))
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.kubeconfig);

        let deploy_attempts = parse_var(&lookup, ENV_DEPLOY_ATTEMPTS)?
            .unwrap_or(defaults.deploy_attempts);
        if deploy_attempts == 0 {
            return Err(Error::InvalidConfig(format!(
                "{} must be at least 1",
                ENV_DEPLOY_ATTEMPTS
            )));
        }

        let poll_interval =
            parse_secs(&lookup, ENV_POLL_INTERVAL)?.unwrap_or(defaults.poll_interval);
        if poll_interval.is_zero() {
            return Err(Error::InvalidConfig(format!(
                "{} must be at least 1",
                ENV_POLL_INTERVAL
            )));
        }

        Ok(Self {
            profile: lookup(ENV_PROFILE).unwrap_or_default(),
            kubeconfig,
            api_timeout: parse_secs(&lookup, ENV_API_TIMEOUT)?.unwrap_or(defaults.api_timeout),
            deploy_attempts,
            deploy_delay: parse_secs(&lookup, ENV_DEPLOY_DELAY)?.unwrap_or(defaults.deploy_delay),
            poll_interval,
            deadline: parse_secs(&lookup, ENV_DEADLINE)?,
            log_format: lookup(ENV_LOG_FORMAT)
                .map(|v| v.parse::<LogFormat>())
                .transpose()?
                .unwrap_or_default(),
        })
    }

    pub fn mode(&self) -> ReconciliationMode {
        ReconciliationMode::from_profile(&self.profile)
    }

    /// Bounded retry policy used for every deploy
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::bounded(self.deploy_attempts, self.deploy_delay)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::InvalidConfig(format!("{}={:?}: {}", key, raw, e))),
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_var::<F, u64>(lookup, key)?.map(Duration::from_secs))
}
