//! Configuration for the provisioner.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use burst_saga::{BackoffPolicy, TryBudget};

use crate::steps::{FunctionIdentity, StepSettings};

/// Provisioner configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cloud API base URL.
    pub api_url: String,

    /// Bearer token for the cloud API.
    pub api_token: Option<String>,

    /// Path of the SQLite state database.
    pub state_path: String,

    /// Driver tick interval in seconds.
    pub tick_interval_secs: u64,

    /// Cloud API request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Gateway calls allowed in flight at once.
    pub max_in_flight: usize,

    /// Retryable failures tolerated per create step.
    pub try_limit: u32,

    /// Base fleet poll interval in seconds.
    pub poll_interval_secs: u64,

    pub lease_function_name: String,
    pub lease_function_arn: Option<String>,
    pub lease_function_sha256: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8080".to_string(),
            api_token: None,
            state_path: "/var/lib/burst/state.db".to_string(),
            tick_interval_secs: 5,
            request_timeout_secs: 30,
            max_in_flight: 16,
            try_limit: TryBudget::DEFAULT_LIMIT,
            poll_interval_secs: 10,
            lease_function_name: "burst-lease-reaper".to_string(),
            lease_function_arn: None,
            lease_function_sha256: None,
            log_level: "info".to_string(),
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: {raw:?}")),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let config = Self {
            api_url: non_empty("BURST_API_URL").unwrap_or(defaults.api_url),
            api_token: non_empty("BURST_API_TOKEN"),
            state_path: non_empty("BURST_STATE_PATH").unwrap_or(defaults.state_path),
            tick_interval_secs: parse_var(
                &lookup,
                "BURST_TICK_INTERVAL",
                defaults.tick_interval_secs,
            )?,
            request_timeout_secs: parse_var(
                &lookup,
                "BURST_REQUEST_TIMEOUT",
                defaults.request_timeout_secs,
            )?,
            max_in_flight: parse_var(&lookup, "BURST_MAX_IN_FLIGHT", defaults.max_in_flight)?,
            try_limit: parse_var(&lookup, "BURST_TRY_LIMIT", defaults.try_limit)?,
            poll_interval_secs: parse_var(
                &lookup,
                "BURST_POLL_INTERVAL",
                defaults.poll_interval_secs,
            )?,
            lease_function_name: non_empty("BURST_LEASE_FUNCTION")
                .unwrap_or(defaults.lease_function_name),
            lease_function_arn: non_empty("BURST_LEASE_FUNCTION_ARN"),
            lease_function_sha256: non_empty("BURST_LEASE_FUNCTION_SHA256"),
            log_level: non_empty("BURST_LOG_LEVEL").unwrap_or(defaults.log_level),
        };

        if config.tick_interval_secs == 0 {
            anyhow::bail!("BURST_TICK_INTERVAL must be at least 1 second");
        }
        Ok(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Step tunables derived from this configuration.
    pub fn step_settings(&self) -> StepSettings {
        StepSettings {
            try_budget: TryBudget::new(self.try_limit),
            retry_backoff: BackoffPolicy::default(),
            poll_backoff: BackoffPolicy {
                base: Duration::from_secs(self.poll_interval_secs.max(1)),
                max: Duration::from_secs(self.poll_interval_secs.max(1) * 6),
                jitter: 0.1,
            },
            lease_function: FunctionIdentity {
                name: self.lease_function_name.clone(),
                arn: self.lease_function_arn.clone(),
                code_sha256: self.lease_function_sha256.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.api_url, "http://127.0.0.1:8080");
        assert_eq!(config.try_limit, 3);
        assert_eq!(config.step_settings().try_budget, TryBudget::new(3));
        assert!(config.api_token.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("BURST_API_URL", "https://cloud.internal"),
            ("BURST_TRY_LIMIT", "5"),
            ("BURST_LEASE_FUNCTION_ARN", "arn:fn:reaper"),
            ("BURST_API_TOKEN", ""),
        ])
        .unwrap();
        assert_eq!(config.api_url, "https://cloud.internal");
        assert_eq!(config.try_limit, 5);
        assert_eq!(
            config.step_settings().lease_function.arn.as_deref(),
            Some("arn:fn:reaper")
        );
        assert!(config.api_token.is_none());
    }

    #[test]
    fn test_malformed_number_is_an_error() {
        let err = load(&[("BURST_MAX_IN_FLIGHT", "lots")]).unwrap_err();
        assert!(err.to_string().contains("BURST_MAX_IN_FLIGHT"));
    }

    #[test]
    fn test_zero_tick_interval_rejected() {
        assert!(load(&[("BURST_TICK_INTERVAL", "0")]).is_err());
    }
}
