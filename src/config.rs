//! Deployer configuration
//!
//! Defaults are the values every deploy has used so far. `from_env` overlays
//! `BLUEGREEN_*` environment variables on top of them.

use crate::deployer::colour::Colour;
use crate::deployer::retry::RetryPolicy;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_UPGRADE_TIMEOUT: Duration = Duration::from_secs(300);
/// Rollbacks wait for the whole previous revision to come back
pub const DEFAULT_ROLLBACK_TIMEOUT: Duration = Duration::from_secs(900);
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_ROLLBACK_HISTORY_MAX: usize = 50;
pub const DEFAULT_MIN_LIVE_REPLICAS: i32 = 1;
pub const DEFAULT_HELM_BIN: &str = "helm";
pub const INSTALL_DESCRIPTION: &str = "Installed by bluegreen-deployer";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CdEventsConfig {
    pub enabled: bool,
    pub sink_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeployerConfig {
    pub namespace: String,
    /// Colour assumed when the offline service does not name one
    pub default_colour: Colour,
    pub install_timeout: Duration,
    pub upgrade_timeout: Duration,
    pub rollback_timeout: Duration,
    pub readiness_timeout: Duration,
    /// How many recent revisions the rollback looks at
    pub rollback_history_max: usize,
    pub min_live_replicas: i32,
    pub conflict_retry: RetryPolicy,
    pub helm_bin: String,
    pub kube_context: Option<String>,
    pub cdevents: CdEventsConfig,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        DeployerConfig {
            namespace: DEFAULT_NAMESPACE.to_string(),
            default_colour: Colour::blue(),
            install_timeout: DEFAULT_INSTALL_TIMEOUT,
            upgrade_timeout: DEFAULT_UPGRADE_TIMEOUT,
            rollback_timeout: DEFAULT_ROLLBACK_TIMEOUT,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            rollback_history_max: DEFAULT_ROLLBACK_HISTORY_MAX,
            min_live_replicas: DEFAULT_MIN_LIVE_REPLICAS,
            conflict_retry: RetryPolicy::default(),
            helm_bin: DEFAULT_HELM_BIN.to_string(),
            kube_context: None,
            cdevents: CdEventsConfig::default(),
        }
    }
}

impl DeployerConfig {
    /// Build configuration from the process environment
    ///
    /// Recognised variables:
    /// - BLUEGREEN_NAMESPACE
    /// - BLUEGREEN_DEFAULT_COLOUR
    /// - BLUEGREEN_INSTALL_TIMEOUT_SECS, BLUEGREEN_UPGRADE_TIMEOUT_SECS,
    ///   BLUEGREEN_ROLLBACK_TIMEOUT_SECS, BLUEGREEN_READINESS_TIMEOUT_SECS
    /// - BLUEGREEN_ROLLBACK_HISTORY_MAX
    /// - BLUEGREEN_HELM_BIN
    /// - BLUEGREEN_KUBE_CONTEXT
    /// - BLUEGREEN_CDEVENTS_ENABLED: "true" to emit CDEvents (default: false)
    /// - BLUEGREEN_CDEVENTS_SINK_URL
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    ///
    /// Tests use this instead of mutating the process environment, which
    /// races between parallel tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = DeployerConfig::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = DeployerConfig {
            namespace: get("BLUEGREEN_NAMESPACE").unwrap_or(defaults.namespace),
            default_colour: get("BLUEGREEN_DEFAULT_COLOUR")
                .map(Colour::new)
                .unwrap_or(defaults.default_colour),
            install_timeout: parse_secs(
                "BLUEGREEN_INSTALL_TIMEOUT_SECS",
                get("BLUEGREEN_INSTALL_TIMEOUT_SECS"),
                defaults.install_timeout,
            )?,
            upgrade_timeout: parse_secs(
                "BLUEGREEN_UPGRADE_TIMEOUT_SECS",
                get("BLUEGREEN_UPGRADE_TIMEOUT_SECS"),
                defaults.upgrade_timeout,
            )?,
            rollback_timeout: parse_secs(
                "BLUEGREEN_ROLLBACK_TIMEOUT_SECS",
                get("BLUEGREEN_ROLLBACK_TIMEOUT_SECS"),
                defaults.rollback_timeout,
            )?,
            readiness_timeout: parse_secs(
                "BLUEGREEN_READINESS_TIMEOUT_SECS",
                get("BLUEGREEN_READINESS_TIMEOUT_SECS"),
                defaults.readiness_timeout,
            )?,
            rollback_history_max: match get("BLUEGREEN_ROLLBACK_HISTORY_MAX") {
                Some(raw) => raw.trim().parse::<usize>().map_err(|e| ConfigError::InvalidValue {
                    key: "BLUEGREEN_ROLLBACK_HISTORY_MAX",
                    value: raw.clone(),
                    reason: e.to_string(),
                })?,
                None => defaults.rollback_history_max,
            },
            min_live_replicas: defaults.min_live_replicas,
            conflict_retry: defaults.conflict_retry,
            helm_bin: get("BLUEGREEN_HELM_BIN").unwrap_or(defaults.helm_bin),
            kube_context: get("BLUEGREEN_KUBE_CONTEXT"),
            cdevents: CdEventsConfig {
                enabled: get("BLUEGREEN_CDEVENTS_ENABLED").is_some_and(|v| v == "true"),
                sink_url: get("BLUEGREEN_CDEVENTS_SINK_URL"),
            },
        };

        Ok(config)
    }

    /// Reject combinations that cannot work
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rollback_timeout < self.upgrade_timeout {
            return Err(ConfigError::Invalid(format!(
                "rollback timeout ({:?}) must not be shorter than the upgrade timeout ({:?})",
                self.rollback_timeout, self.upgrade_timeout
            )));
        }
        if self.conflict_retry.steps == 0 {
            return Err(ConfigError::Invalid(
                "conflict retry policy needs at least one step".to_string(),
            ));
        }
        if self.rollback_history_max == 0 {
            return Err(ConfigError::Invalid(
                "rollback history must include at least one revision".to_string(),
            ));
        }
        if self.min_live_replicas < 1 {
            return Err(ConfigError::Invalid(
                "at least one live replica is required".to_string(),
            ));
        }
        if self.namespace.is_empty() {
            return Err(ConfigError::Invalid("namespace must not be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_secs(
    key: &'static str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
}
