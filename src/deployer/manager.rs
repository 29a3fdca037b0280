//! Release manager contract
//!
//! The deployer never talks to Helm directly; it goes through this trait so
//! the orchestration can be exercised against an in-memory manager in tests.
//! A manager is bound to one namespace when it is constructed.

use super::release::Release;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReleaseError {
    /// The release has never been installed (or its history was purged)
    #[error("release {release}: not found")]
    NotFound { release: String },

    #[error("{operation} of {release} timed out: {message}")]
    TimedOut {
        operation: &'static str,
        release: String,
        message: String,
    },

    #[error("{operation} failed: {message}")]
    Failed {
        operation: &'static str,
        message: String,
    },

    #[error("failed to decode release manager output: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to run release manager: {0}")]
    Io(#[from] std::io::Error),
}

impl ReleaseError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReleaseError::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ReleaseError::TimedOut { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstallOptions {
    pub wait: bool,
    pub wait_for_jobs: bool,
    pub timeout: Duration,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpgradeOptions {
    pub force: bool,
    pub recreate_pods: bool,
    pub wait: bool,
    pub timeout: Duration,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RollbackOptions {
    pub force: bool,
    pub recreate_pods: bool,
    pub wait: bool,
    pub timeout: Duration,
}

/// Installs, upgrades, inspects and rolls back named releases
#[async_trait]
pub trait ReleaseManager: Send + Sync {
    async fn install(
        &self,
        chart: &Path,
        release_name: &str,
        values: &Value,
        options: &InstallOptions,
    ) -> Result<Release, ReleaseError>;

    /// Upgrade a release. With `dry_run` set nothing is changed and the
    /// returned release carries the manifest that would be applied.
    async fn upgrade(
        &self,
        release_name: &str,
        chart: &Path,
        values: &Value,
        options: &UpgradeOptions,
    ) -> Result<Release, ReleaseError>;

    /// Current revision. Fails with `ReleaseError::NotFound` for unknown releases.
    async fn status(&self, release_name: &str) -> Result<Release, ReleaseError>;

    /// Up to `max` most recent revisions; manifests are not populated
    async fn history(&self, release_name: &str, max: usize) -> Result<Vec<Release>, ReleaseError>;

    async fn rollback(
        &self,
        release_name: &str,
        revision: u32,
        options: &RollbackOptions,
    ) -> Result<Release, ReleaseError>;
}

#[cfg(test)]
pub use mock::{ManagerCall, MockFailure, MockReleaseManager};

#[cfg(test)]
mod mock {
    use super::*;
    use crate::deployer::release::ReleaseStatus;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum ManagerCall {
        Install { release: String },
        Upgrade {
            release: String,
            options: UpgradeOptions,
        },
        Status { release: String },
        History { release: String, max: usize },
        Rollback {
            release: String,
            revision: u32,
            options: RollbackOptions,
        },
    }

    #[derive(Debug, Clone)]
    pub enum MockFailure {
        Failed(String),
        TimedOut,
    }

    impl MockFailure {
        fn to_error(&self, operation: &'static str, release: &str) -> ReleaseError {
            match self {
                MockFailure::Failed(message) => ReleaseError::Failed {
                    operation,
                    message: message.clone(),
                },
                MockFailure::TimedOut => ReleaseError::TimedOut {
                    operation,
                    release: release.to_string(),
                    message: "timed out waiting for the condition".to_string(),
                },
            }
        }
    }

    #[derive(Default)]
    struct State {
        releases: HashMap<String, Vec<Release>>,
        calls: Vec<ManagerCall>,
        install_failure: Option<MockFailure>,
        upgrade_failure: Option<MockFailure>,
        dry_run_failure: Option<MockFailure>,
        rollback_failure: Option<MockFailure>,
        status_failure: Option<MockFailure>,
    }

    /// In-memory release manager
    ///
    /// Rendered manifests are derived from the values, so deploying the same
    /// values twice yields identical manifests.
    #[derive(Default)]
    pub struct MockReleaseManager {
        state: Mutex<State>,
    }

    pub fn render_manifest(release_name: &str, values: &Value) -> String {
        let rendered = serde_json::to_string(values).unwrap().replace('\'', "''");
        format!(
            "---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {release_name}\ndata:\n  values: '{rendered}'\n"
        )
    }

    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[allow(clippy::unwrap_used)]
    impl MockReleaseManager {
        pub fn new() -> Self {
            Self::default()
        }

        /// Replace the stored history of a release
        pub fn seed_history(&self, release_name: &str, history: Vec<Release>) {
            let mut state = self.state.lock().unwrap();
            state.releases.insert(release_name.to_string(), history);
        }

        /// Seed a release whose current revision was deployed with `values`
        pub fn seed_deployed(&self, release_name: &str, values: &Value) {
            self.seed_history(
                release_name,
                vec![Release {
                    name: release_name.to_string(),
                    revision: 1,
                    status: ReleaseStatus::Deployed,
                    manifest: render_manifest(release_name, values),
                    last_deployed: at(10),
                }],
            );
        }

        pub fn fail_install(&self, failure: MockFailure) {
            self.state.lock().unwrap().install_failure = Some(failure);
        }

        pub fn fail_upgrade(&self, failure: MockFailure) {
            self.state.lock().unwrap().upgrade_failure = Some(failure);
        }

        pub fn fail_dry_run(&self, failure: MockFailure) {
            self.state.lock().unwrap().dry_run_failure = Some(failure);
        }

        pub fn fail_rollback(&self, failure: MockFailure) {
            self.state.lock().unwrap().rollback_failure = Some(failure);
        }

        pub fn fail_status(&self, failure: MockFailure) {
            self.state.lock().unwrap().status_failure = Some(failure);
        }

        pub fn calls(&self) -> Vec<ManagerCall> {
            self.state.lock().unwrap().calls.clone()
        }

        pub fn install_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, ManagerCall::Install { .. }))
                .count()
        }

        pub fn upgrade_count(&self, dry_run: bool) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, ManagerCall::Upgrade { options, .. } if options.dry_run == dry_run))
                .count()
        }

        /// Options of every upgrade call, dry runs included, in call order
        pub fn upgrade_options(&self) -> Vec<UpgradeOptions> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    ManagerCall::Upgrade { options, .. } => Some(options),
                    _ => None,
                })
                .collect()
        }

        pub fn rollback_options(&self) -> Vec<RollbackOptions> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    ManagerCall::Rollback { options, .. } => Some(options),
                    _ => None,
                })
                .collect()
        }

        pub fn rollback_targets(&self) -> Vec<u32> {
            self.calls()
                .iter()
                .filter_map(|c| match c {
                    ManagerCall::Rollback { revision, .. } => Some(*revision),
                    _ => None,
                })
                .collect()
        }

        pub fn history_of(&self, release_name: &str) -> Vec<Release> {
            self.state
                .lock()
                .unwrap()
                .releases
                .get(release_name)
                .cloned()
                .unwrap_or_default()
        }

        fn record(&self, call: ManagerCall) {
            self.state.lock().unwrap().calls.push(call);
        }

        /// Append a revision, superseding the previously deployed one when the
        /// new revision is deployed
        fn push_revision(
            &self,
            release_name: &str,
            status: ReleaseStatus,
            manifest: String,
        ) -> Release {
            let mut state = self.state.lock().unwrap();
            let history = state.releases.entry(release_name.to_string()).or_default();
            let revision = history.iter().map(|r| r.revision).max().unwrap_or(0) + 1;
            let last_deployed = history
                .iter()
                .map(|r| r.last_deployed)
                .max()
                .map(|t| t + ChronoDuration::seconds(10))
                .unwrap_or_else(|| at(10));

            if status == ReleaseStatus::Deployed {
                for previous in history.iter_mut() {
                    if previous.status == ReleaseStatus::Deployed {
                        previous.status = ReleaseStatus::Superseded;
                    }
                }
            }

            let release = Release {
                name: release_name.to_string(),
                revision,
                status,
                manifest,
                last_deployed,
            };
            history.push(release.clone());
            release
        }
    }

    #[async_trait]
    #[allow(clippy::unwrap_used)]
    impl ReleaseManager for MockReleaseManager {
        async fn install(
            &self,
            _chart: &Path,
            release_name: &str,
            values: &Value,
            _options: &InstallOptions,
        ) -> Result<Release, ReleaseError> {
            self.record(ManagerCall::Install {
                release: release_name.to_string(),
            });
            let failure = self.state.lock().unwrap().install_failure.clone();
            if let Some(failure) = failure {
                self.push_revision(release_name, ReleaseStatus::Failed, String::new());
                return Err(failure.to_error("install", release_name));
            }
            Ok(self.push_revision(
                release_name,
                ReleaseStatus::Deployed,
                render_manifest(release_name, values),
            ))
        }

        async fn upgrade(
            &self,
            release_name: &str,
            _chart: &Path,
            values: &Value,
            options: &UpgradeOptions,
        ) -> Result<Release, ReleaseError> {
            self.record(ManagerCall::Upgrade {
                release: release_name.to_string(),
                options: options.clone(),
            });
            let manifest = render_manifest(release_name, values);

            if options.dry_run {
                let failure = self.state.lock().unwrap().dry_run_failure.clone();
                if let Some(failure) = failure {
                    return Err(failure.to_error("upgrade --dry-run", release_name));
                }
                let next = self
                    .history_of(release_name)
                    .iter()
                    .map(|r| r.revision)
                    .max()
                    .unwrap_or(0)
                    + 1;
                return Ok(Release {
                    name: release_name.to_string(),
                    revision: next,
                    status: ReleaseStatus::PendingUpgrade,
                    manifest,
                    last_deployed: at(0),
                });
            }

            let failure = self.state.lock().unwrap().upgrade_failure.clone();
            if let Some(failure) = failure {
                self.push_revision(release_name, ReleaseStatus::Failed, manifest);
                return Err(failure.to_error("upgrade", release_name));
            }
            Ok(self.push_revision(release_name, ReleaseStatus::Deployed, manifest))
        }

        async fn status(&self, release_name: &str) -> Result<Release, ReleaseError> {
            self.record(ManagerCall::Status {
                release: release_name.to_string(),
            });
            let failure = self.state.lock().unwrap().status_failure.clone();
            if let Some(failure) = failure {
                return Err(failure.to_error("status", release_name));
            }
            self.history_of(release_name)
                .into_iter()
                .max_by_key(|r| r.revision)
                .ok_or_else(|| ReleaseError::NotFound {
                    release: release_name.to_string(),
                })
        }

        async fn history(
            &self,
            release_name: &str,
            max: usize,
        ) -> Result<Vec<Release>, ReleaseError> {
            self.record(ManagerCall::History {
                release: release_name.to_string(),
                max,
            });
            let state = self.state.lock().unwrap();
            let Some(history) = state.releases.get(release_name) else {
                return Err(ReleaseError::NotFound {
                    release: release_name.to_string(),
                });
            };
            let skip = history.len().saturating_sub(max);
            Ok(history
                .iter()
                .skip(skip)
                .map(|r| Release {
                    manifest: String::new(),
                    ..r.clone()
                })
                .collect())
        }

        async fn rollback(
            &self,
            release_name: &str,
            revision: u32,
            options: &RollbackOptions,
        ) -> Result<Release, ReleaseError> {
            self.record(ManagerCall::Rollback {
                release: release_name.to_string(),
                revision,
                options: options.clone(),
            });
            let failure = self.state.lock().unwrap().rollback_failure.clone();
            if let Some(failure) = failure {
                return Err(failure.to_error("rollback", release_name));
            }
            let target = self
                .history_of(release_name)
                .into_iter()
                .find(|r| r.revision == revision)
                .ok_or_else(|| ReleaseError::Failed {
                    operation: "rollback",
                    message: format!("release has no {revision} version"),
                })?;
            Ok(self.push_revision(release_name, ReleaseStatus::Deployed, target.manifest))
        }
    }
}

#[cfg(test)]
pub(crate) use mock::{at, render_manifest};
