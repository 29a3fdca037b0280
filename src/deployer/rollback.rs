//! Rollback to the last good revision after a failed deploy.

use super::cdevents::{emit_release_event, ReleaseEventKind};
use super::context::Context;
use super::engine::{deploy, DeployError, DeployOutcome};
use super::manager::{ReleaseError, RollbackOptions};
use super::release::{filter_by_status, latest_release, Release, ReleaseStatus};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("failed to read history of {release}: {source}")]
    History {
        release: String,
        #[source]
        source: ReleaseError,
    },

    #[error("no prior release(s) of {release} to roll back to")]
    NoPriorReleases { release: String },

    #[error("no successfully deployed prior release(s) of {release} to roll back to")]
    NoSuccessfulReleases { release: String },

    #[error("failed to rollback: {source}")]
    Failed {
        release: String,
        revision: u32,
        #[source]
        source: ReleaseError,
    },
}

/// A deploy that failed, after any rollback it warranted
#[derive(Debug, Error)]
pub enum ReleaseFailure {
    /// The deploy failed. If a rollback was warranted it succeeded and
    /// `rolled_back_to` names the restored revision.
    #[error("{source}")]
    Deploy {
        #[source]
        source: DeployError,
        rolled_back_to: Option<u32>,
    },

    #[error("{deploy}; rollback also failed: {rollback}")]
    RollbackFailed {
        deploy: DeployError,
        #[source]
        rollback: RollbackError,
    },
}

impl ReleaseFailure {
    /// The error from the deploy itself
    pub fn deploy_error(&self) -> &DeployError {
        match self {
            ReleaseFailure::Deploy { source, .. } => source,
            ReleaseFailure::RollbackFailed { deploy, .. } => deploy,
        }
    }
}

pub fn rollback_options(ctx: &Context) -> RollbackOptions {
    RollbackOptions {
        force: true,
        recreate_pods: true,
        wait: true,
        timeout: ctx.config.rollback_timeout,
    }
}

/// Roll `release_name` back to its most recently deployed good revision
///
/// Only the last `rollback_history_max` revisions are considered. Among
/// those with status `Deployed` the one with the latest `last_deployed`
/// wins. Never retried.
///
/// # Returns
/// The history entry that was restored
pub async fn rollback(ctx: &Context, release_name: &str) -> Result<Release, RollbackError> {
    let history = ctx
        .manager
        .history(release_name, ctx.config.rollback_history_max)
        .await
        .map_err(|source| RollbackError::History {
            release: release_name.to_string(),
            source,
        })?;

    if history.is_empty() {
        return Err(RollbackError::NoPriorReleases {
            release: release_name.to_string(),
        });
    }

    let deployed = filter_by_status(&history, ReleaseStatus::Deployed);
    let target = latest_release(deployed).ok_or_else(|| RollbackError::NoSuccessfulReleases {
        release: release_name.to_string(),
    })?;

    info!(
        release = %release_name,
        revision = target.revision,
        last_deployed = %target.last_deployed,
        "Rolling back"
    );

    let restored = ctx
        .manager
        .rollback(release_name, target.revision, &rollback_options(ctx))
        .await
        .map_err(|source| RollbackError::Failed {
            release: release_name.to_string(),
            revision: target.revision,
            source,
        })?;

    info!(release = %release_name, revision = target.revision, "Rolled back");
    emit_release_event(ctx, ReleaseEventKind::RolledBack, &restored).await;
    Ok(target.clone())
}

/// Whether a failed deploy should be rolled back
///
/// Only releases that were `Deployed` before the attempt are rolled back, and
/// only if the attempt left them in some other state. A release that has
/// vanished is never rolled back; any other status lookup failure is treated
/// as "not deployed".
pub async fn should_roll_back(
    ctx: &Context,
    release_name: &str,
    previous_status: Option<ReleaseStatus>,
) -> bool {
    if previous_status != Some(ReleaseStatus::Deployed) {
        info!(
            release = %release_name,
            previous_status = ?previous_status,
            "Release was not deployed before this attempt, not rolling back"
        );
        return false;
    }

    match ctx.manager.status(release_name).await {
        Ok(current) => {
            let warranted = current.status != ReleaseStatus::Deployed;
            info!(release = %release_name, status = %current.status, rollback = warranted, "Checked release status after failure");
            warranted
        }
        Err(e) if e.is_not_found() => {
            warn!(release = %release_name, "Release disappeared after failed deploy, not rolling back");
            false
        }
        Err(e) => {
            warn!(release = %release_name, error = %e, "Could not read release status after failure, rolling back");
            true
        }
    }
}

/// Deploy, and on failure roll back when warranted
///
/// The deploy error is always what gets reported; a rollback failure is
/// attached to it rather than replacing it.
pub async fn deploy_with_rollback(
    ctx: &Context,
    release_name: &str,
    chart: &Path,
    values: &Value,
) -> Result<DeployOutcome, ReleaseFailure> {
    let deploy_error = match deploy(ctx, release_name, chart, values).await {
        Ok(outcome) => return Ok(outcome),
        Err(e) => e,
    };

    info!(release = %release_name, "Determining whether rollback is necessary");
    if !should_roll_back(ctx, release_name, deploy_error.previous_status()).await {
        return Err(ReleaseFailure::Deploy {
            source: deploy_error,
            rolled_back_to: None,
        });
    }

    match rollback(ctx, release_name).await {
        Ok(target) => Err(ReleaseFailure::Deploy {
            source: deploy_error,
            rolled_back_to: Some(target.revision),
        }),
        Err(rollback_error) => {
            error!(release = %release_name, error = %rollback_error, "Rollback failed");
            Err(ReleaseFailure::RollbackFailed {
                deploy: deploy_error,
                rollback: rollback_error,
            })
        }
    }
}

#[cfg(test)]
#[path = "rollback_test.rs"]
mod tests;
