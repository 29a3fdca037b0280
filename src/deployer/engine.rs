//! Diff-gated deploy engine
//!
//! Looks up the release, picks a course and carries it out. Existing releases
//! are dry-run upgraded first and only really upgraded when the rendered
//! manifest changes, so re-running a deploy with the same inputs leaves the
//! release (and its revision count) alone.

use super::cdevents::{emit_release_event, ReleaseEventKind};
use super::context::Context;
use super::manager::{InstallOptions, ReleaseError, UpgradeOptions};
use super::release::{determine_course, Release, ReleaseCourse, ReleaseStatus};
use crate::config::{DeployerConfig, INSTALL_DESCRIPTION};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("failed to install {release}: {source}")]
    Install {
        release: String,
        #[source]
        source: ReleaseError,
    },

    #[error("dry-run upgrade of {release} failed: {source}")]
    DryRun {
        release: String,
        previous_status: ReleaseStatus,
        #[source]
        source: ReleaseError,
    },

    #[error("failed to upgrade {release}: {source}")]
    Upgrade {
        release: String,
        previous_status: ReleaseStatus,
        #[source]
        source: ReleaseError,
    },
}

impl DeployError {
    pub fn release(&self) -> &str {
        match self {
            DeployError::Install { release, .. }
            | DeployError::DryRun { release, .. }
            | DeployError::Upgrade { release, .. } => release,
        }
    }

    /// Status the release had before this deploy started; `None` for
    /// releases that did not exist yet
    pub fn previous_status(&self) -> Option<ReleaseStatus> {
        match self {
            DeployError::Install { .. } => None,
            DeployError::DryRun {
                previous_status, ..
            }
            | DeployError::Upgrade {
                previous_status, ..
            } => Some(*previous_status),
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            DeployError::Install { source, .. }
            | DeployError::DryRun { source, .. }
            | DeployError::Upgrade { source, .. } => source.is_timeout(),
        }
    }
}

/// Result of a successful deploy
#[derive(Debug, Clone, PartialEq)]
pub enum DeployOutcome {
    Installed(Release),
    Upgraded(Release),
    /// Dry-run rendered the same manifest; no upgrade was issued
    Unchanged,
}

impl DeployOutcome {
    pub fn release(&self) -> Option<&Release> {
        match self {
            DeployOutcome::Installed(r) | DeployOutcome::Upgraded(r) => Some(r),
            DeployOutcome::Unchanged => None,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, DeployOutcome::Unchanged)
    }
}

pub fn install_options(config: &DeployerConfig) -> InstallOptions {
    InstallOptions {
        wait: true,
        wait_for_jobs: true,
        timeout: config.install_timeout,
        description: INSTALL_DESCRIPTION.to_string(),
    }
}

pub fn upgrade_options(config: &DeployerConfig) -> UpgradeOptions {
    UpgradeOptions {
        force: true,
        recreate_pods: true,
        wait: true,
        timeout: config.upgrade_timeout,
        dry_run: false,
    }
}

pub fn dry_run_options(config: &DeployerConfig) -> UpgradeOptions {
    UpgradeOptions {
        force: false,
        recreate_pods: false,
        wait: false,
        timeout: config.upgrade_timeout,
        dry_run: true,
    }
}

/// Deploy `chart` with `values` as `release_name`
///
/// # Arguments
/// * `release_name` - Release to install or upgrade
/// * `chart` - Chart directory or archive
/// * `values` - Complete values for this revision
///
/// # Returns
/// What was done. `DeployOutcome::Unchanged` is not a failure.
///
/// # Errors
/// `DeployError` when the install, dry-run or upgrade fails or times out.
/// The error records the pre-deploy status so the caller can decide on a
/// rollback.
pub async fn deploy(
    ctx: &Context,
    release_name: &str,
    chart: &Path,
    values: &Value,
) -> Result<DeployOutcome, DeployError> {
    let (current, lookup_error) = match ctx.manager.status(release_name).await {
        Ok(release) => (Some(release), None),
        Err(e) => (None, Some(e)),
    };

    if let Some(e) = lookup_error.as_ref().filter(|e| !e.is_not_found()) {
        warn!(release = %release_name, error = %e, "Release status lookup failed, diffing against an empty manifest");
    }

    let previous_status = current.as_ref().map(|r| r.status).unwrap_or_default();
    let course = determine_course(release_name, previous_status, lookup_error.as_ref());
    info!(release = %release_name, course = %course, status = %previous_status, "Deploying release");

    match course {
        ReleaseCourse::Install => install(ctx, release_name, chart, values).await,
        ReleaseCourse::Upgrade => upgrade(ctx, release_name, chart, values, previous_status).await,
        ReleaseCourse::UpgradeWithDiffCheck => {
            let proposed = ctx
                .manager
                .upgrade(release_name, chart, values, &dry_run_options(&ctx.config))
                .await
                .map_err(|source| {
                    error!(release = %release_name, error = %source, "Dry-run upgrade failed");
                    DeployError::DryRun {
                        release: release_name.to_string(),
                        previous_status,
                        source,
                    }
                })?;

            let current_manifest = current.as_ref().map(|r| r.manifest.as_str()).unwrap_or("");
            if !ctx
                .differ
                .has_differences(current_manifest, &proposed.manifest, &ctx.config.namespace)
            {
                info!(release = %release_name, "No changes to release, nothing to do");
                return Ok(DeployOutcome::Unchanged);
            }

            upgrade(ctx, release_name, chart, values, previous_status).await
        }
    }
}

async fn install(
    ctx: &Context,
    release_name: &str,
    chart: &Path,
    values: &Value,
) -> Result<DeployOutcome, DeployError> {
    let release = ctx
        .manager
        .install(chart, release_name, values, &install_options(&ctx.config))
        .await
        .map_err(|source| {
            error!(release = %release_name, error = %source, "Install failed");
            DeployError::Install {
                release: release_name.to_string(),
                source,
            }
        })?;

    info!(release = %release_name, revision = release.revision, "Installed release");
    emit_release_event(ctx, ReleaseEventKind::Deployed, &release).await;
    Ok(DeployOutcome::Installed(release))
}

async fn upgrade(
    ctx: &Context,
    release_name: &str,
    chart: &Path,
    values: &Value,
    previous_status: ReleaseStatus,
) -> Result<DeployOutcome, DeployError> {
    let release = ctx
        .manager
        .upgrade(release_name, chart, values, &upgrade_options(&ctx.config))
        .await
        .map_err(|source| {
            error!(release = %release_name, error = %source, "Upgrade failed");
            DeployError::Upgrade {
                release: release_name.to_string(),
                previous_status,
                source,
            }
        })?;

    info!(release = %release_name, revision = release.revision, "Upgraded release");
    emit_release_event(ctx, ReleaseEventKind::Upgraded, &release).await;
    Ok(DeployOutcome::Upgraded(release))
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod tests;
