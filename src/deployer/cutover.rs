//! Blue/green cutover
//!
//! One cycle:
//! 1. resolve the offline colour, which becomes the deploy target
//! 2. deploy `{env}-{colour}-{app}`
//! 3. scale it to at least the minimum live replicas and wait until ready
//! 4. deploy `{env}-service-{app}` selecting the new colour
//! 5. re-resolve the offline colour (now the previously live one)
//! 6. delete its HPA and scale it to zero, best effort
//!
//! Steps 2-4 are fatal on failure; nothing after a failed step runs.

use super::cdevents::emit_cutover_event;
use super::cluster::ClusterError;
use super::colour::{resolve_offline_colour, Colour};
use super::context::Context;
use super::engine::DeployOutcome;
use super::names::{deployment_name, service_release_name};
use super::rollback::{deploy_with_rollback, ReleaseFailure};
use super::scale::{scale_deployment, ReplicaTarget};
use crate::chart::{apply_edits, ChartError, ValueEdit};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum CutoverError {
    #[error("deploy of {release} failed: {source}")]
    AppRelease {
        release: String,
        #[source]
        source: ReleaseFailure,
    },

    #[error("failed to scale up {deployment}: {source}")]
    ScaleUp {
        deployment: String,
        #[source]
        source: ClusterError,
    },

    #[error("{deployment} did not become ready: {source}")]
    Readiness {
        deployment: String,
        #[source]
        source: ClusterError,
    },

    #[error("service cutover via {release} failed: {source}")]
    ServiceRelease {
        release: String,
        #[source]
        source: ReleaseFailure,
    },

    #[error("invalid chart values: {0}")]
    Values(#[from] ChartError),
}

#[derive(Debug, Clone)]
pub struct CutoverRequest<'a> {
    pub target_env: &'a str,
    pub app_name: &'a str,
    pub app_version: &'a str,
    pub chart_dir: &'a Path,
    /// Values loaded from the environment's values file
    pub base_values: &'a Value,
}

/// What a completed cutover did
#[derive(Debug, Clone, PartialEq)]
pub struct CutoverReport {
    /// Colour that is now live
    pub colour: Colour,
    pub app_release: DeployOutcome,
    pub service_release: DeployOutcome,
    /// Colour behind the offline service after the flip
    pub offline_colour: Colour,
    /// Whether the offline colour was scaled to zero
    pub offline_scaled_down: bool,
}

/// Values for a colour's own release
pub fn app_release_edits(colour: &Colour, version: &str) -> Vec<ValueEdit> {
    vec![
        ValueEdit::new("is_service_release", false),
        ValueEdit::new("deployment.colour", colour.as_str()),
        ValueEdit::new("deployment.version", version),
    ]
}

/// Values for the service release, pointing the live service at `colour`
pub fn service_release_edits(colour: &Colour) -> Vec<ValueEdit> {
    vec![
        ValueEdit::new("is_service_release", true),
        ValueEdit::new("service.selector.colour", colour.as_str()),
    ]
}

/// Run a full blue/green cutover
///
/// # Errors
/// `CutoverError` if the colour release, its scale-up or readiness, or the
/// service release fails. Failed releases are rolled back first when
/// warranted. Cleanup of the old colour never fails the cutover.
pub async fn run_cutover(
    ctx: &Context,
    request: &CutoverRequest<'_>,
) -> Result<CutoverReport, CutoverError> {
    let namespace = ctx.config.namespace.as_str();

    let colour = resolve_offline_colour(ctx, request.target_env, request.app_name).await;
    info!(colour = %colour, app = %request.app_name, env = %request.target_env, "Deploying to offline colour");

    // Colour release
    let deployment = deployment_name(request.target_env, &colour, request.app_name);
    let app_values = apply_edits(
        request.base_values,
        &app_release_edits(&colour, request.app_version),
    )?;
    let app_release = deploy_with_rollback(ctx, &deployment, request.chart_dir, &app_values)
        .await
        .map_err(|source| {
            error!(release = %deployment, error = %source, "Colour release failed");
            CutoverError::AppRelease {
                release: deployment.clone(),
                source,
            }
        })?;
    if app_release.is_unchanged() {
        info!(release = %deployment, "Colour release unchanged, continuing cutover");
    }

    // Make sure something is running before traffic moves
    let replicas = scale_deployment(
        ctx.cluster.as_ref(),
        &ctx.config.conflict_retry,
        namespace,
        &deployment,
        ReplicaTarget::AtLeast(ctx.config.min_live_replicas),
    )
    .await
    .map_err(|source| {
        error!(deployment = %deployment, error = %source, "Scale up failed");
        CutoverError::ScaleUp {
            deployment: deployment.clone(),
            source,
        }
    })?;
    ctx.cluster
        .wait_for_ready(namespace, &deployment, ctx.config.readiness_timeout)
        .await
        .map_err(|source| {
            error!(deployment = %deployment, error = %source, "Deployment not ready");
            CutoverError::Readiness {
                deployment: deployment.clone(),
                source,
            }
        })?;
    info!(deployment = %deployment, replicas = replicas, "Deployment ready");

    // Flip the live service
    let service_release = service_release_name(request.target_env, request.app_name);
    let service_values = apply_edits(request.base_values, &service_release_edits(&colour))?;
    let service_outcome =
        deploy_with_rollback(ctx, &service_release, request.chart_dir, &service_values)
            .await
            .map_err(|source| {
                error!(release = %service_release, error = %source, "Service release failed");
                CutoverError::ServiceRelease {
                    release: service_release.clone(),
                    source,
                }
            })?;
    info!(release = %service_release, colour = %colour, "Service is live");

    // Old colour
    let offline_colour = resolve_offline_colour(ctx, request.target_env, request.app_name).await;
    let offline_scaled_down = if offline_colour == colour {
        warn!(
            colour = %colour,
            "Offline service still selects the colour just deployed, leaving it running"
        );
        false
    } else {
        deprovision(ctx, request, &offline_colour).await
    };

    emit_cutover_event(ctx, &service_release, colour.as_str(), request.app_version).await;

    Ok(CutoverReport {
        colour,
        app_release,
        service_release: service_outcome,
        offline_colour,
        offline_scaled_down,
    })
}

/// Delete the offline colour's HPA and scale it to zero
///
/// The HPA goes first, otherwise it would scale the Deployment straight back
/// up. Errors are logged only.
async fn deprovision(ctx: &Context, request: &CutoverRequest<'_>, offline: &Colour) -> bool {
    let namespace = ctx.config.namespace.as_str();
    let deployment = deployment_name(request.target_env, offline, request.app_name);

    match ctx.cluster.delete_autoscaler(namespace, &deployment).await {
        Ok(()) => info!(hpa = %deployment, "Deleted autoscaler"),
        Err(e) => warn!(hpa = %deployment, error = %e, "Failed to delete autoscaler (non-fatal)"),
    }

    match scale_deployment(
        ctx.cluster.as_ref(),
        &ctx.config.conflict_retry,
        namespace,
        &deployment,
        ReplicaTarget::Exactly(0),
    )
    .await
    {
        Ok(_) => {
            info!(deployment = %deployment, "Scaled offline deployment to zero");
            true
        }
        Err(e) => {
            warn!(deployment = %deployment, error = %e, "Failed to scale down offline deployment (non-fatal)");
            false
        }
    }
}

#[cfg(test)]
#[path = "cutover_test.rs"]
mod tests;
