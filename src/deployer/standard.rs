//! Single-release deploys for charts without colours.

use super::context::Context;
use super::engine::DeployOutcome;
use super::names::standard_release_name;
use super::rollback::{deploy_with_rollback, ReleaseFailure};
use crate::chart::{apply_edits, ChartError, ValueEdit};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StandardDeployError {
    #[error("deploy of {release} failed: {source}")]
    Release {
        release: String,
        #[source]
        source: ReleaseFailure,
    },

    #[error("invalid chart values: {0}")]
    Values(#[from] ChartError),
}

/// Values for a microservice chart at `version`
pub fn microservice_edits(version: &str) -> Vec<ValueEdit> {
    vec![ValueEdit::new("deployment.version", version)]
}

/// Deploy `{env}-{app}` from the chart, applying `edits` on top of the
/// environment's values
pub async fn deploy_standard(
    ctx: &Context,
    target_env: &str,
    app_name: &str,
    chart_dir: &Path,
    base_values: &Value,
    edits: &[ValueEdit],
) -> Result<DeployOutcome, StandardDeployError> {
    let release = standard_release_name(target_env, app_name);
    let values = apply_edits(base_values, edits)?;

    let outcome = deploy_with_rollback(ctx, &release, chart_dir, &values)
        .await
        .map_err(|source| StandardDeployError::Release {
            release: release.clone(),
            source,
        })?;

    match outcome.release() {
        Some(deployed) => info!(release = %release, revision = deployed.revision, "Deployed release"),
        None => info!(release = %release, "Release unchanged"),
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployer::manager::{render_manifest, MockFailure};
    use serde_json::json;

    #[tokio::test]
    async fn test_standard_chart_installs_env_release() {
        let (ctx, mocks) = Context::new_mock();
        let values = json!({ "replicas": 2 });

        let outcome = deploy_standard(&ctx, "prod", "ledger", Path::new("./chart"), &values, &[])
            .await
            .unwrap();

        assert!(matches!(outcome, DeployOutcome::Installed(ref r) if r.name == "prod-ledger"));
        assert_eq!(
            mocks.manager.history_of("prod-ledger")[0].manifest,
            render_manifest("prod-ledger", &values)
        );
    }

    #[tokio::test]
    async fn test_microservice_sets_version() {
        let (ctx, mocks) = Context::new_mock();
        let values = json!({ "deployment": { "image": "ledger" } });

        deploy_standard(
            &ctx,
            "staging",
            "ledger",
            Path::new("./chart"),
            &values,
            &microservice_edits("v2.0.1"),
        )
        .await
        .unwrap();

        let expected = json!({ "deployment": { "image": "ledger", "version": "v2.0.1" } });
        assert_eq!(
            mocks.manager.history_of("staging-ledger")[0].manifest,
            render_manifest("staging-ledger", &expected)
        );
    }

    #[tokio::test]
    async fn test_redeploy_with_same_values_is_unchanged() {
        let (ctx, mocks) = Context::new_mock();
        let values = json!({ "replicas": 2 });
        mocks.manager.seed_deployed("prod-ledger", &values);

        let outcome = deploy_standard(&ctx, "prod", "ledger", Path::new("./chart"), &values, &[])
            .await
            .unwrap();

        assert!(outcome.is_unchanged());
    }

    #[tokio::test]
    async fn test_failure_is_reported_with_release_name() {
        let (ctx, mocks) = Context::new_mock();
        mocks
            .manager
            .fail_install(MockFailure::Failed("no matches for kind".to_string()));

        let err = deploy_standard(&ctx, "prod", "ledger", Path::new("./chart"), &json!({}), &[])
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("deploy of prod-ledger failed"));
    }
}
