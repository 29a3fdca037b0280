//! Replica scaling with conflict retry.

use super::cluster::{ClusterApi, ClusterError};
use super::retry::{retry_on_conflict, RetryPolicy};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaTarget {
    Exactly(i32),
    /// Raise to this many, leave higher counts alone
    AtLeast(i32),
}

impl ReplicaTarget {
    fn resolve(self, current: i32) -> i32 {
        match self {
            ReplicaTarget::Exactly(n) => n,
            ReplicaTarget::AtLeast(n) => current.max(n),
        }
    }
}

/// Set a Deployment's replica count
///
/// Each attempt re-reads the Deployment and changes only `spec.replicas`, so
/// a conflicting writer's other changes survive. No update is sent when the
/// count is already right.
///
/// # Returns
/// The replica count the Deployment ends up with
pub async fn scale_deployment(
    cluster: &dyn ClusterApi,
    policy: &RetryPolicy,
    namespace: &str,
    name: &str,
    target: ReplicaTarget,
) -> Result<i32, ClusterError> {
    retry_on_conflict(policy, ClusterError::is_conflict, || async move {
        let mut deployment = cluster.deployment(namespace, name).await?;
        let spec = deployment.spec.get_or_insert_with(Default::default);
        let current = spec.replicas.unwrap_or(1);
        let desired = target.resolve(current);

        if current == desired && spec.replicas.is_some() {
            debug!(deployment = %name, replicas = current, "Replica count already at target");
            return Ok(current);
        }

        spec.replicas = Some(desired);
        cluster.update_deployment(namespace, &deployment).await?;
        info!(deployment = %name, from = current, to = desired, "Scaled deployment");
        Ok(desired)
    })
    .await
}
