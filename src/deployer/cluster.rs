//! Cluster resource access for the cutover
//!
//! Only the handful of calls the cutover needs: read a Service selector, read
//! and replace a Deployment, delete an HPA and wait for a Deployment to roll
//! out.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v1::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, PostParams};
use kube::runtime::wait::await_condition;
use kube::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("conflict updating {kind} {name}: {message}")]
    Conflict {
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("{kind} has no name")]
    MissingName { kind: &'static str },

    #[error("Deployment {name} not ready after {timeout:?}")]
    ReadinessTimeout { name: String, timeout: Duration },

    #[error("failed waiting for Deployment {name}: {message}")]
    Wait { name: String, message: String },

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),
}

impl ClusterError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}

/// Map API status codes we route on to their own variants
fn classify(kind: &'static str, name: &str, error: kube::Error) -> ClusterError {
    match error {
        kube::Error::Api(err) if err.code == 404 => ClusterError::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(err) if err.code == 409 => ClusterError::Conflict {
            kind,
            name: name.to_string(),
            message: err.message.clone(),
        },
        other => ClusterError::KubeError(other),
    }
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Selector of a Service. `Ok(None)` when the Service has no selector.
    async fn service_selector(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ClusterError>;

    async fn deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError>;

    /// Replace a Deployment. A stale resourceVersion fails with
    /// `ClusterError::Conflict`.
    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), ClusterError>;

    async fn delete_autoscaler(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    async fn wait_for_ready(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<(), ClusterError>;
}

/// True once the latest generation is observed and every desired replica
/// is updated and available
pub fn is_deployment_ready(deployment: Option<&Deployment>) -> bool {
    let Some(deployment) = deployment else {
        return false;
    };
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };

    let desired = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let generation = deployment.metadata.generation.unwrap_or(0);
    let observed = status.observed_generation.unwrap_or(0);

    observed >= generation
        && status.updated_replicas.unwrap_or(0) >= desired
        && status.available_replicas.unwrap_or(0) >= desired
}

/// `ClusterApi` backed by a kube client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        KubeCluster { client }
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn service_selector(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let service = api
            .get(name)
            .await
            .map_err(|e| classify("Service", name, e))?;
        Ok(service.spec.and_then(|spec| spec.selector))
    }

    async fn deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| classify("Deployment", name, e))
    }

    async fn update_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<(), ClusterError> {
        let name = deployment
            .metadata
            .name
            .as_deref()
            .ok_or(ClusterError::MissingName { kind: "Deployment" })?;
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.replace(name, &PostParams::default(), deployment)
            .await
            .map_err(|e| classify("Deployment", name, e))?;
        Ok(())
    }

    async fn delete_autoscaler(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::background())
            .await
            .map_err(|e| classify("HorizontalPodAutoscaler", name, e))?;
        Ok(())
    }

    async fn wait_for_ready(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<(), ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        debug!(deployment = %name, timeout_secs = timeout.as_secs(), "Waiting for rollout");

        let ready = await_condition(api, name, is_deployment_ready);
        match tokio::time::timeout(timeout, ready).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ClusterError::Wait {
                name: name.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(ClusterError::ReadinessTimeout {
                name: name.to_string(),
                timeout,
            }),
        }
    }
}

#[cfg(test)]
pub use mock::{ClusterWrite, MockCluster};


#[cfg(test)]
pub(crate) use mock::colour_selector;
