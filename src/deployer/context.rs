use super::cdevents::EventSink;
use super::cluster::ClusterApi;
use super::manager::ReleaseManager;
use super::manifest::ManifestDiffer;
use crate::config::DeployerConfig;
use std::sync::Arc;

/// Everything a deploy needs: configuration plus its collaborators
pub struct Context {
    pub config: Arc<DeployerConfig>,
    pub manager: Arc<dyn ReleaseManager>,
    pub differ: Arc<dyn ManifestDiffer>,
    pub cluster: Arc<dyn ClusterApi>,
    pub events: Arc<dyn EventSink>,
}

impl Context {
    pub fn new(
        config: DeployerConfig,
        manager: impl ReleaseManager + 'static,
        differ: impl ManifestDiffer + 'static,
        cluster: impl ClusterApi + 'static,
        events: impl EventSink + 'static,
    ) -> Self {
        Context {
            config: Arc::new(config),
            manager: Arc::new(manager),
            differ: Arc::new(differ),
            cluster: Arc::new(cluster),
            events: Arc::new(events),
        }
    }
}

/// Handles onto the mocks behind a `Context::new_mock`, for assertions
#[cfg(test)]
pub struct MockHandles {
    pub manager: Arc<super::manager::MockReleaseManager>,
    pub cluster: Arc<super::cluster::MockCluster>,
    pub events: Arc<super::cdevents::MockEventSink>,
}

#[cfg(test)]
impl Context {
    pub fn new_mock() -> (Self, MockHandles) {
        Self::new_mock_with_config(DeployerConfig::default())
    }

    /// Mock context; the conflict retry delay is shortened so tests stay fast
    pub fn new_mock_with_config(mut config: DeployerConfig) -> (Self, MockHandles) {
        config.conflict_retry.initial_delay = std::time::Duration::from_millis(1);

        let manager = Arc::new(super::manager::MockReleaseManager::new());
        let cluster = Arc::new(super::cluster::MockCluster::new());
        let events = Arc::new(super::cdevents::MockEventSink::new());

        let ctx = Context {
            config: Arc::new(config),
            manager: manager.clone(),
            differ: Arc::new(super::manifest::YamlManifestDiffer),
            cluster: cluster.clone(),
            events: events.clone(),
        };

        (
            ctx,
            MockHandles {
                manager,
                cluster,
                events,
            },
        )
    }
}
