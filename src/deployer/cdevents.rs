//! CDEvents emission for release outcomes.
//!
//! Install, upgrade and rollback of a release map onto the service.deployed,
//! service.upgraded and service.rolledback events; a completed cutover is a
//! service.published event for the service release.

use super::context::Context;
use super::release::Release;
use crate::config::CdEventsConfig;
use async_trait::async_trait;
use cloudevents::Event;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

const EVENT_SOURCE: &str = "/bluegreen-deployer";

#[derive(Debug, Error)]
pub enum EventsError {
    #[error("cdevents error: {0}")]
    Generic(String),
}

/// Trait for sending CDEvents
///
/// Production code uses `HttpEventSink`; tests use `MockEventSink`, which
/// keeps events in memory.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: &Event) -> Result<(), EventsError>;
}

/// Sends CloudEvents as JSON via HTTP POST
pub struct HttpEventSink {
    enabled: bool,
    sink_url: Option<String>,
    client: reqwest::Client,
}

impl HttpEventSink {
    pub fn new(config: &CdEventsConfig) -> Self {
        HttpEventSink {
            enabled: config.enabled,
            sink_url: config.sink_url.clone(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn send(&self, event: &Event) -> Result<(), EventsError> {
        if !self.enabled {
            return Ok(());
        }
        let Some(url) = &self.sink_url else {
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/cloudevents+json")
            .json(event)
            .send()
            .await
            .map_err(|e| EventsError::Generic(format!("HTTP POST failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(EventsError::Generic(format!(
                "sink responded with {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub struct MockEventSink {
    events: std::sync::Mutex<Vec<Event>>,
}

#[cfg(test)]
impl Default for MockEventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
impl MockEventSink {
    pub fn new() -> Self {
        MockEventSink {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn get_emitted_events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        use cloudevents::AttributesReader;
        self.get_emitted_events()
            .iter()
            .map(|e| e.ty().to_string())
            .collect()
    }
}

#[cfg(test)]
#[async_trait]
impl EventSink for MockEventSink {
    async fn send(&self, event: &Event) -> Result<(), EventsError> {
        #[allow(clippy::unwrap_used)]
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// What happened to a release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseEventKind {
    Deployed,
    Upgraded,
    RolledBack,
}

impl ReleaseEventKind {
    fn action(self) -> &'static str {
        match self {
            ReleaseEventKind::Deployed => "install",
            ReleaseEventKind::Upgraded => "upgrade",
            ReleaseEventKind::RolledBack => "rollback",
        }
    }
}

/// Build and send a release event. Failures are logged, never returned.
pub async fn emit_release_event(ctx: &Context, kind: ReleaseEventKind, release: &Release) {
    let event = match build_release_event(kind, &ctx.config.namespace, release) {
        Ok(event) => event,
        Err(e) => {
            warn!(release = %release.name, error = %e, "Failed to build CDEvent (non-fatal)");
            return;
        }
    };
    send_event(ctx, &release.name, &event).await;
}

/// Announce that the service release now routes to `colour`
pub async fn emit_cutover_event(ctx: &Context, service_release: &str, colour: &str, version: &str) {
    let event = match build_published_event(&ctx.config.namespace, service_release, colour, version)
    {
        Ok(event) => event,
        Err(e) => {
            warn!(release = %service_release, error = %e, "Failed to build CDEvent (non-fatal)");
            return;
        }
    };
    send_event(ctx, service_release, &event).await;
}

async fn send_event(ctx: &Context, release_name: &str, event: &Event) {
    match ctx.events.send(event).await {
        Ok(()) => debug!(release = %release_name, "Emitted CDEvent"),
        Err(e) => warn!(release = %release_name, error = %e, "Failed to emit CDEvent (non-fatal)"),
    }
}

fn artifact_id(release: &Release) -> String {
    format!("pkg:helm/{}@{}", release.name, release.revision)
}

fn environment_source(namespace: &str, release_name: &str) -> String {
    format!("/namespaces/{}/releases/{}", namespace, release_name)
}

fn release_custom_data(kind: ReleaseEventKind, namespace: &str, release: &Release) -> serde_json::Value {
    json!({
        "deployer": {
            "action": kind.action(),
            "namespace": namespace,
            "release": release.name,
            "revision": release.revision,
            "status": release.status.as_str(),
            "lastDeployed": release.last_deployed.to_rfc3339(),
        }
    })
}

/// Build the CloudEvent for a release outcome
pub fn build_release_event(
    kind: ReleaseEventKind,
    namespace: &str,
    release: &Release,
) -> Result<Event, EventsError> {
    use cdevents_sdk::latest::{service_deployed, service_rolledback, service_upgraded};
    use cdevents_sdk::{CDEvent, Subject};

    let artifact = artifact_id(release);
    let env_id = format!("{}/{}", namespace, release.name);
    let env_source = environment_source(namespace, &release.name);

    let subject = match kind {
        ReleaseEventKind::Deployed => Subject::from(service_deployed::Content {
            artifact_id: artifact
                .try_into()
                .map_err(|e| EventsError::Generic(format!("Invalid artifact_id: {}", e)))?,
            environment: service_deployed::ContentEnvironment {
                id: env_id
                    .try_into()
                    .map_err(|e| EventsError::Generic(format!("Invalid environment id: {}", e)))?,
                source: Some(env_source.try_into().map_err(|e| {
                    EventsError::Generic(format!("Invalid environment source: {}", e))
                })?),
            },
        }),
        ReleaseEventKind::Upgraded => Subject::from(service_upgraded::Content {
            artifact_id: artifact
                .try_into()
                .map_err(|e| EventsError::Generic(format!("Invalid artifact_id: {}", e)))?,
            environment: service_upgraded::ContentEnvironment {
                id: env_id
                    .try_into()
                    .map_err(|e| EventsError::Generic(format!("Invalid environment id: {}", e)))?,
                source: Some(env_source.try_into().map_err(|e| {
                    EventsError::Generic(format!("Invalid environment source: {}", e))
                })?),
            },
        }),
        ReleaseEventKind::RolledBack => Subject::from(service_rolledback::Content {
            artifact_id: artifact
                .try_into()
                .map_err(|e| EventsError::Generic(format!("Invalid artifact_id: {}", e)))?,
            environment: service_rolledback::ContentEnvironment {
                id: env_id
                    .try_into()
                    .map_err(|e| EventsError::Generic(format!("Invalid environment id: {}", e)))?,
                source: Some(env_source.try_into().map_err(|e| {
                    EventsError::Generic(format!("Invalid environment source: {}", e))
                })?),
            },
        }),
    };

    let cdevent = CDEvent::from(
        subject
            .with_id(
                format!("/releases/{}/{}", release.name, release.revision)
                    .try_into()
                    .map_err(|e| EventsError::Generic(format!("Invalid subject id: {}", e)))?,
            )
            .with_source(
                EVENT_SOURCE
                    .try_into()
                    .map_err(|e| EventsError::Generic(format!("Invalid subject source: {}", e)))?,
            ),
    )
    .with_id(
        uuid::Uuid::new_v4()
            .to_string()
            .try_into()
            .map_err(|e| EventsError::Generic(format!("Invalid event id: {}", e)))?,
    )
    .with_source(
        EVENT_SOURCE
            .try_into()
            .map_err(|e| EventsError::Generic(format!("Invalid event source: {}", e)))?,
    )
    .with_custom_data(release_custom_data(kind, namespace, release));

    cdevent
        .try_into()
        .map_err(|e| EventsError::Generic(format!("Failed to convert to CloudEvent: {}", e)))
}

/// Build the service.published event for a completed cutover
pub fn build_published_event(
    namespace: &str,
    service_release: &str,
    colour: &str,
    version: &str,
) -> Result<Event, EventsError> {
    use cdevents_sdk::latest::service_published;
    use cdevents_sdk::{CDEvent, Subject};

    let cdevent = CDEvent::from(
        Subject::from(service_published::Content {
            environment: Some(service_published::ContentEnvironment {
                id: format!("{}/{}", namespace, service_release)
                    .try_into()
                    .map_err(|e| EventsError::Generic(format!("Invalid environment id: {}", e)))?,
                source: Some(
                    environment_source(namespace, service_release)
                        .try_into()
                        .map_err(|e| {
                            EventsError::Generic(format!("Invalid environment source: {}", e))
                        })?,
                ),
            }),
        })
        .with_id(
            format!("/releases/{}/cutover/{}", service_release, colour)
                .try_into()
                .map_err(|e| EventsError::Generic(format!("Invalid subject id: {}", e)))?,
        )
        .with_source(
            EVENT_SOURCE
                .try_into()
                .map_err(|e| EventsError::Generic(format!("Invalid subject source: {}", e)))?,
        ),
    )
    .with_id(
        uuid::Uuid::new_v4()
            .to_string()
            .try_into()
            .map_err(|e| EventsError::Generic(format!("Invalid event id: {}", e)))?,
    )
    .with_source(
        EVENT_SOURCE
            .try_into()
            .map_err(|e| EventsError::Generic(format!("Invalid event source: {}", e)))?,
    )
    .with_custom_data(json!({
        "deployer": {
            "action": "cutover",
            "namespace": namespace,
            "release": service_release,
            "colour": colour,
            "version": version,
        }
    }));

    cdevent
        .try_into()
        .map_err(|e| EventsError::Generic(format!("Failed to convert to CloudEvent: {}", e)))
}

#[cfg(test)]
#[path = "cdevents_test.rs"]
mod tests;
