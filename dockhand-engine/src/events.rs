use crate::discovery::StateDiscovery;
use crate::runtime::{LabelSelector, RuntimeEvent};
use dockhand_core::model::service_name_from_container;
use dockhand_core::{ProjectEvent, Result, labels};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Translates a runtime event for a container of `project`.
#[must_use]
pub fn project_event(project: &str, event: RuntimeEvent) -> ProjectEvent {
    let container_name = event.attributes.get("name").cloned().unwrap_or_default();
    let service = event
        .attributes
        .get(labels::SERVICE)
        .cloned()
        .or_else(|| service_name_from_container(&container_name))
        .unwrap_or_default();
    ProjectEvent {
        project: project.to_string(),
        service,
        container_id: event.container_id,
        container_name,
        action: event.action,
        timestamp: event.time,
    }
}

/// Forwards lifecycle events of `project`'s containers until `cancel` fires,
/// the feed ends, or the receiver is dropped.
///
/// The discovery cache is invalidated after every forwarded event. A feed
/// error is forwarded once and ends the subscription.
pub fn watch(
    discovery: Arc<StateDiscovery>,
    project: String,
    buffer: usize,
    cancel: CancellationToken,
) -> mpsc::Receiver<Result<ProjectEvent>> {
    let (tx, rx) = mpsc::channel(buffer.max(1));

    tokio::spawn(async move {
        let selector = LabelSelector::project(&project);
        let mut feed = discovery.runtime().events(&selector);
        info!("Watching events of project {}", project);

        loop {
            let next = tokio::select! {
                () = cancel.cancelled() => break,
                next = feed.next() => next,
            };

            let item = match next {
                None => {
                    debug!("Event feed for {} closed", project);
                    break;
                }
                Some(Err(e)) => {
                    warn!("Event feed for {} failed: {}", project, e);
                    if tx.send(Err(e)).await.is_err() {
                        debug!("Event subscriber for {} is gone", project);
                    }
                    break;
                }
                Some(Ok(event)) if selector.matches(&event.attributes) => {
                    project_event(&project, event)
                }
                Some(Ok(event)) => {
                    debug!("Ignoring event for container {}", event.container_id);
                    continue;
                }
            };

            debug!("{} {} {}", item.project, item.service, item.action);
            let sent = tokio::select! {
                () = cancel.cancelled() => break,
                sent = tx.send(Ok(item)) => sent,
            };
            if sent.is_err() {
                break;
            }
            discovery.invalidate().await;
        }

        info!("Stopped watching events of project {}", project);
    });

    rx
}
