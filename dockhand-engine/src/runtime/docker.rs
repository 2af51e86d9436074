use super::{ContainerInfo, ContainerRuntime, LabelSelector, RuntimeEvent};
use async_stream::stream;
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    ListContainersOptions, LogsOptions, RestartContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::models::{ContainerSummary, EventMessage, Port};
use bollard::system::EventsOptions;
use dockhand_core::{Error, ErrorKind, LogOptions, PortMapping, Result};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// [`ContainerRuntime`] backed by the Docker Engine API.
#[derive(Clone, Debug)]
pub struct DockerRuntime {
    client: Arc<Docker>,
}

impl DockerRuntime {
    #[must_use]
    pub fn new(client: Arc<Docker>) -> Self {
        Self { client }
    }

    /// Connects with the local defaults (`DOCKER_HOST` or the local socket).
    pub fn connect(timeout: Duration) -> Result<Self> {
        let client = Docker::connect_with_local_defaults()
            .map_err(runtime_error)?
            .with_timeout(timeout);
        Ok(Self::new(Arc::new(client)))
    }
}

/// Classifies a Docker API error. Unrecognized failures count as runtime errors.
pub(crate) fn runtime_error(err: bollard::errors::Error) -> Error {
    let detail = format!("{err:?}");
    if let bollard::errors::Error::DockerResponseServerError {
        status_code: 404,
        message,
    } = &err
    {
        return Error::not_found(message.clone()).with_detail(detail);
    }

    let message = err.to_string();
    let kind = match ErrorKind::classify(&message) {
        ErrorKind::Unknown => ErrorKind::Runtime,
        kind => kind,
    };
    Error::new(kind, message).with_detail(detail)
}

fn port_mapping(port: Port) -> PortMapping {
    let protocol = port
        .typ
        .map(|t| t.to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "tcp".to_string());
    PortMapping {
        host_ip: port.ip,
        host_port: port.public_port,
        container_port: port.private_port,
        protocol,
    }
}

fn container_info(summary: ContainerSummary) -> ContainerInfo {
    let name = summary
        .names
        .as_ref()
        .and_then(|names| names.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();

    ContainerInfo {
        id: summary.id.unwrap_or_default(),
        name,
        image: summary.image.unwrap_or_default(),
        state: summary.state.unwrap_or_default(),
        labels: summary.labels.unwrap_or_default(),
        ports: summary
            .ports
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.public_port.is_some())
            .map(port_mapping)
            .collect(),
    }
}

fn runtime_event(message: EventMessage) -> RuntimeEvent {
    let actor = message.actor.unwrap_or_default();
    RuntimeEvent {
        action: message.action.unwrap_or_default(),
        container_id: actor.id.unwrap_or_default(),
        attributes: actor.attributes.unwrap_or_default(),
        time: message.time.unwrap_or_default(),
    }
}

fn timeout_secs(timeout: Option<Duration>) -> Option<u64> {
    timeout.map(|t| t.as_secs())
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self, selector: &LabelSelector) -> Result<Vec<ContainerInfo>> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([("label".to_string(), selector.filters())]),
            ..Default::default()
        };
        let summaries = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(runtime_error)?;
        debug!("Runtime listed {} container(s)", summaries.len());
        Ok(summaries.into_iter().map(container_info).collect())
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        info!("Starting container {}", id);
        self.client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(runtime_error)
    }

    async fn stop_container(&self, id: &str, timeout: Option<Duration>) -> Result<()> {
        info!("Stopping container {}", id);
        let options = timeout_secs(timeout).map(|t| StopContainerOptions {
            t: i64::try_from(t).unwrap_or(i64::MAX),
        });
        self.client
            .stop_container(id, options)
            .await
            .map_err(runtime_error)
    }

    async fn restart_container(&self, id: &str, timeout: Option<Duration>) -> Result<()> {
        info!("Restarting container {}", id);
        let options = timeout_secs(timeout).map(|t| RestartContainerOptions {
            t: isize::try_from(t).unwrap_or(isize::MAX),
        });
        self.client
            .restart_container(id, options)
            .await
            .map_err(runtime_error)
    }

    async fn pause_container(&self, id: &str) -> Result<()> {
        info!("Pausing container {}", id);
        self.client.pause_container(id).await.map_err(runtime_error)
    }

    async fn unpause_container(&self, id: &str) -> Result<()> {
        info!("Unpausing container {}", id);
        self.client
            .unpause_container(id)
            .await
            .map_err(runtime_error)
    }

    fn logs(&self, id: &str, options: &LogOptions) -> BoxStream<'static, Result<String>> {
        // The engine API only accepts absolute timestamps for since/until.
        let options = LogsOptions::<String> {
            follow: options.follow,
            stdout: true,
            stderr: true,
            timestamps: options.timestamps,
            tail: options.tail.clone().unwrap_or_else(|| "all".to_string()),
            since: options
                .since
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            until: options
                .until
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        };
        let client = self.client.clone();
        let id = id.to_string();

        Box::pin(stream! {
            let mut logs = client.logs(&id, Some(options));
            let mut pending = String::new();
            while let Some(chunk) = logs.next().await {
                match chunk {
                    Ok(output) => {
                        pending.push_str(&output.to_string());
                        while let Some(pos) = pending.find('\n') {
                            let line: String = pending.drain(..=pos).collect();
                            yield Ok(line.trim_end_matches(['\n', '\r']).to_string());
                        }
                    }
                    Err(e) => {
                        yield Err(runtime_error(e));
                        break;
                    }
                }
            }
            if !pending.is_empty() {
                yield Ok(pending);
            }
        })
    }

    fn events(&self, selector: &LabelSelector) -> BoxStream<'static, Result<RuntimeEvent>> {
        let options = EventsOptions::<String> {
            filters: HashMap::from([
                ("type".to_string(), vec!["container".to_string()]),
                ("label".to_string(), selector.filters()),
            ]),
            ..Default::default()
        };
        let client = self.client.clone();

        Box::pin(stream! {
            let mut events = client.events(Some(options));
            while let Some(event) = events.next().await {
                match event {
                    Ok(message) => yield Ok(runtime_event(message)),
                    Err(e) => {
                        yield Err(runtime_error(e));
                        break;
                    }
                }
            }
        })
    }
}
