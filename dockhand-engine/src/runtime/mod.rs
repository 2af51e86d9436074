pub mod docker;

use async_trait::async_trait;
use dockhand_core::model::ContainerRecord;
use dockhand_core::{Error, LogOptions, PortMapping, Result, labels};
use futures_util::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

pub use self::docker::DockerRuntime;

/// A container as reported by the runtime API.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Runtime state string, e.g. `running`, `exited`, `paused`.
    pub state: String,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PortMapping>,
}

impl ContainerInfo {
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state == "paused"
    }

    /// Service name from the service label, falling back to the container name.
    #[must_use]
    pub fn service(&self) -> Option<String> {
        self.label(labels::SERVICE)
            .map(str::to_string)
            .or_else(|| dockhand_core::model::service_name_from_container(&self.name))
    }

    #[must_use]
    pub fn to_record(&self) -> Option<ContainerRecord> {
        Some(ContainerRecord {
            id: self.id.clone(),
            service: self.service()?,
            image: self.image.clone(),
            running: self.is_running(),
            ports: self.ports.clone(),
            ordinal: self
                .label(labels::CONTAINER_NUMBER)
                .and_then(|n| n.parse().ok()),
        })
    }
}

/// A lifecycle event from the runtime's event feed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuntimeEvent {
    pub action: String,
    pub container_id: String,
    pub attributes: HashMap<String, String>,
    /// Seconds since the Unix epoch.
    pub time: i64,
}

/// Label equality filter. A `None` value matches presence only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelSelector(Vec<(String, Option<String>)>);

impl LabelSelector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn has_label(mut self, key: &str) -> Self {
        self.0.push((key.to_string(), None));
        self
    }

    #[must_use]
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.0.push((key.to_string(), Some(value.to_string())));
        self
    }

    /// Containers of any compose project.
    #[must_use]
    pub fn any_project() -> Self {
        Self::new().has_label(labels::PROJECT)
    }

    #[must_use]
    pub fn project(project: &str) -> Self {
        Self::new().label(labels::PROJECT, project)
    }

    #[must_use]
    pub fn service(project: &str, service: &str) -> Self {
        Self::project(project).label(labels::SERVICE, service)
    }

    #[must_use]
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.0.iter().all(|(key, value)| match value {
            Some(value) => labels.get(key) == Some(value),
            None => labels.contains_key(key),
        })
    }

    /// Docker API filter strings (`key` or `key=value`).
    #[must_use]
    pub fn filters(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|(key, value)| match value {
                Some(value) => format!("{key}={value}"),
                None => key.clone(),
            })
            .collect()
    }
}

/// The structured runtime API.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + fmt::Debug {
    /// Lists containers, including stopped ones, matching `selector`.
    async fn list_containers(&self, selector: &LabelSelector) -> Result<Vec<ContainerInfo>>;

    async fn start_container(&self, id: &str) -> Result<()>;

    async fn stop_container(&self, id: &str, timeout: Option<Duration>) -> Result<()>;

    async fn restart_container(&self, id: &str, timeout: Option<Duration>) -> Result<()>;

    async fn pause_container(&self, id: &str) -> Result<()>;

    async fn unpause_container(&self, id: &str) -> Result<()>;

    /// Log lines of one container.
    fn logs(&self, id: &str, options: &LogOptions) -> BoxStream<'static, Result<String>>;

    /// Container lifecycle events whose attributes match `selector`.
    fn events(&self, selector: &LabelSelector) -> BoxStream<'static, Result<RuntimeEvent>>;
}

/// Bounds a runtime API call by `deadline`.
pub async fn with_deadline<T, F>(deadline: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::runtime(format!("{what} timed out after {deadline:?}"))),
    }
}
