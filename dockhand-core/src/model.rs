use crate::error::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Per-service state, derived from replica counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Running,
    Exited,
    Partial,
    Paused,
    #[default]
    Unknown,
}

impl ServiceState {
    /// `exited` when nothing runs, `running` when every replica runs,
    /// `partial` otherwise.
    #[must_use]
    pub const fn classify(running: u32, replicas: u32) -> Self {
        if running == 0 {
            Self::Exited
        } else if running == replicas {
            Self::Running
        } else {
            Self::Partial
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
            Self::Partial => write!(f, "partial"),
            Self::Paused => write!(f, "paused"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Aggregate project status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Running,
    Partial,
    Stopped,
    Error,
    #[default]
    Unknown,
}

impl Status {
    #[must_use]
    pub fn aggregate(services: &[Service]) -> Self {
        if services.is_empty() {
            Self::Unknown
        } else if services.iter().all(|s| s.running() == 0) {
            Self::Stopped
        } else if services.iter().all(Service::is_fully_running) {
            Self::Running
        } else {
            Self::Partial
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Partial => write!(f, "partial"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A published port, e.g. `0.0.0.0:8080->80/tcp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PortMapping {
    pub host_ip: Option<String>,
    pub host_port: Option<u16>,
    pub container_port: u16,
    pub protocol: String,
}

impl PortMapping {
    /// Parses one port descriptor in `docker ps` notation.
    ///
    /// Accepts `80/tcp`, `8080->80/tcp`, `0.0.0.0:8080->80/tcp` and
    /// `:::8080->80/tcp`.
    #[must_use]
    pub fn parse(descriptor: &str) -> Option<Self> {
        let descriptor = descriptor.trim();
        let (host, container) = match descriptor.split_once("->") {
            Some((host, container)) => (Some(host), container),
            None => (None, descriptor),
        };

        let (port, protocol) = container.split_once('/').unwrap_or((container, "tcp"));
        let container_port = port.trim().parse().ok()?;

        let (host_ip, host_port) = match host {
            Some(host) => match host.rsplit_once(':') {
                Some((ip, port)) => {
                    let ip = (!ip.is_empty()).then(|| ip.to_string());
                    (ip, port.parse().ok())
                }
                None => (None, host.parse().ok()),
            },
            None => (None, None),
        };

        Some(Self {
            host_ip,
            host_port,
            container_port,
            protocol: protocol.trim().to_string(),
        })
    }

    /// Parses a comma-separated list of descriptors, skipping malformed ones.
    #[must_use]
    pub fn parse_list(list: &str) -> Vec<Self> {
        list.split(',')
            .filter(|s| !s.trim().is_empty())
            .filter_map(Self::parse)
            .collect()
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.host_ip, self.host_port) {
            (Some(ip), Some(port)) => write!(f, "{ip}:{port}->")?,
            (None, Some(port)) => write!(f, "{port}->")?,
            (_, None) => {}
        }
        write!(f, "{}/{}", self.container_port, self.protocol)
    }
}

/// One logical service of a project, backed by zero or more replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Service {
    pub name: String,
    pub image: String,
    pub ports: Vec<PortMapping>,
    replicas: u32,
    running: u32,
    container_ids: Vec<String>,
    state: ServiceState,
}

impl Service {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: String::new(),
            ports: Vec::new(),
            replicas: 0,
            running: 0,
            container_ids: Vec::new(),
            state: ServiceState::Unknown,
        }
    }

    /// Counts one replica and reclassifies the service.
    pub fn record_container(&mut self, id: impl Into<String>, running: bool) {
        self.container_ids.push(id.into());
        self.replicas += 1;
        if running {
            self.running += 1;
        }
        self.state = ServiceState::classify(self.running, self.replicas);
    }

    #[must_use]
    pub const fn replicas(&self) -> u32 {
        self.replicas
    }

    #[must_use]
    pub const fn running(&self) -> u32 {
        self.running
    }

    #[must_use]
    pub const fn state(&self) -> ServiceState {
        self.state
    }

    #[must_use]
    pub fn container_ids(&self) -> &[String] {
        &self.container_ids
    }

    #[must_use]
    pub const fn is_fully_running(&self) -> bool {
        self.replicas > 0 && self.running == self.replicas
    }
}

/// A named group of services sharing one compose file set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    pub name: String,
    pub path: PathBuf,
    pub compose_files: Vec<PathBuf>,
    pub env_files: Vec<PathBuf>,
    pub working_dir: PathBuf,
    pub labels: BTreeMap<String, String>,
    services: Vec<Service>,
    status: Status,
    updated_at: SystemTime,
}

impl Project {
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: name.into(),
            working_dir: path.clone(),
            path,
            compose_files: Vec::new(),
            env_files: Vec::new(),
            labels: BTreeMap::new(),
            services: Vec::new(),
            status: Status::Unknown,
            updated_at: SystemTime::now(),
        }
    }

    /// Replaces the service list; the status follows from it.
    pub fn set_services(&mut self, services: Vec<Service>) {
        self.status = Status::aggregate(&services);
        self.services = services;
        self.updated_at = SystemTime::now();
    }

    /// Flags a failed refresh. Services stay as they were.
    pub fn mark_error(&mut self) {
        self.status = Status::Error;
        self.updated_at = SystemTime::now();
    }

    #[must_use]
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    #[must_use]
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub const fn updated_at(&self) -> SystemTime {
        self.updated_at
    }

    /// Resolves a path relative to the project directory.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.path.join(path)
        }
    }
}

/// One container as observed by either the CLI or the runtime API.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerRecord {
    pub id: String,
    pub service: String,
    pub image: String,
    pub running: bool,
    pub ports: Vec<PortMapping>,
    pub ordinal: Option<u32>,
}

/// Groups container records into services, ordered by service name.
///
/// Replicas are ordered by ordinal where known. Ports come from the first
/// container observed for each service that publishes any, before that
/// reordering.
#[must_use]
pub fn group_services(mut records: Vec<ContainerRecord>) -> Vec<Service> {
    let mut ports: BTreeMap<String, Vec<PortMapping>> = BTreeMap::new();
    for record in records.iter_mut().filter(|r| !r.ports.is_empty()) {
        if !ports.contains_key(&record.service) {
            ports.insert(record.service.clone(), std::mem::take(&mut record.ports));
        }
    }

    records.sort_by_key(|r| (r.ordinal.is_none(), r.ordinal));

    let mut services: BTreeMap<String, Service> = BTreeMap::new();
    for record in records {
        let service = services
            .entry(record.service.clone())
            .or_insert_with(|| Service::new(record.service.clone()));

        if service.image.is_empty() {
            service.image = record.image;
        }
        service.record_container(record.id, record.running);
    }

    for (name, service) in &mut services {
        if let Some(ports) = ports.remove(name) {
            service.ports = ports;
        }
    }
    services.into_values().collect()
}

/// Extracts the service name from a container name of the form
/// `<project>_<service>_<n>` or `<project>-<service>-<n>`.
///
/// Takes the second-to-last segment, so names that themselves contain the
/// delimiter are ambiguous.
#[must_use]
pub fn service_name_from_container(container: &str) -> Option<String> {
    let container = container.trim_start_matches('/');
    let delimiter = if container.contains('_') { '_' } else { '-' };
    let mut segments = container.rsplit(delimiter);
    let _ordinal = segments.next()?;
    let service = segments.next()?;
    (!service.is_empty()).then(|| service.to_string())
}

/// Anything that can report a project's live services.
#[async_trait]
pub trait ServiceQuery: Send + Sync {
    async fn services(&self, project: &Project) -> Result<Vec<Service>>;
}

/// Label map helper used when reading runtime labels.
#[must_use]
pub fn project_labels(labels: &HashMap<String, String>) -> BTreeMap<String, String> {
    crate::labels::PROJECT_LABELS
        .iter()
        .filter_map(|key| labels.get(*key).map(|v| ((*key).to_string(), v.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, service: &str, running: bool) -> ContainerRecord {
        ContainerRecord {
            id: id.to_string(),
            service: service.to_string(),
            running,
            ..ContainerRecord::default()
        }
    }

    #[test]
    fn classify_covers_every_count_combination() {
        for replicas in 0..6 {
            for running in 0..=replicas {
                let state = ServiceState::classify(running, replicas);
                let expected = if running == 0 {
                    ServiceState::Exited
                } else if running == replicas {
                    ServiceState::Running
                } else {
                    ServiceState::Partial
                };
                assert_eq!(state, expected, "running={running} replicas={replicas}");
            }
        }
    }

    #[test]
    fn recorded_containers_keep_running_within_replicas() {
        let mut service = Service::new("app");
        assert_eq!(service.state(), ServiceState::Unknown);
        for (i, running) in [true, false, true, false].into_iter().enumerate() {
            service.record_container(format!("c{i}"), running);
            assert!(service.running() <= service.replicas());
            assert_eq!(
                service.state(),
                ServiceState::classify(service.running(), service.replicas())
            );
        }
        assert_eq!(service.replicas(), 4);
        assert_eq!(service.running(), 2);
        assert_eq!(service.container_ids().len(), 4);
    }

    #[test]
    fn status_aggregation() {
        assert_eq!(Status::aggregate(&[]), Status::Unknown);

        let stopped = group_services(vec![record("a", "db", false), record("b", "web", false)]);
        assert_eq!(Status::aggregate(&stopped), Status::Stopped);

        let running = group_services(vec![record("a", "db", true), record("b", "web", true)]);
        assert_eq!(Status::aggregate(&running), Status::Running);

        let mixed = group_services(vec![record("a", "db", true), record("b", "web", false)]);
        assert_eq!(Status::aggregate(&mixed), Status::Partial);
    }

    #[test]
    fn project_status_follows_services() {
        let mut project = Project::new("web", "/srv/web");
        assert_eq!(project.status(), Status::Unknown);

        project.set_services(group_services(vec![
            record("web_app_1", "app", true),
            record("web_app_2", "app", false),
        ]));
        assert_eq!(project.status(), Status::Partial);

        let app = project.service("app").unwrap();
        assert_eq!(app.replicas(), 2);
        assert_eq!(app.running(), 1);
        assert_eq!(app.state(), ServiceState::Partial);

        project.mark_error();
        assert_eq!(project.status(), Status::Error);
        assert_eq!(project.services().len(), 1);
    }

    #[test]
    fn grouping_orders_replicas_by_ordinal_and_keeps_first_observed_ports() {
        let mut second = record("web_app_2", "app", true);
        second.ordinal = Some(2);
        second.ports = PortMapping::parse_list("0.0.0.0:8081->80/tcp");
        let mut first = record("web_app_1", "app", true);
        first.ordinal = Some(1);
        first.image = "nginx:1.27".to_string();
        first.ports = PortMapping::parse_list("0.0.0.0:8080->80/tcp");

        let services = group_services(vec![second, first]);
        assert_eq!(services.len(), 1);
        let app = &services[0];
        assert_eq!(app.container_ids(), ["web_app_1", "web_app_2"]);
        assert_eq!(app.image, "nginx:1.27");
        assert_eq!(app.ports[0].host_port, Some(8081));
    }

    #[test]
    fn service_names_from_container_names() {
        assert_eq!(
            service_name_from_container("web_app_1").as_deref(),
            Some("app")
        );
        assert_eq!(
            service_name_from_container("/web-db-2").as_deref(),
            Some("db")
        );
        assert_eq!(service_name_from_container("standalone"), None);
        // Ambiguous names resolve to the second-to-last segment.
        assert_eq!(
            service_name_from_container("my_shop_api_1").as_deref(),
            Some("api")
        );
    }

    #[test]
    fn port_descriptors() {
        let port = PortMapping::parse("0.0.0.0:8080->80/tcp").unwrap();
        assert_eq!(port.host_ip.as_deref(), Some("0.0.0.0"));
        assert_eq!(port.host_port, Some(8080));
        assert_eq!(port.container_port, 80);
        assert_eq!(port.to_string(), "0.0.0.0:8080->80/tcp");

        let ipv6 = PortMapping::parse(":::8080->80/tcp").unwrap();
        assert_eq!(ipv6.host_ip.as_deref(), Some("::"));
        assert_eq!(ipv6.host_port, Some(8080));

        let internal = PortMapping::parse("5432/tcp").unwrap();
        assert_eq!(internal.host_port, None);
        assert_eq!(internal.to_string(), "5432/tcp");

        assert!(PortMapping::parse("garbage").is_none());
        assert_eq!(
            PortMapping::parse_list("0.0.0.0:80->80/tcp, 443/tcp").len(),
            2
        );
    }
}
