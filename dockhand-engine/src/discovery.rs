//! Cached view of every compose project the runtime knows about.
//!
//! Built from runtime API container listings. A snapshot is an immutable
//! shared map; refreshing replaces it wholesale, so readers never observe a
//! partially updated project.

use crate::runtime::{ContainerInfo, ContainerRuntime, LabelSelector, with_deadline};
use dockhand_core::model::{ContainerRecord, group_services, project_labels};
use dockhand_core::{Error, GlobalConfig, Project, Result, labels};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Projects keyed by name.
pub type ProjectMap = Arc<BTreeMap<String, Project>>;

#[derive(Debug, Default)]
struct Cache {
    projects: ProjectMap,
    scanned_at: Option<Instant>,
}

impl Cache {
    fn fresh(&self, ttl: Duration) -> Option<ProjectMap> {
        let scanned_at = self.scanned_at?;
        (scanned_at.elapsed() < ttl && !self.projects.is_empty()).then(|| self.projects.clone())
    }
}

#[derive(Debug)]
pub struct StateDiscovery {
    runtime: Arc<dyn ContainerRuntime>,
    cache: RwLock<Cache>,
    ttl: Duration,
    deadline: Duration,
}

impl StateDiscovery {
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>, ttl: Duration, deadline: Duration) -> Self {
        Self {
            runtime,
            cache: RwLock::new(Cache::default()),
            ttl,
            deadline,
        }
    }

    #[must_use]
    pub fn from_config(runtime: Arc<dyn ContainerRuntime>, config: &GlobalConfig) -> Self {
        Self::new(
            runtime,
            config.discovery.cache_ttl(),
            config.runtime.timeout(),
        )
    }

    #[must_use]
    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// All projects, served from the cache while it is younger than the TTL
    /// and non-empty.
    pub async fn discover_projects(&self) -> Result<ProjectMap> {
        if let Some(projects) = self.cache.read().await.fresh(self.ttl) {
            return Ok(projects);
        }

        let mut cache = self.cache.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(projects) = cache.fresh(self.ttl) {
            return Ok(projects);
        }

        let containers = with_deadline(
            self.deadline,
            "container listing",
            self.runtime.list_containers(&LabelSelector::any_project()),
        )
        .await?;
        debug!("Discovery saw {} compose container(s)", containers.len());

        let projects: ProjectMap = Arc::new(build_projects(containers));
        info!("Discovered {} project(s)", projects.len());
        cache.projects = projects.clone();
        cache.scanned_at = Some(Instant::now());
        Ok(projects)
    }

    pub async fn get_project(&self, name: &str) -> Result<Project> {
        self.discover_projects()
            .await?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("Project {name} not found")))
    }

    /// Like [`StateDiscovery::get_project`], bypassing the cache.
    pub async fn refresh_project(&self, name: &str) -> Result<Project> {
        self.invalidate().await;
        self.get_project(name).await
    }

    /// Live containers of a project. Never cached.
    pub async fn project_containers(&self, project: &str) -> Result<Vec<ContainerInfo>> {
        self.live(&LabelSelector::project(project)).await
    }

    /// Live containers of one service. Never cached.
    pub async fn service_containers(
        &self,
        project: &str,
        service: &str,
    ) -> Result<Vec<ContainerInfo>> {
        self.live(&LabelSelector::service(project, service)).await
    }

    async fn live(&self, selector: &LabelSelector) -> Result<Vec<ContainerInfo>> {
        with_deadline(
            self.deadline,
            "container listing",
            self.runtime.list_containers(selector),
        )
        .await
    }

    /// Forces the next read to query the runtime.
    pub async fn invalidate(&self) {
        debug!("Invalidating discovery cache");
        self.cache.write().await.scanned_at = None;
    }
}

fn build_projects(containers: Vec<ContainerInfo>) -> BTreeMap<String, Project> {
    let mut grouped: BTreeMap<String, (Project, Vec<ContainerRecord>)> = BTreeMap::new();

    for container in containers {
        let Some(name) = container.label(labels::PROJECT) else {
            continue;
        };
        let (_, records) = grouped
            .entry(name.to_string())
            .or_insert_with(|| (seed_project(name, &container), Vec::new()));
        match container.to_record() {
            Some(record) => records.push(record),
            None => debug!("Container {} has no service", container.name),
        }
    }

    grouped
        .into_iter()
        .map(|(name, (mut project, records))| {
            project.set_services(group_services(records));
            (name, project)
        })
        .collect()
}

/// A project shell filled from the first container's labels.
fn seed_project(name: &str, container: &ContainerInfo) -> Project {
    let working_dir = container
        .label(labels::WORKING_DIR)
        .map(PathBuf::from)
        .unwrap_or_default();
    let mut project = Project::new(name, working_dir);
    project.compose_files = container
        .label(labels::CONFIG_FILES)
        .map(labels::split_config_files)
        .unwrap_or_default()
        .into_iter()
        .map(PathBuf::from)
        .collect();
    project.labels = project_labels(&container.labels);
    project
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::{FakeRuntime, container};
    use dockhand_core::{ErrorKind, PortMapping, ServiceState, Status};
    use std::sync::atomic::Ordering;

    const TTL: Duration = Duration::from_secs(30);

    fn discovery(fake: &Arc<FakeRuntime>) -> StateDiscovery {
        StateDiscovery::new(fake.clone(), TTL, Duration::from_secs(5))
    }

    fn web() -> Arc<FakeRuntime> {
        Arc::new(FakeRuntime::with(vec![
            container("web", "app", 1, "running"),
            container("web", "app", 2, "exited"),
            container("web", "db", 1, "running"),
            container("shop", "api", 1, "exited"),
        ]))
    }

    #[tokio::test]
    async fn groups_containers_into_projects() {
        let fake = web();
        let projects = discovery(&fake).discover_projects().await.unwrap();
        assert_eq!(projects.keys().collect::<Vec<_>>(), ["shop", "web"]);

        let web = &projects["web"];
        assert_eq!(web.path, PathBuf::from("/srv/web"));
        assert_eq!(web.compose_files, [PathBuf::from("/srv/web/compose.yml")]);
        assert_eq!(web.labels[labels::PROJECT], "web");

        let app = web.service("app").unwrap();
        assert_eq!(app.replicas(), 2);
        assert_eq!(app.running(), 1);
        assert_eq!(app.state(), ServiceState::Partial);
        assert_eq!(app.container_ids(), ["id-web_app_1", "id-web_app_2"]);
        assert_eq!(web.status(), Status::Partial);

        assert_eq!(projects["shop"].status(), Status::Stopped);
    }

    #[tokio::test]
    async fn ports_come_from_the_first_listed_publisher() {
        let mut first = container("web", "app", 1, "running");
        let mut second = container("web", "app", 2, "running");
        first.ports = vec![PortMapping::parse("0.0.0.0:8080->80/tcp").unwrap()];
        second.ports = vec![PortMapping::parse("0.0.0.0:8081->80/tcp").unwrap()];
        let fake = Arc::new(FakeRuntime::with(vec![second, first]));

        let project = discovery(&fake).get_project("web").await.unwrap();
        let app = project.service("app").unwrap();
        assert_eq!(app.ports.len(), 1);
        assert_eq!(app.ports[0].host_port, Some(8081));
        assert_eq!(app.container_ids(), ["id-web_app_1", "id-web_app_2"]);
        assert_eq!(project.status(), Status::Running);
    }

    #[tokio::test]
    async fn snapshot_is_reused_within_ttl() {
        let fake = web();
        let discovery = discovery(&fake);

        let first = discovery.discover_projects().await.unwrap();
        let second = discovery.discover_projects().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fake.list_calls.load(Ordering::SeqCst), 1);

        discovery.invalidate().await;
        let third = discovery.discover_projects().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(
            first.keys().collect::<Vec<_>>(),
            third.keys().collect::<Vec<_>>()
        );
        assert_eq!(fake.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_misses_query_once() {
        let fake = web();
        let discovery = Arc::new(discovery(&fake));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let discovery = discovery.clone();
            handles.push(tokio::spawn(async move {
                discovery.discover_projects().await.unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().len(), 2);
        }
        assert_eq!(fake.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_snapshot_is_not_cached() {
        let fake = Arc::new(FakeRuntime::default());
        let discovery = discovery(&fake);
        assert!(discovery.discover_projects().await.unwrap().is_empty());
        assert!(discovery.discover_projects().await.unwrap().is_empty());
        assert_eq!(fake.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresh_bypasses_the_cache() {
        let fake = web();
        let discovery = discovery(&fake);
        assert_eq!(
            discovery.get_project("web").await.unwrap().status(),
            Status::Partial
        );

        fake.set_state("id-web_app_2", "running");
        assert_eq!(
            discovery.get_project("web").await.unwrap().status(),
            Status::Partial
        );
        assert_eq!(
            discovery.refresh_project("web").await.unwrap().status(),
            Status::Running
        );
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let fake = web();
        let err = discovery(&fake).get_project("blog").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn listing_failure_is_surfaced() {
        let fake = web();
        *fake.fail_list.lock().unwrap() = true;
        let err = discovery(&fake).discover_projects().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime);
    }

    #[tokio::test]
    async fn container_queries_are_live() {
        let fake = web();
        let discovery = discovery(&fake);
        discovery.discover_projects().await.unwrap();

        let app = discovery.service_containers("web", "app").await.unwrap();
        assert_eq!(app.len(), 2);
        let all = discovery.project_containers("web").await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(fake.list_calls.load(Ordering::SeqCst), 3);
    }
}
