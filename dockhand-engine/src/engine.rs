//! The operation surface shared by every consumer.
//!
//! Compound operations (`up`, `down`, `build`, `pull`, `ps`, `config`,
//! `logs`) run through the compose CLI. Per-container transitions (`start`,
//! `stop`, `restart`, `pause`, `unpause`) go straight to the runtime API
//! against the live container set. Every mutating call that may have had an
//! effect invalidates the discovery cache before it returns.

use crate::discovery::{ProjectMap, StateDiscovery};
use crate::events;
use crate::executor::{CommandExecutor, args};
use crate::runtime::{ContainerInfo, with_deadline};
use crate::stream::OperationStream;
use dockhand_core::config::ComposeConfig;
use dockhand_core::{
    Error, LogOptions, OperationKind, OperationOptions, OperationRequest, OperationResult,
    Project, ProjectEvent, Result, Service,
};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_BUFFER: usize = 100;

#[derive(Debug, Clone)]
pub struct OperationEngine {
    executor: Arc<CommandExecutor>,
    discovery: Arc<StateDiscovery>,
    log_buffer: usize,
    event_buffer: usize,
}

impl OperationEngine {
    #[must_use]
    pub fn new(executor: Arc<CommandExecutor>, discovery: Arc<StateDiscovery>) -> Self {
        Self {
            executor,
            discovery,
            log_buffer: DEFAULT_BUFFER,
            event_buffer: DEFAULT_BUFFER,
        }
    }

    #[must_use]
    pub fn from_config(
        executor: Arc<CommandExecutor>,
        discovery: Arc<StateDiscovery>,
        config: &ComposeConfig,
    ) -> Self {
        Self {
            log_buffer: config.log_buffer,
            event_buffer: config.event_buffer,
            ..Self::new(executor, discovery)
        }
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.executor
    }

    #[must_use]
    pub fn discovery(&self) -> &Arc<StateDiscovery> {
        &self.discovery
    }

    /// Runs one operation to completion.
    ///
    /// `Err` means nothing was attempted (no CLI, container listing failed,
    /// nothing to act on). A result with `success == false` means the attempt
    /// failed, possibly after changing some containers.
    pub async fn execute(&self, request: &OperationRequest) -> Result<OperationResult> {
        info!(
            "{} {} {:?}",
            request.kind, request.project.name, request.services
        );
        if request.kind.uses_cli() {
            let result = self.executor.execute(request).await?;
            if request.kind.is_mutating() {
                self.discovery.invalidate().await;
            }
            Ok(result)
        } else {
            self.execute_api(request).await
        }
    }

    async fn execute_api(&self, request: &OperationRequest) -> Result<OperationResult> {
        let started = Instant::now();
        let containers = self.target_containers(request).await?;
        let deadline = self.discovery.deadline();
        let kind = request.kind;

        let mut changed = 0usize;
        for container in &containers {
            if in_desired_state(kind, container) {
                debug!("{} already in desired state for {}", container.name, kind);
                continue;
            }

            let what = format!("{kind} {}", container.name);
            let call = self.transition(kind, &container.id, request.options.timeout);
            if let Err(e) = with_deadline(deadline, &what, call).await {
                warn!("{} failed: {}", what, e);
                // Containers changed so far stay changed.
                self.discovery.invalidate().await;
                let error = Error {
                    message: format!("{}: {}", container.name, e.message),
                    ..e
                };
                return Ok(OperationResult::failure(error, started.elapsed()));
            }
            changed += 1;
        }

        self.discovery.invalidate().await;
        Ok(OperationResult::success(
            format!(
                "{kind} {}: {changed} of {} container(s) changed",
                request.project.name,
                containers.len()
            ),
            started.elapsed(),
        ))
    }

    async fn target_containers(&self, request: &OperationRequest) -> Result<Vec<ContainerInfo>> {
        let project = &request.project.name;
        let containers = if request.services.is_empty() {
            self.discovery.project_containers(project).await?
        } else {
            let mut containers = Vec::new();
            for service in &request.services {
                containers.extend(self.discovery.service_containers(project, service).await?);
            }
            containers
        };

        if containers.is_empty() {
            return Err(Error::not_found(format!(
                "No containers found for {project} {}",
                request.services.join(" ")
            )));
        }
        Ok(containers)
    }

    async fn transition(&self, kind: OperationKind, id: &str, timeout: Option<Duration>) -> Result<()> {
        let runtime = self.discovery.runtime();
        match kind {
            OperationKind::Start => runtime.start_container(id).await,
            OperationKind::Stop => runtime.stop_container(id, timeout).await,
            OperationKind::Restart => runtime.restart_container(id, timeout).await,
            OperationKind::Pause => runtime.pause_container(id).await,
            OperationKind::Unpause => runtime.unpause_container(id).await,
            OperationKind::Up
            | OperationKind::Down
            | OperationKind::Build
            | OperationKind::Pull
            | OperationKind::Ps
            | OperationKind::Config
            | OperationKind::Logs => Err(Error::unknown(format!(
                "{kind} is not a per-container operation"
            ))),
        }
    }

    /// Starts an operation through the CLI and returns its output stream.
    pub async fn execute_stream(&self, request: &OperationRequest) -> Result<OperationStream> {
        info!(
            "{} {} {:?} (streaming)",
            request.kind, request.project.name, request.services
        );
        let args = args::operation_args(request.kind, &request.options, &request.services);
        let live = self.executor.spawn_live(&request.project, &args).await?;

        let discovery = self.discovery.clone();
        let mutating = request.kind.is_mutating();
        Ok(OperationStream::spawn(live, self.log_buffer, async move {
            if mutating {
                discovery.invalidate().await;
            }
        }))
    }

    async fn run(
        &self,
        project: &Project,
        kind: OperationKind,
        services: &[String],
        options: OperationOptions,
    ) -> Result<OperationResult> {
        let request = OperationRequest::new(project.clone(), kind)
            .with_services(services.iter().cloned())
            .with_options(options);
        self.execute(&request).await
    }

    pub async fn up(
        &self,
        project: &Project,
        services: &[String],
        options: OperationOptions,
    ) -> Result<OperationResult> {
        self.run(project, OperationKind::Up, services, options).await
    }

    pub async fn down(&self, project: &Project, options: OperationOptions) -> Result<OperationResult> {
        self.run(project, OperationKind::Down, &[], options).await
    }

    pub async fn start(&self, project: &Project, services: &[String]) -> Result<OperationResult> {
        self.run(project, OperationKind::Start, services, OperationOptions::default())
            .await
    }

    pub async fn stop(
        &self,
        project: &Project,
        services: &[String],
        timeout: Option<Duration>,
    ) -> Result<OperationResult> {
        let options = OperationOptions {
            timeout,
            ..OperationOptions::default()
        };
        self.run(project, OperationKind::Stop, services, options).await
    }

    pub async fn restart(
        &self,
        project: &Project,
        services: &[String],
        timeout: Option<Duration>,
    ) -> Result<OperationResult> {
        let options = OperationOptions {
            timeout,
            ..OperationOptions::default()
        };
        self.run(project, OperationKind::Restart, services, options)
            .await
    }

    pub async fn pause(&self, project: &Project, services: &[String]) -> Result<OperationResult> {
        self.run(project, OperationKind::Pause, services, OperationOptions::default())
            .await
    }

    pub async fn unpause(&self, project: &Project, services: &[String]) -> Result<OperationResult> {
        self.run(project, OperationKind::Unpause, services, OperationOptions::default())
            .await
    }

    pub async fn build(
        &self,
        project: &Project,
        services: &[String],
        options: OperationOptions,
    ) -> Result<OperationResult> {
        self.run(project, OperationKind::Build, services, options).await
    }

    pub async fn pull(
        &self,
        project: &Project,
        services: &[String],
        options: OperationOptions,
    ) -> Result<OperationResult> {
        self.run(project, OperationKind::Pull, services, options).await
    }

    /// Services as reported by the CLI.
    pub async fn ps(&self, project: &Project) -> Result<Vec<Service>> {
        self.executor.ps(project).await
    }

    /// Merged compose configuration text, unmodified.
    pub async fn config(&self, project: &Project) -> Result<String> {
        self.executor.config(project).await
    }

    /// Captured logs of a project or some of its services.
    pub async fn project_logs(
        &self,
        project: &Project,
        services: &[String],
        options: &LogOptions,
    ) -> Result<String> {
        self.executor.logs(project, services, options).await
    }

    /// Live `logs` output of a project through the CLI.
    pub async fn project_logs_stream(
        &self,
        project: &Project,
        services: &[String],
        options: &LogOptions,
    ) -> Result<OperationStream> {
        let live = self.executor.logs_live(project, services, options).await?;
        Ok(OperationStream::spawn(live, self.log_buffer, async {}))
    }

    /// Log lines of every container of one service, read from the runtime API.
    ///
    /// With several replicas each line is prefixed by its container name.
    pub async fn service_logs_stream(
        &self,
        project: &str,
        service: &str,
        options: &LogOptions,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let containers = self.discovery.service_containers(project, service).await?;
        if containers.is_empty() {
            return Err(Error::not_found(format!(
                "No containers found for {project} {service}"
            )));
        }

        let runtime = self.discovery.runtime();
        let prefixed = containers.len() > 1;
        let streams = containers.into_iter().map(|container| {
            let logs = runtime.logs(&container.id, options);
            if prefixed {
                let name = container.name;
                logs.map(move |line| line.map(|l| format!("{name} | {l}")))
                    .boxed()
            } else {
                logs
            }
        });
        Ok(stream::select_all(streams).boxed())
    }

    /// Subscribes to lifecycle events of `project`'s containers.
    #[must_use]
    pub fn watch_project(
        &self,
        project: &str,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Result<ProjectEvent>> {
        events::watch(
            self.discovery.clone(),
            project.to_string(),
            self.event_buffer,
            cancel,
        )
    }

    pub async fn discover_projects(&self) -> Result<ProjectMap> {
        self.discovery.discover_projects().await
    }

    pub async fn get_project(&self, name: &str) -> Result<Project> {
        self.discovery.get_project(name).await
    }

    pub async fn refresh_project(&self, name: &str) -> Result<Project> {
        self.discovery.refresh_project(name).await
    }

    pub async fn invalidate_cache(&self) {
        self.discovery.invalidate().await;
    }
}

fn in_desired_state(kind: OperationKind, container: &ContainerInfo) -> bool {
    match kind {
        OperationKind::Start => container.is_running(),
        OperationKind::Stop => !container.is_running() && !container.is_paused(),
        OperationKind::Pause => !container.is_running(),
        OperationKind::Unpause => !container.is_paused(),
        OperationKind::Restart
        | OperationKind::Up
        | OperationKind::Down
        | OperationKind::Build
        | OperationKind::Pull
        | OperationKind::Ps
        | OperationKind::Config
        | OperationKind::Logs => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ComposeVariant;
    use crate::runtime::fake::{FakeRuntime, container};
    use dockhand_core::{ErrorKind, Status};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct Harness {
        fake: Arc<FakeRuntime>,
        engine: OperationEngine,
        project: Project,
        _dir: TempDir,
    }

    fn harness(script: &str, containers: Vec<ContainerInfo>) -> Harness {
        let dir = TempDir::new().unwrap();
        let fake = Arc::new(FakeRuntime::with(containers));
        let discovery = Arc::new(StateDiscovery::new(
            fake.clone(),
            Duration::from_secs(30),
            Duration::from_secs(5),
        ));
        let executor = Arc::new(CommandExecutor::with_variant(ComposeVariant::custom(
            "sh",
            ["-c", script, "compose"],
        )));
        Harness {
            fake,
            engine: OperationEngine::new(executor, discovery),
            project: Project::new("web", dir.path()),
            _dir: dir,
        }
    }

    fn web_partial() -> Vec<ContainerInfo> {
        vec![
            container("web", "app", 1, "running"),
            container("web", "app", 2, "exited"),
            container("web", "db", 1, "running"),
        ]
    }

    fn list_calls(h: &Harness) -> usize {
        h.fake.list_calls.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn start_skips_running_containers_and_invalidates() {
        let h = harness("exit 1", web_partial());
        assert_eq!(h.engine.get_project("web").await.unwrap().status(), Status::Partial);

        let result = h.engine.start(&h.project, &[]).await.unwrap();
        assert!(result.success, "{}", result.message);
        assert_eq!(*h.fake.calls.lock().unwrap(), ["start id-web_app_2"]);
        assert_eq!(list_calls(&h), 2);

        assert_eq!(h.engine.get_project("web").await.unwrap().status(), Status::Running);
        assert_eq!(list_calls(&h), 3);
    }

    #[tokio::test]
    async fn first_failure_aborts_the_batch_without_rollback() {
        let h = harness(
            "exit 1",
            vec![
                container("web", "app", 1, "running"),
                container("web", "app", 2, "running"),
                container("web", "db", 1, "running"),
            ],
        );
        h.fake.broken.lock().unwrap().push("id-web_app_2".to_string());
        h.engine.discover_projects().await.unwrap();

        let result = h.engine.stop(&h.project, &[], None).await.unwrap();
        assert!(!result.success);
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Network);
        assert!(error.message.starts_with("web_app_2: "));
        assert!(!error.suggestion.is_empty());

        assert_eq!(h.fake.state_of("id-web_app_1"), "exited");
        assert_eq!(h.fake.state_of("id-web_db_1"), "running");
        assert_eq!(
            *h.fake.calls.lock().unwrap(),
            ["stop id-web_app_1", "stop id-web_app_2"]
        );

        h.engine.discover_projects().await.unwrap();
        assert_eq!(list_calls(&h), 3);
    }

    #[tokio::test]
    async fn failed_listing_leaves_the_cache_alone() {
        let h = harness("exit 1", web_partial());
        h.engine.discover_projects().await.unwrap();

        *h.fake.fail_list.lock().unwrap() = true;
        let err = h.engine.pause(&h.project, &[]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime);
        *h.fake.fail_list.lock().unwrap() = false;

        h.engine.discover_projects().await.unwrap();
        assert_eq!(list_calls(&h), 2);
    }

    #[tokio::test]
    async fn service_scoped_pause_and_unpause() {
        let h = harness("exit 1", web_partial());
        let db = ["db".to_string()];

        assert!(h.engine.pause(&h.project, &db).await.unwrap().success);
        assert_eq!(h.fake.state_of("id-web_db_1"), "paused");
        assert_eq!(h.fake.state_of("id-web_app_1"), "running");

        assert!(h.engine.unpause(&h.project, &db).await.unwrap().success);
        assert_eq!(h.fake.state_of("id-web_db_1"), "running");

        let err = h
            .engine
            .restart(&h.project, &["cache".to_string()], None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn pausing_a_partial_project_leaves_stopped_containers_alone() {
        let h = harness("exit 1", web_partial());

        let result = h.engine.pause(&h.project, &[]).await.unwrap();
        assert!(result.success, "{}", result.message);
        assert_eq!(
            *h.fake.calls.lock().unwrap(),
            ["pause id-web_app_1", "pause id-web_db_1"]
        );
        assert_eq!(h.fake.state_of("id-web_app_2"), "exited");

        let result = h.engine.pause(&h.project, &[]).await.unwrap();
        assert!(result.success, "{}", result.message);
        assert_eq!(h.fake.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn compound_operations_use_the_cli() {
        let h = harness("echo \"$@\"", web_partial());
        h.engine.discover_projects().await.unwrap();

        let options = OperationOptions {
            detach: true,
            ..OperationOptions::default()
        };
        let result = h.engine.up(&h.project, &[], options).await.unwrap();
        assert!(result.success);
        assert_eq!(result.stdout.trim(), "-p web up --detach");
        assert!(h.fake.calls.lock().unwrap().is_empty());

        h.engine.discover_projects().await.unwrap();
        assert_eq!(list_calls(&h), 2);
    }

    #[tokio::test]
    async fn queries_do_not_invalidate() {
        let h = harness("echo 'services: {}'", web_partial());
        h.engine.discover_projects().await.unwrap();

        assert_eq!(h.engine.config(&h.project).await.unwrap(), "services: {}\n");
        h.engine.discover_projects().await.unwrap();
        assert_eq!(list_calls(&h), 1);
    }

    #[tokio::test]
    async fn failed_cli_operation_still_invalidates() {
        let h = harness(
            "echo 'yaml: line 3: mapping values are not allowed' >&2; exit 15",
            web_partial(),
        );
        h.engine.discover_projects().await.unwrap();

        let result = h
            .engine
            .down(&h.project, OperationOptions::default())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, ErrorKind::Config);

        h.engine.discover_projects().await.unwrap();
        assert_eq!(list_calls(&h), 2);
    }

    #[tokio::test]
    async fn streaming_operation_invalidates_before_the_result() {
        let h = harness("echo 'Pulling app'; echo 'app Pulled'", web_partial());
        h.engine.discover_projects().await.unwrap();

        let request = OperationRequest::new(h.project.clone(), OperationKind::Pull);
        let mut stream = h.engine.execute_stream(&request).await.unwrap();
        assert_eq!(stream.next_line().await.as_deref(), Some("Pulling app"));
        assert_eq!(stream.next_line().await.as_deref(), Some("app Pulled"));
        assert!(stream.next_line().await.is_none());
        assert!(stream.result().await.unwrap().success);

        h.engine.discover_projects().await.unwrap();
        assert_eq!(list_calls(&h), 2);
    }

    #[tokio::test]
    async fn service_logs_merge_replicas() {
        let h = harness("exit 1", web_partial());
        {
            let mut logs = h.fake.log_lines.lock().unwrap();
            logs.insert("id-web_app_1".to_string(), vec!["ready".to_string()]);
            logs.insert("id-web_app_2".to_string(), vec!["crashed".to_string()]);
            logs.insert("id-web_db_1".to_string(), vec!["listening".to_string()]);
        }

        let mut lines: Vec<String> = h
            .engine
            .service_logs_stream("web", "app", &LogOptions::default())
            .await
            .unwrap()
            .map(|line| line.unwrap())
            .collect()
            .await;
        lines.sort();
        assert_eq!(lines, ["web_app_1 | ready", "web_app_2 | crashed"]);

        let db: Vec<Result<String>> = h
            .engine
            .service_logs_stream("web", "db", &LogOptions::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(db, [Ok("listening".to_string())]);
    }
}
