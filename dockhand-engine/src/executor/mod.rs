//! Detects and drives the compose CLI.
//!
//! The CLI variant is probed once per [`CommandExecutor`]; construct one at
//! startup and share it. Every invocation runs in the project directory with
//! stdout and stderr captured separately.

pub mod args;
pub mod live;
pub mod ps;

pub use live::{LiveProcess, Pipe};

use async_trait::async_trait;
use dockhand_core::config::ComposeConfig;
use dockhand_core::model::group_services;
use dockhand_core::{
    Error, LogOptions, OperationRequest, OperationResult, Project, Result, Service, ServiceQuery,
};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const INSTALL_SUGGESTION: &str = "Install Docker with the Compose plugin (`docker compose`) \
     or the standalone `docker-compose` binary, and make sure it is on PATH.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantKind {
    /// `docker compose ...`
    Plugin,
    /// `docker-compose ...`
    Standalone,
    /// An explicitly configured program and prefix.
    Custom,
}

/// How the compose CLI is invoked: a program plus the arguments that precede
/// the global flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeVariant {
    pub kind: VariantKind,
    pub program: PathBuf,
    pub prefix_args: Vec<String>,
}

impl ComposeVariant {
    #[must_use]
    pub fn plugin() -> Self {
        Self {
            kind: VariantKind::Plugin,
            program: PathBuf::from("docker"),
            prefix_args: vec!["compose".to_string()],
        }
    }

    #[must_use]
    pub fn standalone() -> Self {
        Self::standalone_at("docker-compose")
    }

    #[must_use]
    pub fn standalone_at(program: impl Into<PathBuf>) -> Self {
        Self {
            kind: VariantKind::Standalone,
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    #[must_use]
    pub fn custom<I, S>(program: impl Into<PathBuf>, prefix_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind: VariantKind::Custom,
            program: program.into(),
            prefix_args: prefix_args.into_iter().map(Into::into).collect(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix_args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    #[must_use]
    pub fn describe(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        if self.kind != VariantKind::Custom {
            parts.extend(self.prefix_args.iter().cloned());
        }
        parts.join(" ")
    }
}

#[derive(Debug)]
pub struct CommandExecutor {
    candidates: Vec<ComposeVariant>,
    variant: OnceCell<Result<ComposeVariant>>,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor {
    /// Probes the plugin form first, then the standalone binary.
    #[must_use]
    pub fn new() -> Self {
        Self::with_candidates(vec![ComposeVariant::plugin(), ComposeVariant::standalone()])
    }

    #[must_use]
    pub fn with_candidates(candidates: Vec<ComposeVariant>) -> Self {
        Self {
            candidates,
            variant: OnceCell::new(),
        }
    }

    /// Binds `variant` without probing.
    #[must_use]
    pub fn with_variant(variant: ComposeVariant) -> Self {
        Self {
            candidates: vec![variant.clone()],
            variant: OnceCell::new_with(Some(Ok(variant))),
        }
    }

    #[must_use]
    pub fn from_config(config: &ComposeConfig) -> Self {
        match &config.binary {
            Some(binary) => Self::with_variant(ComposeVariant::standalone_at(binary)),
            None => Self::new(),
        }
    }

    /// The bound CLI variant, detecting it on first use.
    ///
    /// Concurrent first callers share a single detection. A failed detection
    /// is kept too, so later calls report it without probing again.
    pub async fn variant(&self) -> Result<&ComposeVariant> {
        self.variant
            .get_or_init(|| self.detect())
            .await
            .as_ref()
            .map_err(Clone::clone)
    }

    async fn detect(&self) -> Result<ComposeVariant> {
        let mut tried = Vec::new();
        for candidate in &self.candidates {
            let mut cmd = candidate.command();
            cmd.arg("version");
            match cmd.output().await {
                Ok(output) if output.status.success() => {
                    let version = String::from_utf8_lossy(&output.stdout);
                    info!(
                        "Using compose CLI `{}` ({})",
                        candidate.describe(),
                        version.lines().next().unwrap_or_default().trim()
                    );
                    return Ok(candidate.clone());
                }
                Ok(output) => {
                    debug!(
                        "`{} version` exited with {:?}",
                        candidate.describe(),
                        output.status.code()
                    );
                }
                Err(e) => debug!("`{} version` failed: {}", candidate.describe(), e),
            }
            tried.push(candidate.describe());
        }

        Err(Error::not_found("No compose CLI found")
            .with_detail(format!("tried: {}", tried.join(", ")))
            .with_suggestion(INSTALL_SUGGESTION))
    }

    /// Global flags for `project` followed by `args`.
    ///
    /// Relative compose and env file paths resolve against the project path.
    #[must_use]
    pub fn build_args(project: &Project, args: &[String]) -> Vec<String> {
        let mut full = Vec::new();
        if !project.name.is_empty() {
            full.extend(["-p".to_string(), project.name.clone()]);
        }
        for file in &project.compose_files {
            full.push("-f".to_string());
            full.push(project.resolve(file).display().to_string());
        }
        for file in &project.env_files {
            full.push("--env-file".to_string());
            full.push(project.resolve(file).display().to_string());
        }
        full.extend(args.iter().cloned());
        full
    }

    async fn command_for(&self, project: &Project, args: &[String]) -> Result<Command> {
        let variant = self.variant().await?;
        let mut cmd = variant.command();
        cmd.args(Self::build_args(project, args))
            .current_dir(&project.path);
        Ok(cmd)
    }

    /// Runs one CLI invocation to completion.
    ///
    /// A non-zero exit is reported as a failed [`OperationResult`]; `Err` means
    /// the CLI could not be started at all.
    pub async fn run(&self, project: &Project, args: &[String]) -> Result<OperationResult> {
        let what = describe_call(project, args);
        let mut cmd = self.command_for(project, args).await?;
        debug!("Running {}", what);

        let started = Instant::now();
        let output = cmd.output().await.map_err(|e| spawn_error(&what, e))?;
        let duration = started.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let code = output.status.code();

        if output.status.success() {
            debug!("{} finished in {:?}", what, duration);
            Ok(OperationResult::success(format!("{what} completed"), duration)
                .with_output(stdout, stderr, code))
        } else {
            warn!("{} exited with {:?}", what, code);
            Ok(failure_result(&what, stdout, stderr, code, duration))
        }
    }

    /// Runs an operation request through the CLI.
    pub async fn execute(&self, request: &OperationRequest) -> Result<OperationResult> {
        let args = args::operation_args(request.kind, &request.options, &request.services);
        self.run(&request.project, &args).await
    }

    /// Starts an invocation whose output is read while it runs.
    pub async fn spawn_live(&self, project: &Project, args: &[String]) -> Result<LiveProcess> {
        let what = describe_call(project, args);
        let mut cmd = self.command_for(project, args).await?;
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        debug!("Spawning {}", what);

        let child = cmd.spawn().map_err(|e| spawn_error(&what, e))?;
        Ok(LiveProcess::new(what, child))
    }

    /// Current services of `project`.
    ///
    /// Tries the structured `--format json` output first and falls back to the
    /// legacy table once.
    pub async fn ps(&self, project: &Project) -> Result<Vec<Service>> {
        let structured = self
            .run(project, &strings(&["ps", "--all", "--format", "json"]))
            .await?;

        let records = if structured.success {
            match ps::parse_json(&structured.stdout) {
                Ok(records) => Some(records),
                Err(e) => {
                    debug!("Structured ps output unusable: {}", e.detail);
                    None
                }
            }
        } else {
            debug!("Structured ps failed: {}", structured.message);
            None
        };

        let records = match records {
            Some(records) => records,
            None => {
                let table = self.run(project, &strings(&["ps"])).await?.into_result()?;
                ps::parse_table(&table.stdout)
            }
        };
        Ok(group_services(records))
    }

    /// Captured logs of `services` (all services when empty).
    ///
    /// `follow` is ignored; use a live process to follow.
    pub async fn logs(
        &self,
        project: &Project,
        services: &[String],
        options: &LogOptions,
    ) -> Result<String> {
        let options = LogOptions {
            follow: false,
            ..options.clone()
        };
        let result = self
            .run(project, &args::logs_args(&options, services))
            .await?
            .into_result()?;
        Ok(result.stdout)
    }

    /// Starts `logs` as a live process.
    pub async fn logs_live(
        &self,
        project: &Project,
        services: &[String],
        options: &LogOptions,
    ) -> Result<LiveProcess> {
        self.spawn_live(project, &args::logs_args(options, services))
            .await
    }

    /// The merged compose configuration, as printed by the CLI.
    pub async fn config(&self, project: &Project) -> Result<String> {
        let result = self
            .run(project, &strings(&["config"]))
            .await?
            .into_result()?;
        Ok(result.stdout)
    }
}

#[async_trait]
impl ServiceQuery for CommandExecutor {
    async fn services(&self, project: &Project) -> Result<Vec<Service>> {
        self.ps(project).await
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| (*a).to_string()).collect()
}

fn describe_call(project: &Project, args: &[String]) -> String {
    match args.first() {
        Some(verb) => format!("{} {}", project.name, verb),
        None => project.name.clone(),
    }
}

fn spawn_error(what: &str, err: std::io::Error) -> Error {
    let err = Error::from(err);
    Error::new(err.kind, format!("Failed to start {what}: {}", err.message)).with_detail(err.detail)
}

/// Builds the failed result of a CLI invocation.
///
/// The message is the first stderr line that carries content; the error kind
/// comes from the whole stderr text.
pub(crate) fn failure_result(
    what: &str,
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
    duration: Duration,
) -> OperationResult {
    let message = first_meaningful_line(&stderr).map_or_else(
        || match exit_code {
            Some(code) => format!("{what} failed with exit code {code}"),
            None => format!("{what} was terminated by a signal"),
        },
        str::to_string,
    );
    let error = Error::classified(message, stderr.clone());
    OperationResult::failure(error, duration).with_output(stdout, stderr, exit_code)
}

fn first_meaningful_line(text: &str) -> Option<&str> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !is_timestamped(line))
}

/// Structured log lines (`time="..." level=...`) and lines starting with a
/// date carry no user-facing message.
fn is_timestamped(line: &str) -> bool {
    let bytes = line.as_bytes();
    line.starts_with("time=")
        || (bytes.len() >= 5 && bytes[..4].iter().all(u8::is_ascii_digit) && bytes[4] == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockhand_core::{ErrorKind, OperationKind, OperationOptions, ServiceState, Status};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn script(body: &str) -> ComposeVariant {
        ComposeVariant::custom("sh", ["-c", body, "compose"])
    }

    fn project_in(dir: &TempDir) -> Project {
        Project::new("web", dir.path())
    }

    #[tokio::test]
    async fn detection_runs_once_under_concurrent_use() {
        let dir = TempDir::new().unwrap();
        let probes = dir.path().join("probes");
        let probes = probes.display();
        let executor = Arc::new(CommandExecutor::with_candidates(vec![
            script(&format!("echo missing >> {probes}; exit 127")),
            script(&format!("echo found >> {probes}; echo 'v2.24.0'")),
        ]));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let executor = executor.clone();
            handles.push(tokio::spawn(async move {
                executor.variant().await.map(|v| v.prefix_args[1].clone())
            }));
        }
        for handle in handles {
            let bound = handle.await.unwrap().unwrap();
            assert!(bound.contains("found"));
        }

        let log = std::fs::read_to_string(dir.path().join("probes")).unwrap();
        assert_eq!(log.lines().collect::<Vec<_>>(), ["missing", "found"]);
    }

    #[tokio::test]
    async fn missing_cli_is_not_found() {
        let executor = CommandExecutor::with_candidates(vec![
            ComposeVariant::standalone_at("/nonexistent/docker-compose"),
            script("exit 1"),
        ]);
        let err = executor.variant().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(err.suggestion.contains("docker-compose"));
        assert!(err.detail.contains("/nonexistent/docker-compose"));
    }

    #[tokio::test]
    async fn failed_detection_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let probes = dir.path().join("probes");
        let executor = CommandExecutor::with_candidates(vec![script(&format!(
            "echo probe >> {}; exit 127",
            probes.display()
        ))]);

        for _ in 0..3 {
            let err = executor.variant().await.unwrap_err();
            assert_eq!(err.kind, ErrorKind::NotFound);
        }
        let err = executor
            .run(&project_in(&dir), &strings(&["ps"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let log = std::fs::read_to_string(&probes).unwrap();
        assert_eq!(log.lines().count(), 1);
    }

    #[test]
    fn global_flags_precede_the_verb() {
        let mut project = Project::new("web", "/srv/web");
        project.compose_files = vec![
            PathBuf::from("compose.yml"),
            PathBuf::from("/etc/web/override.yml"),
        ];
        project.env_files = vec![PathBuf::from(".env")];

        let args = CommandExecutor::build_args(&project, &strings(&["up", "--detach"]));
        assert_eq!(
            args,
            [
                "-p",
                "web",
                "-f",
                "/srv/web/compose.yml",
                "-f",
                "/etc/web/override.yml",
                "--env-file",
                "/srv/web/.env",
                "up",
                "--detach",
            ]
        );
    }

    #[tokio::test]
    async fn request_runs_in_project_directory() {
        let dir = TempDir::new().unwrap();
        let executor = CommandExecutor::with_variant(script("pwd; echo \"$@\""));
        let request = OperationRequest::new(project_in(&dir), OperationKind::Up)
            .with_services(["app"])
            .with_options(OperationOptions {
                detach: true,
                ..OperationOptions::default()
            });

        let result = executor.execute(&request).await.unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        let mut lines = result.stdout.lines();
        let cwd = std::fs::canonicalize(lines.next().unwrap()).unwrap();
        assert_eq!(cwd, std::fs::canonicalize(dir.path()).unwrap());
        assert_eq!(lines.next(), Some("-p web up --detach app"));
    }

    #[tokio::test]
    async fn failed_invocation_is_classified() {
        let dir = TempDir::new().unwrap();
        let executor = CommandExecutor::with_variant(script(
            "echo 'time=\"2024-05-01T10:00:00Z\" level=warning msg=\"version is obsolete\"' >&2; \
             echo '' >&2; \
             echo 'Error response from daemon: Bind for 0.0.0.0:8080 failed: port is already allocated' >&2; \
             exit 3",
        ));

        let result = executor
            .run(&project_in(&dir), &strings(&["up"]))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(
            result.message,
            "Error response from daemon: Bind for 0.0.0.0:8080 failed: port is already allocated"
        );
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Network);
        assert!(!error.suggestion.is_empty());
        assert!(error.detail.contains("level=warning"));
    }

    #[test]
    fn timestamp_prefixed_lines_are_skipped() {
        let stderr = "2024-05-01 10:00:00 pulling\n\n  no such service: api\n";
        assert_eq!(first_meaningful_line(stderr), Some("no such service: api"));
        assert_eq!(first_meaningful_line("time=\"x\"\n"), None);
    }

    #[tokio::test]
    async fn ps_falls_back_to_the_table() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("table.txt"),
            "   Name        Command     State    Ports\n\
             ------------------------------------------\n\
             web_app_1   nginx -g ...   Up       0.0.0.0:8080->80/tcp\n\
             web_app_2   nginx -g ...   Exit 0\n",
        )
        .unwrap();
        let executor = CommandExecutor::with_variant(script(
            "case \"$*\" in *--format*) echo 'unknown flag: --format' >&2; exit 1;; esac; cat table.txt",
        ));

        let mut project = project_in(&dir);
        project.set_services(executor.ps(&project).await.unwrap());
        let app = project.service("app").unwrap();
        assert_eq!(app.replicas(), 2);
        assert_eq!(app.running(), 1);
        assert_eq!(app.state(), ServiceState::Partial);
        assert_eq!(project.status(), Status::Partial);
    }

    #[tokio::test]
    async fn ps_prefers_structured_output() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("ps.json"),
            "{\"Name\":\"web-db-1\",\"Service\":\"db\",\"Image\":\"postgres:16\",\"State\":\"running\"}\n",
        )
        .unwrap();
        let executor = CommandExecutor::with_variant(script(
            "case \"$*\" in *--format*) cat ps.json;; *) exit 9;; esac",
        ));

        let services = executor.ps(&project_in(&dir)).await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "db");
        assert_eq!(services[0].image, "postgres:16");
        assert!(services[0].is_fully_running());
    }

    #[tokio::test]
    async fn failed_refresh_marks_project_error() {
        let dir = TempDir::new().unwrap();
        let executor = CommandExecutor::with_variant(script(
            "echo 'Cannot connect to the Docker daemon' >&2; exit 1",
        ));
        let mut project = project_in(&dir);
        let mut app = Service::new("app");
        app.record_container("web_app_1", true);
        project.set_services(vec![app]);

        let scanner = dockhand_utils::ProjectScanner::default();
        let err = scanner
            .refresh_project(&mut project, &executor)
            .await
            .unwrap_err();
        assert_eq!(err.message, "Cannot connect to the Docker daemon");
        assert_eq!(project.status(), Status::Error);
        assert_eq!(project.services().len(), 1);
        assert_eq!(project.services()[0].running(), 1);
    }

    #[tokio::test]
    async fn config_is_passed_through() {
        let dir = TempDir::new().unwrap();
        let executor = CommandExecutor::with_variant(script(
            "printf 'services:\\n  app:\\n    image: nginx\\n'",
        ));
        let text = executor.config(&project_in(&dir)).await.unwrap();
        assert_eq!(text, "services:\n  app:\n    image: nginx\n");
    }

    #[tokio::test]
    async fn live_process_yields_lines_in_order() {
        let dir = TempDir::new().unwrap();
        let executor =
            CommandExecutor::with_variant(script("echo one; echo two; echo warn >&2; echo three"));
        let mut live = executor
            .spawn_live(&project_in(&dir), &strings(&["pull"]))
            .await
            .unwrap();

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        while let Some((pipe, line)) = live.next_line().await {
            match pipe {
                Pipe::Stdout => stdout.push(line),
                Pipe::Stderr => stderr.push(line),
            }
        }
        assert_eq!(stdout, ["one", "two", "three"]);
        assert_eq!(stderr, ["warn"]);

        let result = live.finish().await.unwrap();
        assert!(result.success);
        assert_eq!(result.stderr, "warn\n");
    }

    #[tokio::test]
    async fn closing_a_live_process_kills_it() {
        let dir = TempDir::new().unwrap();
        let executor = CommandExecutor::with_variant(script("echo started; exec sleep 30"));
        let mut live = executor
            .logs_live(&project_in(&dir), &[], &LogOptions::default())
            .await
            .unwrap();
        assert_eq!(live.next_line().await, Some((Pipe::Stdout, "started".to_string())));

        let closed = tokio::time::timeout(Duration::from_secs(5), live.close()).await;
        assert!(closed.is_ok());
    }
}
