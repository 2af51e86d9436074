use crate::error::{Error, Result};
use crate::model::Project;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle and query operations understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Up,
    Down,
    Start,
    Stop,
    Restart,
    Pause,
    Unpause,
    Build,
    Pull,
    Ps,
    Config,
    Logs,
}

impl OperationKind {
    /// Verb passed to the compose CLI.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Pause => "pause",
            Self::Unpause => "unpause",
            Self::Build => "build",
            Self::Pull => "pull",
            Self::Ps => "ps",
            Self::Config => "config",
            Self::Logs => "logs",
        }
    }

    /// Whether the operation changes containers or images.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        match self {
            Self::Up
            | Self::Down
            | Self::Start
            | Self::Stop
            | Self::Restart
            | Self::Pause
            | Self::Unpause
            | Self::Build
            | Self::Pull => true,
            Self::Ps | Self::Config | Self::Logs => false,
        }
    }

    /// Compound operations go through the compose CLI; simple per-container
    /// transitions go straight to the runtime API.
    #[must_use]
    pub const fn uses_cli(self) -> bool {
        match self {
            Self::Up
            | Self::Down
            | Self::Build
            | Self::Pull
            | Self::Ps
            | Self::Config
            | Self::Logs => true,
            Self::Start | Self::Stop | Self::Restart | Self::Pause | Self::Unpause => false,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    Always,
    Missing,
    Never,
}

impl PullPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Missing => "missing",
            Self::Never => "never",
        }
    }
}

/// Which images `down` removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RemoveImages {
    All,
    Local,
}

impl RemoveImages {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Local => "local",
        }
    }
}

/// Kind-specific knobs. Options that do not apply to a kind are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct OperationOptions {
    /// `up`: run in the background.
    pub detach: bool,
    /// `up`: recreate containers even if unchanged.
    pub force_recreate: bool,
    /// `up`: never recreate existing containers.
    pub no_recreate: bool,
    /// `up`/`down`: remove containers for services not in the compose file.
    pub remove_orphans: bool,
    /// `up`: build images before starting.
    pub build: bool,
    /// `up`/`down`/`stop`/`restart`: shutdown timeout.
    pub timeout: Option<Duration>,
    /// `up`/`pull`: image pull policy.
    pub pull_policy: Option<PullPolicy>,
    /// `down`: remove named and anonymous volumes.
    pub remove_volumes: bool,
    /// `down`: remove images.
    pub remove_images: Option<RemoveImages>,
    /// `build`: do not use the layer cache.
    pub no_cache: bool,
    /// `build`: always pull newer base images.
    pub pull: bool,
    /// `pull`: keep going when an image fails to pull.
    pub ignore_pull_failures: bool,
    /// `build`/`pull`: suppress progress output.
    pub quiet: bool,
}

/// A request to run one operation against a project or a subset of its
/// services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub project: Project,
    pub services: Vec<String>,
    pub kind: OperationKind,
    pub options: OperationOptions,
}

impl OperationRequest {
    #[must_use]
    pub fn new(project: Project, kind: OperationKind) -> Self {
        Self {
            project,
            services: Vec::new(),
            kind,
            options: OperationOptions::default(),
        }
    }

    #[must_use]
    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services = services.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: OperationOptions) -> Self {
        self.options = options;
        self
    }
}

/// Outcome of one invocation. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    /// Present exactly when `success` is false.
    pub error: Option<Error>,
}

impl OperationResult {
    #[must_use]
    pub fn success(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: true,
            message: message.into(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
            duration,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(error: Error, duration: Duration) -> Self {
        Self {
            success: false,
            message: error.message.clone(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            duration,
            error: Some(error),
        }
    }

    #[must_use]
    pub fn with_output(mut self, stdout: String, stderr: String, exit_code: Option<i32>) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self.exit_code = exit_code;
        self
    }

    /// Turns a failed result into its error.
    pub fn into_result(self) -> Result<Self> {
        match self.error {
            Some(err) if !self.success => Err(err),
            _ => Ok(self),
        }
    }
}

/// Options for log retrieval.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LogOptions {
    pub follow: bool,
    pub timestamps: bool,
    /// Number of lines from the end, or `all`.
    pub tail: Option<String>,
    /// Unix timestamp (seconds) or relative duration understood by the CLI.
    pub since: Option<String>,
    pub until: Option<String>,
}
