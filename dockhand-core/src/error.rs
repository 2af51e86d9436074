//! The single error shape raised at every dockhand boundary.
//!
//! Failures are classified exactly once, where the diagnostic text is first
//! seen (a CLI's stderr, a runtime API response). Downstream code passes the
//! [`Error`] along untouched.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a failure, used to pick an actionable suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Unknown,
    Config,
    Network,
    Image,
    Runtime,
    Permission,
    NotFound,
}

impl ErrorKind {
    /// Classifies diagnostic text (usually a CLI's stderr).
    ///
    /// Case-insensitive substring match; the first matching rule wins.
    #[must_use]
    pub fn classify(text: &str) -> Self {
        let text = text.to_lowercase();
        let has = |needle: &str| text.contains(needle);

        if has("yaml") || has("parse") {
            Self::Config
        } else if has("port") && has("already") {
            Self::Network
        } else if has("network") {
            Self::Network
        } else if has("image") || has("pull") {
            Self::Image
        } else if has("permission") || has("denied") {
            Self::Permission
        } else if has("not found") || has("no such") {
            Self::NotFound
        } else {
            Self::Unknown
        }
    }

    #[must_use]
    pub const fn suggestion(self) -> &'static str {
        match self {
            Self::Config => {
                "Check the compose file syntax, e.g. with `docker compose config`."
            }
            Self::Network => {
                "A port or network is unavailable. Stop whatever holds the port or change the published port mapping."
            }
            Self::Image => {
                "Verify the image name and tag, and that you are logged in to the registry."
            }
            Self::Runtime => {
                "Check that the container runtime is running and healthy (`docker info`)."
            }
            Self::Permission => {
                "Check that your user may access the Docker socket (e.g. membership in the `docker` group)."
            }
            Self::NotFound => {
                "Check that the referenced project, service, container or tool exists."
            }
            Self::Unknown => "Re-run the operation with -v for more detail.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Config => write!(f, "config"),
            Self::Network => write!(f, "network"),
            Self::Image => write!(f, "image"),
            Self::Runtime => write!(f, "runtime"),
            Self::Permission => write!(f, "permission"),
            Self::NotFound => write!(f, "not found"),
        }
    }
}

/// A classified failure.
///
/// `detail` keeps the raw diagnostic text for debugging; `suggestion` is never
/// empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub detail: String,
    pub suggestion: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: String::new(),
            suggestion: kind.suggestion().to_string(),
        }
    }

    /// Builds an error whose kind is derived from `detail`.
    #[must_use]
    pub fn classified(message: impl Into<String>, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let kind = ErrorKind::classify(&detail);
        Self::new(kind, message).with_detail(detail)
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = suggestion.into();
        self
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    #[must_use]
    pub fn cancelled(what: &str) -> Self {
        Self::unknown(format!("{what} was cancelled"))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::Permission,
            _ => ErrorKind::Unknown,
        };
        Self::new(kind, err.to_string()).with_detail(format!("{err:?}"))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
