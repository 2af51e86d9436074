use serde::{Deserialize, Serialize};

/// A runtime lifecycle event for a container that belongs to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectEvent {
    pub project: String,
    pub service: String,
    pub container_id: String,
    pub container_name: String,
    /// Runtime action, e.g. `start`, `die`, `pause`.
    pub action: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
}
