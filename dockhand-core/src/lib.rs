//! Shared types for dockhand: the project/service model, the compose label
//! contract, operation requests and results, and the error taxonomy.

pub mod config;
pub use config::GlobalConfig;
pub mod error;
pub use error::{Error, ErrorKind, Result};
pub mod event;
pub use event::ProjectEvent;
pub mod labels;
pub mod model;
pub use model::{PortMapping, Project, Service, ServiceQuery, ServiceState, Status};
pub mod operation;
pub use operation::{
    LogOptions, OperationKind, OperationOptions, OperationRequest, OperationResult,
};
pub mod progress;
pub use progress::ProgressTracker;
