//! # dockhand-engine
//!
//! Lifecycle and observability engine for compose projects.
//!
//! *   [`executor::CommandExecutor`] detects and drives the compose CLI.
//! *   [`discovery::StateDiscovery`] keeps a cached view of projects built from
//!     the container runtime API.
//! *   [`engine::OperationEngine`] routes operations to the CLI or the runtime
//!     API, keeps the cache coherent and streams long-running operations.

#![warn(clippy::await_holding_lock)]
#![warn(clippy::redundant_pattern_matching)]
#![warn(clippy::wildcard_enum_match_arm)]
#![allow(clippy::let_underscore_must_use)]
#![allow(clippy::missing_errors_doc)]

pub mod config_loader;
pub mod discovery;
pub mod engine;
pub mod events;
pub mod executor;
pub mod logging;
pub mod runtime;
pub mod stream;

pub use discovery::StateDiscovery;
pub use engine::OperationEngine;
pub use executor::CommandExecutor;
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use stream::OperationStream;
