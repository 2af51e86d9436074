//! Shared utilities for dockhand.

/// Process termination helpers.
pub mod process;
/// Compose project discovery from the filesystem.
pub mod scan;

pub use scan::ProjectScanner;
