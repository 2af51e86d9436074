pub mod global;

pub use global::{ComposeConfig, DiscoveryConfig, GlobalConfig, RuntimeConfig, ScanConfig};
