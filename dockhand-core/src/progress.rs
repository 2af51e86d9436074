//! Rolls per-layer pull progress up into one figure.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LayerStatus {
    #[default]
    Pending,
    Downloading,
    Extracting,
    Complete,
}

impl LayerStatus {
    /// Maps a docker/compose pull status message to a layer status.
    #[must_use]
    pub fn from_message(message: &str) -> Option<Self> {
        let message = message.trim().to_lowercase();
        let status = if message.starts_with("pull complete")
            || message.starts_with("already exists")
        {
            Self::Complete
        } else if message.starts_with("extracting") {
            Self::Extracting
        } else if message.starts_with("downloading")
            || message.starts_with("download complete")
            || message.starts_with("verifying checksum")
        {
            Self::Downloading
        } else if message.starts_with("waiting") || message.starts_with("pulling fs layer") {
            Self::Pending
        } else {
            return None;
        };
        Some(status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerProgress {
    pub status: LayerStatus,
    pub current: u64,
    pub total: Option<u64>,
}

/// Overall pull progress.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub status: LayerStatus,
    pub percent: f64,
    pub downloaded: u64,
    pub total: u64,
    pub completed_layers: usize,
    pub layer_count: usize,
    /// Bytes per second since tracking began.
    pub throughput: f64,
}

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    layers: BTreeMap<String, LayerProgress>,
    started: Instant,
    summary: ProgressSummary,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            layers: BTreeMap::new(),
            started: Instant::now(),
            summary: ProgressSummary::default(),
        }
    }

    pub fn update_layer(
        &mut self,
        layer: impl Into<String>,
        status: LayerStatus,
        current: u64,
        total: Option<u64>,
    ) -> ProgressSummary {
        let entry = self.layers.entry(layer.into()).or_default();
        entry.status = status;
        entry.current = current;
        if total.is_some() {
            entry.total = total;
        }
        if status == LayerStatus::Complete {
            if let Some(total) = entry.total {
                entry.current = total;
            }
        }
        self.recompute();
        self.summary
    }

    /// Feeds one line of pull output. Returns true if it described a layer.
    ///
    /// Understands both `5d3b2c2d21ba: Downloading [==>  ] 1.2MB/10MB` and the
    /// compose form `⠿ 5d3b2c2d21ba Pull complete`.
    pub fn ingest_line(&mut self, line: &str) -> bool {
        let line = line.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());
        let Some((layer, rest)) = line.split_once(char::is_whitespace) else {
            return false;
        };
        let layer = layer.trim_end_matches(':');
        if layer.len() < 12 || !layer.chars().all(|c| c.is_ascii_hexdigit()) {
            return false;
        }
        let Some(status) = LayerStatus::from_message(rest) else {
            return false;
        };

        let (current, total) = parse_transfer(rest).map_or_else(
            || {
                let previous = self.layers.get(layer).copied().unwrap_or_default();
                (previous.current, None)
            },
            |(current, total)| (current, Some(total)),
        );
        self.update_layer(layer, status, current, total);
        true
    }

    #[must_use]
    pub const fn summary(&self) -> ProgressSummary {
        self.summary
    }

    #[must_use]
    pub fn layer(&self, id: &str) -> Option<&LayerProgress> {
        self.layers.get(id)
    }

    fn recompute(&mut self) {
        let layer_count = self.layers.len();
        let completed_layers = self
            .layers
            .values()
            .filter(|l| l.status == LayerStatus::Complete)
            .count();

        let (downloaded, total) = self
            .layers
            .values()
            .filter_map(|l| l.total.map(|t| (l.current.min(t), t)))
            .fold((0u64, 0u64), |(d, t), (c, lt)| (d + c, t + lt));

        let percent = if total > 0 {
            downloaded as f64 / total as f64 * 100.0
        } else if layer_count > 0 {
            completed_layers as f64 / layer_count as f64 * 100.0
        } else {
            0.0
        };

        let status = if layer_count > 0 && completed_layers == layer_count {
            LayerStatus::Complete
        } else if self.has_layer(LayerStatus::Extracting) {
            LayerStatus::Extracting
        } else if self.has_layer(LayerStatus::Downloading) {
            LayerStatus::Downloading
        } else {
            LayerStatus::Pending
        };

        let elapsed = self.started.elapsed().as_secs_f64();
        let throughput = if elapsed > 0.0 {
            downloaded as f64 / elapsed
        } else {
            0.0
        };

        self.summary = ProgressSummary {
            status,
            percent,
            downloaded,
            total,
            completed_layers,
            layer_count,
            throughput,
        };
    }

    fn has_layer(&self, status: LayerStatus) -> bool {
        self.layers.values().any(|l| l.status == status)
    }
}

/// Parses the `1.2MB/10MB` part of a progress line.
fn parse_transfer(text: &str) -> Option<(u64, u64)> {
    text.split_whitespace().rev().find_map(|token| {
        let (current, total) = token.split_once('/')?;
        Some((parse_size(current)?, parse_size(total)?))
    })
}

/// Parses a decimal size such as `512B`, `1.2kB` or `10MB`.
fn parse_size(text: &str) -> Option<u64> {
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let number: f64 = number.parse().ok()?;
    let multiplier = match unit.to_ascii_uppercase().as_str() {
        "" | "B" => 1.0,
        "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        _ => return None,
    };
    Some((number * multiplier).round() as u64)
}
