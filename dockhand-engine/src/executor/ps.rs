//! Parsers for `compose ps` output.
//!
//! Both parsers identify containers by name, so the structured and the
//! legacy table output yield the same services for the same containers.

use dockhand_core::model::{ContainerRecord, service_name_from_container};
use dockhand_core::{Error, PortMapping, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsEntry {
    name: String,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    publishers: Option<Vec<Publisher>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Publisher {
    #[serde(default, rename = "URL")]
    url: String,
    #[serde(default)]
    target_port: u16,
    #[serde(default)]
    published_port: u16,
    #[serde(default)]
    protocol: String,
}

impl Publisher {
    fn into_port(self) -> Option<PortMapping> {
        (self.published_port != 0).then(|| PortMapping {
            host_ip: (!self.url.is_empty()).then_some(self.url),
            host_port: Some(self.published_port),
            container_port: self.target_port,
            protocol: if self.protocol.is_empty() {
                "tcp".to_string()
            } else {
                self.protocol
            },
        })
    }
}

fn ordinal(name: &str) -> Option<u32> {
    name.rsplit(['_', '-']).next()?.parse().ok()
}

fn record(
    name: &str,
    service: Option<String>,
    image: String,
    running: bool,
    ports: Vec<PortMapping>,
) -> Option<ContainerRecord> {
    let service = service
        .filter(|s| !s.is_empty())
        .or_else(|| service_name_from_container(name))?;
    Some(ContainerRecord {
        id: name.to_string(),
        service,
        image,
        running,
        ports,
        ordinal: ordinal(name),
    })
}

/// Parses `ps --format json` output: either one JSON object per line or a
/// single JSON array.
pub fn parse_json(output: &str) -> Result<Vec<ContainerRecord>> {
    let trimmed = output.trim();
    let entries: Vec<PsEntry> = if trimmed.is_empty() {
        Vec::new()
    } else if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(json_error)?
    } else {
        trimmed
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(json_error))
            .collect::<Result<_>>()?
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            let running = entry.state.eq_ignore_ascii_case("running");
            let ports = entry
                .publishers
                .unwrap_or_default()
                .into_iter()
                .filter_map(Publisher::into_port)
                .collect();
            record(
                &entry.name,
                entry.service,
                entry.image.unwrap_or_default(),
                running,
                ports,
            )
        })
        .collect())
}

fn json_error(err: serde_json::Error) -> Error {
    Error::classified("Unrecognized ps output", format!("failed to parse ps json: {err}"))
}

/// Character offsets of the `State` and `Ports` columns in a table header.
fn column_offsets(header: &str) -> Option<(usize, usize)> {
    let chars: Vec<char> = header.chars().collect();
    let find = |word: &str| {
        let word: Vec<char> = word.chars().collect();
        chars.windows(word.len()).position(|w| w == word.as_slice())
    };
    let state = find("State")?;
    let ports = find("Ports").filter(|&p| p > state).unwrap_or(chars.len());
    Some((state, ports))
}

fn column(chars: &[char], from: usize, to: usize) -> String {
    let to = to.min(chars.len());
    if from >= to {
        return String::new();
    }
    chars[from..to].iter().collect::<String>().trim().to_string()
}

/// Parses the legacy `ps` table:
///
/// ```text
///   Name          Command       State           Ports
/// ---------------------------------------------------------
/// web_app_1   nginx -g ...   Up      0.0.0.0:8080->80/tcp
/// web_app_2   nginx -g ...   Exit 0
/// ```
///
/// Columns are fixed-width, so `State` and `Ports` are read at the header's
/// offsets. The name is the first word of each row.
#[must_use]
pub fn parse_table(output: &str) -> Vec<ContainerRecord> {
    let lines: Vec<&str> = output.lines().collect();
    let Some(rule) = lines.iter().position(|l| l.trim_start().starts_with("---")) else {
        return Vec::new();
    };
    let Some((state_at, ports_at)) = rule
        .checked_sub(1)
        .and_then(|i| column_offsets(lines[i]))
    else {
        return Vec::new();
    };

    lines[rule + 1..]
        .iter()
        .filter_map(|line| {
            let name = line.split_whitespace().next()?;
            let chars: Vec<char> = line.chars().collect();
            let state = column(&chars, state_at, ports_at);
            let running = state.to_lowercase().starts_with("up") && !state.contains("Paused");
            let ports = PortMapping::parse_list(&column(&chars, ports_at, chars.len()))
                .into_iter()
                .filter(|p| p.host_port.is_some())
                .collect();
            record(name, None, String::new(), running, ports)
        })
        .collect()
}
