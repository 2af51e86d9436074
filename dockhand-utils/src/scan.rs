//! Compose project discovery from the filesystem.
//!
//! Used where the runtime API is unavailable or projects have never been
//! started. Produces seed [`Project`] records with `Status::Unknown`.

use dockhand_core::config::ScanConfig;
use dockhand_core::{Error, Project, Result, ServiceQuery};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Primary compose file names, matched case-insensitively.
pub const PRIMARY_FILES: [&str; 4] = [
    "compose.yaml",
    "compose.yml",
    "docker-compose.yaml",
    "docker-compose.yml",
];

const ENV_FILE: &str = ".env";

#[derive(Debug, Clone)]
pub struct ProjectScanner {
    max_depth: usize,
    ignore: Vec<String>,
}

impl Default for ProjectScanner {
    fn default() -> Self {
        Self::from_config(&ScanConfig::default())
    }
}

impl ProjectScanner {
    #[must_use]
    pub fn new(max_depth: usize, ignore: Vec<String>) -> Self {
        Self {
            max_depth,
            ignore: ignore.into_iter().map(|d| d.to_lowercase()).collect(),
        }
    }

    #[must_use]
    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(config.max_depth, config.ignore.clone())
    }

    /// Walks every root and returns the projects found, ordered by path.
    ///
    /// Unreadable directories are skipped. The walk stops with an error if
    /// `cancel` fires.
    pub async fn scan(&self, roots: &[PathBuf], cancel: &CancellationToken) -> Result<Vec<Project>> {
        let mut projects = Vec::new();
        let mut queue: VecDeque<(PathBuf, usize)> = VecDeque::new();

        for root in roots {
            let root = fs::canonicalize(root).await.unwrap_or_else(|_| root.clone());
            queue.push_back((root, 0));
        }

        while let Some((dir, depth)) = queue.pop_front() {
            if cancel.is_cancelled() {
                return Err(Error::cancelled("project scan"));
            }

            let entries = match read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("Skipping unreadable directory {:?}: {}", dir, e);
                    continue;
                }
            };

            if let Some(project) = project_from_entries(&dir, &entries) {
                debug!("Found compose project {} at {:?}", project.name, dir);
                projects.push(project);
            }

            if depth >= self.max_depth {
                continue;
            }
            for entry in entries {
                if entry.is_dir && !self.is_skipped(&entry.name) {
                    queue.push_back((dir.join(&entry.name), depth + 1));
                }
            }
        }

        projects.sort_by(|a, b| a.path.cmp(&b.path));
        info!("Scan found {} compose project(s)", projects.len());
        Ok(projects)
    }

    /// Builds the project rooted at exactly `dir`, if it has a compose file.
    pub async fn project_at(&self, dir: &Path) -> Result<Option<Project>> {
        let dir = fs::canonicalize(dir).await?;
        let entries = read_dir(&dir).await?;
        Ok(project_from_entries(&dir, &entries))
    }

    /// Re-queries a project's services and recomputes its status.
    ///
    /// On failure the project is marked `Error` and keeps its previous
    /// services.
    pub async fn refresh_project(
        &self,
        project: &mut Project,
        query: &dyn ServiceQuery,
    ) -> Result<()> {
        match query.services(project).await {
            Ok(services) => {
                project.set_services(services);
                Ok(())
            }
            Err(e) => {
                project.mark_error();
                Err(e)
            }
        }
    }

    fn is_skipped(&self, name: &str) -> bool {
        name.starts_with('.') || self.ignore.iter().any(|i| i.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug)]
struct DirEntry {
    name: String,
    is_dir: bool,
}

async fn read_dir(dir: &Path) -> std::io::Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    let mut reader = fs::read_dir(dir).await?;
    while let Some(entry) = reader.next_entry().await? {
        let Ok(file_type) = entry.file_type().await else {
            continue;
        };
        // Symlinked directories are not followed.
        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: file_type.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn is_primary(name: &str) -> bool {
    PRIMARY_FILES.iter().any(|p| p.eq_ignore_ascii_case(name))
}

/// `docker-compose.override.yml`, `compose.prod.yaml` and similar.
fn is_override(name: &str) -> bool {
    let lower = name.to_lowercase();
    let has_prefix = lower.starts_with("docker-compose.") || lower.starts_with("compose.");
    let has_suffix = lower.ends_with(".yml") || lower.ends_with(".yaml");
    has_prefix && has_suffix && !is_primary(name)
}

fn project_from_entries(dir: &Path, entries: &[DirEntry]) -> Option<Project> {
    let files: Vec<&DirEntry> = entries.iter().filter(|e| !e.is_dir).collect();

    let primary: Vec<PathBuf> = files
        .iter()
        .filter(|e| is_primary(&e.name))
        .map(|e| dir.join(&e.name))
        .collect();
    if primary.is_empty() {
        return None;
    }

    let overrides = files
        .iter()
        .filter(|e| is_override(&e.name))
        .map(|e| dir.join(&e.name));

    let name = dir
        .file_name()
        .map_or_else(|| "root".to_string(), |n| n.to_string_lossy().into_owned());

    let mut project = Project::new(name, dir);
    project.compose_files = primary.into_iter().chain(overrides).collect();
    if files.iter().any(|e| e.name == ENV_FILE) {
        project.env_files.push(dir.join(ENV_FILE));
    }
    Some(project)
}
