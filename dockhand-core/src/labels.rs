//! Well-known container labels written by the compose tooling.

pub const PROJECT: &str = "com.docker.compose.project";
pub const WORKING_DIR: &str = "com.docker.compose.project.working_dir";
/// Comma-separated list of compose files.
pub const CONFIG_FILES: &str = "com.docker.compose.project.config_files";
pub const SERVICE: &str = "com.docker.compose.service";
/// Replica ordinal within the service.
pub const CONTAINER_NUMBER: &str = "com.docker.compose.container-number";
pub const VERSION: &str = "com.docker.compose.version";

/// Labels copied onto a discovered project.
pub const PROJECT_LABELS: [&str; 4] = [PROJECT, WORKING_DIR, CONFIG_FILES, VERSION];

/// Splits the config-files label into paths.
#[must_use]
pub fn split_config_files(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_files_label_is_split_and_trimmed() {
        assert_eq!(
            split_config_files("/srv/web/compose.yml, /srv/web/compose.override.yml,"),
            vec![
                "/srv/web/compose.yml".to_string(),
                "/srv/web/compose.override.yml".to_string()
            ]
        );
        assert!(split_config_files("").is_empty());
    }
}
