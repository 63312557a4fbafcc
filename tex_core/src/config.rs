//! Dispatch Configuration
//!
//! Format catalogue, priority list and default selections live in one
//! explicit structure handed to the dispatcher at construction time.

use crate::common_utils::{normalize_priority_ext, normalize_suffix};
use crate::errors::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_INPUT_FORMATS: &[&str] = &[
    ".jpg", ".jpeg", ".tga", ".exr", ".tif", ".tiff", ".png", ".bmp", ".gif", ".ppm", ".hdr",
];

pub const DEFAULT_SELECTED_FORMATS: &[&str] =
    &[".jpg", ".jpeg", ".tga", ".exr", ".tif", ".tiff", ".png"];

/// Ascending preference: later entries win a duplicate group.
pub const DEFAULT_EXT_PRIORITY: &[&str] = &[
    "gif", "bmp", "ppm", "jpg", "jpeg", "png", "tga", "tif", "tiff", "hdr", "exr",
];

pub const DEFAULT_OUTPUT_COMMAND: &str = "TX (Arnold)";

pub const DEFAULT_PATHS_SEPARATOR: &str = " /// ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Catalogue of suffixes a caller may select from.
    pub input_formats: Vec<String>,
    /// Suffixes used when the caller selects none explicitly.
    pub default_selected_formats: Vec<String>,
    /// Output command preselected when the caller does not name one.
    pub default_output_command: String,
    /// Duplicate resolution order, least preferred first.
    pub ext_priority: Vec<String>,
    /// Literal joiner for several roots passed as one string.
    pub paths_separator: String,
    /// Kill a conversion still running after this many seconds. `None` waits forever.
    pub job_timeout_secs: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            input_formats: to_strings(DEFAULT_INPUT_FORMATS),
            default_selected_formats: to_strings(DEFAULT_SELECTED_FORMATS),
            default_output_command: DEFAULT_OUTPUT_COMMAND.to_string(),
            ext_priority: to_strings(DEFAULT_EXT_PRIORITY),
            paths_separator: DEFAULT_PATHS_SEPARATOR.to_string(),
            job_timeout_secs: None,
        }
    }
}

impl DispatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON config file; missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&raw).map_err(|source| ConfigError::ParseConfig {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()
    }

    /// Checks consistency and normalises suffixes / priority entries.
    pub fn validate(self) -> Result<Self> {
        if self.paths_separator.is_empty() {
            return Err(ConfigError::EmptySeparator);
        }
        Ok(self.normalized())
    }

    /// Lower-cases suffixes and priority entries and drops blank ones.
    pub fn normalized(mut self) -> Self {
        self.input_formats = normalize_all(&self.input_formats, normalize_suffix);
        self.default_selected_formats =
            normalize_all(&self.default_selected_formats, normalize_suffix);
        self.ext_priority = normalize_all(&self.ext_priority, normalize_priority_ext);
        self
    }

    pub fn with_ext_priority<S: AsRef<str>>(mut self, priority: &[S]) -> Self {
        self.ext_priority = priority
            .iter()
            .map(|p| normalize_priority_ext(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        self
    }

    pub fn with_paths_separator(mut self, separator: &str) -> Self {
        self.paths_separator = separator.to_string();
        self
    }

    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout_secs = timeout.map(|t| t.as_secs().max(1));
        self
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// Order is kept; empties dropped. Repeated entries are left in place, the
// resolver's last-match rule handles them.
fn normalize_all<F>(items: &[String], f: F) -> Vec<String>
where
    F: Fn(&str) -> String,
{
    items
        .iter()
        .map(|s| f(s))
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = DispatchConfig::default();
        assert_eq!(config.input_formats.len(), 11);
        assert!(config.input_formats.contains(&".exr".to_string()));
        assert_eq!(config.paths_separator, " /// ");
        assert_eq!(config.ext_priority.last().map(String::as_str), Some("exr"));
        assert!(config.job_timeout().is_none());
    }

    #[test]
    fn test_defaults_selected_subset_of_catalogue() {
        let config = DispatchConfig::default();
        for fmt in &config.default_selected_formats {
            assert!(config.input_formats.contains(fmt), "{} not in catalogue", fmt);
        }
    }

    #[test]
    fn test_validate_normalizes_entries() {
        let config = DispatchConfig {
            input_formats: vec!["JPG".into(), " .Exr".into(), "".into()],
            ext_priority: vec![".JPG".into(), "exr".into(), " ".into()],
            ..DispatchConfig::default()
        }
        .validate()
        .unwrap();

        assert_eq!(config.input_formats, vec![".jpg", ".exr"]);
        assert_eq!(config.ext_priority, vec!["jpg", "exr"]);
    }

    #[test]
    fn test_validate_rejects_empty_separator() {
        let result = DispatchConfig::default()
            .with_paths_separator("")
            .validate();
        assert!(matches!(result, Err(ConfigError::EmptySeparator)));
    }

    #[test]
    fn test_load_partial_json_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tex.json");
        fs::write(
            &path,
            r#"{ "ext_priority": ["jpg", "png", "cr2", "exr"], "job_timeout_secs": 30 }"#,
        )
        .unwrap();

        let config = DispatchConfig::load(&path).unwrap();
        assert_eq!(config.ext_priority, vec!["jpg", "png", "cr2", "exr"]);
        assert_eq!(config.job_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.default_output_command, DEFAULT_OUTPUT_COMMAND);
    }

    #[test]
    fn test_load_missing_file() {
        let result = DispatchConfig::load(Path::new("/nonexistent/tex.json"));
        assert!(matches!(result, Err(ConfigError::ReadConfig { .. })));
    }

    #[test]
    fn test_load_invalid_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            DispatchConfig::load(&path),
            Err(ConfigError::ParseConfig { .. })
        ));
    }

    #[test]
    fn test_with_job_timeout_rounds_up_to_one_second() {
        let config = DispatchConfig::default().with_job_timeout(Some(Duration::from_millis(10)));
        assert_eq!(config.job_timeout(), Some(Duration::from_secs(1)));
    }
}
