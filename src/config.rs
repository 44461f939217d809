use crate::error::ReporterError;
use serde::{Deserialize, Serialize};
use std::{
    env,
    path::{Path, PathBuf},
};

pub const LOCAL_CONFIG_FILE: &str = "depmap.toml";

/// Patterns excluded from every scan unless the config file says otherwise.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    ".git",
    ".pytest_cache",
    ".coverage",
    "*.egg-info",
    "dist",
    "build",
    ".idea",
    ".vscode",
    ".DS_Store",
    "*.pyc",
    "*.pyo",
    "*.pyd",
    ".mypy_cache",
    ".ruff_cache",
    "htmlcov",
    ".env",
    "*.log",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project_root: PathBuf,
    pub search_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub source_extensions: Vec<String>,
    pub follow_symlinks: bool,
    pub respect_gitignore: bool,
    /// Parser threads for the dependency scan; 0 lets rayon decide.
    pub threads: usize,
    pub structure: StructureConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureConfig {
    pub max_depth: Option<usize>,
    /// When non-empty, only file names matching one of these globs are listed.
    pub include_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dependency_file: PathBuf,
    pub structure_file: PathBuf,
    pub summary_file: Option<PathBuf>,
    pub dot_file: Option<PathBuf>,
    pub timestamp: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            search_patterns: vec!["**/src".to_string()],
            exclude_patterns: DEFAULT_EXCLUDES.iter().map(|p| p.to_string()).collect(),
            source_extensions: vec!["py".to_string()],
            follow_symlinks: false,
            respect_gitignore: false,
            threads: 0,
            structure: StructureConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dependency_file: PathBuf::from("analysis_results/pydeps_results.json"),
            structure_file: PathBuf::from("analysis_results/project_structure.json"),
            summary_file: None,
            dot_file: None,
            timestamp: false,
        }
    }
}

impl Config {
    /// Get the per-user config file path (~/.depmap.toml)
    pub fn default_config_path() -> Option<PathBuf> {
        env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .ok()
            .map(|home| PathBuf::from(home).join(".depmap.toml"))
    }

    /// Load `./depmap.toml`, then `~/.depmap.toml`, falling back to defaults.
    pub fn load() -> crate::Result<Self> {
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.is_file() {
            return Self::from_file(&local);
        }

        match Self::default_config_path() {
            Some(path) if path.is_file() => Self::from_file(&path),
            _ => {
                tracing::debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> crate::Result<Self> {
        tracing::info!("loading configuration from {}", path.display());
        let content =
            std::fs::read_to_string(path).map_err(|e| ReporterError::from_io(path, e))?;
        toml::from_str(&content).map_err(|e| ReporterError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn to_file(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ReporterError::write_failed(parent, e))?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| ReporterError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|e| ReporterError::write_failed(path, e))
    }

    /// Add patterns on top of the configured ones, skipping duplicates.
    pub fn extend_excludes<I, S>(&mut self, patterns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for pattern in patterns {
            let pattern = pattern.into();
            if !self.exclude_patterns.contains(&pattern) {
                self.exclude_patterns.push(pattern);
            }
        }
    }

    /// Create a config file with all available options documented
    pub fn create_documented_config() -> String {
        let excludes = DEFAULT_EXCLUDES
            .iter()
            .map(|p| format!("    \"{p}\","))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"# depmap configuration file
# Looked up as ./depmap.toml, then ~/.depmap.toml. CLI flags take precedence.

# Project directory scanned for structure and source roots
project_root = "."

# Directories searched for Python sources. A pattern naming an existing
# directory is used directly; anything else is a glob over directory paths.
search_patterns = ["**/src"]

# Names or globs excluded from every scan. Matched against entry names and
# against paths relative to the scan root (e.g. "**/tests").
exclude_patterns = [
{excludes}
]

# File extensions treated as Python sources
source_extensions = ["py"]

# Follow symbolic links (each directory is visited at most once)
follow_symlinks = false

# Honour .gitignore files while discovering source roots
respect_gitignore = false

# Parser threads for the dependency scan (0 = one per CPU)
threads = 0

[structure]
# Stop descending below this depth (omit for unlimited)
# max_depth = 3

# Only list files matching these globs (empty = every file)
include_files = []

[output]
dependency_file = "analysis_results/pydeps_results.json"
structure_file = "analysis_results/project_structure.json"
# summary_file = "analysis_results/summary.md"
# dot_file = "analysis_results/modules.dot"

# Add an analysis_timestamp to the dependency document. Off by default so
# that repeated runs on an unchanged tree produce identical output.
timestamp = false
"#
        )
    }
}
