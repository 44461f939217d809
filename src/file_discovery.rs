use crate::config::Config;
use crate::error::ReporterError;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

/// Compiled exclusion patterns.
///
/// A pattern matches an entry when it matches either the entry's bare name
/// (`.venv`, `*.egg-info`) or its path relative to the scan root
/// (`**/tests`, `docs/build`). The scan root itself is never excluded.
#[derive(Debug, Clone)]
pub struct ExcludeSet {
    set: GlobSet,
}

impl ExcludeSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> crate::Result<Self> {
        Ok(Self {
            set: build_globset(patterns)?,
        })
    }

    pub fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
        }
    }

    pub fn is_excluded(&self, relative: &Path) -> bool {
        if relative.as_os_str().is_empty() {
            return false;
        }

        if let Some(name) = relative.file_name() {
            if self.set.is_match(Path::new(name)) {
                return true;
            }
        }

        self.set.is_match(relative)
    }
}

pub(crate) fn build_globset<S: AsRef<str>>(patterns: &[S]) -> crate::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|source| ReporterError::Pattern {
                pattern: pattern.to_string(),
                source,
            })?;
        builder.add(glob);
    }

    builder.build().map_err(|source| ReporterError::Pattern {
        pattern: patterns
            .iter()
            .map(|p| p.as_ref())
            .collect::<Vec<_>>()
            .join(", "),
        source,
    })
}

/// A directory searched for source files, with the package prefix its
/// modules are reported under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceRoot {
    pub path: PathBuf,
    pub prefix: String,
}

impl SourceRoot {
    pub fn new(path: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            prefix: prefix.into(),
        }
    }
}

/// `PATH` (prefix derived from the path) or `PATH=PREFIX`.
impl FromStr for SourceRoot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, prefix) = match s.split_once('=') {
            Some((path, prefix)) => (path, prefix.to_string()),
            None => (s, dotted_path(Path::new(s))),
        };

        if path.is_empty() {
            return Err(format!("missing path in source root '{s}'"));
        }

        Ok(Self::new(path, prefix))
    }
}

/// Join the normal components of `path` with dots: `services/api/src` → `services.api.src`.
pub fn dotted_path(path: &Path) -> String {
    normal_components(path).join(".")
}

/// Render a relative path with `/` separators regardless of platform.
pub fn to_slash(path: &Path) -> String {
    normal_components(path).join("/")
}

fn normal_components(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

pub struct FileDiscovery {
    project_root: PathBuf,
    search_patterns: Vec<String>,
    source_extensions: Vec<String>,
    excludes: ExcludeSet,
    follow_symlinks: bool,
    respect_gitignore: bool,
}

impl FileDiscovery {
    pub fn new(config: &Config) -> crate::Result<Self> {
        Ok(Self {
            project_root: config.project_root.clone(),
            search_patterns: config.search_patterns.clone(),
            source_extensions: config
                .source_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            excludes: ExcludeSet::new(&config.exclude_patterns)?,
            follow_symlinks: config.follow_symlinks,
            respect_gitignore: config.respect_gitignore,
        })
    }

    pub fn excludes(&self) -> &ExcludeSet {
        &self.excludes
    }

    /// Find every directory under the project root matching a search pattern.
    ///
    /// Roots nested inside another matched root are dropped so that no file
    /// is reported twice.
    pub fn discover_source_roots(&self) -> crate::Result<Vec<SourceRoot>> {
        ensure_directory(&self.project_root)?;

        let mut found: BTreeSet<PathBuf> = BTreeSet::new();
        let mut glob_patterns = Vec::new();

        for pattern in &self.search_patterns {
            let direct = self.project_root.join(pattern);
            if direct.is_dir() {
                let relative = PathBuf::from(to_slash(Path::new(pattern)));
                if !self.excludes.is_excluded(&relative) {
                    found.insert(relative);
                }
                continue;
            }
            glob_patterns.push(pattern.as_str());
        }

        if !glob_patterns.is_empty() {
            self.match_directories(&build_globset(&glob_patterns)?, &mut found);
        }

        let mut kept: Vec<PathBuf> = Vec::new();
        for relative in found {
            if kept.iter().any(|outer| relative.starts_with(outer)) {
                tracing::debug!("{} is inside another source root, skipping", relative.display());
                continue;
            }
            kept.push(relative);
        }

        if kept.is_empty() {
            tracing::warn!("no directories found for patterns: {:?}", self.search_patterns);
        }

        Ok(kept
            .into_iter()
            .map(|relative| SourceRoot::new(self.project_root.join(&relative), dotted_path(&relative)))
            .collect())
    }

    fn match_directories(&self, globs: &GlobSet, found: &mut BTreeSet<PathBuf>) {
        let base = self.project_root.clone();
        let excludes = self.excludes.clone();

        let mut builder = WalkBuilder::new(&self.project_root);
        builder
            .standard_filters(false)
            .hidden(false)
            .git_ignore(self.respect_gitignore)
            .git_global(self.respect_gitignore)
            .git_exclude(self.respect_gitignore)
            .parents(self.respect_gitignore)
            .require_git(false)
            .follow_links(self.follow_symlinks)
            .filter_entry(move |entry| {
                let relative = entry.path().strip_prefix(&base).unwrap_or(entry.path());
                !excludes.is_excluded(relative)
            });

        for result in builder.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("skipping entry during source root discovery: {err}");
                    continue;
                }
            };

            if entry.depth() == 0 || !entry.file_type().is_some_and(|ft| ft.is_dir()) {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.project_root)
                .unwrap_or(entry.path());
            if globs.is_match(relative) {
                found.insert(relative.to_path_buf());
            }
        }
    }

    /// Every source file under `root`, in file-name order.
    ///
    /// Excluded entries are pruned. A directory that cannot be listed is a
    /// fatal error; filesystem loops met while following links are skipped.
    pub fn collect_source_files(&self, root: &SourceRoot) -> crate::Result<Vec<PathBuf>> {
        ensure_directory(&root.path)?;

        let walker = WalkDir::new(&root.path)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_excluded_under(root, entry.path()));

        let mut files = Vec::new();
        for result in walker {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    if let Some(ancestor) = err.loop_ancestor() {
                        tracing::debug!("link loop back to {}, not following", ancestor.display());
                        continue;
                    }
                    if err.depth() > 0 && err.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound) {
                        tracing::warn!("skipping dangling entry: {err}");
                        continue;
                    }
                    return Err(walk_error(&root.path, err));
                }
            };

            if entry.file_type().is_file() && self.is_source_file(entry.path()) {
                files.push(entry.into_path());
            }
        }

        Ok(files)
    }

    /// Exclusions apply to the path below the source root and, when the root
    /// lies inside the project, to the path below the project root.
    fn is_excluded_under(&self, root: &SourceRoot, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&root.path) else {
            return false;
        };
        if relative.as_os_str().is_empty() {
            return false;
        }
        if self.excludes.is_excluded(relative) {
            return true;
        }
        project_relative(&self.project_root, path)
            .is_some_and(|from_project| self.excludes.is_excluded(&from_project))
    }

    fn is_source_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.source_extensions.iter().any(|s| s.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

/// `path` below `project_root`, matching through `.` and relative spellings.
fn project_relative(project_root: &Path, path: &Path) -> Option<PathBuf> {
    if let Ok(relative) = path.strip_prefix(project_root) {
        return Some(relative.to_path_buf());
    }
    let project = fs::canonicalize(project_root).ok()?;
    let parent = fs::canonicalize(path.parent()?).ok()?;
    let relative = parent.strip_prefix(&project).ok()?;
    Some(relative.join(path.file_name()?))
}

/// Fail with a path error unless `path` is a readable directory.
pub(crate) fn ensure_directory(path: &Path) -> crate::Result<()> {
    let metadata = fs::metadata(path).map_err(|e| ReporterError::from_io(path, e))?;
    if !metadata.is_dir() {
        return Err(ReporterError::NotADirectory {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn walk_error(fallback: &Path, err: walkdir::Error) -> ReporterError {
    let path = err.path().unwrap_or(fallback).to_path_buf();
    match err.into_io_error() {
        Some(io_err) => ReporterError::from_io(&path, io_err),
        None => ReporterError::Unreadable {
            path,
            source: io::Error::new(io::ErrorKind::Other, "filesystem walk failed"),
        },
    }
}
