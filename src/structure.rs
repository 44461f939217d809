//! Project structure scan.
//!
//! Produces a [`ProjectTree`]: one node per directory holding its file names
//! under `files` and each subdirectory under its own name, with the root kept
//! under the empty-string key.

use crate::config::Config;
use crate::error::ReporterError;
use crate::file_discovery::{build_globset, ensure_directory, ExcludeSet};
use globset::GlobSet;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

const FILES_KEY: &str = "files";
const ROOT_KEY: &str = "";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirNode {
    pub files: Vec<String>,
    pub children: BTreeMap<String, DirNode>,
}

impl DirNode {
    /// Every file below this node as a `/`-separated relative path.
    pub fn flatten_files(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_files("", &mut out);
        out
    }

    /// Every directory below this node as a `/`-separated relative path.
    pub fn flatten_dirs(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_dirs("", &mut out);
        out
    }

    /// Directories holding a subdirectory named `files`, whose key repeats
    /// the file-list key in the serialized document.
    pub fn duplicate_files_keys(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .flatten_dirs()
            .into_iter()
            .filter(|path| path.rsplit('/').next() == Some(FILES_KEY))
            .map(|path| match path.rsplit_once('/') {
                Some((parent, _)) => parent.to_string(),
                None => String::new(),
            })
            .collect();
        out.sort();
        out
    }

    pub fn file_count(&self) -> usize {
        self.files.len() + self.children.values().map(DirNode::file_count).sum::<usize>()
    }

    pub fn dir_count(&self) -> usize {
        self.children.len() + self.children.values().map(DirNode::dir_count).sum::<usize>()
    }

    fn collect_files(&self, prefix: &str, out: &mut Vec<String>) {
        out.extend(self.files.iter().map(|f| join(prefix, f)));
        for (name, child) in &self.children {
            child.collect_files(&join(prefix, name), out);
        }
    }

    fn collect_dirs(&self, prefix: &str, out: &mut Vec<String>) {
        for (name, child) in &self.children {
            let path = join(prefix, name);
            out.push(path.clone());
            child.collect_dirs(&path, out);
        }
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

impl Serialize for DirNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.children.len() + 1))?;
        map.serialize_entry(FILES_KEY, &self.files)?;
        for (name, child) in &self.children {
            map.serialize_entry(name, child)?;
        }
        map.end()
    }
}

/// Value under a node key: the file list is an array, a subdirectory is an
/// object. This also separates a subdirectory literally named `files`.
#[derive(Deserialize)]
#[serde(untagged)]
enum NodeEntry {
    Files(Vec<String>),
    Dir(DirNode),
}

impl<'de> Deserialize<'de> for DirNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DirNodeVisitor;

        impl<'de> Visitor<'de> for DirNodeVisitor {
            type Value = DirNode;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a directory node map")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<DirNode, A::Error> {
                let mut node = DirNode::default();
                let mut saw_files = false;

                while let Some((key, entry)) = access.next_entry::<String, NodeEntry>()? {
                    match entry {
                        NodeEntry::Files(files) if key == FILES_KEY => {
                            if saw_files {
                                return Err(de::Error::duplicate_field(FILES_KEY));
                            }
                            saw_files = true;
                            node.files = files;
                        }
                        NodeEntry::Files(_) => {
                            return Err(de::Error::custom(format!(
                                "directory '{key}' must be an object"
                            )));
                        }
                        NodeEntry::Dir(child) => {
                            if node.children.insert(key.clone(), child).is_some() {
                                return Err(de::Error::custom(format!("duplicate directory '{key}'")));
                            }
                        }
                    }
                }

                if !saw_files {
                    return Err(de::Error::missing_field(FILES_KEY));
                }
                Ok(node)
            }
        }

        deserializer.deserialize_map(DirNodeVisitor)
    }
}

/// The directory hierarchy of a scan, serialized as `{"": <root node>}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectTree {
    pub root: DirNode,
}

impl Serialize for ProjectTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(ROOT_KEY, &self.root)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ProjectTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut map = BTreeMap::<String, DirNode>::deserialize(deserializer)?;
        let root = map
            .remove(ROOT_KEY)
            .ok_or_else(|| de::Error::missing_field("\"\""))?;
        if let Some(extra) = map.keys().next() {
            return Err(de::Error::custom(format!("unexpected top-level key '{extra}'")));
        }
        Ok(Self { root })
    }
}

/// Everything a structure scan needs, independent of any global state.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub excludes: ExcludeSet,
    pub include_files: Option<GlobSet>,
    pub follow_symlinks: bool,
    pub max_depth: Option<usize>,
}

impl ScanOptions {
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let include_files = if config.structure.include_files.is_empty() {
            None
        } else {
            Some(build_globset(&config.structure.include_files)?)
        };

        Ok(Self {
            excludes: ExcludeSet::new(&config.exclude_patterns)?,
            include_files,
            follow_symlinks: config.follow_symlinks,
            max_depth: config.structure.max_depth,
        })
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            excludes: ExcludeSet::empty(),
            include_files: None,
            follow_symlinks: false,
            max_depth: None,
        }
    }
}

pub struct StructureScanner {
    options: ScanOptions,
}

impl StructureScanner {
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    /// Walk `root` and build its tree. Any unreadable directory aborts the scan.
    pub fn scan(&self, root: &Path) -> crate::Result<ProjectTree> {
        ensure_directory(root)?;

        let mut visited = HashSet::new();
        if self.options.follow_symlinks {
            visited.insert(canonical(root)?);
        }

        let node = self.build_node(root, Path::new(""), 0, &mut visited)?;
        tracing::debug!(
            "scanned {}: {} directories, {} files",
            root.display(),
            node.dir_count(),
            node.file_count()
        );
        for parent in node.duplicate_files_keys() {
            tracing::warn!(
                "'{}' contains a directory named 'files', emitted as a duplicate key next to the file list",
                if parent.is_empty() { "." } else { parent.as_str() }
            );
        }
        Ok(ProjectTree { root: node })
    }

    fn build_node(
        &self,
        dir: &Path,
        relative: &Path,
        depth: usize,
        visited: &mut HashSet<PathBuf>,
    ) -> crate::Result<DirNode> {
        let mut node = DirNode::default();

        if self.options.max_depth.is_some_and(|max| depth >= max) {
            tracing::debug!("max depth reached at {}", dir.display());
            return Ok(node);
        }

        let entries = fs::read_dir(dir).map_err(|e| ReporterError::from_io(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| ReporterError::from_io(dir, e))?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let child_relative = relative.join(&name);

            if self.options.excludes.is_excluded(&child_relative) {
                continue;
            }

            let file_type = entry.file_type().map_err(|e| ReporterError::from_io(&path, e))?;
            let is_dir = if file_type.is_symlink() {
                if !self.options.follow_symlinks {
                    tracing::debug!("skipping symlink {}", path.display());
                    continue;
                }
                match fs::metadata(&path) {
                    Ok(target) => target.is_dir(),
                    Err(err) => {
                        tracing::warn!("skipping dangling symlink {}: {err}", path.display());
                        continue;
                    }
                }
            } else {
                file_type.is_dir()
            };

            if is_dir {
                let child = if self.options.follow_symlinks && !visited.insert(canonical(&path)?) {
                    tracing::debug!("already visited {}, not descending", path.display());
                    DirNode::default()
                } else {
                    self.build_node(&path, &child_relative, depth + 1, visited)?
                };
                node.children.insert(name, child);
            } else if self.is_listed(&name) {
                node.files.push(name);
            }
        }

        node.files.sort();
        Ok(node)
    }

    fn is_listed(&self, name: &str) -> bool {
        self.options
            .include_files
            .as_ref()
            .map_or(true, |globs| globs.is_match(name))
    }
}

fn canonical(path: &Path) -> crate::Result<PathBuf> {
    fs::canonicalize(path).map_err(|e| ReporterError::from_io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    fn scan(root: &Path, options: ScanOptions) -> ProjectTree {
        StructureScanner::new(options).scan(root).unwrap()
    }

    #[test]
    fn matches_documented_example() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.txt");
        touch(dir.path(), "sub/b.py");

        let tree = scan(dir.path(), ScanOptions::default());
        assert_eq!(
            serde_json::to_value(&tree).unwrap(),
            json!({"": {"files": ["a.txt"], "sub": {"files": ["b.py"]}}})
        );
    }

    #[test]
    fn empty_directories_keep_an_empty_file_list() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("empty/deeper")).unwrap();

        let tree = scan(dir.path(), ScanOptions::default());
        assert_eq!(
            serde_json::to_value(&tree).unwrap(),
            json!({"": {"files": [], "empty": {"files": [], "deeper": {"files": []}}}})
        );
    }

    #[test]
    fn excluded_directories_disappear_with_their_contents() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "app/main.py");
        touch(dir.path(), "app/.venv/lib/site.py");
        touch(dir.path(), "node_modules/react/index.js");
        touch(dir.path(), "debug.log");

        let options = ScanOptions {
            excludes: ExcludeSet::new(&[".venv", "node_modules", "*.log"]).unwrap(),
            ..ScanOptions::default()
        };
        let tree = scan(dir.path(), options);

        assert_eq!(tree.root.flatten_files(), vec!["app/main.py"]);
        assert_eq!(tree.root.flatten_dirs(), vec!["app"]);
    }

    #[test]
    fn include_globs_filter_listed_files() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "pyproject.toml");
        touch(dir.path(), "image.png");
        touch(dir.path(), "src/app.py");

        let options = ScanOptions {
            include_files: Some(build_globset(&["*.py", "*.toml"]).unwrap()),
            ..ScanOptions::default()
        };
        let tree = scan(dir.path(), options);

        assert_eq!(tree.root.flatten_files(), vec!["pyproject.toml", "src/app.py"]);
    }

    #[test]
    fn max_depth_truncates_to_empty_nodes() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a/b/c/deep.txt");

        let options = ScanOptions {
            max_depth: Some(2),
            ..ScanOptions::default()
        };
        let tree = scan(dir.path(), options);

        assert_eq!(tree.root.flatten_dirs(), vec!["a", "a/b"]);
        assert!(tree.root.flatten_files().is_empty());
    }

    #[test]
    fn missing_root_fails_with_path() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");

        let err = StructureScanner::new(ScanOptions::default())
            .scan(&missing)
            .unwrap_err();
        assert!(matches!(err, ReporterError::NotFound { ref path } if *path == missing));
    }

    #[test]
    fn file_root_is_not_a_directory() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "single.txt");

        let err = StructureScanner::new(ScanOptions::default())
            .scan(&dir.path().join("single.txt"))
            .unwrap_err();
        assert!(matches!(err, ReporterError::NotADirectory { .. }));
    }

    #[test]
    fn subdirectory_named_files_survives_round_trip() {
        let mut root = DirNode {
            files: vec!["README.md".to_string()],
            ..DirNode::default()
        };
        root.children.insert(
            "files".to_string(),
            DirNode {
                files: vec!["upload.bin".to_string()],
                ..DirNode::default()
            },
        );
        let tree = ProjectTree { root };

        let text = serde_json::to_string(&tree).unwrap();
        let back: ProjectTree = serde_json::from_str(&text).unwrap();
        assert_eq!(back, tree);
        assert_eq!(tree.root.duplicate_files_keys(), vec![String::new()]);
    }

    #[test]
    fn scanned_files_directories_are_located() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "app/files/upload.bin");
        touch(dir.path(), "app/main.py");
        touch(dir.path(), "docs/index.md");

        let tree = StructureScanner::new(ScanOptions::default()).scan(dir.path()).unwrap();
        assert_eq!(tree.root.duplicate_files_keys(), vec!["app"]);
        assert!(tree.root.children["docs"].duplicate_files_keys().is_empty());
    }

    #[test]
    fn node_without_files_key_is_rejected() {
        let err = serde_json::from_str::<ProjectTree>(r#"{"": {"sub": {"files": []}}}"#).unwrap_err();
        assert!(err.to_string().contains("files"));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_skipped_by_default_and_followed_once_when_enabled() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "real/data.txt");
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("alias")).unwrap();
        std::os::unix::fs::symlink(dir.path(), dir.path().join("real/loop")).unwrap();

        let skipped = scan(dir.path(), ScanOptions::default());
        assert_eq!(skipped.root.flatten_dirs(), vec!["real"]);

        let followed = scan(
            dir.path(),
            ScanOptions {
                follow_symlinks: true,
                ..ScanOptions::default()
            },
        );
        assert_eq!(followed.root.children.len(), 2);
        assert_eq!(followed.root.file_count(), 1);
    }
}
