use crate::{
    config::Config,
    error::ParseWarning,
    file_discovery::{dotted_path, to_slash, FileDiscovery, SourceRoot},
    python_parser::PythonImportParser,
};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEntry {
    /// Path relative to the source root, `/`-separated.
    pub file: String,
    pub module: String,
    pub imports: Vec<String>,
}

/// Modules of one package, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub name: String,
    pub modules: Vec<ModuleEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_timestamp: Option<DateTime<Utc>>,
    pub project_root: String,
    pub modules: Vec<DependencyRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ParseWarning>,
}

impl DependencyReport {
    /// Sort records, modules, imports and warnings into their canonical order.
    pub fn normalize(&mut self) {
        self.modules.sort_by(|a, b| a.name.cmp(&b.name));
        for record in &mut self.modules {
            record
                .modules
                .sort_by(|a, b| (&a.file, &a.module).cmp(&(&b.file, &b.module)));
            for entry in &mut record.modules {
                entry.imports.sort();
                entry.imports.dedup();
            }
        }
        self.warnings.sort();
    }

    pub fn module_count(&self) -> usize {
        self.modules.iter().map(|r| r.modules.len()).sum()
    }

    pub fn import_count(&self) -> usize {
        self.modules
            .iter()
            .flat_map(|r| &r.modules)
            .map(|m| m.imports.len())
            .sum()
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "dependency scan: {} packages, {} modules, {} imports, {} warnings",
            self.modules.len(),
            self.module_count(),
            self.import_count(),
            self.warnings.len()
        );
    }
}

/// A source file queued for parsing.
#[derive(Debug, Clone)]
struct FileJob {
    path: PathBuf,
    file: String,
    module: String,
    package: String,
    /// Package as seen from inside the source root, used for relative imports.
    import_package: String,
}

impl FileJob {
    fn new(root: &SourceRoot, path: PathBuf) -> Self {
        let relative = path.strip_prefix(&root.path).unwrap_or(&path).to_path_buf();
        let package_dir = relative.parent().map(dotted_path).unwrap_or_default();
        let package = [root.prefix.as_str(), package_dir.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(".");
        let module = relative
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            file: to_slash(&relative),
            module,
            package,
            import_package: package_dir,
            path,
        }
    }
}

pub struct Analyzer {
    discovery: FileDiscovery,
    project_root: PathBuf,
    threads: usize,
    timestamp: bool,
}

impl Analyzer {
    pub fn new(config: &Config) -> crate::Result<Self> {
        Ok(Self {
            discovery: FileDiscovery::new(config)?,
            project_root: config.project_root.clone(),
            threads: config.threads,
            timestamp: config.output.timestamp,
        })
    }

    pub fn discovery(&self) -> &FileDiscovery {
        &self.discovery
    }

    /// Discover source roots from the search patterns and scan them.
    pub fn analyze_project(&self) -> crate::Result<DependencyReport> {
        let roots = self.discovery.discover_source_roots()?;
        self.analyze_roots(&roots)
    }

    /// Scan the given roots. Unparsable files become warnings; an unreadable
    /// root or directory fails the whole scan.
    pub fn analyze_roots(&self, roots: &[SourceRoot]) -> crate::Result<DependencyReport> {
        // Fail early if the grammar cannot be loaded rather than once per file.
        PythonImportParser::new()?;

        let mut jobs = Vec::new();
        for root in roots {
            tracing::info!("analyzing {} (package prefix '{}')", root.path.display(), root.prefix);
            let files = self.discovery.collect_source_files(root)?;
            jobs.extend(files.into_iter().map(|path| FileJob::new(root, path)));
        }

        let outcomes = self.parse_files_parallel(&jobs);

        let mut packages: BTreeMap<String, Vec<ModuleEntry>> = BTreeMap::new();
        let mut warnings = Vec::new();

        for (job, outcome) in jobs.into_iter().zip(outcomes) {
            match outcome {
                Ok(imports) => {
                    tracing::debug!("parsed {} ({} imports)", job.path.display(), imports.len());
                    packages.entry(job.package).or_default().push(ModuleEntry {
                        file: job.file,
                        module: job.module,
                        imports,
                    });
                }
                Err(message) => {
                    tracing::warn!("skipping {}: {}", job.path.display(), message);
                    warnings.push(ParseWarning::new(&job.path, message));
                }
            }
        }

        let mut report = DependencyReport {
            analysis_timestamp: self.timestamp.then(Utc::now),
            project_root: display_root(&self.project_root),
            modules: packages
                .into_iter()
                .map(|(name, modules)| DependencyRecord { name, modules })
                .collect(),
            warnings,
        };
        report.normalize();
        Ok(report)
    }

    /// Parse every job on the rayon pool, one parser per worker. Results come
    /// back in job order no matter how the work was scheduled.
    fn parse_files_parallel(&self, jobs: &[FileJob]) -> Vec<Result<Vec<String>, String>> {
        let work = || {
            jobs.par_iter()
                .map_init(PythonImportParser::new, |parser, job| match parser {
                    Ok(parser) => parser.parse_file(&job.path, &job.import_package),
                    Err(err) => Err(err.to_string()),
                })
                .collect::<Vec<_>>()
        };

        if self.threads == 0 {
            return work();
        }

        match rayon::ThreadPoolBuilder::new().num_threads(self.threads).build() {
            Ok(pool) => pool.install(work),
            Err(err) => {
                tracing::warn!("could not build a {}-thread pool ({err}), using the default", self.threads);
                work()
            }
        }
    }
}

/// Absolute form of the project root, or the path as given if it cannot be resolved.
fn display_root(path: &Path) -> String {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

/// Package name a file under `root` is reported in.
pub fn package_of(root: &SourceRoot, path: &Path) -> String {
    FileJob::new(root, path.to_path_buf()).package
}
