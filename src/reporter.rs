use crate::{
    analyzer::DependencyReport,
    dependency_graph::GraphSummary,
    error::ReporterError,
    structure::ProjectTree,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fmt::Write as _,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

/// Where a rendered document goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

impl OutputTarget {
    /// `None` and `-` both mean standard output.
    pub fn from_arg(arg: Option<PathBuf>) -> Self {
        match arg {
            Some(path) if path.as_os_str() != "-" => Self::File(path),
            _ => Self::Stdout,
        }
    }
}

impl std::fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => f.write_str("<stdout>"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Default)]
pub struct Reporter;

impl Reporter {
    pub fn new() -> Self {
        Self
    }

    /// Pretty JSON with two-space indentation and a trailing newline.
    pub fn render<T: Serialize>(&self, document: &T) -> crate::Result<String> {
        let mut text = serde_json::to_string_pretty(document)?;
        text.push('\n');
        Ok(text)
    }

    pub fn write_structure(&self, tree: &ProjectTree, target: &OutputTarget) -> crate::Result<()> {
        self.write_text(&self.render(tree)?, target)
    }

    pub fn write_dependencies(&self, report: &DependencyReport, target: &OutputTarget) -> crate::Result<()> {
        self.write_text(&self.render(report)?, target)
    }

    pub fn read_structure(&self, path: &Path) -> crate::Result<ProjectTree> {
        self.read_document(path)
    }

    /// Read a dependency document and bring it into canonical order.
    pub fn read_dependencies(&self, path: &Path) -> crate::Result<DependencyReport> {
        let mut report: DependencyReport = self.read_document(path)?;
        report.normalize();
        Ok(report)
    }

    fn read_document<T: DeserializeOwned>(&self, path: &Path) -> crate::Result<T> {
        let content = fs::read_to_string(path).map_err(|e| ReporterError::from_io(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn write_text(&self, content: &str, target: &OutputTarget) -> crate::Result<()> {
        match target {
            OutputTarget::Stdout => {
                let mut stdout = io::stdout().lock();
                stdout
                    .write_all(content.as_bytes())
                    .and_then(|_| stdout.flush())
                    .map_err(|e| ReporterError::write_failed(Path::new("<stdout>"), e))
            }
            OutputTarget::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(|e| ReporterError::write_failed(parent, e))?;
                }
                fs::write(path, content).map_err(|e| ReporterError::write_failed(path, e))?;
                tracing::info!("wrote {}", path.display());
                Ok(())
            }
        }
    }

    pub fn generate_markdown_summary(
        &self,
        tree: Option<&ProjectTree>,
        report: &DependencyReport,
        graph: &GraphSummary,
    ) -> String {
        let mut md = format!("# Project Dependency Summary\n\n**Project root:** `{}`\n", report.project_root);
        if let Some(timestamp) = report.analysis_timestamp {
            let _ = writeln!(md, "**Generated:** {}", timestamp.to_rfc3339());
        }
        md.push('\n');

        md.push_str("## Overview\n\n");
        if let Some(tree) = tree {
            let _ = writeln!(md, "- **Directories:** {}", tree.root.dir_count());
            let _ = writeln!(md, "- **Files:** {}", tree.root.file_count());
        }
        let _ = writeln!(md, "- **Packages:** {}", report.modules.len());
        let _ = writeln!(md, "- **Modules:** {}", report.module_count());
        let _ = writeln!(md, "- **Imports:** {}", report.import_count());
        let _ = writeln!(md, "- **Internal edges:** {}", graph.internal_edges);
        let _ = writeln!(md, "- **Unparsable files:** {}\n", report.warnings.len());

        md.push_str("## Packages\n\n");
        for record in &report.modules {
            let name = if record.name.is_empty() { "(top level)" } else { record.name.as_str() };
            let _ = writeln!(md, "- `{}`: {} modules", name, record.modules.len());
        }
        md.push('\n');

        if !graph.cycles.is_empty() {
            md.push_str("## Import Cycles\n\n");
            for cycle in &graph.cycles {
                let _ = writeln!(md, "- {}", cycle.join(" → "));
            }
            md.push('\n');
        }

        if !graph.external_packages.is_empty() {
            md.push_str("## External Packages\n\n");
            let _ = writeln!(md, "{}\n", graph.external_packages.join(", "));
        }

        if !report.warnings.is_empty() {
            md.push_str("## Warnings\n\n");
            for warning in &report.warnings {
                let _ = writeln!(md, "- `{}`: {}", warning.path, warning.message);
            }
            md.push('\n');
        }

        md
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{DependencyRecord, ModuleEntry};
    use crate::error::ParseWarning;
    use crate::structure::DirNode;
    use tempfile::TempDir;

    fn sample_report() -> DependencyReport {
        DependencyReport {
            analysis_timestamp: None,
            project_root: "/work/proj".to_string(),
            modules: vec![DependencyRecord {
                name: "src".to_string(),
                modules: vec![ModuleEntry {
                    file: "main.py".to_string(),
                    module: "main".to_string(),
                    imports: vec!["os".to_string(), "pkg.Thing".to_string()],
                }],
            }],
            warnings: vec![ParseWarning {
                path: "/work/proj/src/bad.py".to_string(),
                message: "syntax error at line 2".to_string(),
            }],
        }
    }

    #[test]
    fn output_target_from_arg() {
        assert_eq!(OutputTarget::from_arg(None), OutputTarget::Stdout);
        assert_eq!(OutputTarget::from_arg(Some(PathBuf::from("-"))), OutputTarget::Stdout);
        assert_eq!(
            OutputTarget::from_arg(Some(PathBuf::from("out.json"))),
            OutputTarget::File(PathBuf::from("out.json"))
        );
    }

    #[test]
    fn dependency_document_uses_documented_field_names() {
        let text = Reporter::new().render(&sample_report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["project_root"], "/work/proj");
        assert_eq!(value["modules"][0]["name"], "src");
        assert_eq!(value["modules"][0]["modules"][0]["file"], "main.py");
        assert_eq!(value["modules"][0]["modules"][0]["module"], "main");
        assert_eq!(value["modules"][0]["modules"][0]["imports"][1], "pkg.Thing");
        assert!(value.get("analysis_timestamp").is_none());
        assert!(text.ends_with("}\n"));
        assert!(text.contains("\n  \"project_root\""));
    }

    #[test]
    fn documents_round_trip_through_files() {
        let dir = TempDir::new().unwrap();
        let reporter = Reporter::new();

        let mut report = sample_report();
        report.analysis_timestamp = Some(chrono::Utc::now());
        let deps_path = dir.path().join("out/deps.json");
        reporter
            .write_dependencies(&report, &OutputTarget::File(deps_path.clone()))
            .unwrap();
        assert_eq!(reporter.read_dependencies(&deps_path).unwrap(), report);

        let mut root = DirNode {
            files: vec!["a.txt".to_string()],
            ..DirNode::default()
        };
        root.children.insert("sub".to_string(), DirNode {
            files: vec!["b.py".to_string()],
            ..DirNode::default()
        });
        let tree = ProjectTree { root };
        let tree_path = dir.path().join("out/tree.json");
        reporter
            .write_structure(&tree, &OutputTarget::File(tree_path.clone()))
            .unwrap();
        assert_eq!(reporter.read_structure(&tree_path).unwrap(), tree);
    }

    #[test]
    fn unwritable_destination_is_a_serialization_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();

        let err = Reporter::new()
            .write_text("{}", &OutputTarget::File(blocker.join("deps.json")))
            .unwrap_err();
        assert!(matches!(err, ReporterError::Serialization { .. }));
    }

    #[test]
    fn malformed_document_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{\"modules\": ").unwrap();

        let err = Reporter::new().read_dependencies(&path).unwrap_err();
        assert!(matches!(err, ReporterError::Document(_)));
    }

    #[test]
    fn markdown_summary_lists_cycles_and_warnings() {
        let graph = GraphSummary {
            modules: 1,
            internal_edges: 0,
            external_packages: vec!["os".to_string(), "pkg".to_string()],
            cycles: vec![vec!["a".to_string(), "b".to_string()]],
        };

        let md = Reporter::new().generate_markdown_summary(None, &sample_report(), &graph);
        assert!(md.starts_with("# Project Dependency Summary"));
        assert!(md.contains("- **Modules:** 1"));
        assert!(md.contains("## Import Cycles"));
        assert!(md.contains("a → b"));
        assert!(md.contains("os, pkg"));
        assert!(md.contains("syntax error at line 2"));
    }
}
