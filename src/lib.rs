pub mod config;
pub mod error;
pub mod file_discovery;
pub mod python_parser;
pub mod structure;
pub mod analyzer;
pub mod dependency_graph;
pub mod reporter;

pub use config::Config;
pub use error::{ParseWarning, ReporterError};
pub use file_discovery::{ExcludeSet, FileDiscovery, SourceRoot};
pub use python_parser::PythonImportParser;
pub use structure::{DirNode, ProjectTree, ScanOptions, StructureScanner};
pub use analyzer::{Analyzer, DependencyRecord, DependencyReport, ModuleEntry};
pub use dependency_graph::{GraphSummary, ModuleGraph};
pub use reporter::{OutputTarget, Reporter};

pub type Result<T> = std::result::Result<T, ReporterError>;
