use anyhow::bail;
use clap::{Args, Parser, Subcommand};
use depmap::{
    Analyzer, Config, ModuleGraph, OutputTarget, Reporter, ScanOptions, SourceRoot, StructureScanner,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "depmap")]
#[command(about = "Report a project's directory structure and Python import dependencies")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path (defaults to ./depmap.toml, then ~/.depmap.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Emit the nested directory/file map of a project
    Structure {
        /// Directory to scan
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Output file ("-" or omitted for stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop descending below this depth
        #[arg(long)]
        max_depth: Option<usize>,

        #[command(flatten)]
        scan: ScanArgs,
    },
    /// Emit the Python import dependency document
    Deps {
        /// Project directory searched for source roots
        #[arg(short, long)]
        project_root: Option<PathBuf>,

        /// Directory search pattern, e.g. "**/src" (repeatable)
        #[arg(short, long = "search-pattern")]
        search_patterns: Vec<String>,

        /// Explicit source root as PATH or PATH=PREFIX (repeatable, skips discovery)
        #[arg(short, long = "root")]
        roots: Vec<SourceRoot>,

        /// Output file ("-" or omitted for stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Record the analysis time in the document
        #[arg(long)]
        timestamp: bool,

        #[command(flatten)]
        scan: ScanArgs,
    },
    /// Write both documents, plus optional summary and graph, to files
    Analyze {
        /// Project directory to analyze
        #[arg(short, long)]
        project_root: Option<PathBuf>,

        /// Directory search pattern (repeatable)
        #[arg(short, long = "search-pattern")]
        search_patterns: Vec<String>,

        /// Dependency document path
        #[arg(long)]
        output_file: Option<PathBuf>,

        /// Structure document path
        #[arg(long)]
        structure_file: Option<PathBuf>,

        /// Markdown summary path
        #[arg(long)]
        summary: Option<PathBuf>,

        /// Graphviz module graph path
        #[arg(long)]
        dot: Option<PathBuf>,

        /// Record the analysis time in the dependency document
        #[arg(long)]
        timestamp: bool,

        #[command(flatten)]
        scan: ScanArgs,
    },
    /// Generate a documented configuration file
    Config {
        /// Output path for the config file
        #[arg(short, long, default_value = "depmap.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct ScanArgs {
    /// Exclude entries matching this name or glob, on top of the configured ones (repeatable)
    #[arg(short, long = "exclude")]
    excludes: Vec<String>,

    /// Follow symbolic links (each directory is visited once)
    #[arg(long)]
    follow_symlinks: bool,

    /// Parser threads (0 = one per CPU)
    #[arg(long)]
    threads: Option<usize>,
}

impl ScanArgs {
    fn apply(self, config: &mut Config) {
        config.extend_excludes(self.excludes);
        config.follow_symlinks |= self.follow_symlinks;
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
    }
}

/// Log level comes from `--debug`, then `RUST_LOG`, then defaults to info.
/// Logs go to stderr so documents written to stdout stay clean.
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("depmap=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("depmap=info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    if let Commands::Config { output, force } = cli.command {
        return generate_config(output, force);
    }

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Structure {
            path,
            output,
            max_depth,
            scan,
        } => {
            if let Some(path) = path {
                config.project_root = path;
            }
            if max_depth.is_some() {
                config.structure.max_depth = max_depth;
            }
            scan.apply(&mut config);
            run_structure(&config, OutputTarget::from_arg(output))
        }
        Commands::Deps {
            project_root,
            search_patterns,
            roots,
            output,
            timestamp,
            scan,
        } => {
            if let Some(root) = project_root {
                config.project_root = root;
            }
            if !search_patterns.is_empty() {
                config.search_patterns = search_patterns;
            }
            config.output.timestamp |= timestamp;
            scan.apply(&mut config);
            run_deps(&config, &roots, OutputTarget::from_arg(output))
        }
        Commands::Analyze {
            project_root,
            search_patterns,
            output_file,
            structure_file,
            summary,
            dot,
            timestamp,
            scan,
        } => {
            if let Some(root) = project_root {
                config.project_root = root;
            }
            if !search_patterns.is_empty() {
                config.search_patterns = search_patterns;
            }
            if let Some(path) = output_file {
                config.output.dependency_file = path;
            }
            if let Some(path) = structure_file {
                config.output.structure_file = path;
            }
            config.output.summary_file = summary.or(config.output.summary_file);
            config.output.dot_file = dot.or(config.output.dot_file);
            config.output.timestamp |= timestamp;
            scan.apply(&mut config);
            run_analyze(&config)
        }
        Commands::Config { .. } => unreachable!("handled before loading configuration"),
    }
}

fn run_structure(config: &Config, target: OutputTarget) -> anyhow::Result<()> {
    tracing::info!("scanning structure of {}", config.project_root.display());

    let scanner = StructureScanner::new(ScanOptions::from_config(config)?);
    let tree = scanner.scan(&config.project_root)?;
    Reporter::new().write_structure(&tree, &target)?;
    Ok(())
}

fn run_deps(config: &Config, roots: &[SourceRoot], target: OutputTarget) -> anyhow::Result<()> {
    let analyzer = Analyzer::new(config)?;
    let report = if roots.is_empty() {
        analyzer.analyze_project()?
    } else {
        analyzer.analyze_roots(roots)?
    };

    report.log_summary();
    Reporter::new().write_dependencies(&report, &target)?;
    Ok(())
}

fn run_analyze(config: &Config) -> anyhow::Result<()> {
    let start_time = Instant::now();
    tracing::info!("analyzing {}", config.project_root.display());

    let scanner = StructureScanner::new(ScanOptions::from_config(config)?);
    let tree = scanner.scan(&config.project_root)?;

    let report = Analyzer::new(config)?.analyze_project()?;
    report.log_summary();

    let graph = ModuleGraph::from_report(&report);
    let graph_summary = graph.summary();
    graph_summary.log_summary();

    let reporter = Reporter::new();
    reporter.write_dependencies(&report, &OutputTarget::File(config.output.dependency_file.clone()))?;
    reporter.write_structure(&tree, &OutputTarget::File(config.output.structure_file.clone()))?;

    if let Some(path) = &config.output.summary_file {
        let summary = reporter.generate_markdown_summary(Some(&tree), &report, &graph_summary);
        reporter.write_text(&summary, &OutputTarget::File(path.clone()))?;
    }
    if let Some(path) = &config.output.dot_file {
        reporter.write_text(&graph.to_dot(), &OutputTarget::File(path.clone()))?;
    }

    tracing::info!(
        "analysis complete in {:.2}s: {} packages analyzed",
        start_time.elapsed().as_secs_f64(),
        report.modules.len()
    );
    Ok(())
}

fn generate_config(output: PathBuf, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }

    std::fs::write(&output, Config::create_documented_config())?;
    tracing::info!("configuration written to {}", output.display());
    Ok(())
}
