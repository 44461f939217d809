use crate::analyzer::DependencyReport;
use petgraph::{
    algo::tarjan_scc,
    dot::{Config as DotConfig, Dot},
    graph::{DiGraph, NodeIndex},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleNode {
    /// Dotted module name; a package's `__init__` is named after the package.
    pub name: String,
    pub file: String,
}

impl fmt::Display for ModuleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportEdge {
    pub import: String,
}

impl fmt::Display for ImportEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.import)
    }
}

pub type DependencyGraph = DiGraph<ModuleNode, ImportEdge>;

/// Import graph restricted to the modules of a scan.
pub struct ModuleGraph {
    graph: DependencyGraph,
    node_map: BTreeMap<String, NodeIndex>,
    /// Dotted suffixes of at least two components that name exactly one module.
    suffix_map: BTreeMap<String, Option<NodeIndex>>,
    external: BTreeSet<String>,
}

impl ModuleGraph {
    pub fn from_report(report: &DependencyReport) -> Self {
        let mut builder = Self {
            graph: DependencyGraph::new(),
            node_map: BTreeMap::new(),
            suffix_map: BTreeMap::new(),
            external: BTreeSet::new(),
        };

        for record in &report.modules {
            for entry in &record.modules {
                builder.add_module(module_name(&record.name, &entry.module), &entry.file);
            }
        }

        for record in &report.modules {
            for entry in &record.modules {
                let from = builder.node_map[&module_name(&record.name, &entry.module)];
                for import in &entry.imports {
                    builder.add_import(from, import);
                }
            }
        }

        builder
    }

    fn add_module(&mut self, name: String, file: &str) {
        if self.node_map.contains_key(&name) {
            tracing::debug!("module {name} appears more than once, keeping the first");
            return;
        }

        let index = self.graph.add_node(ModuleNode {
            name: name.clone(),
            file: file.to_string(),
        });

        let parts: Vec<&str> = name.split('.').collect();
        for start in 1..parts.len().saturating_sub(1) {
            let suffix = parts[start..].join(".");
            self.suffix_map
                .entry(suffix)
                .and_modify(|slot| *slot = None)
                .or_insert(Some(index));
        }

        self.node_map.insert(name, index);
    }

    fn add_import(&mut self, from: NodeIndex, import: &str) {
        match self.resolve(import) {
            Some(to) => {
                self.graph.update_edge(
                    from,
                    to,
                    ImportEdge {
                        import: import.to_string(),
                    },
                );
            }
            None if import.starts_with('.') => {
                tracing::debug!("unresolved relative import {import}");
            }
            None => {
                if let Some(top) = import.split('.').next().filter(|t| !t.is_empty()) {
                    self.external.insert(top.to_string());
                }
            }
        }
    }

    /// Longest dotted prefix of `import` naming a scanned module, trying
    /// exact names before unambiguous suffixes.
    pub fn resolve(&self, import: &str) -> Option<NodeIndex> {
        let candidates = || {
            std::iter::successors(Some(import), |c| c.rfind('.').map(|pos| &c[..pos]))
        };

        candidates()
            .find_map(|c| self.node_map.get(c).copied())
            .or_else(|| candidates().find_map(|c| self.suffix_map.get(c).copied().flatten()))
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn node(&self, name: &str) -> Option<&ModuleNode> {
        self.node_map.get(name).map(|&ix| &self.graph[ix])
    }

    /// Names of the scanned modules `name` imports.
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        let Some(&index) = self.node_map.get(name) else {
            return Vec::new();
        };
        let mut deps: Vec<String> = self
            .graph
            .neighbors(index)
            .map(|n| self.graph[n].name.clone())
            .collect();
        deps.sort();
        deps
    }

    /// Import cycles: each cycle's members sorted, cycles sorted.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&n| self.graph.contains_edge(n, n))
            })
            .map(|component| {
                let mut names: Vec<String> = component
                    .into_iter()
                    .map(|n| self.graph[n].name.clone())
                    .collect();
                names.sort();
                names
            })
            .collect();
        cycles.sort();
        cycles
    }

    pub fn summary(&self) -> GraphSummary {
        GraphSummary {
            modules: self.graph.node_count(),
            internal_edges: self.graph.edge_count(),
            external_packages: self.external.iter().cloned().collect(),
            cycles: self.cycles(),
        }
    }

    pub fn to_dot(&self) -> String {
        format!("{}", Dot::with_config(&self.graph, &[DotConfig::EdgeNoLabel]))
    }
}

/// Dotted name of `module` inside `package`.
pub fn module_name(package: &str, module: &str) -> String {
    match (package.is_empty(), module == "__init__") {
        (false, true) => package.to_string(),
        (true, _) => module.to_string(),
        (false, false) => format!("{package}.{module}"),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSummary {
    pub modules: usize,
    pub internal_edges: usize,
    pub external_packages: Vec<String>,
    pub cycles: Vec<Vec<String>>,
}

impl GraphSummary {
    pub fn log_summary(&self) {
        tracing::info!(
            "module graph: {} modules, {} internal edges, {} external packages",
            self.modules,
            self.internal_edges,
            self.external_packages.len()
        );
        for cycle in &self.cycles {
            tracing::warn!("import cycle: {}", cycle.join(" -> "));
        }
    }
}
