//! Static import extraction for Python sources.
//!
//! Files are parsed with the tree-sitter Python grammar and never executed.
//! Any syntax error in a file makes the whole file unparsable so that a
//! report never lists imports recovered from a broken module.

use crate::error::ReporterError;
use std::collections::BTreeSet;
use std::path::Path;
use tree_sitter::{Node, Parser};

/// One import statement target before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImport {
    /// Number of leading dots on a `from` import; 0 for absolute imports.
    pub level: usize,
    /// Module part: `a.b` in `import a.b` or `from a.b import c`.
    pub module: String,
    /// Imported member for `from` imports (`*` for wildcards).
    pub member: Option<String>,
}

impl RawImport {
    fn absolute(module: String, member: Option<String>) -> Self {
        Self {
            level: 0,
            module,
            member,
        }
    }

    /// Fully-qualified name of the imported symbol.
    ///
    /// Relative imports are resolved against `package`, the dotted package
    /// containing the importing file. If the import climbs above the top of
    /// `package` its dotted text is kept as written.
    pub fn qualified(&self, package: &str) -> String {
        let mut parts: Vec<&str> = Vec::new();

        if self.level > 0 {
            let package_parts: Vec<&str> = package.split('.').filter(|p| !p.is_empty()).collect();
            if self.level > package_parts.len() {
                return self.verbatim();
            }
            parts.extend(&package_parts[..=package_parts.len() - self.level]);
        }

        parts.extend(self.module.split('.').filter(|p| !p.is_empty()));
        if let Some(member) = &self.member {
            parts.push(member);
        }
        parts.join(".")
    }

    fn verbatim(&self) -> String {
        let mut text = ".".repeat(self.level);
        text.push_str(&self.module);
        if let Some(member) = &self.member {
            if !self.module.is_empty() {
                text.push('.');
            }
            text.push_str(member);
        }
        text
    }
}

/// Why a file produced no imports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    Encoding,
    Syntax { line: usize },
    Incomplete,
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encoding => write!(f, "unsupported encoding (not valid UTF-8)"),
            Self::Syntax { line } => write!(f, "syntax error at line {line}"),
            Self::Incomplete => write!(f, "parser gave up before finishing the file"),
        }
    }
}

pub struct PythonImportParser {
    parser: Parser,
}

impl PythonImportParser {
    pub fn new() -> crate::Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(ReporterError::Grammar)?;
        Ok(Self { parser })
    }

    pub fn parse_bytes(&mut self, bytes: &[u8]) -> Result<Vec<RawImport>, ParseFailure> {
        let source = std::str::from_utf8(bytes).map_err(|_| ParseFailure::Encoding)?;
        self.parse(source)
    }

    pub fn parse(&mut self, source: &str) -> Result<Vec<RawImport>, ParseFailure> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or(ParseFailure::Incomplete)?;
        let root = tree.root_node();

        if root.has_error() {
            return Err(ParseFailure::Syntax {
                line: first_error_line(root),
            });
        }

        let bytes = source.as_bytes();
        let mut imports = Vec::new();
        let mut stack = vec![root];

        while let Some(node) = stack.pop() {
            match node.kind() {
                "import_statement" => collect_plain_imports(node, bytes, &mut imports),
                "import_from_statement" => collect_from_imports(node, bytes, &mut imports),
                "future_import_statement" => {
                    for name in field_nodes(node, "name") {
                        imports.push(RawImport::absolute(
                            "__future__".to_string(),
                            Some(imported_name(name, bytes)),
                        ));
                    }
                }
                _ => {
                    let mut cursor = node.walk();
                    stack.extend(node.named_children(&mut cursor));
                }
            }
        }

        Ok(imports)
    }

    /// Read, parse and resolve one file; the result is sorted and deduplicated.
    pub fn parse_file(&mut self, path: &Path, package: &str) -> Result<Vec<String>, String> {
        let bytes = std::fs::read(path).map_err(|e| format!("cannot read file: {e}"))?;
        let raw = self.parse_bytes(&bytes).map_err(|e| e.to_string())?;

        let resolved: BTreeSet<String> = raw.iter().map(|import| import.qualified(package)).collect();
        Ok(resolved.into_iter().collect())
    }
}

fn field_nodes<'t>(node: Node<'t>, field: &str) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children_by_field_name(field, &mut cursor).collect()
}

fn text(node: Node<'_>, bytes: &[u8]) -> String {
    node.utf8_text(bytes)
        .unwrap_or_default()
        .split_whitespace()
        .collect()
}

/// `a.b` for both `a.b` and `a.b as c`.
fn imported_name(node: Node<'_>, bytes: &[u8]) -> String {
    if node.kind() == "aliased_import" {
        if let Some(name) = node.child_by_field_name("name") {
            return text(name, bytes);
        }
    }
    text(node, bytes)
}

fn collect_plain_imports(node: Node<'_>, bytes: &[u8], imports: &mut Vec<RawImport>) {
    for name in field_nodes(node, "name") {
        imports.push(RawImport::absolute(imported_name(name, bytes), None));
    }
}

fn collect_from_imports(node: Node<'_>, bytes: &[u8], imports: &mut Vec<RawImport>) {
    let Some(module_node) = node.child_by_field_name("module_name") else {
        return;
    };

    let module_text = text(module_node, bytes);
    let level = if module_node.kind() == "relative_import" {
        module_text.chars().take_while(|c| *c == '.').count()
    } else {
        0
    };
    let module = module_text[level..].to_string();

    let mut members: Vec<String> = field_nodes(node, "name")
        .into_iter()
        .map(|name| imported_name(name, bytes))
        .collect();

    if members.is_empty() {
        let mut cursor = node.walk();
        if node
            .named_children(&mut cursor)
            .any(|child| child.kind() == "wildcard_import")
        {
            members.push("*".to_string());
        }
    }

    for member in members {
        imports.push(RawImport {
            level,
            module: module.clone(),
            member: Some(member),
        });
    }
}

fn first_error_line(root: Node<'_>) -> usize {
    let mut stack = vec![root];
    let mut best: Option<usize> = None;

    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let row = node.start_position().row;
            best = Some(best.map_or(row, |b| b.min(row)));
            continue;
        }
        if node.has_error() {
            let mut cursor = node.walk();
            stack.extend(node.children(&mut cursor));
        }
    }

    best.unwrap_or(0) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(source: &str, package: &str) -> Vec<String> {
        let mut parser = PythonImportParser::new().unwrap();
        let raw = parser.parse(source).unwrap();
        let set: BTreeSet<String> = raw.iter().map(|i| i.qualified(package)).collect();
        set.into_iter().collect()
    }

    #[test]
    fn from_and_plain_imports_are_qualified_and_sorted() {
        let imports = resolve("from pkg import Thing\nimport os\n", "");
        assert_eq!(imports, vec!["os", "pkg.Thing"]);
    }

    #[test]
    fn aliases_and_multiple_names() {
        let source = "import os.path as p, sys\nfrom collections import OrderedDict as OD, deque\n";
        assert_eq!(
            resolve(source, ""),
            vec!["collections.OrderedDict", "collections.deque", "os.path", "sys"]
        );
    }

    #[test]
    fn parenthesized_wildcard_and_future_imports() {
        let source = "from __future__ import annotations\nfrom typing import (\n    Any,\n    Dict,\n)\nfrom shapes import *\n";
        assert_eq!(
            resolve(source, ""),
            vec!["__future__.annotations", "shapes.*", "typing.Any", "typing.Dict"]
        );
    }

    #[test]
    fn nested_imports_are_found() {
        let source = "try:\n    import ujson as json\nexcept ImportError:\n    import json\n\ndef f():\n    from os import getcwd\n    return getcwd()\n\nclass K:\n    import re\n";
        assert_eq!(resolve(source, ""), vec!["json", "os.getcwd", "re", "ujson"]);
    }

    #[test]
    fn duplicate_imports_collapse() {
        assert_eq!(resolve("import os\nimport os\nfrom os import path\n", ""), vec!["os", "os.path"]);
    }

    #[test]
    fn relative_imports_resolve_against_package() {
        let source = "from . import sibling\nfrom .models import User\nfrom ..core import Base\n";
        assert_eq!(
            resolve(source, "app.api.v1"),
            vec!["app.api.core.Base", "app.api.v1.models.User", "app.api.v1.sibling"]
        );
    }

    #[test]
    fn relative_import_above_top_level_is_kept_verbatim() {
        assert_eq!(resolve("from ...deep import X\n", "app"), vec!["...deep.X"]);
        assert_eq!(resolve("from . import y\n", ""), vec![".y"]);
    }

    #[test]
    fn imports_in_strings_and_comments_are_ignored() {
        let source = "# import fake\ntext = \"import nothing\"\nimport real\n";
        assert_eq!(resolve(source, ""), vec!["real"]);
    }

    #[test]
    fn syntax_error_reports_line() {
        let mut parser = PythonImportParser::new().unwrap();
        let err = parser.parse("import os\n\ndef broken(:\n    pass\n").unwrap_err();
        assert!(matches!(err, ParseFailure::Syntax { .. }));
        assert!(err.to_string().starts_with("syntax error at line"));
    }

    #[test]
    fn invalid_utf8_is_an_encoding_failure() {
        let mut parser = PythonImportParser::new().unwrap();
        let err = parser.parse_bytes(&[0x69, 0x6d, 0xff, 0xfe]).unwrap_err();
        assert_eq!(err, ParseFailure::Encoding);
    }

    #[test]
    fn empty_file_has_no_imports() {
        let mut parser = PythonImportParser::new().unwrap();
        assert!(parser.parse("").unwrap().is_empty());
    }
}
