#![forbid(unsafe_code)]

//! Project graph construction: directory and file nodes, import edges and
//! symbol-linked call edges.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::resolution::resolve_import;
use crate::types::{
    Diagnostic, DiagnosticKind, EdgeKind, EdgeMetadata, FileAnalysis, GraphEdge, GraphNode,
    NodeKind, ProjectGraph,
};
use crate::utils::{extension, file_name, parent_id, relative_id};

/// Read-only view handed to every edge builder.
pub struct EdgeContext<'a> {
    /// Analysis records of the file nodes, in node order.
    pub files: Vec<&'a FileAnalysis>,
    pub file_ids: &'a BTreeSet<String>,
}

#[derive(Debug, Default)]
pub struct EdgeBatch {
    pub edges: Vec<GraphEdge>,
    pub diagnostics: Vec<Diagnostic>,
}

pub trait EdgeBuilder: Send + Sync {
    fn name(&self) -> &'static str;
    fn build_edges(&self, ctx: &EdgeContext<'_>) -> EdgeBatch;
}

/// Resolves each raw import to a file node.
#[derive(Debug, Default)]
pub struct ImportEdges;

impl EdgeBuilder for ImportEdges {
    fn name(&self) -> &'static str {
        "imports"
    }

    fn build_edges(&self, ctx: &EdgeContext<'_>) -> EdgeBatch {
        let mut batch = EdgeBatch::default();
        for file in &ctx.files {
            for (idx, import) in file.imports.iter().enumerate() {
                match resolve_import(&import.module_path, &file.id, ctx.file_ids) {
                    Some(target) => batch.edges.push(GraphEdge {
                        id: format!("import-{}-{}-{idx}", file.id, target),
                        source: file.id.clone(),
                        target,
                        kind: EdgeKind::Import,
                        metadata: EdgeMetadata::Import {
                            specifier: import.specifier.clone(),
                        },
                    }),
                    None => {
                        tracing::warn!(file = %file.id, specifier = %import.specifier, "unresolved import");
                        batch.diagnostics.push(Diagnostic::new(
                            DiagnosticKind::ResolutionFailure,
                            import.specifier.clone(),
                            format!("no file matches import in {}", file.id),
                        ));
                    }
                }
            }
        }
        batch
    }
}

/// Links call sites to same-named declarations in other files. A name declared
/// in several files produces one edge per declaration.
#[derive(Debug, Default)]
pub struct CallEdges;

impl EdgeBuilder for CallEdges {
    fn name(&self) -> &'static str {
        "calls"
    }

    fn build_edges(&self, ctx: &EdgeContext<'_>) -> EdgeBatch {
        let mut declarations: HashMap<&str, Vec<(&str, usize)>> = HashMap::new();
        for file in &ctx.files {
            for symbol in &file.symbols {
                declarations
                    .entry(symbol.name.as_str())
                    .or_default()
                    .push((file.id.as_str(), symbol.line));
            }
        }

        let mut batch = EdgeBatch::default();
        for file in &ctx.files {
            for (call_idx, call) in file.calls.iter().enumerate() {
                let Some(targets) = declarations.get(call.name.as_str()) else {
                    continue;
                };
                for &(target, declaration_line) in targets {
                    if target == file.id {
                        continue;
                    }
                    batch.edges.push(GraphEdge {
                        id: format!("call-{}-{call_idx}-{target}-{declaration_line}", file.id),
                        source: file.id.clone(),
                        target: target.to_string(),
                        kind: EdgeKind::Call,
                        metadata: EdgeMetadata::Call {
                            name: call.name.clone(),
                            line: call.line,
                            declaration_line,
                            source_anchor: format!("call-{}-line-{}", call.name, call.line),
                            declaration_anchor: format!("{}-in", call.name),
                        },
                    });
                }
            }
        }
        batch
    }
}

#[derive(Debug, Clone, Default)]
pub struct GraphBuild {
    pub graph: ProjectGraph,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct GraphBuilder {
    edge_builders: Vec<Box<dyn EdgeBuilder>>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new(vec![Box::new(ImportEdges), Box::new(CallEdges)])
    }
}

impl GraphBuilder {
    pub fn new(edge_builders: Vec<Box<dyn EdgeBuilder>>) -> Self {
        Self { edge_builders }
    }

    /// Builds the graph for `files`. Files without an analysis record become
    /// leaf nodes with an empty record.
    pub fn build(&self, project_root: &Path, analyses: &[FileAnalysis], files: &[PathBuf]) -> GraphBuild {
        let mut diagnostics = Vec::new();

        let mut by_id: HashMap<&str, &FileAnalysis> = HashMap::new();
        for analysis in analyses {
            by_id.entry(analysis.id.as_str()).or_insert(analysis);
        }

        let mut file_nodes = Vec::new();
        let mut seen = HashSet::new();
        let mut directories = BTreeSet::new();

        for path in files {
            let Some(id) = relative_id(project_root, path) else {
                tracing::warn!(path = %path.display(), "file outside project root");
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::ResolutionFailure,
                    path.display().to_string(),
                    "file is outside the project root",
                ));
                continue;
            };
            if !seen.insert(id.clone()) {
                continue;
            }

            let mut dir = parent_id(&id);
            while !dir.is_empty() {
                directories.insert(dir.to_string());
                dir = parent_id(dir);
            }

            let record = by_id
                .get(id.as_str())
                .map_or_else(|| placeholder(path, &id), |a| (*a).clone());
            file_nodes.push(GraphNode {
                label: file_name(&id).to_string(),
                parent: non_empty(parent_id(&id)),
                kind: NodeKind::File,
                file: Some(record),
                id,
            });
        }

        let mut nodes: Vec<GraphNode> = directories
            .into_iter()
            .map(|id| GraphNode {
                label: file_name(&id).to_string(),
                parent: non_empty(parent_id(&id)),
                kind: NodeKind::Directory,
                file: None,
                id,
            })
            .collect();
        nodes.extend(file_nodes);

        let file_ids: BTreeSet<String> = seen.into_iter().collect();
        let ctx = EdgeContext {
            files: nodes.iter().filter_map(|n| n.file.as_ref()).collect(),
            file_ids: &file_ids,
        };

        let mut edges = Vec::new();
        for builder in &self.edge_builders {
            let batch = builder.build_edges(&ctx);
            tracing::debug!(builder = builder.name(), edges = batch.edges.len(), "edge pass");
            edges.extend(batch.edges);
            diagnostics.extend(batch.diagnostics);
        }

        let before = edges.len();
        edges.retain(|e| {
            file_ids.contains(&e.source)
                && file_ids.contains(&e.target)
                && !(e.kind == EdgeKind::Call && e.source == e.target)
        });
        if edges.len() != before {
            tracing::debug!(dropped = before - edges.len(), "dropped edges with missing endpoints");
        }

        GraphBuild {
            graph: ProjectGraph { nodes, edges },
            diagnostics,
        }
    }
}

fn non_empty(id: &str) -> Option<String> {
    (!id.is_empty()).then(|| id.to_string())
}

fn placeholder(path: &Path, id: &str) -> FileAnalysis {
    FileAnalysis {
        path: path.to_path_buf(),
        id: id.to_string(),
        language: match extension(id) {
            "" => "unknown".to_string(),
            ext => ext.to_string(),
        },
        chunks: Vec::new(),
        symbols: Vec::new(),
        calls: Vec::new(),
        imports: Vec::new(),
        line_count: 0,
        content_hash: String::new(),
        text: String::new(),
    }
}
