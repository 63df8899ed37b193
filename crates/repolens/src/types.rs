#![forbid(unsafe_code)]

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Import,
    Call,
}

/// One file as handed over by the enumerator, alive for a single analysis pass.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub id: String,
    pub language: String,
    pub text: String,
    pub line_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub file_id: String,
    pub index: usize,
    pub text: String,
    pub start_byte: usize,
    pub end_byte: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub file_id: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub name: String,
    pub line: usize,
    pub file_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawImport {
    /// Specifier exactly as written, quotes stripped.
    pub specifier: String,
    /// Slash-separated form of the specifier used by the resolver.
    pub module_path: String,
    pub file_id: String,
    /// Speculative target; validated against real nodes by the graph builder.
    pub candidate: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub path: PathBuf,
    pub id: String,
    pub language: String,
    pub chunks: Vec<Chunk>,
    pub symbols: Vec<Symbol>,
    pub calls: Vec<CallSite>,
    pub imports: Vec<RawImport>,
    pub line_count: usize,
    pub content_hash: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    pub parent: Option<String>,
    pub file: Option<FileAnalysis>,
}

impl GraphNode {
    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    pub fn chunks(&self) -> &[Chunk] {
        self.file
            .as_ref()
            .map(|f| f.chunks.as_slice())
            .unwrap_or_default()
    }

    pub fn language(&self) -> &str {
        self.file.as_ref().map_or("", |f| f.language.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EdgeMetadata {
    Import {
        specifier: String,
    },
    Call {
        name: String,
        line: usize,
        declaration_line: usize,
        source_anchor: String,
        declaration_anchor: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    pub metadata: EdgeMetadata,
}

/// Property graph handed to the layout engine. Carries no coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl ProjectGraph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn file_nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.iter().filter(|n| n.is_file())
    }

    pub fn outgoing(&self, id: &str, kind: EdgeKind) -> impl Iterator<Item = &GraphEdge> {
        self.edges
            .iter()
            .filter(move |e| e.source == id && e.kind == kind)
    }

    pub fn file_count(&self) -> usize {
        self.file_nodes().count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub file_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub vector: Vec<f32>,
    pub language: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalMethod {
    Semantic,
    Keyword,
    Graph,
    IssueContext,
}

impl RetrievalMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Keyword => "keyword",
            Self::Graph => "graph",
            Self::IssueContext => "issue-context",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMatch {
    pub file_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub similarity: f32,
    pub language: String,
    pub method: RetrievalMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMatches {
    pub file_id: String,
    pub matches: Vec<RetrievalMatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueContext {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    ParseFailure,
    ResolutionFailure,
    EmbeddingFailure,
    RetrievalInputError,
}

/// A failure that was recovered at the smallest unit (file, query, import, chunk).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub subject: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub version: i64,
    pub root_dir: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub max_file_size: u64,
    pub chunk_size: usize,
    pub top_k: usize,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ContextFormat {
    #[default]
    Markdown,
    Json,
}
