#![forbid(unsafe_code)]

//! Hybrid retrieval over the project graph and the vector store.
//!
//! Four channels feed one accumulator keyed by file id, in this order:
//! issue-context, semantic, keyword, graph expansion. Files keep the order in
//! which any channel first reached them and matches keep insertion order.
//! There is no global re-ranking.

use std::collections::{HashMap, HashSet};
use std::io;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{
    Diagnostic, DiagnosticKind, EdgeKind, FileMatches, GraphNode, IssueContext, ProjectGraph,
    RetrievalMatch, RetrievalMethod,
};
use crate::vectors::{Embedder, VectorStore};

const CODE_EXTENSIONS: &str = "js|jsx|ts|tsx|mjs|cjs|py|rs|go|java|c|h|cpp|hpp";
const DIRECT_SCORE: f32 = 1.0;
const GRAPH_SCORE: f32 = 0.8;
const GRAPH_CHUNKS_PER_FILE: usize = 2;
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Retrieval {
    pub files: Vec<FileMatches>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn match_count(&self) -> usize {
        self.files.iter().map(|f| f.matches.len()).sum()
    }

    pub fn file(&self, file_id: &str) -> Option<&FileMatches> {
        self.files.iter().find(|f| f.file_id == file_id)
    }
}

#[derive(Default)]
struct Accumulator {
    files: Vec<FileMatches>,
    positions: HashMap<String, usize>,
}

impl Accumulator {
    fn push(&mut self, found: RetrievalMatch) {
        let pos = *self.positions.entry(found.file_id.clone()).or_insert_with(|| {
            self.files.push(FileMatches {
                file_id: found.file_id.clone(),
                matches: Vec::new(),
            });
            self.files.len() - 1
        });
        let matches = &mut self.files[pos].matches;
        if !matches
            .iter()
            .any(|m| m.chunk_index == found.chunk_index && m.method == found.method)
        {
            matches.push(found);
        }
    }

    fn push_node_chunks(&mut self, node: &GraphNode, limit: usize, similarity: f32, method: RetrievalMethod) {
        for chunk in node.chunks().iter().take(limit) {
            self.push(RetrievalMatch {
                file_id: node.id.clone(),
                chunk_index: chunk.index,
                text: chunk.text.clone(),
                similarity,
                language: node.language().to_string(),
                method,
            });
        }
    }
}

/// File path tokens pulled out of free text.
struct TokenPatterns {
    /// Any path-like token in an issue body.
    issue: Regex,
    /// Back-ticked paths in the query.
    keyword: Regex,
}

impl TokenPatterns {
    fn new() -> io::Result<Self> {
        let compile = |pattern: String| {
            Regex::new(&pattern).map_err(|e| io::Error::other(format!("Invalid token pattern: {e}")))
        };
        Ok(Self {
            issue: compile(format!(r"([A-Za-z0-9_/.\-]+\.(?:{CODE_EXTENSIONS}))\b"))?,
            keyword: compile(format!(r"`([^`]+\.(?:{CODE_EXTENSIONS}))`"))?,
        })
    }
}

fn extract_tokens(pattern: &Regex, text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    pattern
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_start_matches("./").to_string())
        .filter(|token| !token.is_empty() && seen.insert(token.clone()))
        .collect()
}

fn id_matches(id: &str, token: &str) -> bool {
    id.ends_with(token)
}

pub struct HybridRetriever<'a> {
    graph: &'a ProjectGraph,
    store: &'a VectorStore,
    embedder: &'a dyn Embedder,
    patterns: TokenPatterns,
}

impl<'a> HybridRetriever<'a> {
    pub fn new(graph: &'a ProjectGraph, store: &'a VectorStore, embedder: &'a dyn Embedder) -> io::Result<Self> {
        Ok(Self {
            graph,
            store,
            embedder,
            patterns: TokenPatterns::new()?,
        })
    }

    pub fn retrieve(&self, query: &str, issue: Option<&IssueContext>, top_k: usize) -> Retrieval {
        let mut acc = Accumulator::default();
        let mut diagnostics = Vec::new();

        if let Some(issue) = issue {
            self.issue_channel(issue, &mut acc);
        }
        self.semantic_channel(query, issue, top_k, &mut acc, &mut diagnostics);
        let keyword_files = self.keyword_channel(query, &mut acc);
        self.graph_channel(&keyword_files, &mut acc);

        tracing::debug!(
            files = acc.files.len(),
            diagnostics = diagnostics.len(),
            "retrieval complete"
        );
        Retrieval {
            files: acc.files,
            diagnostics,
        }
    }

    fn issue_channel(&self, issue: &IssueContext, acc: &mut Accumulator) {
        for token in extract_tokens(&self.patterns.issue, &issue.body) {
            for node in self.graph.file_nodes().filter(|n| id_matches(&n.id, &token)) {
                acc.push_node_chunks(node, usize::MAX, DIRECT_SCORE, RetrievalMethod::IssueContext);
            }
        }
    }

    fn semantic_channel(
        &self,
        query: &str,
        issue: Option<&IssueContext>,
        top_k: usize,
        acc: &mut Accumulator,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        if self.store.is_empty() {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::RetrievalInputError,
                "vector store",
                "vector store is empty, semantic search skipped",
            ));
            return;
        }
        if query.trim().is_empty() && issue.is_none() {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::RetrievalInputError,
                "query",
                "empty query, semantic search skipped",
            ));
            return;
        }

        let prompt = match issue {
            Some(issue) => format!("{query}\n\nRelated issue: {}\n{}", issue.title, issue.body),
            None => query.to_string(),
        };
        let query_vector = match self.embedder.embed(&prompt) {
            Ok(vector) => vector,
            Err(err) => {
                tracing::warn!(error = %err, "query embedding failed");
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::EmbeddingFailure,
                    "query",
                    err.to_string(),
                ));
                return;
            }
        };

        if let Some(dimension) = self.store.dimension()
            && dimension != query_vector.len()
        {
            tracing::warn!(
                query = query_vector.len(),
                store = dimension,
                "query vector does not match the store dimension"
            );
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::RetrievalInputError,
                "query",
                format!(
                    "query vector has {} dimensions but the store has {dimension}, semantic search skipped",
                    query_vector.len()
                ),
            ));
            return;
        }

        // Records of files that left the graph since the last embedding pass are skipped.
        let file_ids: HashSet<&str> = self.graph.file_nodes().map(|n| n.id.as_str()).collect();
        let current = self
            .store
            .search(&query_vector, self.store.len())
            .into_iter()
            .filter(|(record, _)| file_ids.contains(record.file_id.as_str()))
            .take(top_k);
        for (record, similarity) in current {
            acc.push(RetrievalMatch {
                file_id: record.file_id.clone(),
                chunk_index: record.chunk_index,
                text: record.text.clone(),
                similarity,
                language: record.language.clone(),
                method: RetrievalMethod::Semantic,
            });
        }
    }

    /// Returns the ids of the files the keyword channel matched, in match order.
    fn keyword_channel(&self, query: &str, acc: &mut Accumulator) -> Vec<String> {
        let mut matched = Vec::new();
        for token in extract_tokens(&self.patterns.keyword, query) {
            let hit = self
                .graph
                .file_nodes()
                .find(|n| id_matches(&n.id, &token) || n.label == token);
            if let Some(node) = hit {
                acc.push_node_chunks(node, usize::MAX, DIRECT_SCORE, RetrievalMethod::Keyword);
                if !matched.contains(&node.id) {
                    matched.push(node.id.clone());
                }
            }
        }
        matched
    }

    fn graph_channel(&self, keyword_files: &[String], acc: &mut Accumulator) {
        for file_id in keyword_files {
            let mut targets: Vec<&str> = Vec::new();
            for edge in self.graph.outgoing(file_id, EdgeKind::Import) {
                if !targets.contains(&edge.target.as_str()) {
                    targets.push(&edge.target);
                }
            }
            for target in targets {
                if let Some(node) = self.graph.node(target) {
                    acc.push_node_chunks(node, GRAPH_CHUNKS_PER_FILE, GRAPH_SCORE, RetrievalMethod::Graph);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_tokens_are_deduplicated() {
        let patterns = TokenPatterns::new().unwrap();
        let tokens = extract_tokens(
            &patterns.issue,
            "Crash in src/api/client.ts and again in src/api/client.ts, see ./util.js. Not config.json.",
        );
        assert_eq!(tokens, vec!["src/api/client.ts", "util.js"]);
    }

    #[test]
    fn test_keyword_tokens_need_backticks() {
        let patterns = TokenPatterns::new().unwrap();
        let tokens = extract_tokens(&patterns.keyword, "why does `b.js` call a.js? also `lib/x.py` and `b.js`");
        assert_eq!(tokens, vec!["b.js", "lib/x.py"]);
    }

    #[test]
    fn test_id_matching_is_a_plain_suffix() {
        assert!(id_matches("b.js", "b.js"));
        assert!(id_matches("src/b.js", "b.js"));
        assert!(id_matches("src/lib.js", "b.js"));
        assert!(id_matches("src/lib/b.js", "lib/b.js"));
        assert!(!id_matches("src/b.js", "src/b.jsx"));
        assert!(!id_matches("src/b.ts", "b.js"));
    }
}
