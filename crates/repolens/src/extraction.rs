#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use tree_sitter::{Parser, Query, QueryCursor, StreamingIterator, Tree};

use crate::chunking::{Chunker, whole_file_chunk};
use crate::db;
use crate::graph::GraphBuilder;
use crate::languages::{LanguageBundle, bundle_for_path, normalize_specifier};
use crate::types::{
    CallSite, Diagnostic, DiagnosticKind, FileAnalysis, ProjectConfig, RawImport, SourceFile,
    Symbol,
};
use crate::utils::{hash_sha256, normalize_path, relative_id};
use crate::vectors::{Embedder, VectorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPhase {
    Scanning,
    Analyzing,
    Linking,
    Embedding,
    Storing,
}

#[derive(Debug, Clone)]
pub struct IndexProgress {
    pub phase: IndexPhase,
    pub current: usize,
    pub total: usize,
    pub current_file: Option<String>,
}

pub type ProgressFn<'a> = &'a (dyn Fn(IndexProgress) + Sync);

#[derive(Debug, Clone)]
pub struct IndexResult {
    pub files_scanned: usize,
    pub files_analyzed: usize,
    pub nodes_created: usize,
    pub edges_created: usize,
    pub chunks_created: usize,
    pub embeddings_stored: Option<usize>,
    pub diagnostics: Vec<Diagnostic>,
    pub duration_ms: u128,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub analysis: FileAnalysis,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectAnalysis {
    pub analyses: Vec<FileAnalysis>,
    pub diagnostics: Vec<Diagnostic>,
}

impl SourceFile {
    pub fn new(project_root: &Path, path: &Path, text: String) -> Self {
        let id = relative_id(project_root, path)
            .unwrap_or_else(|| path.to_string_lossy().replace('\\', "/"));
        let language = path
            .extension()
            .and_then(|v| v.to_str())
            .filter(|ext| !ext.is_empty())
            .map_or_else(|| "unknown".to_string(), str::to_string);
        let line_count = text.split('\n').count();

        Self {
            path: path.to_path_buf(),
            id,
            language,
            text,
            line_count,
        }
    }
}

/// Chunking plus symbol, import and call extraction for one file.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileAnalyzer {
    chunker: Chunker,
}

impl FileAnalyzer {
    pub const fn new(chunker: Chunker) -> Self {
        Self { chunker }
    }

    pub fn analyze(&self, project_root: &Path, path: &Path, content: &str) -> AnalysisOutcome {
        let source = SourceFile::new(project_root, path, content.to_string());
        match bundle_for_path(path) {
            Some(bundle) => self.analyze_with_bundle(source, bundle),
            None => AnalysisOutcome {
                analysis: unknown_analysis(source),
                diagnostics: Vec::new(),
            },
        }
    }

    pub fn analyze_with_bundle(&self, source: SourceFile, bundle: &LanguageBundle) -> AnalysisOutcome {
        let mut diagnostics = Vec::new();
        let language = bundle.language.as_str();

        let tree = match parse(&source.text, bundle) {
            Ok(tree) => tree,
            Err(message) => {
                tracing::warn!(file = %source.id, %message, "parse failed, using whole-file fallback");
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::ParseFailure,
                    source.id.clone(),
                    message,
                ));
                let mut analysis = unknown_analysis(source);
                analysis.language = language.to_string();
                return AnalysisOutcome {
                    analysis,
                    diagnostics,
                };
            }
        };

        let chunks = self.chunker.chunk(&source.id, &source.text, &tree);

        let symbols = run_query(&bundle.symbol_query, "symbol", "name", &tree, &source, &mut diagnostics)
            .into_iter()
            .map(|(name, line)| Symbol {
                name,
                file_id: source.id.clone(),
                line,
            })
            .collect();

        let calls = run_query(&bundle.call_query, "call", "name", &tree, &source, &mut diagnostics)
            .into_iter()
            .map(|(name, line)| CallSite {
                name,
                line,
                file_id: source.id.clone(),
            })
            .collect();

        let importer_dir = source.path.parent().unwrap_or_else(|| Path::new(""));
        let imports = run_query(&bundle.import_query, "import", "path", &tree, &source, &mut diagnostics)
            .into_iter()
            .filter_map(|(literal, _line)| {
                let specifier = literal.trim().trim_matches(['"', '\'', '`']).to_string();
                if specifier.is_empty() {
                    return None;
                }
                let module_path = normalize_specifier(&specifier, bundle.specifier_style);
                let candidate = normalize_path(&importer_dir.join(&module_path));
                Some(RawImport {
                    specifier,
                    module_path,
                    file_id: source.id.clone(),
                    candidate,
                })
            })
            .collect();

        AnalysisOutcome {
            analysis: FileAnalysis {
                content_hash: hash_sha256(&source.text),
                path: source.path,
                id: source.id,
                language: language.to_string(),
                chunks,
                symbols,
                calls,
                imports,
                line_count: source.line_count,
                text: source.text,
            },
            diagnostics,
        }
    }
}

fn unknown_analysis(source: SourceFile) -> FileAnalysis {
    FileAnalysis {
        chunks: whole_file_chunk(&source.id, &source.text).into_iter().collect(),
        content_hash: hash_sha256(&source.text),
        path: source.path,
        id: source.id,
        language: source.language,
        symbols: Vec::new(),
        calls: Vec::new(),
        imports: Vec::new(),
        line_count: source.line_count,
        text: source.text,
    }
}

fn parse(text: &str, bundle: &LanguageBundle) -> Result<Tree, String> {
    let mut parser = Parser::new();
    parser
        .set_language(&bundle.grammar)
        .map_err(|err| format!("grammar rejected: {err}"))?;
    parser
        .parse(text, None)
        .ok_or_else(|| "parser produced no tree".to_string())
}

/// Runs one structural query; a query that did not compile yields nothing.
fn run_query(
    query: &Result<Query, String>,
    what: &str,
    capture: &str,
    tree: &Tree,
    source: &SourceFile,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<(String, usize)> {
    match query {
        Ok(query) => query_captures(query, capture, tree, &source.text),
        Err(err) => {
            tracing::warn!(file = %source.id, query = what, error = %err, "structural query failed");
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::ParseFailure,
                source.id.clone(),
                format!("{what} query failed: {err}"),
            ));
            Vec::new()
        }
    }
}

/// Text and 1-based line of every `@capture` hit, in match order.
fn query_captures(query: &Query, capture: &str, tree: &Tree, source: &str) -> Vec<(String, usize)> {
    let Some(index) = query.capture_index_for_name(capture) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, tree.root_node(), source.as_bytes());
    while let Some(m) = matches.next() {
        for hit in m.captures.iter().filter(|c| c.index == index) {
            if let Ok(text) = hit.node.utf8_text(source.as_bytes()) {
                found.push((text.to_string(), hit.node.start_position().row + 1));
            }
        }
    }
    found
}

/// Analyzes every file on the rayon pool. Unreadable or oversized files get no
/// record; the graph builder still turns them into leaf nodes.
pub fn analyze_files(
    project_root: &Path,
    files: &[PathBuf],
    config: &ProjectConfig,
    on_progress: Option<ProgressFn<'_>>,
) -> ProjectAnalysis {
    let analyzer = FileAnalyzer::new(Chunker::new(config.chunk_size));
    let done = AtomicUsize::new(0);
    let total = files.len();

    let outcomes: Vec<(Option<FileAnalysis>, Vec<Diagnostic>)> = files
        .par_iter()
        .map(|path| {
            let outcome = analyze_path(&analyzer, project_root, path, config.max_file_size);
            let current = done.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(cb) = on_progress {
                cb(IndexProgress {
                    phase: IndexPhase::Analyzing,
                    current,
                    total,
                    current_file: relative_id(project_root, path),
                });
            }
            outcome
        })
        .collect();

    let mut project = ProjectAnalysis::default();
    for (analysis, diagnostics) in outcomes {
        project.analyses.extend(analysis);
        project.diagnostics.extend(diagnostics);
    }
    project
}

fn analyze_path(
    analyzer: &FileAnalyzer,
    project_root: &Path,
    path: &Path,
    max_file_size: u64,
) -> (Option<FileAnalysis>, Vec<Diagnostic>) {
    let subject = relative_id(project_root, path).unwrap_or_else(|| path.display().to_string());

    let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if size > max_file_size {
        tracing::debug!(file = %subject, size, "skipping oversized file");
        return (None, Vec::new());
    }

    match fs::read_to_string(path) {
        Ok(content) => {
            let outcome = analyzer.analyze(project_root, path, &content);
            (Some(outcome.analysis), outcome.diagnostics)
        }
        Err(err) => {
            tracing::warn!(file = %subject, error = %err, "could not read file");
            (
                None,
                vec![Diagnostic::new(
                    DiagnosticKind::ParseFailure,
                    subject,
                    format!("unreadable: {err}"),
                )],
            )
        }
    }
}

/// Full pass: scan, analyze, link, persist the graph and, when an embedder is
/// given, rebuild and persist the vector store.
pub fn index_all(
    project_root: &Path,
    config: &ProjectConfig,
    embedder: Option<&dyn Embedder>,
    on_progress: Option<ProgressFn<'_>>,
) -> std::io::Result<IndexResult> {
    let start = Instant::now();

    let files = scan_directory(project_root, config)?;
    if let Some(cb) = on_progress {
        cb(IndexProgress {
            phase: IndexPhase::Scanning,
            current: files.len(),
            total: files.len(),
            current_file: None,
        });
    }

    let project = analyze_files(project_root, &files, config, on_progress);
    let mut diagnostics = project.diagnostics;

    if let Some(cb) = on_progress {
        cb(IndexProgress {
            phase: IndexPhase::Linking,
            current: 0,
            total: project.analyses.len(),
            current_file: None,
        });
    }
    let built = GraphBuilder::default().build(project_root, &project.analyses, &files);
    diagnostics.extend(built.diagnostics);

    if let Some(cb) = on_progress {
        cb(IndexProgress {
            phase: IndexPhase::Storing,
            current: 0,
            total: 1,
            current_file: None,
        });
    }
    db::save_graph(project_root, &built.graph)?;

    let mut embeddings_stored = None;
    if let Some(embedder) = embedder {
        let total: usize = project.analyses.iter().map(|a| a.chunks.len()).sum();
        let report = |current: usize| {
            if let Some(cb) = on_progress {
                cb(IndexProgress {
                    phase: IndexPhase::Embedding,
                    current,
                    total,
                    current_file: None,
                });
            }
        };
        let outcome = VectorStore::build_with_progress(
            &project.analyses,
            embedder,
            config.embedding.concurrency,
            &report,
        );
        diagnostics.extend(outcome.diagnostics);

        let mut conn = db::open_database(project_root)?;
        db::replace_vectors(&mut conn, &outcome.store, embedder.model_name())?;
        embeddings_stored = Some(outcome.store.len());
    }

    let chunks_created: usize = project.analyses.iter().map(|a| a.chunks.len()).sum();
    tracing::info!(
        files = files.len(),
        nodes = built.graph.nodes.len(),
        edges = built.graph.edges.len(),
        diagnostics = diagnostics.len(),
        "index pass complete"
    );

    Ok(IndexResult {
        files_scanned: files.len(),
        files_analyzed: project.analyses.len(),
        nodes_created: built.graph.nodes.len(),
        edges_created: built.graph.edges.len(),
        chunks_created,
        embeddings_stored,
        diagnostics,
        duration_ms: start.elapsed().as_millis(),
    })
}

/// Enumerates project files in sorted order. Only an unreadable root is an error.
pub fn scan_directory(root_dir: &Path, config: &ProjectConfig) -> std::io::Result<Vec<PathBuf>> {
    let include = build_globset(&config.include);
    let exclude = build_globset(&config.exclude);

    let mut files = Vec::new();
    let mut stack = vec![root_dir.to_path_buf()];
    let mut is_root = true;

    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if is_root => return Err(err),
            Err(err) => {
                tracing::warn!(dir = %dir.display(), error = %err, "could not read directory");
                continue;
            }
        };
        is_root = false;

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(rel_str) = relative_id(root_dir, &path) else {
                continue;
            };
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                if exclude.is_match(format!("{rel_str}/")) {
                    continue;
                }
                stack.push(path);
            } else if file_type.is_file()
                && !exclude.is_match(&rel_str)
                && include.is_match(&rel_str)
            {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(err) => tracing::warn!(%pattern, error = %err, "ignoring invalid glob"),
        }
    }
    builder.build().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "glob set failed to build");
        GlobSet::empty()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::Language;

    fn analyze(path: &str, content: &str) -> AnalysisOutcome {
        FileAnalyzer::default().analyze(Path::new("/repo"), &Path::new("/repo").join(path), content)
    }

    #[test]
    fn test_unknown_language_keeps_whole_file() {
        let outcome = analyze("docs/notes.md", "# Notes\n\nsome text\n");
        let analysis = outcome.analysis;
        assert_eq!(analysis.id, "docs/notes.md");
        assert_eq!(analysis.language, "md");
        assert_eq!(analysis.chunks.len(), 1);
        assert_eq!(analysis.chunks[0].text, "# Notes\n\nsome text\n");
        assert!(analysis.symbols.is_empty());
        assert!(analysis.calls.is_empty());
        assert!(analysis.imports.is_empty());
        assert_eq!(analysis.line_count, 4);
        assert!(outcome.diagnostics.is_empty());
    }

    #[test]
    fn test_unknown_language_keeps_extension_case() {
        let outcome = analyze("docs/CHANGES.TXT", "fixed things\n");
        assert_eq!(outcome.analysis.language, "TXT");
        assert_eq!(outcome.analysis.chunks.len(), 1);
    }

    #[test]
    fn test_whitespace_only_unknown_file_has_no_chunks() {
        let outcome = analyze("notes/empty.txt", "  \n\n");
        assert!(outcome.analysis.chunks.is_empty());
        assert_eq!(outcome.analysis.language, "txt");
        assert!(analyze("notes/blank.txt", "").analysis.chunks.is_empty());
    }

    #[test]
    fn test_extensionless_file_is_unknown() {
        let outcome = analyze("Makefile", "all:\n\techo hi\n");
        assert_eq!(outcome.analysis.language, "unknown");
    }

    #[test]
    fn test_javascript_structure() {
        let source = "import { add } from './math.js';\nconst util = require(\"../util\");\n\nfunction total(xs) {\n  return xs.reduce((a, b) => add(a, b), 0);\n}\n\nconst twice = (x) => helpers.double(x);\n";
        let outcome = analyze("src/app.js", source);
        let analysis = outcome.analysis;

        assert_eq!(analysis.language, "javascript");
        let names: Vec<_> = analysis.symbols.iter().map(|s| (s.name.as_str(), s.line)).collect();
        assert_eq!(names, vec![("total", 4), ("twice", 8)]);

        let specs: Vec<_> = analysis.imports.iter().map(|i| i.specifier.as_str()).collect();
        assert_eq!(specs, vec!["./math.js", "../util"]);
        assert_eq!(analysis.imports[0].candidate, PathBuf::from("/repo/src/math.js"));
        assert_eq!(analysis.imports[1].candidate, PathBuf::from("/repo/util"));

        let calls: Vec<_> = analysis.calls.iter().map(|c| c.name.as_str()).collect();
        assert!(calls.contains(&"add"));
        assert!(calls.contains(&"reduce"));
        assert!(calls.contains(&"double"));
        assert!(calls.contains(&"require"));
        assert!(outcome.diagnostics.is_empty());
    }

    #[test]
    fn test_python_relative_imports_are_normalized() {
        let source = "from .utils import helper\nimport os.path\n\ndef run():\n    helper()\n";
        let analysis = analyze("pkg/main.py", source).analysis;

        assert_eq!(analysis.language, "python");
        assert_eq!(analysis.symbols[0].name, "run");
        assert_eq!(analysis.symbols[0].line, 4);
        let modules: Vec<_> = analysis.imports.iter().map(|i| i.module_path.as_str()).collect();
        assert_eq!(modules, vec!["./utils", "os/path"]);
        assert_eq!(analysis.imports[0].specifier, ".utils");
        assert_eq!(analysis.calls[0].name, "helper");
    }

    #[test]
    fn test_broken_query_degrades_only_that_query() {
        let mut sources = Language::JavaScript.query_sources();
        sources.call = "(call_expression function: (no_such_node) @name)";
        let bundle = LanguageBundle::new(Language::JavaScript, sources);
        let source = SourceFile::new(
            Path::new("/repo"),
            Path::new("/repo/a.js"),
            "import x from './x';\nfunction f() { g(); }\n".to_string(),
        );

        let outcome = FileAnalyzer::default().analyze_with_bundle(source, &bundle);

        assert!(outcome.analysis.calls.is_empty());
        assert_eq!(outcome.analysis.symbols.len(), 1);
        assert_eq!(outcome.analysis.imports.len(), 1);
        assert_eq!(outcome.analysis.chunks.len(), 1);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].kind, DiagnosticKind::ParseFailure);
        assert_eq!(outcome.diagnostics[0].subject, "a.js");
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let source = "function a() { b(); }\nfunction b() {}\n";
        assert_eq!(analyze("a.js", source).analysis, analyze("a.js", source).analysis);
    }
}
