//! Integration tests for graph construction

use std::collections::HashSet;
use std::path::Path;

use repolens::extraction;
use repolens::graph::GraphBuilder;
use repolens::types::{DiagnosticKind, EdgeKind, EdgeMetadata, NodeKind, ProjectGraph};
use repolens::{GraphBuild, config};

fn build_fixture(name: &str) -> GraphBuild {
    let root = Path::new("tests/fixtures").join(name);
    let root = root.canonicalize().unwrap();
    let cfg = config::create_default_config(&root);
    let files = extraction::scan_directory(&root, &cfg).unwrap();
    let project = extraction::analyze_files(&root, &files, &cfg, None);
    GraphBuilder::default().build(&root, &project.analyses, &files)
}

fn assert_no_dangling(graph: &ProjectGraph) {
    let ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids.len(), graph.nodes.len(), "node ids must be unique");
    for edge in &graph.edges {
        assert!(ids.contains(edge.source.as_str()), "dangling source {}", edge.source);
        assert!(ids.contains(edge.target.as_str()), "dangling target {}", edge.target);
        if edge.kind == EdgeKind::Call {
            assert_ne!(edge.source, edge.target, "self call edge {}", edge.id);
        }
    }
    let edge_ids: HashSet<&str> = graph.edges.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(edge_ids.len(), graph.edges.len(), "edge ids must be unique");
}

#[test]
fn test_import_and_call_between_two_files() {
    let built = build_fixture("js-app");
    let graph = &built.graph;
    assert_no_dangling(graph);

    assert!(graph.node("src/a.js").is_some());
    assert!(graph.node("src/b.js").is_some());

    let imports: Vec<_> = graph.outgoing("src/b.js", EdgeKind::Import).collect();
    assert_eq!(imports.len(), 1);
    assert_eq!(imports[0].target, "src/a.js");
    assert_eq!(
        imports[0].metadata,
        EdgeMetadata::Import {
            specifier: "./a.js".to_string()
        }
    );

    let calls: Vec<_> = graph.outgoing("src/b.js", EdgeKind::Call).collect();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].target, "src/a.js");
    assert_eq!(
        calls[0].metadata,
        EdgeMetadata::Call {
            name: "add".to_string(),
            line: 5,
            declaration_line: 2,
            source_anchor: "call-add-line-5".to_string(),
            declaration_anchor: "add-in".to_string(),
        }
    );
}

#[test]
fn test_directory_index_and_unresolved_package() {
    let built = build_fixture("js-app");
    let graph = &built.graph;

    let targets: Vec<_> = graph
        .outgoing("src/app.js", EdgeKind::Import)
        .map(|e| e.target.as_str())
        .collect();
    assert_eq!(targets, vec!["src/components/index.js", "src/b.js"]);

    let unresolved: Vec<_> = built
        .diagnostics
        .iter()
        .filter(|d| d.kind == DiagnosticKind::ResolutionFailure)
        .map(|d| d.subject.as_str())
        .collect();
    assert_eq!(unresolved, vec!["chalk"]);
}

#[test]
fn test_directory_nodes_and_unknown_files() {
    let built = build_fixture("js-app");
    let graph = &built.graph;

    let directories: Vec<_> = graph
        .nodes
        .iter()
        .take_while(|n| n.kind == NodeKind::Directory)
        .map(|n| n.id.as_str())
        .collect();
    assert_eq!(directories, vec!["src", "src/components"]);
    assert_eq!(graph.file_count(), 5);

    let readme = graph.node("README.md").unwrap();
    assert_eq!(readme.parent, None);
    assert_eq!(readme.language(), "md");
    assert_eq!(readme.chunks().len(), 1);

    let index = graph.node("src/components/index.js").unwrap();
    assert_eq!(index.parent.as_deref(), Some("src/components"));
    assert_eq!(index.label, "index.js");
}

#[test]
fn test_rust_modules_and_call_fan_out() {
    let built = build_fixture("rust-crate");
    let graph = &built.graph;
    assert_no_dangling(graph);

    let mut imports: Vec<_> = graph
        .outgoing("src/lib.rs", EdgeKind::Import)
        .map(|e| e.target.as_str())
        .collect();
    imports.sort_unstable();
    assert_eq!(imports, vec!["src/math.rs", "src/user.rs"]);

    // `math::add` and `self.calculator.add` both reach the free fn and the method
    let add_lines: HashSet<usize> = graph
        .outgoing("src/lib.rs", EdgeKind::Call)
        .filter_map(|e| match &e.metadata {
            EdgeMetadata::Call {
                name,
                declaration_line,
                ..
            } if name == "add" => Some(*declaration_line),
            _ => None,
        })
        .collect();
    assert!(add_lines.contains(&4));
    assert!(add_lines.len() >= 2);

    let new_targets: HashSet<&str> = graph
        .outgoing("src/lib.rs", EdgeKind::Call)
        .filter(|e| matches!(&e.metadata, EdgeMetadata::Call { name, .. } if name == "new"))
        .map(|e| e.target.as_str())
        .collect();
    assert!(new_targets.contains("src/math.rs"));
    assert!(new_targets.contains("src/user.rs"));
}

#[test]
fn test_build_is_deterministic() {
    let first = build_fixture("rust-crate");
    let second = build_fixture("rust-crate");
    assert_eq!(first.graph, second.graph);
}

#[test]
fn test_graph_survives_json() {
    let built = build_fixture("js-app");
    let raw = serde_json::to_string(&built.graph).unwrap();
    let back: ProjectGraph = serde_json::from_str(&raw).unwrap();
    assert_eq!(back, built.graph);
}
