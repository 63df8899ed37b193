#![forbid(unsafe_code)]

//! Source repository indexing: AST-aligned chunks, a file-level import/call
//! graph, chunk embeddings and hybrid retrieval over all three.

pub mod chunking;
pub mod config;
pub mod context;
pub mod db;
pub mod extraction;
pub mod graph;
pub mod languages;
pub mod resolution;
pub mod retrieval;
pub mod types;
pub mod utils;
pub mod vectors;

pub use extraction::{FileAnalyzer, index_all, scan_directory};
pub use graph::{GraphBuilder, GraphBuild};
pub use retrieval::{HybridRetriever, Retrieval};
pub use vectors::{Embedder, VectorIndex, VectorStore};
