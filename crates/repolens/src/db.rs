#![forbid(unsafe_code)]

//! On-disk project index: the graph document as JSON and the embedding table
//! in SQLite, both under `.repolens/`.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};

use crate::config::data_dir;
use crate::types::{Diagnostic, DiagnosticKind, EmbeddingRecord, ProjectGraph};
use crate::vectors::VectorStore;

pub const DATABASE_FILENAME: &str = "index.db";
pub const GRAPH_FILENAME: &str = "graph.json";
pub const SCHEMA_SQL: &str = include_str!("db/schema.sql");

fn io_other(err: impl std::error::Error + Send + Sync + 'static) -> std::io::Error {
    std::io::Error::other(err)
}

pub fn database_path(project_root: &Path) -> PathBuf {
    data_dir(project_root).join(DATABASE_FILENAME)
}

pub fn graph_path(project_root: &Path) -> PathBuf {
    data_dir(project_root).join(GRAPH_FILENAME)
}

pub fn initialize_database(project_root: &Path) -> std::io::Result<PathBuf> {
    let db_path = database_path(project_root);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(&db_path).map_err(io_other)?;
    conn.execute_batch("PRAGMA journal_mode = WAL;").map_err(io_other)?;
    conn.execute_batch(SCHEMA_SQL).map_err(io_other)?;
    Ok(db_path)
}

/// Opens the index database, creating it and its schema on first use.
pub fn open_database(project_root: &Path) -> std::io::Result<Connection> {
    let db_path = initialize_database(project_root)?;
    Connection::open(&db_path).map_err(io_other)
}

/// Replaces the whole vector table with `store` in one transaction.
pub fn replace_vectors(conn: &mut Connection, store: &VectorStore, model: &str) -> std::io::Result<usize> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));

    let tx = conn.transaction().map_err(io_other)?;
    tx.execute("DELETE FROM vectors", []).map_err(io_other)?;
    {
        let mut stmt = tx
            .prepare(
                "INSERT INTO vectors (file_id, chunk_index, text, language, embedding, model, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .map_err(io_other)?;
        for record in store.records() {
            let bytes: Vec<u8> = record.vector.iter().flat_map(|f| f.to_le_bytes()).collect();
            let chunk_index = i64::try_from(record.chunk_index).map_err(io_other)?;
            stmt.execute(params![
                record.file_id,
                chunk_index,
                record.text,
                record.language,
                bytes,
                model,
                now
            ])
            .map_err(io_other)?;
        }
    }
    tx.commit().map_err(io_other)?;
    Ok(store.len())
}

/// Loads the persisted store, records in the order they were written.
pub fn load_vectors(conn: &Connection) -> std::io::Result<VectorStore> {
    let mut stmt = conn
        .prepare(
            "SELECT file_id, chunk_index, text, language, embedding FROM vectors ORDER BY rowid",
        )
        .map_err(io_other)?;
    let rows = stmt
        .query_map([], |row| {
            let chunk_index: i64 = row.get(1)?;
            let bytes: Vec<u8> = row.get(4)?;
            Ok(EmbeddingRecord {
                file_id: row.get(0)?,
                chunk_index: usize::try_from(chunk_index).unwrap_or_default(),
                text: row.get(2)?,
                language: row.get(3)?,
                vector: decode_vector(&bytes),
            })
        })
        .map_err(io_other)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row.map_err(io_other)?);
    }
    Ok(VectorStore::from_records(records))
}

/// Embedding model the persisted vectors were built with, `None` if the table is empty.
pub fn stored_model(conn: &Connection) -> std::io::Result<Option<String>> {
    conn.query_row("SELECT model FROM vectors ORDER BY rowid LIMIT 1", [], |row| row.get(0))
        .optional()
        .map_err(io_other)
}

/// Loads the persisted store when it was built with `model`. Vectors from any
/// other model are left on disk and an empty store is returned with a
/// `RetrievalInputError` naming both models.
pub fn load_vectors_for_model(
    conn: &Connection,
    model: &str,
) -> std::io::Result<(VectorStore, Option<Diagnostic>)> {
    match stored_model(conn)? {
        Some(stored) if stored != model => {
            tracing::warn!(%stored, configured = model, "stored vectors use a different model");
            let diagnostic = Diagnostic::new(
                DiagnosticKind::RetrievalInputError,
                "vector store",
                format!("vectors were embedded with `{stored}` but `{model}` is configured, run `repolens index`"),
            );
            Ok((VectorStore::default(), Some(diagnostic)))
        }
        _ => Ok((load_vectors(conn)?, None)),
    }
}

/// Distinct file ids that have at least one stored vector.
pub fn vector_file_ids(conn: &Connection) -> std::io::Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT DISTINCT file_id FROM vectors ORDER BY file_id")
        .map_err(io_other)?;
    let rows = stmt.query_map([], |row| row.get(0)).map_err(io_other)?;
    rows.collect::<Result<Vec<String>, _>>().map_err(io_other)
}

pub fn vector_count(conn: &Connection) -> std::io::Result<usize> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))
        .map_err(io_other)?;
    Ok(usize::try_from(count).unwrap_or_default())
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

pub fn save_graph(project_root: &Path, graph: &ProjectGraph) -> std::io::Result<()> {
    let path = graph_path(project_root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string(graph).map_err(io_other)?;
    fs::write(path, raw)
}

/// The last saved graph, or `None` if the project was never indexed.
pub fn load_graph(project_root: &Path) -> std::io::Result<Option<ProjectGraph>> {
    let path = graph_path(project_root);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path)?;
    let graph = serde_json::from_str(&raw)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    Ok(Some(graph))
}
