//! Vector index for semantic search.
//!
//! The index is derived data: every entry mirrors a record in the document
//! store under the same identifier and can be rebuilt from it. Search is an
//! exact cosine scan, which is plenty for tool catalogs and project knowledge.

use crate::core::db;
use crate::core::error::{Backend, TaskmeshError};
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use rusqlite::params;
use serde::Serialize;
use std::cmp::Ordering;

/// Namespace of a vector entry. One per discoverable kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorSpace {
    Tools,
    Knowledge,
}

impl VectorSpace {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorSpace::Tools => "tools",
            VectorSpace::Knowledge => "knowledge",
        }
    }
}

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub space: VectorSpace,
    pub id: String,
    pub collection: Option<String>,
    pub embedding: Vec<f32>,
    /// Recency key used to break score ties (newest first).
    pub rank_ts: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorHit {
    pub id: String,
    pub collection: Option<String>,
    pub score: f32,
    pub rank_ts: i64,
}

pub trait VectorStore: Send + Sync {
    /// Inserts or replaces the entry keyed by `(space, id)`.
    fn upsert(&self, record: &VectorRecord) -> Result<(), TaskmeshError>;

    /// Top `limit` entries by descending cosine similarity, ties by recency then id.
    fn search(
        &self,
        space: VectorSpace,
        query: &[f32],
        collection: Option<&str>,
        limit: usize,
    ) -> Result<Vec<VectorHit>, TaskmeshError>;

    /// Removes the entry keyed by `(space, id)`. Returns whether one existed.
    fn delete(&self, space: VectorSpace, id: &str) -> Result<bool, TaskmeshError>;

    /// Drops every entry in `space`, returning how many were removed.
    fn clear_space(&self, space: VectorSpace) -> Result<usize, TaskmeshError>;

    fn count(&self, space: VectorSpace) -> Result<usize, TaskmeshError>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

/// Orders hits best-first: score desc, rank_ts desc, id asc.
pub fn rank_hits(hits: &mut [VectorHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.rank_ts.cmp(&a.rank_ts))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn encode(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// SQLite-backed vector index living in `vectors.db`.
#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    store: Store,
}

impl SqliteVectorStore {
    pub fn new(store: &Store) -> Self {
        Self {
            store: store.clone(),
        }
    }

    pub fn initialize(&self) -> Result<(), TaskmeshError> {
        self.store.ensure_dirs()?;
        self.with_conn("vectors.init", |_| Ok(()))
    }

    fn with_conn<R, F>(&self, op: &str, f: F) -> Result<R, TaskmeshError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<R, TaskmeshError>,
    {
        self.store
            .broker()
            .with_conn(&self.store.vectors_db(), "taskmesh", None, op, |conn| {
                db::ensure_schema_version(
                    conn,
                    schemas::VECTORS_SCHEMA_VERSION,
                    &[schemas::VECTORS_DB_SCHEMA],
                )?;
                f(conn)
            })
            .map_err(|e| e.at_backend(Backend::VectorStore))
    }
}

impl VectorStore for SqliteVectorStore {
    fn upsert(&self, record: &VectorRecord) -> Result<(), TaskmeshError> {
        if record.embedding.is_empty() {
            return Err(TaskmeshError::ValidationError(format!(
                "refusing to index '{}' with an empty embedding",
                record.id
            )));
        }
        self.with_conn("vectors.upsert", |conn| {
            conn.execute(
                "INSERT INTO vectors(space, id, collection, dim, embedding, rank_ts, updated_at)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(space, id) DO UPDATE SET
                    collection = excluded.collection,
                    dim = excluded.dim,
                    embedding = excluded.embedding,
                    rank_ts = excluded.rank_ts,
                    updated_at = excluded.updated_at",
                params![
                    record.space.as_str(),
                    record.id,
                    record.collection,
                    record.embedding.len() as i64,
                    encode(&record.embedding),
                    record.rank_ts,
                    time::now_millis(),
                ],
            )?;
            Ok(())
        })
    }

    fn search(
        &self,
        space: VectorSpace,
        query: &[f32],
        collection: Option<&str>,
        limit: usize,
    ) -> Result<Vec<VectorHit>, TaskmeshError> {
        let mut hits = self.with_conn("vectors.search", |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, collection, dim, embedding, rank_ts FROM vectors
                 WHERE space = ?1 AND (?2 IS NULL OR collection = ?2)",
            )?;
            let mut rows = stmt.query(params![space.as_str(), collection])?;
            let mut hits = Vec::new();
            while let Some(row) = rows.next()? {
                let id: String = row.get(0)?;
                let dim: i64 = row.get(2)?;
                if dim as usize != query.len() {
                    return Err(TaskmeshError::ValidationError(format!(
                        "{} index entry '{}' has {} dimensions but the query has {}; \
                         the embedding model changed, run discovery_reindex",
                        space.as_str(),
                        id,
                        dim,
                        query.len()
                    )));
                }
                let blob: Vec<u8> = row.get(3)?;
                hits.push(VectorHit {
                    score: cosine_similarity(query, &decode(&blob)),
                    id,
                    collection: row.get(1)?,
                    rank_ts: row.get(4)?,
                });
            }
            Ok(hits)
        })?;
        rank_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    fn delete(&self, space: VectorSpace, id: &str) -> Result<bool, TaskmeshError> {
        self.with_conn("vectors.delete", |conn| {
            let n = conn.execute(
                "DELETE FROM vectors WHERE space = ?1 AND id = ?2",
                params![space.as_str(), id],
            )?;
            Ok(n > 0)
        })
    }

    fn clear_space(&self, space: VectorSpace) -> Result<usize, TaskmeshError> {
        self.with_conn("vectors.clear_space", |conn| {
            Ok(conn.execute("DELETE FROM vectors WHERE space = ?1", [space.as_str()])?)
        })
    }

    fn count(&self, space: VectorSpace) -> Result<usize, TaskmeshError> {
        self.with_conn("vectors.count", |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM vectors WHERE space = ?1",
                [space.as_str()],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }
}
