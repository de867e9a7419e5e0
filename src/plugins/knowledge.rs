//! Knowledge entries: free text in named collections, retrievable by similarity.
//!
//! Entries are immutable once stored. The document row is written before the
//! vector; `vector_indexed` flips to 1 only after the vector lands, so entries
//! left behind by a partial write are visible in `knowledge_list_collections`.

use crate::core::context::Context;
use crate::core::error::TaskmeshError;
use crate::core::rpc::{self, BuiltinCapability, Invocation};
use crate::core::store::Store;
use crate::core::time;
use crate::core::validate;
use crate::core::vector::{VectorRecord, VectorSpace};
use crate::plugins::discovery::{self, with_documents};
use rayon::prelude::*;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntry {
    pub id: String,
    pub collection: String,
    pub content: String,
    pub metadata: JsonValue,
    pub created_at: i64,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeMatch {
    #[serde(flatten)]
    pub entry: KnowledgeEntry,
    pub score: f32,
}

/// Result of a successful store.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntry {
    pub id: String,
    /// Both writes landed but `vector_indexed` is still 0, so the entry is
    /// counted as unindexed until the next reindex.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub flag_stale: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CollectionCount {
    pub collection: String,
    pub count: i64,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    pub collection: String,
    pub entries: i64,
    /// Entries stored without a vector (partial writes awaiting reindex).
    pub unindexed: i64,
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<KnowledgeEntry> {
    let metadata: String = row.get(3)?;
    let metadata = serde_json::from_str(&metadata).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(KnowledgeEntry {
        id: row.get(0)?,
        collection: row.get(1)?,
        content: row.get(2)?,
        metadata,
        created_at: row.get(4)?,
    })
}

const ENTRY_COLS: &str = "id, collection, content, metadata, created_at";

fn mark_indexed(conn: &Connection, id: &str) -> Result<(), TaskmeshError> {
    conn.execute(
        "UPDATE knowledge_entries SET vector_indexed = 1 WHERE id = ?1",
        [id],
    )?;
    Ok(())
}

fn bump_usage(conn: &Connection, collection: &str, now: i64) -> Result<(), TaskmeshError> {
    conn.execute(
        "INSERT INTO collection_usage(collection, count, last_used_at) VALUES(?1, 1, ?2)
         ON CONFLICT(collection) DO UPDATE SET
            count = count + 1,
            last_used_at = excluded.last_used_at",
        params![collection, now],
    )?;
    Ok(())
}

/// Stores an entry in both backends.
///
/// Nothing is written if validation, embedding or cancellation stops the call
/// before the document write. Once the document exists, any failure (including
/// cancellation) comes back as `PartialWrite` naming the entry. If only the
/// final `vector_indexed` update fails the entry is fully searchable, so the
/// call succeeds with `flag_stale` set.
pub fn store_knowledge(
    ctx: &Context,
    collection: &str,
    content: &str,
    metadata: Option<JsonValue>,
) -> Result<StoredEntry, TaskmeshError> {
    let collection = validate::collection(collection)?;
    let content = validate::required("content", content)?;
    let metadata = match metadata {
        None | Some(JsonValue::Null) => json!({}),
        Some(m @ JsonValue::Object(_)) => m,
        Some(_) => {
            return Err(TaskmeshError::ValidationError(
                "metadata must be a JSON object".to_string(),
            ));
        }
    };

    let embedding = ctx.embed("knowledge.embed", content)?;
    ctx.cancel.check("knowledge document write")?;

    let id = time::new_id("K");
    let created_at = time::now_millis();
    let metadata_json = serde_json::to_string(&metadata)?;
    with_documents(&ctx.store, "knowledge.store", Some(&id), |conn| {
        conn.execute(
            "INSERT INTO knowledge_entries(id, collection, content, metadata, created_at, vector_indexed)
             VALUES(?1, ?2, ?3, ?4, ?5, 0)",
            params![id, collection, content, metadata_json, created_at],
        )?;
        Ok(())
    })?;

    ctx.cancel
        .check("knowledge vector write")
        .and_then(|_| {
            ctx.vectors.upsert(&VectorRecord {
                space: VectorSpace::Knowledge,
                id: id.clone(),
                collection: Some(collection.clone()),
                embedding,
                rank_ts: created_at,
            })
        })
        .map_err(|e| discovery::partial_write(&id, e, ""))?;

    let flag_stale = match with_documents(&ctx.store, "knowledge.mark_indexed", Some(&id), |conn| {
        mark_indexed(conn, &id)
    }) {
        Ok(()) => false,
        Err(e) => {
            eprintln!("warn: knowledge entry {} indexed but flag not updated: {}", id, e);
            true
        }
    };
    Ok(StoredEntry { id, flag_stale })
}

fn collection_size(store: &Store, collection: &str) -> Result<i64, TaskmeshError> {
    with_documents(store, "knowledge.collection.size", None, |conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM knowledge_entries WHERE collection = ?1",
            [collection],
            |row| row.get(0),
        )?)
    })
}

/// Similarity search over one collection, or all of them when `collection` is blank.
///
/// A successful query counts as one use of the named collection; an unscoped
/// query counts once for each distinct collection among its results.
pub fn query_knowledge(
    ctx: &Context,
    collection: Option<&str>,
    query: &str,
    limit: Option<i64>,
) -> Result<Vec<KnowledgeMatch>, TaskmeshError> {
    let collection = match collection.map(str::trim).filter(|c| !c.is_empty()) {
        Some(c) => Some(validate::collection(c)?),
        None => None,
    };
    let query = validate::required("query", query)?;
    let cfg = &ctx.config.discovery;
    let limit = validate::limit(limit, cfg.default_limit, cfg.max_limit);

    if let Some(c) = &collection
        && collection_size(&ctx.store, c)? == 0
    {
        return Err(TaskmeshError::NotFound(format!("collection '{}'", c)));
    }

    let q = ctx.embed("knowledge.embed_query", query)?;
    let select = format!("SELECT {} FROM knowledge_entries WHERE id = ?1", ENTRY_COLS);
    let matches = discovery::search_documents(
        ctx,
        "knowledge.find",
        VectorSpace::Knowledge,
        &q,
        collection.as_deref(),
        limit,
        |conn, hit| {
            let entry = conn
                .prepare_cached(&select)?
                .query_row([&hit.id], entry_from_row)
                .optional()?;
            Ok(entry.map(|entry| KnowledgeMatch {
                entry,
                score: hit.score,
            }))
        },
    )?;

    with_documents(&ctx.store, "knowledge.usage", None, |conn| {
        let now = time::now_millis();
        match &collection {
            Some(c) => bump_usage(conn, c, now)?,
            None => {
                let mut seen: Vec<&str> = Vec::new();
                for m in &matches {
                    if !seen.contains(&m.entry.collection.as_str()) {
                        seen.push(&m.entry.collection);
                        bump_usage(conn, &m.entry.collection, now)?;
                    }
                }
            }
        }
        Ok(matches)
    })
}

/// Collections by query count, most used first (ties by name).
pub fn popular_collections(
    store: &Store,
    limit: Option<i64>,
) -> Result<Vec<CollectionCount>, TaskmeshError> {
    let limit = match limit {
        None => -1,
        Some(n) if n > 0 => n,
        Some(n) => {
            return Err(TaskmeshError::ValidationError(format!(
                "limit must be positive, got {}",
                n
            )));
        }
    };
    with_documents(store, "knowledge.popular", None, |conn| {
        let mut stmt = conn.prepare(
            "SELECT collection, count FROM collection_usage
             ORDER BY count DESC, collection ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit], |row| {
                Ok(CollectionCount {
                    collection: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn list_collections(store: &Store) -> Result<Vec<CollectionStats>, TaskmeshError> {
    with_documents(store, "knowledge.collections", None, |conn| {
        let mut stmt = conn.prepare(
            "SELECT collection, COUNT(*), SUM(CASE WHEN vector_indexed = 0 THEN 1 ELSE 0 END)
             FROM knowledge_entries GROUP BY collection ORDER BY collection",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CollectionStats {
                    collection: row.get(0)?,
                    entries: row.get(1)?,
                    unindexed: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn get_entry(store: &Store, id: &str) -> Result<KnowledgeEntry, TaskmeshError> {
    let id = validate::required("id", id)?;
    with_documents(store, "knowledge.get", None, |conn| {
        conn.query_row(
            &format!("SELECT {} FROM knowledge_entries WHERE id = ?1", ENTRY_COLS),
            [id],
            entry_from_row,
        )
        .optional()?
        .ok_or_else(|| TaskmeshError::NotFound(format!("knowledge entry '{}'", id)))
    })
}

/// Rebuilds the `knowledge` vector space from stored entries and marks them all indexed.
pub fn reindex_knowledge(ctx: &Context) -> Result<usize, TaskmeshError> {
    let entries = with_documents(&ctx.store, "knowledge.reindex.load", None, |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM knowledge_entries ORDER BY created_at, id",
            ENTRY_COLS
        ))?;
        let entries = stmt
            .query_map([], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    })?;

    let embeddings: Vec<Vec<f32>> = entries
        .par_iter()
        .map(|e| ctx.embed("knowledge.embed", &e.content))
        .collect::<Result<_, _>>()?;

    ctx.cancel.check("knowledge vector rebuild")?;
    ctx.vectors.clear_space(VectorSpace::Knowledge)?;
    for (entry, embedding) in entries.iter().zip(embeddings) {
        ctx.vectors.upsert(&VectorRecord {
            space: VectorSpace::Knowledge,
            id: entry.id.clone(),
            collection: Some(entry.collection.clone()),
            embedding,
            rank_ts: entry.created_at,
        })?;
    }

    with_documents(&ctx.store, "knowledge.reindex.mark", None, |conn| {
        conn.execute("UPDATE knowledge_entries SET vector_indexed = 1", [])?;
        Ok(())
    })?;
    Ok(entries.len())
}

// --- Call surface ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreArgs {
    collection: String,
    content: String,
    #[serde(default)]
    metadata: Option<JsonValue>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FindArgs {
    #[serde(default)]
    collection: Option<String>,
    query: String,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct LimitArgs {
    #[serde(default)]
    limit: Option<i64>,
}

fn call_store(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: StoreArgs = rpc::parse_params(params)?;
    let stored = store_knowledge(call.ctx, &args.collection, &args.content, args.metadata)?;
    Ok(serde_json::to_value(stored)?)
}

fn call_find(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: FindArgs = rpc::parse_params(params)?;
    let matches = query_knowledge(call.ctx, args.collection.as_deref(), &args.query, args.limit)?;
    Ok(serde_json::to_value(matches)?)
}

fn call_popular(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: LimitArgs = rpc::parse_params(params)?;
    Ok(serde_json::to_value(popular_collections(&call.ctx.store, args.limit)?)?)
}

fn call_list_collections(call: &Invocation<'_>, _params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    Ok(serde_json::to_value(list_collections(&call.ctx.store)?)?)
}

pub fn capabilities() -> Vec<BuiltinCapability> {
    let s = json!({ "type": "string" });
    vec![
        BuiltinCapability::new(
            "knowledge_store",
            "Store a piece of knowledge in a collection for later semantic retrieval",
            rpc::object_schema(
                json!({ "collection": s, "content": s, "metadata": { "type": "object" } }),
                &["collection", "content"],
            ),
            call_store,
        ),
        BuiltinCapability::new(
            "knowledge_find",
            "Search stored knowledge by meaning; omit collection to search all of them",
            rpc::object_schema(
                json!({
                    "collection": s,
                    "query": s,
                    "limit": { "type": "integer", "minimum": 1 }
                }),
                &["query"],
            ),
            call_find,
        ),
        BuiltinCapability::new(
            "coordinator_get_popular_collections",
            "List knowledge collections by how often they are queried",
            rpc::object_schema(json!({ "limit": { "type": "integer", "minimum": 1 } }), &[]),
            call_popular,
        ),
        BuiltinCapability::new(
            "knowledge_list_collections",
            "List knowledge collections with entry counts",
            rpc::object_schema(json!({}), &[]),
            call_list_collections,
        ),
    ]
}
