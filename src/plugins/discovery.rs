//! Tool discovery: index registered tools by meaning and rank them for a query.
//!
//! `discovery.db` is the document store and source of truth; the `tools` space
//! of the vector index is derived from it. Writes go document first, vector
//! second. A vector failure after a successful document write is reported as
//! `PartialWrite` and repaired with `discovery_reindex`.

use crate::core::context::Context;
use crate::core::db;
use crate::core::error::{Backend, TaskmeshError};
use crate::core::registry::ToolDefinition;
use crate::core::rpc::{self, BuiltinCapability, Invocation};
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::core::validate;
use crate::core::vector::{VectorHit, VectorRecord, VectorSpace};
use crate::plugins::knowledge;
use rayon::prelude::*;
use rusqlite::{Connection, OptionalExtension, Row, params};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

const ACTOR: &str = "taskmesh";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolMatch {
    pub name: String,
    pub description: String,
    pub score: f32,
}

#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    pub indexed: usize,
    pub names: Vec<String>,
    /// Tools dropped because they are no longer in the registry.
    pub removed: Vec<String>,
}

fn ensure_schema(conn: &Connection) -> Result<(), TaskmeshError> {
    db::ensure_schema_version(
        conn,
        schemas::DISCOVERY_SCHEMA_VERSION,
        &[
            schemas::DISCOVERY_DB_SCHEMA_TOOLS,
            schemas::DISCOVERY_DB_SCHEMA_KNOWLEDGE,
            schemas::DISCOVERY_DB_SCHEMA_KNOWLEDGE_INDEX,
            schemas::DISCOVERY_DB_SCHEMA_USAGE,
        ],
    )
}

/// Runs `f` against the discovery document store.
pub(crate) fn with_documents<R, F>(
    store: &Store,
    op: &str,
    intent_ref: Option<&str>,
    f: F,
) -> Result<R, TaskmeshError>
where
    F: FnOnce(&Connection) -> Result<R, TaskmeshError>,
{
    store.ensure_dirs()?;
    store
        .broker()
        .with_conn(&store.discovery_db(), ACTOR, intent_ref, op, |conn| {
            ensure_schema(conn)?;
            f(conn)
        })
        .map_err(|e| e.at_backend(Backend::DocumentStore))
}

pub fn initialize_discovery_db(store: &Store) -> Result<(), TaskmeshError> {
    with_documents(store, "discovery.init", None, |_| Ok(()))
}

/// The document write for `id` landed but its vector did not.
pub(crate) fn partial_write(id: &str, cause: TaskmeshError, context: &str) -> TaskmeshError {
    TaskmeshError::PartialWrite {
        id: id.to_string(),
        stored_in: Backend::DocumentStore,
        failed_in: Backend::VectorStore,
        message: format!("{}{}", cause, context),
    }
}

/// Text embedded for a tool: `"name: description"`, plus parameter names when enabled.
pub fn canonical_text(def: &ToolDefinition, include_schema_fields: bool) -> String {
    let mut text = format!("{}: {}", def.name, def.description);
    let fields = def.schema_fields();
    if include_schema_fields && !fields.is_empty() {
        text.push_str(" Parameters: ");
        text.push_str(&fields.join(", "));
    }
    text
}

fn embed_tools(ctx: &Context, defs: &[ToolDefinition]) -> Result<Vec<Vec<f32>>, TaskmeshError> {
    let include = ctx.config.discovery.include_schema_fields;
    defs.par_iter()
        .map(|def| ctx.embed("discovery.embed_tool", &canonical_text(def, include)))
        .collect()
}

fn tool_record(def: &ToolDefinition, embedding: Vec<f32>) -> VectorRecord {
    VectorRecord {
        space: VectorSpace::Tools,
        id: def.name.clone(),
        collection: None,
        embedding,
        rank_ts: def.registered_at,
    }
}

/// Drops every indexed tool whose name is not in `keep`, document first.
fn prune_tools(ctx: &Context, keep: &[ToolDefinition]) -> Result<Vec<String>, TaskmeshError> {
    ctx.cancel.check("tool document prune")?;
    let keep: FxHashSet<&str> = keep.iter().map(|d| d.name.as_str()).collect();
    let removed = with_documents(&ctx.store, "discovery.tool.prune", None, |conn| {
        db::with_immediate_tx(conn, |tx| {
            let mut stmt = tx.prepare("SELECT name FROM tool_definitions ORDER BY name")?;
            let stale = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .filter(|name| !keep.contains(name.as_str()))
                .collect::<Vec<_>>();
            for name in &stale {
                tx.execute("DELETE FROM tool_definitions WHERE name = ?1", [name])?;
            }
            Ok(stale)
        })
    })?;

    for name in &removed {
        ctx.vectors
            .delete(VectorSpace::Tools, name)
            .map_err(|e| partial_write(name, e, " (document removed, vector left behind)"))?;
    }
    Ok(removed)
}

/// Makes the tool index mirror `defs`, normally a registry snapshot.
///
/// All embeddings are computed up front, so a provider failure writes nothing.
/// Tools indexed earlier but missing from `defs` are removed from both stores.
/// Re-running with the same definitions is a no-op apart from timestamps.
pub fn index_tools(ctx: &Context, defs: &[ToolDefinition]) -> Result<IndexReport, TaskmeshError> {
    let embeddings = embed_tools(ctx, defs)?;
    let mut report = IndexReport {
        removed: prune_tools(ctx, defs)?,
        ..IndexReport::default()
    };

    for (def, embedding) in defs.iter().zip(embeddings) {
        ctx.cancel.check("tool document write")?;
        let schema_json = serde_json::to_string(&def.input_schema)?;
        with_documents(&ctx.store, "discovery.tool.upsert", Some(&def.name), |conn| {
            conn.execute(
                "INSERT INTO tool_definitions(name, description, input_schema, registered_at, indexed_at)
                 VALUES(?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                    description = excluded.description,
                    input_schema = excluded.input_schema,
                    registered_at = excluded.registered_at,
                    indexed_at = excluded.indexed_at",
                params![
                    def.name,
                    def.description,
                    schema_json,
                    def.registered_at,
                    time::now_millis()
                ],
            )?;
            Ok(())
        })?;

        ctx.cancel
            .check("tool vector write")
            .and_then(|_| ctx.vectors.upsert(&tool_record(def, embedding)))
            .map_err(|e| {
                partial_write(
                    &def.name,
                    e,
                    &format!(" ({} of {} tools fully indexed before it)", report.indexed, defs.len()),
                )
            })?;

        report.indexed += 1;
        report.names.push(def.name.clone());
    }
    Ok(report)
}

fn tool_from_row(row: &Row<'_>) -> rusqlite::Result<ToolDefinition> {
    let schema: String = row.get(2)?;
    let input_schema = serde_json::from_str(&schema).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ToolDefinition {
        name: row.get(0)?,
        description: row.get(1)?,
        input_schema,
        registered_at: row.get(3)?,
    })
}

/// Every indexed tool document, oldest registration first.
pub fn list_tool_definitions(store: &Store) -> Result<Vec<ToolDefinition>, TaskmeshError> {
    with_documents(store, "discovery.tool.list", None, |conn| {
        let mut stmt = conn.prepare(
            "SELECT name, description, input_schema, registered_at FROM tool_definitions
             ORDER BY registered_at, name",
        )?;
        let defs = stmt
            .query_map([], tool_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(defs)
    })
}

pub fn get_tool_schema(store: &Store, tool_name: &str) -> Result<ToolDefinition, TaskmeshError> {
    let tool_name = validate::tool_name(tool_name)?;
    with_documents(store, "discovery.tool.get", None, |conn| {
        conn.query_row(
            "SELECT name, description, input_schema, registered_at FROM tool_definitions
             WHERE name = ?1",
            [&tool_name],
            tool_from_row,
        )
        .optional()?
        .ok_or_else(|| TaskmeshError::NotFound(format!("tool '{}' is not indexed", tool_name)))
    })
}

/// Ranks indexed tools against free text. Ties on score go to the most
/// recently (re)registered tool.
pub fn discover_tools(
    ctx: &Context,
    query: &str,
    limit: Option<i64>,
) -> Result<Vec<ToolMatch>, TaskmeshError> {
    let query = validate::required("query", query)?;
    let cfg = &ctx.config.discovery;
    let limit = validate::limit(limit, cfg.default_limit, cfg.max_limit);

    let q = ctx.embed("discovery.embed_query", query)?;
    search_documents(
        ctx,
        "discovery.tool.resolve",
        VectorSpace::Tools,
        &q,
        None,
        limit,
        |conn, hit| {
            let description: Option<String> = conn
                .prepare_cached("SELECT description FROM tool_definitions WHERE name = ?1")?
                .query_row([&hit.id], |row| row.get(0))
                .optional()?;
            Ok(description.map(|description| ToolMatch {
                name: hit.id.clone(),
                description,
                score: hit.score,
            }))
        },
    )
}

/// Vector search resolved against the document store, up to `limit` results.
///
/// A vector without its document is stale and skipped; the search widens
/// until `limit` documents resolve or the space is exhausted.
pub(crate) fn search_documents<T, F>(
    ctx: &Context,
    op: &str,
    space: VectorSpace,
    query: &[f32],
    collection: Option<&str>,
    limit: usize,
    resolve: F,
) -> Result<Vec<T>, TaskmeshError>
where
    F: Fn(&Connection, &VectorHit) -> Result<Option<T>, TaskmeshError>,
{
    let mut fetch = limit;
    loop {
        ctx.cancel.check("vector search")?;
        let hits = ctx.vectors.search(space, query, collection, fetch)?;
        let exhausted = hits.len() < fetch;
        let found = with_documents(&ctx.store, op, None, |conn| {
            let mut found = Vec::with_capacity(limit);
            for hit in &hits {
                if found.len() == limit {
                    break;
                }
                if let Some(item) = resolve(conn, hit)? {
                    found.push(item);
                }
            }
            Ok(found)
        })?;
        if found.len() >= limit || exhausted {
            return Ok(found);
        }
        fetch = fetch.saturating_mul(2);
    }
}

/// Rebuilds the `tools` vector space from the document store.
pub fn reindex_tools(ctx: &Context) -> Result<usize, TaskmeshError> {
    let defs = list_tool_definitions(&ctx.store)?;
    let embeddings = embed_tools(ctx, &defs)?;
    ctx.cancel.check("tool vector rebuild")?;
    ctx.vectors.clear_space(VectorSpace::Tools)?;
    for (def, embedding) in defs.iter().zip(embeddings) {
        ctx.vectors.upsert(&tool_record(def, embedding))?;
    }
    Ok(defs.len())
}

// --- Call surface ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscoverArgs {
    query: String,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolSchemaArgs {
    tool_name: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "lowercase")]
enum ReindexTarget {
    Tools,
    Knowledge,
    #[default]
    All,
}

#[derive(Deserialize)]
struct ReindexArgs {
    #[serde(default)]
    target: ReindexTarget,
}

fn call_discover_tools(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: DiscoverArgs = rpc::parse_params(params)?;
    Ok(serde_json::to_value(discover_tools(call.ctx, &args.query, args.limit)?)?)
}

fn call_get_tool_schema(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: ToolSchemaArgs = rpc::parse_params(params)?;
    Ok(serde_json::to_value(get_tool_schema(&call.ctx.store, &args.tool_name)?)?)
}

fn call_index_tools(call: &Invocation<'_>, _params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let snapshot = call.registry.snapshot();
    Ok(serde_json::to_value(index_tools(call.ctx, &snapshot)?)?)
}

fn call_reindex(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: ReindexArgs = rpc::parse_params(params)?;
    let (tools, entries) = match args.target {
        ReindexTarget::Tools => (Some(reindex_tools(call.ctx)?), None),
        ReindexTarget::Knowledge => (None, Some(knowledge::reindex_knowledge(call.ctx)?)),
        ReindexTarget::All => (
            Some(reindex_tools(call.ctx)?),
            Some(knowledge::reindex_knowledge(call.ctx)?),
        ),
    };
    Ok(json!({ "ok": true, "tools": tools, "knowledge": entries }))
}

pub fn capabilities() -> Vec<BuiltinCapability> {
    let s = json!({ "type": "string" });
    vec![
        BuiltinCapability::new(
            "discover_tools",
            "Find tools relevant to a natural-language description of what you want to do",
            rpc::object_schema(
                json!({ "query": s, "limit": { "type": "integer", "minimum": 1 } }),
                &["query"],
            ),
            call_discover_tools,
        ),
        BuiltinCapability::new(
            "get_tool_schema",
            "Get the full definition and input schema of an indexed tool by exact name",
            rpc::object_schema(json!({ "toolName": s }), &["toolName"]),
            call_get_tool_schema,
        ),
        BuiltinCapability::new(
            "discovery_index_tools",
            "Index every registered tool for semantic discovery",
            rpc::object_schema(json!({}), &[]),
            call_index_tools,
        ),
        BuiltinCapability::new(
            "discovery_reindex",
            "Rebuild vector entries from stored documents after a partial write or model change",
            rpc::object_schema(
                json!({ "target": { "type": "string", "enum": ["tools", "knowledge", "all"] } }),
                &[],
            ),
            call_reindex,
        ),
    ]
}
