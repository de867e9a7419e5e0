//! Database schema definitions.
//!
//! taskmesh keeps three SQLite databases plus an audit log under the data dir:
//! 1. tasks.db: human tasks, agent tasks and their ordered todo items.
//! 2. discovery.db: tool definitions, knowledge entries and collection usage
//!    (the document store, source of truth for discovery).
//! 3. vectors.db: embeddings derived from discovery.db, rebuildable at any time.

pub const AUDIT_LOG_NAME: &str = "broker.events.jsonl";

// --- 1. Task board ---
pub const TASKS_DB_NAME: &str = "tasks.db";
pub const TASKS_SCHEMA_VERSION: &str = "1";

pub const TASKS_DB_SCHEMA_HUMAN_TASKS: &str = "
    CREATE TABLE IF NOT EXISTS human_tasks (
        id TEXT PRIMARY KEY,
        prompt TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
";

pub const TASKS_DB_SCHEMA_AGENT_TASKS: &str = "
    CREATE TABLE IF NOT EXISTS agent_tasks (
        id TEXT PRIMARY KEY,
        human_task_id TEXT NOT NULL,
        agent_role TEXT NOT NULL,
        context_summary TEXT NOT NULL DEFAULT '',
        files_modified TEXT NOT NULL DEFAULT '[]', -- JSON array of paths
        status TEXT NOT NULL DEFAULT 'pending',
        human_prompt_notes TEXT NOT NULL DEFAULT '',
        notes_added_at INTEGER,
        notes_updated_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        FOREIGN KEY(human_task_id) REFERENCES human_tasks(id)
    )
";
pub const TASKS_DB_SCHEMA_AGENT_TASKS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_agent_tasks_human ON agent_tasks(human_task_id)";

pub const TASKS_DB_SCHEMA_TODO_ITEMS: &str = "
    CREATE TABLE IF NOT EXISTS todo_items (
        id TEXT PRIMARY KEY,
        agent_task_id TEXT NOT NULL,
        order_index INTEGER NOT NULL,
        description TEXT NOT NULL,
        file_path TEXT,
        function_name TEXT,
        context_hint TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        human_prompt_notes TEXT NOT NULL DEFAULT '',
        notes_added_at INTEGER,
        notes_updated_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        completed_at INTEGER,
        UNIQUE(agent_task_id, order_index),
        FOREIGN KEY(agent_task_id) REFERENCES agent_tasks(id)
    )
";

// --- 2. Discovery documents ---
pub const DISCOVERY_DB_NAME: &str = "discovery.db";
pub const DISCOVERY_SCHEMA_VERSION: &str = "1";

pub const DISCOVERY_DB_SCHEMA_TOOLS: &str = "
    CREATE TABLE IF NOT EXISTS tool_definitions (
        name TEXT PRIMARY KEY,
        description TEXT NOT NULL,
        input_schema TEXT NOT NULL, -- JSON
        registered_at INTEGER NOT NULL,
        indexed_at INTEGER NOT NULL
    )
";

pub const DISCOVERY_DB_SCHEMA_KNOWLEDGE: &str = "
    CREATE TABLE IF NOT EXISTS knowledge_entries (
        id TEXT PRIMARY KEY,
        collection TEXT NOT NULL,
        content TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}', -- JSON object
        created_at INTEGER NOT NULL,
        vector_indexed INTEGER NOT NULL DEFAULT 0
    )
";
pub const DISCOVERY_DB_SCHEMA_KNOWLEDGE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_knowledge_collection ON knowledge_entries(collection)";

pub const DISCOVERY_DB_SCHEMA_USAGE: &str = "
    CREATE TABLE IF NOT EXISTS collection_usage (
        collection TEXT PRIMARY KEY,
        count INTEGER NOT NULL DEFAULT 0,
        last_used_at INTEGER NOT NULL
    )
";

// --- 3. Vector index ---
pub const VECTORS_DB_NAME: &str = "vectors.db";
pub const VECTORS_SCHEMA_VERSION: &str = "1";

pub const VECTORS_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS vectors (
        space TEXT NOT NULL,
        id TEXT NOT NULL,
        collection TEXT,
        dim INTEGER NOT NULL,
        embedding BLOB NOT NULL, -- little-endian f32
        rank_ts INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY(space, id)
    )
";
