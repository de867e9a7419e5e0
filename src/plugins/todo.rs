//! Task board: human tasks, agent tasks and their ordered todo items.
//!
//! Every mutation is an identifier-scoped SQL statement (or an immediate
//! transaction when several rows must change together), so concurrent callers
//! touching different todos of one agent task never overwrite each other.
//! Status changes are always explicit: finishing every todo leaves the agent
//! task's own status alone.

use crate::core::db;
use crate::core::error::TaskmeshError;
use crate::core::rpc::{self, BuiltinCapability, Invocation};
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::core::validate::{self, TaskStatus};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

const ACTOR: &str = "taskmesh";

impl ToSql for TaskStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TaskStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: TaskmeshError| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HumanTask {
    pub id: String,
    pub prompt: String,
    pub status: TaskStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HumanTaskDetail {
    #[serde(flatten)]
    pub task: HumanTask,
    pub agent_tasks: Vec<AgentTask>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AgentTask {
    pub id: String,
    pub human_task_id: String,
    pub agent_role: String,
    pub context_summary: String,
    pub files_modified: Vec<String>,
    pub status: TaskStatus,
    pub human_prompt_notes: String,
    pub human_prompt_notes_added_at: Option<i64>,
    pub human_prompt_notes_updated_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Ordered by `orderIndex`.
    pub todos: Vec<TodoItem>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    pub id: String,
    pub agent_task_id: String,
    pub order_index: i64,
    pub description: String,
    pub file_path: Option<String>,
    pub function_name: Option<String>,
    pub context_hint: Option<String>,
    pub status: TaskStatus,
    pub human_prompt_notes: String,
    pub human_prompt_notes_added_at: Option<i64>,
    pub human_prompt_notes_updated_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

/// A todo as submitted by a caller, before it has an id or order index.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewTodo {
    pub description: String,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub context_hint: Option<String>,
}

impl NewTodo {
    pub fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AgentTaskFilter {
    #[serde(default)]
    pub human_task_id: Option<String>,
    #[serde(default)]
    pub agent_role: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClearReport {
    pub human_tasks_deleted: usize,
    pub agent_tasks_deleted: usize,
    pub todos_deleted: usize,
}

fn ensure_schema(conn: &Connection) -> Result<(), TaskmeshError> {
    db::ensure_schema_version(
        conn,
        schemas::TASKS_SCHEMA_VERSION,
        &[
            schemas::TASKS_DB_SCHEMA_HUMAN_TASKS,
            schemas::TASKS_DB_SCHEMA_AGENT_TASKS,
            schemas::TASKS_DB_SCHEMA_AGENT_TASKS_INDEX,
            schemas::TASKS_DB_SCHEMA_TODO_ITEMS,
        ],
    )
}

fn with_tasks<R, F>(
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
        .with_conn(&store.tasks_db(), ACTOR, intent_ref, op, |conn| {
            ensure_schema(conn)?;
            f(conn)
        })
}

pub fn initialize_task_db(store: &Store) -> Result<(), TaskmeshError> {
    with_tasks(store, "tasks.init", None, |_| Ok(()))
}

const HUMAN_COLS: &str = "id, prompt, status, created_at, updated_at";
const AGENT_COLS: &str = "id, human_task_id, agent_role, context_summary, files_modified, status, \
     human_prompt_notes, notes_added_at, notes_updated_at, created_at, updated_at";
const TODO_COLS: &str = "id, agent_task_id, order_index, description, file_path, function_name, \
     context_hint, status, human_prompt_notes, notes_added_at, notes_updated_at, created_at, \
     updated_at, completed_at";

fn human_from_row(row: &Row<'_>) -> rusqlite::Result<HumanTask> {
    Ok(HumanTask {
        id: row.get(0)?,
        prompt: row.get(1)?,
        status: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<AgentTask> {
    let files: String = row.get(4)?;
    let files_modified = serde_json::from_str(&files)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(AgentTask {
        id: row.get(0)?,
        human_task_id: row.get(1)?,
        agent_role: row.get(2)?,
        context_summary: row.get(3)?,
        files_modified,
        status: row.get(5)?,
        human_prompt_notes: row.get(6)?,
        human_prompt_notes_added_at: row.get(7)?,
        human_prompt_notes_updated_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        todos: Vec::new(),
    })
}

fn todo_from_row(row: &Row<'_>) -> rusqlite::Result<TodoItem> {
    Ok(TodoItem {
        id: row.get(0)?,
        agent_task_id: row.get(1)?,
        order_index: row.get(2)?,
        description: row.get(3)?,
        file_path: row.get(4)?,
        function_name: row.get(5)?,
        context_hint: row.get(6)?,
        status: row.get(7)?,
        human_prompt_notes: row.get(8)?,
        human_prompt_notes_added_at: row.get(9)?,
        human_prompt_notes_updated_at: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        completed_at: row.get(13)?,
    })
}

fn load_todos(conn: &Connection, agent_task_id: &str) -> Result<Vec<TodoItem>, TaskmeshError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM todo_items WHERE agent_task_id = ?1 ORDER BY order_index",
        TODO_COLS
    ))?;
    let todos = stmt
        .query_map([agent_task_id], todo_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(todos)
}

fn load_agent_task(conn: &Connection, id: &str) -> Result<Option<AgentTask>, TaskmeshError> {
    let task = conn
        .query_row(
            &format!("SELECT {} FROM agent_tasks WHERE id = ?1", AGENT_COLS),
            [id],
            agent_from_row,
        )
        .optional()?;
    match task {
        Some(mut task) => {
            task.todos = load_todos(conn, &task.id)?;
            Ok(Some(task))
        }
        None => Ok(None),
    }
}

fn exists(conn: &Connection, table: &str, id: &str) -> Result<bool, TaskmeshError> {
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT 1 FROM {} WHERE id = ?1", table),
            [id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn human_not_found(id: &str) -> TaskmeshError {
    TaskmeshError::NotFound(format!("human task '{}'", id))
}

fn agent_not_found(id: &str) -> TaskmeshError {
    TaskmeshError::NotFound(format!("agent task '{}'", id))
}

/// Explains which link of `agent_task_id -> todo_id` failed to resolve.
fn todo_not_found(conn: &Connection, agent_task_id: &str, todo_id: &str) -> TaskmeshError {
    match exists(conn, "agent_tasks", agent_task_id) {
        Ok(false) => agent_not_found(agent_task_id),
        Ok(true) => TaskmeshError::NotFound(format!(
            "todo '{}' in agent task '{}'",
            todo_id, agent_task_id
        )),
        Err(e) => e,
    }
}

fn optional_text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn normalize_todos(todos: &[NewTodo]) -> Result<Vec<NewTodo>, TaskmeshError> {
    todos
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let description = validate::required(&format!("todos[{}].description", i), &t.description)?;
            Ok(NewTodo {
                description: description.to_string(),
                file_path: optional_text(&t.file_path),
                function_name: optional_text(&t.function_name),
                context_hint: optional_text(&t.context_hint),
            })
        })
        .collect()
}

fn insert_todos(
    conn: &Connection,
    agent_task_id: &str,
    first_index: i64,
    todos: &[NewTodo],
    now: i64,
) -> Result<Vec<String>, TaskmeshError> {
    let mut stmt = conn.prepare(
        "INSERT INTO todo_items(id, agent_task_id, order_index, description, file_path,
                                function_name, context_hint, status, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
    )?;
    let mut ids = Vec::with_capacity(todos.len());
    for (offset, todo) in todos.iter().enumerate() {
        let id = time::new_id("T");
        stmt.execute(params![
            id,
            agent_task_id,
            first_index + offset as i64,
            todo.description,
            todo.file_path,
            todo.function_name,
            todo.context_hint,
            TaskStatus::Pending,
            now,
        ])?;
        ids.push(id);
    }
    Ok(ids)
}

pub fn create_human_task(store: &Store, prompt: &str) -> Result<String, TaskmeshError> {
    let prompt = validate::required("prompt", prompt)?;
    let id = time::new_id("H");
    with_tasks(store, "tasks.human.create", Some(&id), |conn| {
        let now = time::now_millis();
        conn.execute(
            "INSERT INTO human_tasks(id, prompt, status, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?4)",
            params![id, prompt, TaskStatus::Pending, now],
        )?;
        Ok(())
    })?;
    Ok(id)
}

/// Creates an agent task under an existing human task. Todos get order indices
/// `0..n` in submission order and start `pending`.
pub fn create_agent_task(
    store: &Store,
    human_task_id: &str,
    agent_role: &str,
    context_summary: &str,
    todos: &[NewTodo],
) -> Result<String, TaskmeshError> {
    let human_task_id = validate::required("humanTaskId", human_task_id)?;
    let agent_role = validate::required("agentRole", agent_role)?;
    let todos = normalize_todos(todos)?;
    let id = time::new_id("A");

    with_tasks(store, "tasks.agent.create", Some(&id), |conn| {
        db::with_immediate_tx(conn, |tx| {
            if !exists(tx, "human_tasks", human_task_id)? {
                return Err(human_not_found(human_task_id));
            }
            let now = time::now_millis();
            tx.execute(
                "INSERT INTO agent_tasks(id, human_task_id, agent_role, context_summary,
                                         files_modified, status, created_at, updated_at)
                 VALUES(?1, ?2, ?3, ?4, '[]', ?5, ?6, ?6)",
                params![
                    id,
                    human_task_id,
                    agent_role,
                    context_summary.trim(),
                    TaskStatus::Pending,
                    now
                ],
            )?;
            insert_todos(tx, &id, 0, &todos, now)?;
            Ok(())
        })
    })?;
    Ok(id)
}

/// Appends todos after the current highest order index. Existing indices never move.
pub fn add_todos(
    store: &Store,
    agent_task_id: &str,
    todos: &[NewTodo],
) -> Result<Vec<String>, TaskmeshError> {
    let agent_task_id = validate::required("agentTaskId", agent_task_id)?;
    if todos.is_empty() {
        return Err(TaskmeshError::ValidationError(
            "todos must contain at least one item".to_string(),
        ));
    }
    let todos = normalize_todos(todos)?;

    with_tasks(store, "tasks.todo.append", Some(agent_task_id), |conn| {
        db::with_immediate_tx(conn, |tx| {
            if !exists(tx, "agent_tasks", agent_task_id)? {
                return Err(agent_not_found(agent_task_id));
            }
            let next: i64 = tx.query_row(
                "SELECT COALESCE(MAX(order_index), -1) + 1 FROM todo_items WHERE agent_task_id = ?1",
                [agent_task_id],
                |row| row.get(0),
            )?;
            insert_todos(tx, agent_task_id, next, &todos, time::now_millis())
        })
    })
}

pub fn update_human_task_status(
    store: &Store,
    human_task_id: &str,
    new_status: &str,
) -> Result<(), TaskmeshError> {
    let human_task_id = validate::required("humanTaskId", human_task_id)?;
    let status = validate::status(new_status)?;
    with_tasks(store, "tasks.human.status", Some(human_task_id), |conn| {
        let changed = conn.execute(
            "UPDATE human_tasks SET status = ?1, updated_at = MAX(?2, updated_at) WHERE id = ?3",
            params![status, time::now_millis(), human_task_id],
        )?;
        if changed == 0 {
            return Err(human_not_found(human_task_id));
        }
        Ok(())
    })
}

pub fn update_task_status(
    store: &Store,
    agent_task_id: &str,
    new_status: &str,
) -> Result<(), TaskmeshError> {
    let agent_task_id = validate::required("agentTaskId", agent_task_id)?;
    let status = validate::status(new_status)?;
    with_tasks(store, "tasks.agent.status", Some(agent_task_id), |conn| {
        let changed = conn.execute(
            "UPDATE agent_tasks SET status = ?1, updated_at = MAX(?2, updated_at) WHERE id = ?3",
            params![status, time::now_millis(), agent_task_id],
        )?;
        if changed == 0 {
            return Err(agent_not_found(agent_task_id));
        }
        Ok(())
    })
}

/// Changes one todo's status. Only that row is written; siblings and the
/// parent agent task are untouched.
pub fn update_todo_status(
    store: &Store,
    agent_task_id: &str,
    todo_id: &str,
    new_status: &str,
) -> Result<(), TaskmeshError> {
    let agent_task_id = validate::required("agentTaskId", agent_task_id)?;
    let todo_id = validate::required("todoId", todo_id)?;
    let status = validate::status(new_status)?;
    with_tasks(store, "tasks.todo.status", Some(todo_id), |conn| {
        let changed = conn.execute(
            "UPDATE todo_items SET
                status = ?1,
                updated_at = MAX(?2, updated_at),
                completed_at = CASE WHEN ?1 = 'completed' THEN COALESCE(completed_at, ?2) ELSE NULL END
             WHERE id = ?3 AND agent_task_id = ?4",
            params![status, time::now_millis(), todo_id, agent_task_id],
        )?;
        if changed == 0 {
            return Err(todo_not_found(conn, agent_task_id, todo_id));
        }
        Ok(())
    })
}

/// Merges `files` into the agent task's modified-file list, keeping first-seen order.
pub fn record_files_modified(
    store: &Store,
    agent_task_id: &str,
    files: &[String],
) -> Result<Vec<String>, TaskmeshError> {
    let agent_task_id = validate::required("agentTaskId", agent_task_id)?;
    let incoming: Vec<String> = files
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    if incoming.is_empty() {
        return Err(TaskmeshError::ValidationError(
            "files must contain at least one non-empty path".to_string(),
        ));
    }

    with_tasks(store, "tasks.agent.files", Some(agent_task_id), |conn| {
        db::with_immediate_tx(conn, |tx| {
            let current: Option<String> = tx
                .query_row(
                    "SELECT files_modified FROM agent_tasks WHERE id = ?1",
                    [agent_task_id],
                    |row| row.get(0),
                )
                .optional()?;
            let current = current.ok_or_else(|| agent_not_found(agent_task_id))?;
            let mut files: Vec<String> = serde_json::from_str(&current)?;
            for path in incoming {
                if !files.contains(&path) {
                    files.push(path);
                }
            }
            tx.execute(
                "UPDATE agent_tasks SET files_modified = ?1, updated_at = MAX(?2, updated_at)
                 WHERE id = ?3",
                params![serde_json::to_string(&files)?, time::now_millis(), agent_task_id],
            )?;
            Ok(files)
        })
    })
}

#[derive(Debug, Clone, Copy)]
pub enum NoteTarget<'a> {
    Task {
        agent_task_id: &'a str,
    },
    Todo {
        agent_task_id: &'a str,
        todo_id: &'a str,
    },
}

enum NoteWrite {
    Set(String),
    Clear,
}

/// Single-statement note write. `addedAt` is only filled when unset and
/// `updatedAt` never moves backwards; clearing resets text and both stamps.
fn write_notes(
    store: &Store,
    op: &str,
    target: NoteTarget<'_>,
    write: NoteWrite,
) -> Result<(), TaskmeshError> {
    let (table, scope, agent_task_id, id) = match target {
        NoteTarget::Task { agent_task_id } => {
            let id = validate::required("agentTaskId", agent_task_id)?;
            ("agent_tasks", "id = ?3", id, id)
        }
        NoteTarget::Todo {
            agent_task_id,
            todo_id,
        } => (
            "todo_items",
            "id = ?3 AND agent_task_id = ?4",
            validate::required("agentTaskId", agent_task_id)?,
            validate::required("todoId", todo_id)?,
        ),
    };
    let (notes, stamps) = match write {
        NoteWrite::Set(raw) => (
            validate::prompt_notes(&raw)?,
            "notes_added_at = COALESCE(notes_added_at, ?2),
             notes_updated_at = MAX(?2, COALESCE(notes_updated_at, 0))",
        ),
        NoteWrite::Clear => (
            String::new(),
            "notes_added_at = NULL, notes_updated_at = NULL",
        ),
    };
    let sql = format!(
        "UPDATE {} SET human_prompt_notes = ?1, {}, updated_at = MAX(?2, updated_at) WHERE {}",
        table, stamps, scope
    );

    with_tasks(store, op, Some(id), |conn| {
        let now = time::now_millis();
        let changed = match target {
            NoteTarget::Task { .. } => conn.execute(&sql, params![notes, now, id])?,
            NoteTarget::Todo { .. } => conn.execute(&sql, params![notes, now, id, agent_task_id])?,
        };
        if changed == 0 {
            return Err(match target {
                NoteTarget::Task { .. } => agent_not_found(agent_task_id),
                NoteTarget::Todo { .. } => todo_not_found(conn, agent_task_id, id),
            });
        }
        Ok(())
    })
}

pub fn add_prompt_notes(store: &Store, target: NoteTarget<'_>, notes: &str) -> Result<(), TaskmeshError> {
    write_notes(store, "tasks.notes.add", target, NoteWrite::Set(notes.to_string()))
}

pub fn update_prompt_notes(store: &Store, target: NoteTarget<'_>, notes: &str) -> Result<(), TaskmeshError> {
    write_notes(store, "tasks.notes.update", target, NoteWrite::Set(notes.to_string()))
}

pub fn clear_prompt_notes(store: &Store, target: NoteTarget<'_>) -> Result<(), TaskmeshError> {
    write_notes(store, "tasks.notes.clear", target, NoteWrite::Clear)
}

pub fn list_human_tasks(store: &Store) -> Result<Vec<HumanTask>, TaskmeshError> {
    with_tasks(store, "tasks.human.list", None, |conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM human_tasks ORDER BY rowid",
            HUMAN_COLS
        ))?;
        let tasks = stmt
            .query_map([], human_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    })
}

pub fn get_human_task(store: &Store, human_task_id: &str) -> Result<HumanTaskDetail, TaskmeshError> {
    let human_task_id = validate::required("humanTaskId", human_task_id)?;
    let task = with_tasks(store, "tasks.human.get", None, |conn| {
        conn.query_row(
            &format!("SELECT {} FROM human_tasks WHERE id = ?1", HUMAN_COLS),
            [human_task_id],
            human_from_row,
        )
        .optional()?
        .ok_or_else(|| human_not_found(human_task_id))
    })?;
    let agent_tasks = list_agent_tasks(
        store,
        &AgentTaskFilter {
            human_task_id: Some(task.id.clone()),
            ..AgentTaskFilter::default()
        },
    )?;
    Ok(HumanTaskDetail { task, agent_tasks })
}

/// Agent tasks in creation order, each with its todos. Filters combine with AND.
pub fn list_agent_tasks(
    store: &Store,
    filter: &AgentTaskFilter,
) -> Result<Vec<AgentTask>, TaskmeshError> {
    let human_task_id = optional_text(&filter.human_task_id);
    let agent_role = optional_text(&filter.agent_role);
    let status = optional_text(&filter.status)
        .map(|s| validate::status(&s))
        .transpose()?;

    with_tasks(store, "tasks.agent.list", None, |conn| {
        if let Some(h) = &human_task_id
            && !exists(conn, "human_tasks", h)?
        {
            return Err(human_not_found(h));
        }
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM agent_tasks
             WHERE (?1 IS NULL OR human_task_id = ?1)
               AND (?2 IS NULL OR agent_role = ?2)
               AND (?3 IS NULL OR status = ?3)
             ORDER BY rowid",
            AGENT_COLS
        ))?;
        let mut tasks = stmt
            .query_map(params![human_task_id, agent_role, status], agent_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        for task in tasks.iter_mut() {
            task.todos = load_todos(conn, &task.id)?;
        }
        Ok(tasks)
    })
}

pub fn get_agent_task(store: &Store, agent_task_id: &str) -> Result<AgentTask, TaskmeshError> {
    let agent_task_id = validate::required("agentTaskId", agent_task_id)?;
    with_tasks(store, "tasks.agent.get", None, |conn| {
        load_agent_task(conn, agent_task_id)?.ok_or_else(|| agent_not_found(agent_task_id))
    })
}

/// Deletes every todo, agent task and human task. Irreversible.
pub fn clear_task_board(store: &Store) -> Result<ClearReport, TaskmeshError> {
    with_tasks(store, "tasks.board.clear", None, |conn| {
        db::with_immediate_tx(conn, |tx| {
            let todos_deleted = tx.execute("DELETE FROM todo_items", [])?;
            let agent_tasks_deleted = tx.execute("DELETE FROM agent_tasks", [])?;
            let human_tasks_deleted = tx.execute("DELETE FROM human_tasks", [])?;
            Ok(ClearReport {
                human_tasks_deleted,
                agent_tasks_deleted,
                todos_deleted,
            })
        })
    })
}

// --- Call surface ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptArgs {
    prompt: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HumanTaskArgs {
    human_task_id: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAgentTaskArgs {
    human_task_id: String,
    agent_role: String,
    #[serde(default)]
    context_summary: String,
    #[serde(default)]
    todos: Vec<NewTodo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentTaskArgs {
    agent_task_id: String,
    #[serde(default)]
    todo_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    prompt_notes: Option<String>,
    #[serde(default)]
    todos: Vec<NewTodo>,
    #[serde(default)]
    files: Vec<String>,
}

impl AgentTaskArgs {
    fn task_target(&self) -> NoteTarget<'_> {
        NoteTarget::Task {
            agent_task_id: &self.agent_task_id,
        }
    }

    fn todo_target(&self) -> NoteTarget<'_> {
        NoteTarget::Todo {
            agent_task_id: &self.agent_task_id,
            todo_id: self.todo_id.as_deref().unwrap_or_default(),
        }
    }

    fn notes(&self) -> &str {
        self.prompt_notes.as_deref().unwrap_or_default()
    }

    fn status(&self) -> &str {
        self.status.as_deref().unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct ClearBoardArgs {
    #[serde(default)]
    confirm: bool,
}

fn ok() -> JsonValue {
    json!({ "ok": true })
}

fn call_create_human_task(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: PromptArgs = rpc::parse_params(params)?;
    let id = create_human_task(&call.ctx.store, &args.prompt)?;
    Ok(json!({ "humanTaskId": id }))
}

fn call_get_human_task(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: HumanTaskArgs = rpc::parse_params(params)?;
    Ok(serde_json::to_value(get_human_task(&call.ctx.store, &args.human_task_id)?)?)
}

fn call_update_human_task_status(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: HumanTaskArgs = rpc::parse_params(params)?;
    update_human_task_status(
        &call.ctx.store,
        &args.human_task_id,
        args.status.as_deref().unwrap_or_default(),
    )?;
    Ok(ok())
}

fn call_create_agent_task(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: CreateAgentTaskArgs = rpc::parse_params(params)?;
    let id = create_agent_task(
        &call.ctx.store,
        &args.human_task_id,
        &args.agent_role,
        &args.context_summary,
        &args.todos,
    )?;
    Ok(json!({ "agentTaskId": id }))
}

fn call_add_todos(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: AgentTaskArgs = rpc::parse_params(params)?;
    let ids = add_todos(&call.ctx.store, &args.agent_task_id, &args.todos)?;
    Ok(json!({ "todoIds": ids }))
}

fn call_update_task_status(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: AgentTaskArgs = rpc::parse_params(params)?;
    update_task_status(&call.ctx.store, &args.agent_task_id, args.status())?;
    Ok(ok())
}

fn call_update_todo_status(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: AgentTaskArgs = rpc::parse_params(params)?;
    update_todo_status(
        &call.ctx.store,
        &args.agent_task_id,
        args.todo_id.as_deref().unwrap_or_default(),
        args.status(),
    )?;
    Ok(ok())
}

fn call_record_files_modified(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: AgentTaskArgs = rpc::parse_params(params)?;
    let files = record_files_modified(&call.ctx.store, &args.agent_task_id, &args.files)?;
    Ok(json!({ "ok": true, "filesModified": files }))
}

fn call_add_task_notes(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: AgentTaskArgs = rpc::parse_params(params)?;
    add_prompt_notes(&call.ctx.store, args.task_target(), args.notes())?;
    Ok(ok())
}

fn call_update_task_notes(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: AgentTaskArgs = rpc::parse_params(params)?;
    update_prompt_notes(&call.ctx.store, args.task_target(), args.notes())?;
    Ok(ok())
}

fn call_clear_task_notes(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: AgentTaskArgs = rpc::parse_params(params)?;
    clear_prompt_notes(&call.ctx.store, args.task_target())?;
    Ok(ok())
}

fn call_add_todo_notes(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: AgentTaskArgs = rpc::parse_params(params)?;
    add_prompt_notes(&call.ctx.store, args.todo_target(), args.notes())?;
    Ok(ok())
}

fn call_update_todo_notes(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: AgentTaskArgs = rpc::parse_params(params)?;
    update_prompt_notes(&call.ctx.store, args.todo_target(), args.notes())?;
    Ok(ok())
}

fn call_clear_todo_notes(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: AgentTaskArgs = rpc::parse_params(params)?;
    clear_prompt_notes(&call.ctx.store, args.todo_target())?;
    Ok(ok())
}

fn call_list_human_tasks(call: &Invocation<'_>, _params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    Ok(serde_json::to_value(list_human_tasks(&call.ctx.store)?)?)
}

fn call_list_agent_tasks(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let filter: AgentTaskFilter = rpc::parse_params(params)?;
    Ok(serde_json::to_value(list_agent_tasks(&call.ctx.store, &filter)?)?)
}

fn call_get_agent_task(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: AgentTaskArgs = rpc::parse_params(params)?;
    Ok(serde_json::to_value(get_agent_task(&call.ctx.store, &args.agent_task_id)?)?)
}

fn call_clear_task_board(call: &Invocation<'_>, params: &JsonValue) -> Result<JsonValue, TaskmeshError> {
    let args: ClearBoardArgs = rpc::parse_params(params)?;
    if !args.confirm {
        return Err(TaskmeshError::ValidationError(
            "clearing the task board is irreversible; pass confirm: true".to_string(),
        ));
    }
    let report = clear_task_board(&call.ctx.store)?;
    Ok(json!({
        "ok": true,
        "humanTasksDeleted": report.human_tasks_deleted,
        "agentTasksDeleted": report.agent_tasks_deleted,
        "todosDeleted": report.todos_deleted,
    }))
}

fn status_prop() -> JsonValue {
    json!({ "type": "string", "enum": ["pending", "in_progress", "completed", "blocked"] })
}

fn todos_prop() -> JsonValue {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "description": { "type": "string" },
                "filePath": { "type": "string" },
                "functionName": { "type": "string" },
                "contextHint": { "type": "string" }
            },
            "required": ["description"]
        }
    })
}

/// Task board calls, in the order they register.
pub fn capabilities() -> Vec<BuiltinCapability> {
    let s = json!({ "type": "string" });
    vec![
        BuiltinCapability::new(
            "coordinator_create_human_task",
            "Create a human task from a high-level prompt",
            rpc::object_schema(json!({ "prompt": s }), &["prompt"]),
            call_create_human_task,
        ),
        BuiltinCapability::new(
            "coordinator_get_human_task",
            "Get a human task with its agent tasks and todos",
            rpc::object_schema(json!({ "humanTaskId": s }), &["humanTaskId"]),
            call_get_human_task,
        ),
        BuiltinCapability::new(
            "coordinator_update_human_task_status",
            "Set the status of a human task",
            rpc::object_schema(
                json!({ "humanTaskId": s, "status": status_prop() }),
                &["humanTaskId", "status"],
            ),
            call_update_human_task_status,
        ),
        BuiltinCapability::new(
            "coordinator_create_agent_task",
            "Assign work under a human task to an agent role with ordered todos",
            rpc::object_schema(
                json!({
                    "humanTaskId": s,
                    "agentRole": s,
                    "contextSummary": s,
                    "todos": todos_prop()
                }),
                &["humanTaskId", "agentRole"],
            ),
            call_create_agent_task,
        ),
        BuiltinCapability::new(
            "coordinator_add_todos",
            "Append todos to an agent task after the existing ones",
            rpc::object_schema(
                json!({ "agentTaskId": s, "todos": todos_prop() }),
                &["agentTaskId", "todos"],
            ),
            call_add_todos,
        ),
        BuiltinCapability::new(
            "coordinator_update_task_status",
            "Set the status of an agent task",
            rpc::object_schema(
                json!({ "agentTaskId": s, "status": status_prop() }),
                &["agentTaskId", "status"],
            ),
            call_update_task_status,
        ),
        BuiltinCapability::new(
            "coordinator_update_todo_status",
            "Set the status of one todo item in an agent task",
            rpc::object_schema(
                json!({ "agentTaskId": s, "todoId": s, "status": status_prop() }),
                &["agentTaskId", "todoId", "status"],
            ),
            call_update_todo_status,
        ),
        BuiltinCapability::new(
            "coordinator_record_files_modified",
            "Record files an agent task has modified",
            rpc::object_schema(
                json!({ "agentTaskId": s, "files": { "type": "array", "items": s } }),
                &["agentTaskId", "files"],
            ),
            call_record_files_modified,
        ),
        BuiltinCapability::new(
            "coordinator_add_task_prompt_notes",
            "Attach human guidance notes (markdown) to an agent task",
            rpc::object_schema(
                json!({ "agentTaskId": s, "promptNotes": s }),
                &["agentTaskId", "promptNotes"],
            ),
            call_add_task_notes,
        ),
        BuiltinCapability::new(
            "coordinator_update_task_prompt_notes",
            "Replace the human guidance notes on an agent task",
            rpc::object_schema(
                json!({ "agentTaskId": s, "promptNotes": s }),
                &["agentTaskId", "promptNotes"],
            ),
            call_update_task_notes,
        ),
        BuiltinCapability::new(
            "coordinator_clear_task_prompt_notes",
            "Remove the human guidance notes from an agent task",
            rpc::object_schema(json!({ "agentTaskId": s }), &["agentTaskId"]),
            call_clear_task_notes,
        ),
        BuiltinCapability::new(
            "coordinator_add_todo_prompt_notes",
            "Attach human guidance notes (markdown) to a todo item",
            rpc::object_schema(
                json!({ "agentTaskId": s, "todoId": s, "promptNotes": s }),
                &["agentTaskId", "todoId", "promptNotes"],
            ),
            call_add_todo_notes,
        ),
        BuiltinCapability::new(
            "coordinator_update_todo_prompt_notes",
            "Replace the human guidance notes on a todo item",
            rpc::object_schema(
                json!({ "agentTaskId": s, "todoId": s, "promptNotes": s }),
                &["agentTaskId", "todoId", "promptNotes"],
            ),
            call_update_todo_notes,
        ),
        BuiltinCapability::new(
            "coordinator_clear_todo_prompt_notes",
            "Remove the human guidance notes from a todo item",
            rpc::object_schema(
                json!({ "agentTaskId": s, "todoId": s }),
                &["agentTaskId", "todoId"],
            ),
            call_clear_todo_notes,
        ),
        BuiltinCapability::new(
            "coordinator_list_human_tasks",
            "List human tasks in creation order",
            rpc::object_schema(json!({}), &[]),
            call_list_human_tasks,
        ),
        BuiltinCapability::new(
            "coordinator_list_agent_tasks",
            "List agent tasks, optionally filtered by human task, role or status",
            rpc::object_schema(
                json!({ "humanTaskId": s, "agentRole": s, "status": status_prop() }),
                &[],
            ),
            call_list_agent_tasks,
        ),
        BuiltinCapability::new(
            "coordinator_get_agent_task",
            "Get an agent task with its ordered todos",
            rpc::object_schema(json!({ "agentTaskId": s }), &["agentTaskId"]),
            call_get_agent_task,
        ),
        BuiltinCapability::new(
            "coordinator_clear_task_board",
            "Delete every task and todo. Irreversible; requires confirm: true",
            rpc::object_schema(json!({ "confirm": { "type": "boolean" } }), &["confirm"]),
            call_clear_task_board,
        ),
    ]
}
