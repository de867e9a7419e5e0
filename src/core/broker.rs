use crate::core::db;
use crate::core::error::TaskmeshError;
use crate::core::schemas;
use crate::core::time;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The DB Broker is the single entry point for state access.
///
/// Every call opens its own connection, so independent operations run
/// concurrently and rely on SQLite for row-level atomicity. Each call leaves
/// one line in the audit log.
#[derive(Debug, Clone)]
pub struct DbBroker {
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub intent_ref: Option<String>,
    pub op: String,
    pub db_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// Serializes appends to the audit log only; database access is not serialized.
static AUDIT_LOCK: Mutex<()> = Mutex::new(());

impl DbBroker {
    pub fn new(root: &Path) -> Self {
        Self {
            audit_log_path: root.join(schemas::AUDIT_LOG_NAME),
        }
    }

    pub fn audit_log_path(&self) -> &Path {
        &self.audit_log_path
    }

    /// Execute a closure with a fresh connection to the specified DB.
    pub fn with_conn<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        intent_ref: Option<&str>,
        op_name: &str,
        f: F,
    ) -> Result<R, TaskmeshError>
    where
        F: FnOnce(&Connection) -> Result<R, TaskmeshError>,
    {
        let db_id = db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let result = db::db_connect(db_path).and_then(|conn| f(&conn));

        let (status, err) = match &result {
            Ok(_) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };
        self.log_event(actor, intent_ref, op_name, &db_id, status, err);

        result
    }

    /// Records a non-database backend call (embedding requests) in the same audit log.
    pub fn record(&self, actor: &str, op: &str, target: &str, outcome: Result<(), &TaskmeshError>) {
        let (status, err) = match outcome {
            Ok(()) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };
        self.log_event(actor, None, op, target, status, err);
    }

    fn log_event(
        &self,
        actor: &str,
        intent_ref: Option<&str>,
        op: &str,
        db_id: &str,
        status: &str,
        error: Option<String>,
    ) {
        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            intent_ref: intent_ref.map(|s| s.to_string()),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: status.to_string(),
            error,
        };
        if let Err(e) = self.append(&ev) {
            eprintln!(
                "warn: failed to append audit event to {}: {}",
                self.audit_log_path.display(),
                e
            );
        }
    }

    fn append(&self, ev: &BrokerEvent) -> Result<(), TaskmeshError> {
        let line = serde_json::to_string(ev)?;
        let _guard = AUDIT_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)?;
        writeln!(f, "{}", line)?;
        Ok(())
    }

    pub fn read_events(&self) -> Result<Vec<BrokerEvent>, TaskmeshError> {
        if !self.audit_log_path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.audit_log_path)?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(TaskmeshError::from))
            .collect()
    }
}
