//! Store handle for taskmesh state.
//!
//! A project keeps its state under `<project>/.taskmesh/data/`: the task board,
//! the discovery documents, the vector index and the broker audit log.

use crate::core::broker::DbBroker;
use crate::core::error::TaskmeshError;
use crate::core::schemas;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the data directory
    pub root: PathBuf,
}

impl Store {
    /// Uses `root` directly as the data directory.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn for_project(project_root: &Path) -> Self {
        Self::at(project_root.join(".taskmesh").join("data"))
    }

    pub fn ensure_dirs(&self) -> Result<(), TaskmeshError> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn tasks_db(&self) -> PathBuf {
        self.root.join(schemas::TASKS_DB_NAME)
    }

    pub fn discovery_db(&self) -> PathBuf {
        self.root.join(schemas::DISCOVERY_DB_NAME)
    }

    pub fn vectors_db(&self) -> PathBuf {
        self.root.join(schemas::VECTORS_DB_NAME)
    }

    pub fn broker(&self) -> DbBroker {
        DbBroker::new(&self.root)
    }
}
