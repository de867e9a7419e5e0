//! Project configuration loaded from `.taskmesh/config.toml`.
//!
//! A missing file means defaults. Selected keys can be overridden from the
//! environment (`TASKMESH_EMBEDDING_PROVIDER`, `TASKMESH_EMBEDDING_URL`,
//! `TASKMESH_EMBEDDING_MODEL`).

use crate::core::error::TaskmeshError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible `POST {base_url}/embeddings`.
    Http,
    /// Local deterministic feature hashing. Must be selected explicitly.
    Hashing,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the bearer key, if any.
    pub api_key_env: Option<String>,
    /// Expected vector dimension; responses of any other size are rejected.
    pub dimension: Option<usize>,
    pub timeout_secs: u64,
    pub max_input_tokens: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Http,
            base_url: "http://127.0.0.1:11434/v1".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key_env: None,
            dimension: None,
            timeout_secs: 30,
            max_input_tokens: 512,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub default_limit: usize,
    pub max_limit: usize,
    /// Append input-schema property names to the text embedded for each tool.
    pub include_schema_fields: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            max_limit: 20,
            include_schema_fields: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskmeshConfig {
    pub embedding: EmbeddingConfig,
    pub discovery: DiscoveryConfig,
}

pub fn config_path(project_root: &Path) -> PathBuf {
    project_root.join(".taskmesh").join("config.toml")
}

pub fn load_config(project_root: &Path) -> Result<TaskmeshConfig, TaskmeshError> {
    load_config_with(project_root, |key| std::env::var(key).ok())
}

/// Like [`load_config`], reading overrides through `lookup` instead of the process environment.
pub fn load_config_with<F>(project_root: &Path, lookup: F) -> Result<TaskmeshConfig, TaskmeshError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = config_path(project_root);
    let mut config = if path.exists() {
        let content = fs::read_to_string(&path)?;
        parse_config(&content)?
    } else {
        TaskmeshConfig::default()
    };
    config.apply_overrides(lookup)?;
    config.validate()?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<TaskmeshConfig, TaskmeshError> {
    toml::from_str(content).map_err(|e| TaskmeshError::ValidationError(e.to_string()))
}

impl TaskmeshConfig {
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), TaskmeshError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("TASKMESH_EMBEDDING_PROVIDER") {
            self.embedding.provider = match provider.trim().to_ascii_lowercase().as_str() {
                "http" => ProviderKind::Http,
                "hashing" => ProviderKind::Hashing,
                other => {
                    return Err(TaskmeshError::ValidationError(format!(
                        "TASKMESH_EMBEDDING_PROVIDER must be 'http' or 'hashing', got '{}'",
                        other
                    )));
                }
            };
        }
        if let Some(url) = lookup("TASKMESH_EMBEDDING_URL") {
            self.embedding.base_url = url;
        }
        if let Some(model) = lookup("TASKMESH_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), TaskmeshError> {
        let d = &self.discovery;
        if d.default_limit == 0 || d.max_limit == 0 {
            return Err(TaskmeshError::ValidationError(
                "discovery limits must be positive".to_string(),
            ));
        }
        if d.default_limit > d.max_limit {
            return Err(TaskmeshError::ValidationError(format!(
                "discovery.default_limit ({}) exceeds discovery.max_limit ({})",
                d.default_limit, d.max_limit
            )));
        }
        let e = &self.embedding;
        if e.provider == ProviderKind::Http && e.base_url.trim().is_empty() {
            return Err(TaskmeshError::ValidationError(
                "embedding.base_url is required for the http provider".to_string(),
            ));
        }
        if e.max_input_tokens == 0 || e.timeout_secs == 0 {
            return Err(TaskmeshError::ValidationError(
                "embedding.max_input_tokens and embedding.timeout_secs must be positive"
                    .to_string(),
            ));
        }
        if e.dimension == Some(0) {
            return Err(TaskmeshError::ValidationError(
                "embedding.dimension must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
