use crate::core::cancel::CancelToken;
use crate::core::config::{self, TaskmeshConfig};
use crate::core::embedding::{self, EmbeddingProvider};
use crate::core::error::TaskmeshError;
use crate::core::store::Store;
use crate::core::vector::{SqliteVectorStore, VectorStore};
use std::path::Path;
use std::sync::Arc;

/// Shared, long-lived handles every operation runs against.
///
/// Cloning is cheap. Each call may carry its own [`CancelToken`] via [`Context::with_cancel`].
#[derive(Clone)]
pub struct Context {
    pub store: Store,
    pub config: TaskmeshConfig,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub vectors: Arc<dyn VectorStore>,
    pub cancel: CancelToken,
}

impl Context {
    pub fn new(
        store: Store,
        config: TaskmeshConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            store,
            config,
            embedder,
            vectors,
            cancel: CancelToken::new(),
        }
    }

    /// Loads config for `project_root` and wires the configured backends.
    pub fn open(project_root: &Path) -> Result<Self, TaskmeshError> {
        let config = config::load_config(project_root)?;
        let store = Store::for_project(project_root);
        store.ensure_dirs()?;
        let embedder = embedding::provider_from_config(&config.embedding)?;
        let vectors = Arc::new(SqliteVectorStore::new(&store));
        Ok(Self::new(store, config, embedder, vectors))
    }

    pub fn with_cancel(&self, cancel: CancelToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    /// Embeds `text` after truncating it to the token budget. The call is
    /// audited and refused if the context was already cancelled.
    pub fn embed(&self, op: &str, text: &str) -> Result<Vec<f32>, TaskmeshError> {
        self.cancel.check(op)?;
        let text = embedding::truncate_to_tokens(text, self.config.embedding.max_input_tokens);
        let result = self.embedder.embed(&text);
        self.store.broker().record(
            "taskmesh",
            op,
            &self.embedder.model_id(),
            result.as_ref().map(|_| ()),
        );
        result
    }
}
