//! Embedding providers.
//!
//! The engine only depends on [`EmbeddingProvider`]. Two implementations ship:
//! an OpenAI-compatible HTTP client and a local feature-hashing embedder. The
//! provider is chosen from config; there is no automatic fallback between them.

use crate::core::config::{EmbeddingConfig, ProviderKind};
use crate::core::error::{Backend, TaskmeshError};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tiktoken_rs::{CoreBPE, cl100k_base};

pub trait EmbeddingProvider: Send + Sync {
    /// Embeds one text. Failures are reported as `BackendUnavailable(EmbeddingProvider)`.
    fn embed(&self, text: &str) -> Result<Vec<f32>, TaskmeshError>;

    /// Identifier recorded in the audit log.
    fn model_id(&self) -> String;
}

pub fn provider_from_config(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, TaskmeshError> {
    match config.provider {
        ProviderKind::Http => Ok(Arc::new(HttpEmbeddingProvider::from_config(config)?)),
        ProviderKind::Hashing => Ok(Arc::new(HashingEmbedder::new(
            config.dimension.unwrap_or(HashingEmbedder::DEFAULT_DIM),
        ))),
    }
}

/// Client for `POST {base_url}/embeddings` (OpenAI, Ollama, vLLM, LM Studio...).
///
/// One request per text, bounded by the configured timeouts. Errors are not retried.
pub struct HttpEmbeddingProvider {
    agent: ureq::Agent,
    url: String,
    model: String,
    api_key: Option<String>,
    expected_dim: Option<usize>,
}

impl HttpEmbeddingProvider {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, TaskmeshError> {
        let api_key = match &config.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                TaskmeshError::ValidationError(format!(
                    "embedding.api_key_env names '{}' but it is not set",
                    var
                ))
            })?),
            None => None,
        };
        let timeout = Duration::from_secs(config.timeout_secs);
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Ok(Self {
            agent,
            url: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
            expected_dim: config.dimension,
        })
    }
}

impl EmbeddingProvider for HttpEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, TaskmeshError> {
        let mut request = self
            .agent
            .post(&self.url)
            .set("content-type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.set("authorization", &format!("Bearer {}", key));
        }

        let payload = serde_json::json!({ "model": self.model, "input": text });
        let body: JsonValue = match request.send_json(payload) {
            Ok(resp) => resp.into_json().map_err(|e| {
                TaskmeshError::unavailable(
                    Backend::EmbeddingProvider,
                    format!("unreadable response from {}: {}", self.url, e),
                )
            })?,
            Err(ureq::Error::Status(code, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                return Err(TaskmeshError::unavailable(
                    Backend::EmbeddingProvider,
                    format!("{} returned {}: {}", self.url, code, text.trim()),
                ));
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(TaskmeshError::unavailable(
                    Backend::EmbeddingProvider,
                    format!("request to {} failed: {}", self.url, err),
                ));
            }
        };

        let vector = parse_embedding_response(&body)?;
        if let Some(dim) = self.expected_dim
            && vector.len() != dim
        {
            return Err(TaskmeshError::unavailable(
                Backend::EmbeddingProvider,
                format!(
                    "model '{}' returned {} dimensions, configured dimension is {}",
                    self.model,
                    vector.len(),
                    dim
                ),
            ));
        }
        Ok(vector)
    }

    fn model_id(&self) -> String {
        format!("http:{}", self.model)
    }
}

/// Extracts `data[0].embedding` from an OpenAI-style response body.
pub fn parse_embedding_response(body: &JsonValue) -> Result<Vec<f32>, TaskmeshError> {
    let values = body
        .get("data")
        .and_then(|d| d.get(0))
        .and_then(|d| d.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            TaskmeshError::unavailable(
                Backend::EmbeddingProvider,
                "response has no data[0].embedding array",
            )
        })?;
    if values.is_empty() {
        return Err(TaskmeshError::unavailable(
            Backend::EmbeddingProvider,
            "provider returned an empty embedding",
        ));
    }
    values
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                TaskmeshError::unavailable(
                    Backend::EmbeddingProvider,
                    "embedding contains a non-numeric value",
                )
            })
        })
        .collect()
}

/// Deterministic bag-of-features embedder.
///
/// Words (lowercased, plural `s` folded, stop words dropped) and their
/// character trigrams are hashed with SHA-256 into a signed bucket vector,
/// then L2-normalized. No network, same output on every machine.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "the", "this", "to", "with",
];

impl HashingEmbedder {
    pub const DEFAULT_DIM: usize = 384;

    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn words(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .filter(|w| !STOP_WORDS.contains(&w.as_str()))
            .map(|w| {
                if w.chars().count() > 3 && w.ends_with('s') && !w.ends_with("ss") {
                    w[..w.len() - 1].to_string()
                } else {
                    w
                }
            })
            .collect()
    }

    fn add_feature(&self, v: &mut [f32], feature: &str, weight: f32) {
        let h = Sha256::digest(feature.as_bytes());
        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&h[..8]);
        let idx = (u64::from_le_bytes(bucket) % self.dim as u64) as usize;
        let sign = if h[8] & 1 == 0 { 1.0 } else { -1.0 };
        v[idx] += sign * weight;
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, TaskmeshError> {
        let mut v = vec![0.0f32; self.dim];
        for word in Self::words(text) {
            self.add_feature(&mut v, &format!("w:{}", word), 1.0);
            let padded: Vec<char> = format!("^{}$", word).chars().collect();
            for tri in padded.windows(3) {
                let tri: String = tri.iter().collect();
                self.add_feature(&mut v, &format!("t:{}", tri), 0.5);
            }
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(v)
    }

    fn model_id(&self) -> String {
        format!("hashing:{}", self.dim)
    }
}

fn tokenizer() -> Option<&'static CoreBPE> {
    static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();
    BPE.get_or_init(|| match cl100k_base() {
        Ok(bpe) => Some(bpe),
        Err(e) => {
            eprintln!("warn: cl100k tokenizer unavailable, estimating tokens: {}", e);
            None
        }
    })
    .as_ref()
}

pub fn count_tokens(text: &str) -> usize {
    match tokenizer() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count().div_ceil(4),
    }
}

/// Shortens `text` on a char boundary until it fits in `max_tokens`.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let mut tokens = count_tokens(text);
    if tokens <= max_tokens {
        return text.to_string();
    }
    let chars: Vec<char> = text.chars().collect();
    let mut keep = chars.len() * max_tokens / tokens.max(1);
    loop {
        let candidate: String = chars[..keep].iter().collect();
        tokens = count_tokens(&candidate);
        if tokens <= max_tokens || keep == 0 {
            return candidate;
        }
        keep = keep * 9 / 10;
    }
}
