//! Embedding capability for the vector index
//!
//! The pipeline only ever talks to [`Embedder`]. Three implementations:
//! 1. `OnnxEmbedder` - local all-MiniLM-L6-v2 through ONNX Runtime
//! 2. `HttpEmbedder` - OpenAI-compatible `/embeddings` endpoint
//! 3. `HashingEmbedder` - deterministic feature hashing, always available
//!
//! `FallbackEmbedder` puts a provider in front of the hashing embedder so a
//! provider failure degrades one vector instead of aborting a run.

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use anyhow::{anyhow, Context, Result};
use ndarray::Array2;
use ort::{inputs, session::{Session, builder::GraphOptimizationLevel}, value::Tensor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokenizers::Tokenizer;

/// Embedding dimensions for all-MiniLM-L6-v2
pub const EMBEDDING_DIM: usize = 384;

/// Maximum sequence length for the model
const MAX_SEQ_LEN: usize = 256;

/// Text-to-vector capability
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Whether the most recent call was answered by a fallback rather than
    /// by the embedder `name()` reports.
    fn degraded(&self) -> bool {
        false
    }
}

/// Producer name recorded for vectors that came from the hashing fallback
pub const DEGRADED_PRODUCER: &str = "hashing-fallback";

/// L2 normalize a vector
pub fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vec.iter().map(|x| x / norm).collect()
    } else {
        vec.to_vec()
    }
}

// ============================================================================
// ONNX
// ============================================================================

/// Local sentence embeddings with ONNX Runtime
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

impl OnnxEmbedder {
    /// Initialize with model from cache or download
    pub fn new(model_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(model_dir)?;

        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        if !model_path.exists() || !tokenizer_path.exists() {
            Self::download_model(model_dir)?;
        }

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&model_path)
            .context("Failed to load ONNX model")?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }

    /// Download the embedding model from HuggingFace
    fn download_model(model_dir: &Path) -> Result<()> {
        use hf_hub::api::sync::Api;

        tracing::info!("downloading embedding model (all-MiniLM-L6-v2)");
        let api = Api::new()?;
        let repo = api.model("sentence-transformers/all-MiniLM-L6-v2".to_string());

        let model_path = repo.get("onnx/model.onnx")?;
        std::fs::copy(&model_path, model_dir.join("model.onnx"))?;

        let tokenizer_path = repo.get("tokenizer.json")?;
        std::fs::copy(&tokenizer_path, model_dir.join("tokenizer.json"))?;

        tracing::info!(dir = ?model_dir, "embedding model ready");
        Ok(())
    }

    /// Mean pooling over sequence dimension using flat slice
    /// tensor shape: [1, seq_len, embedding_dim]
    fn mean_pool_flat(data: &[f32], seq_len: usize, shape: &[i64]) -> Vec<f32> {
        let mut result = vec![0.0f32; EMBEDDING_DIM];
        if seq_len == 0 {
            return result;
        }

        let embed_dim = if shape.len() >= 3 { shape[2] as usize } else { EMBEDDING_DIM };

        for i in 0..seq_len {
            for (j, slot) in result.iter_mut().enumerate().take(embed_dim.min(EMBEDDING_DIM)) {
                let idx = i * embed_dim + j;
                if idx < data.len() {
                    *slot += data[idx];
                }
            }
        }

        for v in result.iter_mut() {
            *v /= seq_len as f32;
        }

        result
    }
}

impl Embedder for OnnxEmbedder {
    fn name(&self) -> &str {
        "onnx-minilm"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self.tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;

        let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding.get_attention_mask().iter().map(|&m| m as i64).collect();

        let len = ids.len().min(MAX_SEQ_LEN);
        let input_ids = Array2::from_shape_vec((1, len), ids[..len].to_vec())?;
        let attention = Array2::from_shape_vec((1, len), attention_mask[..len].to_vec())?;
        let token_types = Array2::from_shape_vec((1, len), vec![0i64; len])?;

        let mut session = self.session
            .lock()
            .map_err(|_| anyhow!("ONNX session lock poisoned"))?;

        let outputs = session.run(inputs![
            "input_ids" => Tensor::from_array(input_ids)?,
            "attention_mask" => Tensor::from_array(attention)?,
            "token_type_ids" => Tensor::from_array(token_types)?,
        ])?;

        let output = outputs.get("last_hidden_state")
            .or_else(|| outputs.get("token_embeddings"))
            .ok_or_else(|| anyhow!("No embedding output found"))?;

        let (shape, data) = output.try_extract_tensor::<f32>()?;
        let shape_vec: Vec<i64> = shape.iter().copied().collect();
        let data_vec: Vec<f32> = data.to_vec();
        drop(outputs);

        Ok(l2_normalize(&Self::mean_pool_flat(&data_vec, len, &shape_vec)))
    }
}

// ============================================================================
// HTTP
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Remote embeddings over an OpenAI-compatible API. One attempt per call;
/// the caller's fallback handles failures.
pub struct HttpEmbedder {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
        if api_key.is_empty() {
            return Err(anyhow!("{} not set. HTTP embedder requires API access.", config.api_key_env));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
        })
    }
}

impl Embedder for HttpEmbedder {
    fn name(&self) -> &str {
        "http"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| anyhow!("Empty embedding response"))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response = self.client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest { model: &self.model, input: texts })
            .send()
            .context("Embedding request failed")?
            .error_for_status()
            .context("Embedding endpoint returned an error")?;

        let mut body: EmbeddingResponse = response.json().context("Malformed embedding response")?;
        if body.data.len() != texts.len() {
            return Err(anyhow!(
                "Embedding endpoint returned {} vectors for {} inputs",
                body.data.len(),
                texts.len()
            ));
        }
        body.data.sort_by_key(|d| d.index);
        Ok(body.data.into_iter().map(|d| l2_normalize(&d.embedding)).collect())
    }
}

// ============================================================================
// Hashing
// ============================================================================

/// Deterministic term-hashing embedder. Not semantic, but always available
/// and good enough for keyword-level similarity.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }

    /// FNV-1a bucket for a term
    fn bucket(term: &str, dims: usize) -> usize {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in term.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        (h as usize) % dims
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut counts: HashMap<String, f32> = HashMap::new();
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 1)
            .map(|w| w.to_lowercase())
        {
            *counts.entry(token).or_default() += 1.0;
        }

        let mut vec = vec![0.0f32; self.dimensions];
        for (term, count) in &counts {
            // Longer terms carry more signal than short function words
            let weight = 1.0 + (term.len() as f32).ln();
            vec[Self::bucket(term, self.dimensions)] += count * weight;
        }
        l2_normalize(&vec)
    }
}

impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }
}

// ============================================================================
// Fallback
// ============================================================================

/// Provider-backed embedder that degrades to hashing per call
pub struct FallbackEmbedder {
    primary: Box<dyn Embedder>,
    fallback: HashingEmbedder,
    degraded: AtomicBool,
}

impl FallbackEmbedder {
    pub fn new(primary: Box<dyn Embedder>) -> Self {
        Self {
            primary,
            fallback: HashingEmbedder::default(),
            degraded: AtomicBool::new(false),
        }
    }
}

impl Embedder for FallbackEmbedder {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match self.primary.embed(text) {
            Ok(v) => {
                self.degraded.store(false, Ordering::Relaxed);
                Ok(v)
            }
            Err(e) => {
                tracing::warn!(provider = self.primary.name(), error = %e, "embedding failed, using hashing fallback");
                self.degraded.store(true, Ordering::Relaxed);
                self.fallback.embed(text)
            }
        }
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match self.primary.embed_batch(texts) {
            Ok(v) => {
                self.degraded.store(false, Ordering::Relaxed);
                Ok(v)
            }
            Err(e) => {
                tracing::warn!(provider = self.primary.name(), error = %e, count = texts.len(), "batch embedding failed, using hashing fallback");
                self.degraded.store(true, Ordering::Relaxed);
                self.fallback.embed_batch(texts)
            }
        }
    }

    fn degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }
}

/// Build the configured embedder. Provider construction failures fall back
/// to hashing with a warning.
pub fn build_embedder(config: &EmbeddingConfig) -> Box<dyn Embedder> {
    let primary: Result<Box<dyn Embedder>> = match config.provider {
        EmbeddingProvider::Hashing => return Box::new(HashingEmbedder::default()),
        EmbeddingProvider::Onnx => OnnxEmbedder::new(&config.model_dir).map(|e| Box::new(e) as Box<dyn Embedder>),
        EmbeddingProvider::Http => HttpEmbedder::new(config).map(|e| Box::new(e) as Box<dyn Embedder>),
    };
    match primary {
        Ok(p) => Box::new(FallbackEmbedder::new(p)),
        Err(e) => {
            tracing::warn!(provider = ?config.provider, error = %e, "embedding provider unavailable, using hashing");
            Box::new(HashingEmbedder::default())
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    /// Provider that can be switched off and on from a test
    pub struct Flaky {
        pub up: Arc<AtomicBool>,
        inner: HashingEmbedder,
    }

    impl Flaky {
        pub fn new(up: Arc<AtomicBool>) -> Self {
            Self { up, inner: HashingEmbedder::new(16) }
        }
    }

    impl Embedder for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if self.up.load(Ordering::Relaxed) {
                self.inner.embed(text)
            } else {
                Err(anyhow!("provider down"))
            }
        }
    }

    /// A fallback-wrapped [`Flaky`] plus its switch
    pub fn flaky(up: bool) -> (Arc<AtomicBool>, Arc<dyn Embedder>) {
        let switch = Arc::new(AtomicBool::new(up));
        let embedder: Arc<dyn Embedder> = Arc::new(FallbackEmbedder::new(Box::new(Flaky::new(switch.clone()))));
        (switch, embedder)
    }
}
