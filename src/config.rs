//! Advisor configuration
//!
//! Every weight and threshold the pipeline uses lives here. Values come from
//! `Default`, an optional JSON file, then `PATTERN_ADVISOR_*` environment
//! variables, in that order.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Blend weights for the matcher
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchWeights {
    pub tag: f64,
    pub vector: f64,
    pub confidence: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            tag: 0.3,
            vector: 0.5,
            confidence: 0.2,
        }
    }
}

/// Thresholds for the create / enhance / reuse decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionThresholds {
    /// Below this best blended score a new pattern is created
    pub min_match_score: f64,
    pub novelty: f64,
    pub conceptual_similarity: f64,
    pub tech_difference: f64,
    /// Number of unique-scenario phrases that force creation
    pub unique_indicator_hits: usize,
    /// Upper bound of the "mediocre" band; the lower bound is `min_match_score`
    pub mediocre_ceiling: f64,
    pub enhance_similarity: f64,
    pub enhance_max_novelty: f64,
    /// Domains too broad to justify a dedicated pattern
    pub generic_domains: Vec<String>,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            min_match_score: 0.4,
            novelty: 0.7,
            conceptual_similarity: 0.7,
            tech_difference: 0.7,
            unique_indicator_hits: 2,
            mediocre_ceiling: 0.7,
            enhance_similarity: 0.7,
            enhance_max_novelty: 0.3,
            generic_domains: ["general", "generic", "other", "business", "misc", "operations"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Recommendation assembly knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    pub max_recommendations: usize,
    pub max_stack_len: usize,
    /// Match score at which pattern-specific phrasing is blended in
    pub high_match_quality: f64,
    /// Subtracted per result index from externally supplied confidence
    pub confidence_jitter: f64,
    pub complexity_threshold: f64,
    pub risk_threshold: f64,
    pub severe_threshold: f64,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            max_recommendations: 5,
            max_stack_len: 8,
            high_match_quality: 0.8,
            confidence_jitter: 0.01,
            complexity_threshold: 0.7,
            risk_threshold: 0.7,
            severe_threshold: 0.9,
        }
    }
}

/// Which embedding capability backs the vector index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic feature hashing, no model required
    #[default]
    Hashing,
    /// Local ONNX MiniLM model
    Onnx,
    /// OpenAI-compatible HTTP endpoint
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model_dir: PathBuf,
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            model_dir: data_dir().join("models").join("minilm"),
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub pattern_dir: PathBuf,
    pub index_path: PathBuf,
    pub decision_log: Option<PathBuf>,
    /// Neighbours requested from the vector index
    pub top_k: usize,
    pub weights: MatchWeights,
    pub decision: DecisionThresholds,
    pub assembly: AssemblyConfig,
    pub embedding: EmbeddingConfig,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        let base = data_dir();
        Self {
            pattern_dir: base.join("patterns"),
            index_path: base.join("index.db"),
            decision_log: Some(base.join("decisions.jsonl")),
            top_k: 10,
            weights: MatchWeights::default(),
            decision: DecisionThresholds::default(),
            assembly: AssemblyConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl AdvisorConfig {
    /// Defaults rooted at a single directory. Handy for tests and demos.
    pub fn rooted_at(dir: &Path) -> Self {
        Self {
            pattern_dir: dir.join("patterns"),
            index_path: dir.join("index.db"),
            decision_log: Some(dir.join("decisions.jsonl")),
            ..Default::default()
        }
    }

    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid config {:?}", path))
    }

    /// Load from an optional file and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `PATTERN_ADVISOR_*` overrides through the given lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("PATTERN_ADVISOR_PATTERN_DIR") {
            self.pattern_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("PATTERN_ADVISOR_INDEX") {
            self.index_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("PATTERN_ADVISOR_DECISION_LOG") {
            self.decision_log = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if let Some(k) = lookup("PATTERN_ADVISOR_TOP_K").and_then(|v| v.parse().ok()) {
            self.top_k = k;
        }
        match lookup("PATTERN_ADVISOR_EMBEDDER").as_deref() {
            Some("onnx") => self.embedding.provider = EmbeddingProvider::Onnx,
            Some("http") => self.embedding.provider = EmbeddingProvider::Http,
            Some("hashing") => self.embedding.provider = EmbeddingProvider::Hashing,
            Some(other) => tracing::warn!(value = other, "unknown embedder, keeping configured one"),
            None => {}
        }
    }
}

/// Base data directory for advisor state
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pattern-advisor")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = MatchWeights::default();
        assert!((w.tag + w.vector + w.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("advisor.json");
        std::fs::write(&path, r#"{"top_k": 3, "weights": {"tag": 0.5}}"#).unwrap();

        let config = AdvisorConfig::from_file(&path).unwrap();
        assert_eq!(config.top_k, 3);
        assert_eq!(config.weights.tag, 0.5);
        assert_eq!(config.weights.vector, 0.5);
        assert_eq!(config.decision.min_match_score, 0.4);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PATTERN_ADVISOR_TOP_K", "7"),
            ("PATTERN_ADVISOR_EMBEDDER", "http"),
            ("PATTERN_ADVISOR_DECISION_LOG", ""),
        ]
        .into_iter()
        .collect();

        let mut config = AdvisorConfig::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.top_k, 7);
        assert_eq!(config.embedding.provider, EmbeddingProvider::Http);
        assert!(config.decision_log.is_none());
    }
}
