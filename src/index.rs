//! Flat vector similarity index over pattern descriptions
//!
//! Brute-force L2 nearest neighbours. Similarity is `exp(-distance)`, so
//! identical vectors score 1.0 and scores fall towards 0 with distance.
//! Build and add take `&mut self`; the borrow checker keeps them from
//! overlapping a search on the same index.

use crate::embeddings::{Embedder, DEGRADED_PRODUCER};
use crate::error::{AdvisorError, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;

/// One nearest-neighbour hit
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    /// Position of the text in insertion order
    pub position: usize,
    pub text: String,
    pub similarity: f64,
}

pub struct VectorIndex {
    embedder: Arc<dyn Embedder>,
    texts: Vec<String>,
    vectors: Vec<Vec<f32>>,
    /// Embedder that actually produced the stored vectors
    producer: String,
}

impl VectorIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        let producer = embedder.name().to_string();
        Self {
            embedder,
            texts: Vec::new(),
            vectors: Vec::new(),
            producer,
        }
    }

    pub fn producer(&self) -> &str {
        &self.producer
    }

    /// Stored vectors live in the current embedder's space: same producer,
    /// one dimension throughout.
    pub fn is_current(&self) -> bool {
        let dims = self.vectors.first().map(Vec::len);
        self.producer == self.embedder.name() && self.vectors.iter().all(|v| Some(v.len()) == dims)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Texts in position order
    pub fn texts(&self) -> &[String] {
        &self.texts
    }

    /// Replace the index contents with embeddings of `texts`.
    pub fn build(&mut self, texts: &[String]) -> Result<()> {
        let vectors = self.embed_all(texts)?;
        self.texts = texts.to_vec();
        self.vectors = vectors;
        self.producer = if self.embedder.degraded() {
            DEGRADED_PRODUCER.to_string()
        } else {
            self.embedder.name().to_string()
        };
        tracing::debug!(count = self.len(), producer = %self.producer, "vector index built");
        Ok(())
    }

    /// Append embeddings of `texts`, building fresh when empty.
    pub fn add(&mut self, texts: &[String]) -> Result<()> {
        if self.is_empty() {
            return self.build(texts);
        }
        let vectors = self.embed_all(texts)?;
        if self.embedder.degraded() {
            self.producer = DEGRADED_PRODUCER.to_string();
        }
        self.texts.extend(texts.iter().cloned());
        self.vectors.extend(vectors);
        tracing::debug!(added = texts.len(), total = self.len(), "vector index extended");
        Ok(())
    }

    fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self
            .embedder
            .embed_batch(texts)
            .map_err(|e| AdvisorError::Provider { reason: e.to_string() })?;
        if vectors.len() != texts.len() {
            return Err(AdvisorError::Provider {
                reason: format!("{} vectors for {} texts", vectors.len(), texts.len()),
            });
        }
        Ok(vectors)
    }

    /// The `k` nearest stored texts, closest first. Empty index or an
    /// embedding failure yields no hits.
    pub fn search(&self, query: &str, k: usize) -> Vec<IndexHit> {
        if self.is_empty() || k == 0 {
            return Vec::new();
        }
        let query_vec = match self.embedder.embed(query) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, skipping vector search");
                return Vec::new();
            }
        };

        let mut hits: Vec<IndexHit> = self
            .vectors
            .iter()
            .enumerate()
            .filter_map(|(position, v)| {
                if v.len() != query_vec.len() {
                    tracing::warn!(position, stored = v.len(), query = query_vec.len(), "dimension mismatch");
                    return None;
                }
                let distance = l2_distance(&query_vec, v);
                Some(IndexHit {
                    position,
                    text: self.texts[position].clone(),
                    similarity: (-distance).exp(),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(k.min(self.len()));
        hits
    }

    /// Write vectors and the text-to-position mapping to a SQLite file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM index_entries", [])?;
        tx.execute(
            "INSERT OR REPLACE INTO index_meta (key, value) VALUES ('embedder', ?1)",
            params![self.producer],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO index_entries (position, text, embedding) VALUES (?1, ?2, ?3)",
            )?;
            for (position, (text, vector)) in self.texts.iter().zip(&self.vectors).enumerate() {
                let bytes: Vec<u8> = vector.iter().flat_map(|f| f.to_le_bytes()).collect();
                stmt.execute(params![position as i64, text, bytes])?;
            }
        }
        tx.commit()?;
        tracing::info!(path = ?path, count = self.len(), "vector index saved");
        Ok(())
    }

    /// Load a saved index. Vectors written by another embedder, the hashing
    /// fallback included, are not comparable, so a mismatch yields an empty
    /// index to be rebuilt.
    pub fn load(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;

        let mut index = Self::new(embedder);
        let saved_with: Option<String> = conn
            .query_row("SELECT value FROM index_meta WHERE key = 'embedder'", [], |row| row.get(0))
            .ok();
        if saved_with.as_deref() != Some(index.embedder.name()) {
            tracing::info!(saved = ?saved_with, current = index.embedder.name(), "index embedder changed, starting empty");
            return Ok(index);
        }

        let mut stmt = conn.prepare("SELECT text, embedding FROM index_entries ORDER BY position")?;
        let rows = stmt.query_map([], |row| {
            let text: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            Ok((text, blob))
        })?;

        for row in rows {
            let (text, blob) = row?;
            let vector: Vec<f32> = blob
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            index.texts.push(text);
            index.vectors.push(vector);
        }
        Ok(index)
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS index_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS index_entries (
    position INTEGER PRIMARY KEY,
    text TEXT NOT NULL,
    embedding BLOB NOT NULL
);
"#;

fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = (*x - *y) as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}
