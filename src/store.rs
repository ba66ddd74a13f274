//! Pattern store: JSON documents on disk, cached in memory
//!
//! One document per pattern, named `<ID>.json`. A document whose filename
//! contains `.deleted` is soft-deleted and never loaded. Invalid documents
//! are logged and skipped; a bad file never takes the whole load down.
//!
//! The cache fills lazily and is only replaced by [`PatternStore::refresh`].
//! Reads borrow `&self`; writes need `&mut self`, so one writer at a time.

use crate::error::{AdvisorError, Result};
use crate::types::{Enhancement, Pattern, PatternId};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Filename marker for soft-deleted documents
pub const SOFT_DELETE_MARKER: &str = ".deleted";

/// Final check before anything is written to the repository
pub trait WriteGate: Send + Sync {
    /// `Err(reason)` rejects the write.
    fn check(&self, pattern: &Pattern) -> std::result::Result<(), String>;
}

/// Default gate: rejects markup/script injection, template markers, path
/// tricks and oversized fields.
#[derive(Debug, Clone)]
pub struct SanitizingGate {
    pub max_field_len: usize,
}

impl Default for SanitizingGate {
    fn default() -> Self {
        Self { max_field_len: 5000 }
    }
}

const FORBIDDEN_FRAGMENTS: &[&str] = &[
    "<script",
    "</script",
    "javascript:",
    "onerror=",
    "{{",
    "{%",
    "${",
    "../",
    "..\\",
    "\0",
];

impl WriteGate for SanitizingGate {
    fn check(&self, pattern: &Pattern) -> std::result::Result<(), String> {
        let mut fields: Vec<(&str, &str)> = vec![
            ("name", &pattern.name),
            ("description", &pattern.description),
            ("domain", &pattern.domain),
        ];
        for (label, value) in [
            ("insights", &pattern.insights),
            ("challenges", &pattern.challenges),
            ("recommended_approach", &pattern.recommended_approach),
        ] {
            if let Some(v) = value {
                fields.push((label, v));
            }
        }
        fields.extend(pattern.tech_stack.iter().map(|t| ("tech_stack", t.as_str())));
        fields.extend(pattern.pattern_type.iter().map(|t| ("pattern_type", t.as_str())));

        for (label, value) in fields {
            if value.len() > self.max_field_len {
                return Err(format!("{} exceeds {} bytes", label, self.max_field_len));
            }
            let lower = value.to_lowercase();
            if let Some(bad) = FORBIDDEN_FRAGMENTS.iter().find(|f| lower.contains(*f)) {
                return Err(format!("{} contains forbidden fragment {:?}", label, bad));
            }
        }
        Ok(())
    }
}

/// A document the loader refused
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub path: PathBuf,
    pub reason: String,
}

/// In-memory view of the repository with explicit invalidation
#[derive(Debug, Default)]
pub struct PatternCache {
    loaded: bool,
    patterns: Vec<Pattern>,
    by_id: HashMap<PatternId, usize>,
    fingerprint: String,
    rejected: Vec<Rejection>,
}

impl PatternCache {
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn invalidate(&mut self) {
        *self = Self::default();
    }

    fn insert(&mut self, pattern: Pattern) {
        match self.by_id.get(&pattern.pattern_id) {
            Some(&i) => self.patterns[i] = pattern,
            None => {
                self.by_id.insert(pattern.pattern_id, self.patterns.len());
                self.patterns.push(pattern);
            }
        }
    }
}

/// Repository summary
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub rejected: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub by_feasibility: BTreeMap<String, usize>,
    pub by_domain: BTreeMap<String, usize>,
}

pub struct PatternStore {
    dir: PathBuf,
    gate: Box<dyn WriteGate>,
    cache: PatternCache,
}

impl PatternStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_gate(dir, Box::new(SanitizingGate::default()))
    }

    pub fn with_gate(dir: impl Into<PathBuf>, gate: Box<dyn WriteGate>) -> Self {
        Self {
            dir: dir.into(),
            gate,
            cache: PatternCache::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Populate the cache if it is empty.
    pub fn load(&mut self) -> Result<&[Pattern]> {
        if !self.cache.is_loaded() {
            self.cache = scan_repository(&self.dir)?;
        }
        Ok(&self.cache.patterns)
    }

    /// Re-read the repository. Returns `true` if the pattern set changed.
    pub fn refresh(&mut self) -> Result<bool> {
        if self.cache.is_loaded() && fingerprint(&self.dir)? == self.cache.fingerprint {
            tracing::debug!(dir = ?self.dir, "repository unchanged, keeping cache");
            return Ok(false);
        }
        self.cache.invalidate();
        self.load()?;
        Ok(true)
    }

    /// Cached patterns. Empty until [`load`](Self::load) has run.
    pub fn patterns(&self) -> &[Pattern] {
        &self.cache.patterns
    }

    pub fn rejected(&self) -> &[Rejection] {
        &self.cache.rejected
    }

    pub fn get(&self, id: &PatternId) -> Option<&Pattern> {
        self.cache.by_id.get(id).map(|&i| &self.cache.patterns[i])
    }

    pub fn by_domain(&self, domain: &str) -> Vec<&Pattern> {
        self.cache
            .patterns
            .iter()
            .filter(|p| p.domain.eq_ignore_ascii_case(domain))
            .collect()
    }

    pub fn by_type(&self, pattern_type: &str) -> Vec<&Pattern> {
        self.cache
            .patterns
            .iter()
            .filter(|p| p.pattern_type.iter().any(|t| t.eq_ignore_ascii_case(pattern_type)))
            .collect()
    }

    /// Every identifier in use: cached ones plus well-formed filenames on
    /// disk, soft-deleted documents included.
    pub fn known_ids(&self) -> Result<HashSet<PatternId>> {
        let mut ids: HashSet<PatternId> = self.cache.by_id.keys().copied().collect();
        if !self.dir.exists() {
            return Ok(ids);
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            let stem = name.split('.').next().unwrap_or_default();
            if let Ok(id) = stem.parse::<PatternId>() {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    /// Persist a brand-new pattern. Existing ids are never overwritten here.
    pub fn save_pattern(&mut self, pattern: Pattern) -> Result<()> {
        self.load()?;
        if self.known_ids()?.contains(&pattern.pattern_id) {
            return Err(AdvisorError::blocked(format!(
                "identifier {} already exists",
                pattern.pattern_id
            )));
        }
        self.write_document(&pattern)?;
        tracing::info!(pattern_id = %pattern.pattern_id, name = %pattern.name, "pattern saved");
        self.cache.insert(pattern);
        self.cache.fingerprint = fingerprint(&self.dir)?;
        Ok(())
    }

    /// Additively enhance a stored pattern. Returns whether anything changed.
    pub fn enhance(&mut self, id: &PatternId, enhancement: &Enhancement) -> Result<bool> {
        self.load()?;
        let mut pattern = self
            .get(id)
            .cloned()
            .ok_or_else(|| AdvisorError::PatternNotFound { id: id.to_string() })?;
        if !pattern.merge_enhancement(enhancement) {
            tracing::debug!(pattern_id = %id, "enhancement added nothing new");
            return Ok(false);
        }
        self.write_document(&pattern)?;
        tracing::info!(pattern_id = %id, "pattern enhanced");
        self.cache.insert(pattern);
        self.cache.fingerprint = fingerprint(&self.dir)?;
        Ok(true)
    }

    fn write_document(&self, pattern: &Pattern) -> Result<()> {
        pattern.validate().map_err(|reason| AdvisorError::PatternValidation {
            path: self.document_path(&pattern.pattern_id),
            reason,
        })?;
        self.gate.check(pattern).map_err(|reason| {
            tracing::warn!(pattern_id = %pattern.pattern_id, %reason, "write rejected by gate");
            AdvisorError::blocked(reason)
        })?;

        std::fs::create_dir_all(&self.dir)?;
        let path = self.document_path(&pattern.pattern_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(pattern)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn document_path(&self, id: &PatternId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            total: self.cache.patterns.len(),
            rejected: self.cache.rejected.len(),
            ..Default::default()
        };
        for p in &self.cache.patterns {
            *stats.by_kind.entry(p.pattern_id.kind().prefix().to_string()).or_default() += 1;
            *stats.by_feasibility.entry(p.feasibility.to_string()).or_default() += 1;
            *stats.by_domain.entry(p.domain.to_lowercase()).or_default() += 1;
        }
        stats
    }
}

/// Live (not soft-deleted) JSON documents, sorted by filename.
fn document_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let pattern = format!(
        "{}/*.json",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let mut paths: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| AdvisorError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?
        .filter_map(|entry| entry.ok())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| !n.contains(SOFT_DELETE_MARKER))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// SHA-256 over (filename, contents) of every live document
fn fingerprint(dir: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    for path in document_paths(dir)? {
        hasher.update(path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default());
        hasher.update([0u8]);
        hasher.update(std::fs::read(&path)?);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn parse_document(path: &Path) -> std::result::Result<Pattern, String> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| "unreadable filename".to_string())?;
    let file_id: PatternId = stem.parse()?;
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let pattern: Pattern = serde_json::from_str(&text).map_err(|e| e.to_string())?;
    if pattern.pattern_id != file_id {
        return Err(format!(
            "document id {} does not match filename {}",
            pattern.pattern_id, stem
        ));
    }
    pattern.validate()?;
    Ok(pattern)
}

fn scan_repository(dir: &Path) -> Result<PatternCache> {
    let mut cache = PatternCache {
        loaded: true,
        fingerprint: fingerprint(dir)?,
        ..Default::default()
    };

    for path in document_paths(dir)? {
        match parse_document(&path) {
            Ok(pattern) if cache.by_id.contains_key(&pattern.pattern_id) => {
                tracing::warn!(path = ?path, pattern_id = %pattern.pattern_id, "duplicate pattern id, skipping");
                cache.rejected.push(Rejection {
                    path,
                    reason: format!("duplicate id {}", pattern.pattern_id),
                });
            }
            Ok(pattern) => cache.insert(pattern),
            Err(reason) => {
                tracing::warn!(path = ?path, %reason, "invalid pattern document, skipping");
                cache.rejected.push(Rejection { path, reason });
            }
        }
    }

    tracing::info!(
        dir = ?dir,
        loaded = cache.patterns.len(),
        rejected = cache.rejected.len(),
        "pattern repository loaded"
    );
    Ok(cache)
}

/// Test fixtures shared across modules
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::types::{Feasibility, PatternConstraints};

    pub fn pattern(id: &str, domain: &str, types: &[&str], stack: &[&str], confidence: f64) -> Pattern {
        Pattern {
            pattern_id: id.parse().unwrap(),
            name: format!("Pattern {}", id),
            description: format!("Automate {} work using {}", domain, stack.join(" and ")),
            feasibility: Feasibility::Automatable,
            pattern_type: types.iter().map(|s| s.to_string()).collect(),
            tech_stack: stack.iter().map(|s| s.to_string()).collect(),
            confidence_score: confidence,
            constraints: PatternConstraints::default(),
            domain: domain.to_string(),
            compliance: Vec::new(),
            insights: None,
            challenges: None,
            recommended_approach: None,
            created_at: None,
            session_id: None,
        }
    }

    pub fn write(dir: &Path, pattern: &Pattern) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join(format!("{}.json", pattern.pattern_id)),
            serde_json::to_string_pretty(pattern).unwrap(),
        )
        .unwrap();
    }
}
