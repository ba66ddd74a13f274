//! End-to-end advisory pipeline
//!
//! Open once, call [`Advisor::recommend`] per requirement:
//!
//! ```rust,ignore
//! let mut advisor = Advisor::open(AdvisorConfig::load(None)?)?;
//! let report = advisor.recommend(&Requirement::new("Route supplier invoices"), "session-1")?;
//! for rec in &report.recommendations {
//!     println!("{} {:.2}", rec.pattern_id, rec.confidence);
//! }
//! ```
//!
//! The vector index mirrors pattern descriptions in store order and is
//! rebuilt whenever the repository changes underneath it.

use crate::assembler::RecommendationAssembler;
use crate::config::AdvisorConfig;
use crate::decision::{DecisionEngine, PatternDecision};
use crate::decision_log::{DecisionLog, JsonlDecisionLog};
use crate::embeddings::{build_embedder, Embedder};
use crate::error::{AdvisorError, Result};
use crate::index::VectorIndex;
use crate::matcher::Matcher;
use crate::store::{PatternStore, StoreStats};
use crate::synthesizer::PatternSynthesizer;
use crate::types::{MatchCandidate, Pattern, PatternId, Recommendation, Requirement};
use serde::Serialize;
use std::sync::Arc;

/// Everything one invocation produced
#[derive(Debug, Clone, Serialize)]
pub struct AdvisorReport {
    pub session_id: String,
    pub recommendations: Vec<Recommendation>,
    /// Ranked candidates, for auditing
    pub candidates: Vec<MatchCandidate>,
    pub decision: PatternDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_pattern: Option<PatternId>,
    /// Why creation was attempted but refused
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_blocked: Option<String>,
}

/// Repository and index summary
#[derive(Debug, Clone, Serialize)]
pub struct AdvisorStats {
    #[serde(flatten)]
    pub store: StoreStats,
    pub indexed: usize,
    pub embedder: String,
}

pub struct Advisor {
    config: AdvisorConfig,
    embedder: Arc<dyn Embedder>,
    store: PatternStore,
    index: VectorIndex,
    matcher: Matcher,
    decisions: DecisionEngine,
    synthesizer: PatternSynthesizer,
    assembler: RecommendationAssembler,
}

fn descriptions(patterns: &[Pattern]) -> Vec<String> {
    patterns.iter().map(|p| p.description.clone()).collect()
}

impl Advisor {
    /// Open with the configured embedding provider.
    pub fn open(config: AdvisorConfig) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::from(build_embedder(&config.embedding));
        Self::with_embedder(config, embedder)
    }

    pub fn with_embedder(config: AdvisorConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let mut store = PatternStore::new(&config.pattern_dir);
        store.load()?;

        let index = if config.index_path.exists() {
            VectorIndex::load(&config.index_path, embedder.clone()).unwrap_or_else(|e| {
                tracing::warn!(path = ?config.index_path, error = %e, "unreadable index, rebuilding");
                VectorIndex::new(embedder.clone())
            })
        } else {
            VectorIndex::new(embedder.clone())
        };

        let log: Option<Box<dyn DecisionLog>> = match &config.decision_log {
            Some(path) => Some(Box::new(JsonlDecisionLog::open(path)?)),
            None => None,
        };

        let mut advisor = Self {
            matcher: Matcher::new(config.weights, config.top_k),
            decisions: DecisionEngine::new(config.decision.clone(), log),
            synthesizer: PatternSynthesizer::new(),
            assembler: RecommendationAssembler::new(config.assembly.clone()),
            config,
            embedder,
            store,
            index,
        };
        advisor.sync_index()?;
        Ok(advisor)
    }

    pub fn store(&self) -> &PatternStore {
        &self.store
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    /// Rebuild the index if it no longer mirrors the store or its vectors
    /// came from a different embedder. Returns whether a rebuild happened.
    pub fn sync_index(&mut self) -> Result<bool> {
        let texts = descriptions(self.store.patterns());
        if self.index.texts() == texts.as_slice() && self.index.is_current() {
            return Ok(false);
        }
        tracing::info!(
            indexed = self.index.len(),
            patterns = texts.len(),
            producer = self.index.producer(),
            "index out of date, rebuilding"
        );
        self.index.build(&texts)?;
        self.persist_index();
        Ok(true)
    }

    /// Re-read the repository and rebuild the index from scratch.
    pub fn reindex(&mut self) -> Result<usize> {
        self.store.refresh()?;
        self.index.build(&descriptions(self.store.patterns()))?;
        self.index.save(&self.config.index_path)?;
        Ok(self.index.len())
    }

    fn persist_index(&self) {
        if let Err(e) = self.index.save(&self.config.index_path) {
            tracing::warn!(path = ?self.config.index_path, error = %e, "failed to save vector index");
        }
    }

    pub fn stats(&self) -> AdvisorStats {
        AdvisorStats {
            store: self.store.stats(),
            indexed: self.index.len(),
            embedder: self.embedder.name().to_string(),
        }
    }

    /// Match, decide, maybe synthesize, then assemble recommendations.
    pub fn recommend(&mut self, requirement: &Requirement, session_id: &str) -> Result<AdvisorReport> {
        requirement
            .validate()
            .map_err(AdvisorError::invalid_requirement)?;
        if session_id.trim().is_empty() {
            return Err(AdvisorError::InvalidSession);
        }
        self.store.refresh()?;
        self.sync_index()?;

        let mut candidates =
            self.matcher
                .match_requirement(requirement, self.store.patterns(), &self.index);
        let decision = self
            .decisions
            .should_create_new_pattern(&candidates, requirement, &mut self.store);

        let mut created_pattern = None;
        let mut creation_blocked = None;
        if decision.create_new {
            match self
                .synthesizer
                .create_pattern(requirement, session_id, &mut self.store)
            {
                Ok(pattern) => {
                    if let Err(e) = self.index.add(&[pattern.description.clone()]) {
                        tracing::warn!(pattern_id = %pattern.pattern_id, error = %e, "failed to index new pattern");
                    } else {
                        self.persist_index();
                    }
                    candidates.insert(0, self.synthesized_candidate(&pattern));
                    created_pattern = Some(pattern.pattern_id);
                }
                Err(AdvisorError::CreationBlocked { reason }) => {
                    tracing::warn!(%reason, "pattern creation blocked");
                    creation_blocked = Some(reason);
                }
                Err(e) => return Err(e),
            }
        }

        let recommendations = self
            .assembler
            .assemble(requirement, &candidates, self.store.patterns());
        tracing::info!(
            session_id,
            candidates = candidates.len(),
            recommendations = recommendations.len(),
            created = ?created_pattern,
            "recommendation complete"
        );

        Ok(AdvisorReport {
            session_id: session_id.to_string(),
            recommendations,
            candidates,
            decision,
            created_pattern,
            creation_blocked,
        })
    }

    /// A freshly synthesized pattern matches its own requirement on every
    /// structured criterion and on its description.
    fn synthesized_candidate(&self, pattern: &Pattern) -> MatchCandidate {
        let w = &self.config.weights;
        let blended_score = w.tag + w.vector + w.confidence * pattern.confidence_score;
        MatchCandidate {
            pattern_id: pattern.pattern_id,
            tag_score: 1.0,
            vector_score: 1.0,
            blended_score,
            pattern_confidence: pattern.confidence_score,
            rationale: format!("synthesized for this requirement -> blended {:.2}", blended_score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionAction;
    use crate::decision_log::verify_log;
    use crate::embeddings::fixtures::flaky;
    use std::sync::atomic::Ordering;
    use crate::store::fixtures::{pattern, write};

    fn requirement() -> Requirement {
        let mut req = Requirement::new("Extract totals from scanned invoices that arrive by email every day");
        req.domain = Some("finance".to_string());
        req
    }

    #[test]
    fn test_empty_library_synthesizes() {
        let dir = tempfile::tempdir().unwrap();
        let config = AdvisorConfig::rooted_at(dir.path());
        let mut advisor = Advisor::open(config.clone()).unwrap();

        let report = advisor.recommend(&requirement(), "s1").unwrap();
        let created = report.created_pattern.unwrap();
        assert!(report.decision.create_new);
        assert_eq!(report.recommendations.len(), 1);
        assert_eq!(report.recommendations[0].pattern_id, created);
        assert!(config.pattern_dir.join(format!("{}.json", created)).exists());
        assert_eq!(advisor.index().len(), 1);

        let log = verify_log(config.decision_log.as_ref().unwrap()).unwrap();
        assert!(log.valid);
        assert_eq!(log.chain_length, 1);
    }

    #[test]
    fn test_repeat_requirement_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let mut advisor = Advisor::open(AdvisorConfig::rooted_at(dir.path())).unwrap();
        let first = advisor.recommend(&requirement(), "s1").unwrap();
        let created = first.created_pattern.unwrap();

        let second = advisor.recommend(&requirement(), "s2").unwrap();
        assert!(!second.decision.create_new);
        assert!(second.created_pattern.is_none());
        assert!(matches!(
            second.decision.action,
            DecisionAction::Enhance { pattern_id } | DecisionAction::Reuse { pattern_id } if pattern_id == created
        ));
        assert_eq!(advisor.store().patterns().len(), 1);
    }

    #[test]
    fn test_index_follows_repository() {
        let dir = tempfile::tempdir().unwrap();
        let config = AdvisorConfig::rooted_at(dir.path());
        write(&config.pattern_dir, &pattern("PAT-001", "finance", &["document_processing"], &["Python"], 0.8));

        let advisor = Advisor::open(config.clone()).unwrap();
        assert_eq!(advisor.index().len(), 1);
        drop(advisor);

        let mut reopened = Advisor::open(config.clone()).unwrap();
        assert!(!reopened.sync_index().unwrap());

        write(&config.pattern_dir, &pattern("PAT-002", "legal", &["workflow"], &["Camunda"], 0.7));
        let report = reopened.recommend(&requirement(), "s1").unwrap();
        assert_eq!(reopened.index().len(), reopened.store().patterns().len());
        assert!(!report.candidates.is_empty());
    }

    #[test]
    fn test_index_rebuilt_after_provider_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let config = AdvisorConfig::rooted_at(dir.path());
        let p = pattern("PAT-001", "finance", &["document_processing"], &["Python"], 0.8);
        write(&config.pattern_dir, &p);

        let (switch, embedder) = flaky(false);
        let advisor = Advisor::with_embedder(config.clone(), embedder.clone()).unwrap();
        assert_eq!(advisor.index().len(), 1);
        assert!(!advisor.index().is_current());
        drop(advisor);

        switch.store(true, Ordering::Relaxed);
        let mut advisor = Advisor::with_embedder(config.clone(), embedder.clone()).unwrap();
        assert!(advisor.index().is_current());
        assert!(!advisor.sync_index().unwrap());

        let hits = advisor.index().search(&p.description, 1);
        assert_eq!(hits.len(), 1);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);

        let report = advisor.recommend(&Requirement::new(p.description.clone()), "s1").unwrap();
        assert!(report.candidates.iter().any(|c| c.pattern_id == p.pattern_id && c.vector_score > 0.99));
    }

    #[test]
    fn test_invalid_input_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let config = AdvisorConfig::rooted_at(dir.path());
        let mut advisor = Advisor::open(config.clone()).unwrap();
        assert!(matches!(
            advisor.recommend(&Requirement::new("hi"), "s1"),
            Err(AdvisorError::InvalidRequirement { .. })
        ));
        assert!(matches!(
            advisor.recommend(&requirement(), ""),
            Err(AdvisorError::InvalidSession)
        ));
        assert!(!config.decision_log.unwrap().exists());
    }

    #[test]
    fn test_blocked_creation_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut advisor = Advisor::open(AdvisorConfig::rooted_at(dir.path())).unwrap();
        let req = Requirement::new("Fill {{ template }} placeholders in onboarding letters");
        let report = advisor.recommend(&req, "s1").unwrap();
        assert!(report.created_pattern.is_none());
        assert!(report.creation_blocked.is_some());
        assert!(report.recommendations.is_empty());
    }
}
