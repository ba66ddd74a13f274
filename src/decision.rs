//! Reuse, enhance or synthesize
//!
//! Given the ranked candidates, decide whether the knowledge base already
//! covers a requirement. Creation triggers are checked in a fixed order
//! and the first that fires wins:
//!
//! 1. no candidates
//! 2. best blended score below the match floor
//! 3. novel technology without conceptual overlap
//! 4. technology stack far from the top candidate
//! 5. enough "unique scenario" phrases in the description
//! 6. a specific domain with only a mediocre match
//!
//! Failing to compute the factors creates (fail open). Failing to log the
//! decision holds everything (fail closed): an unaudited knowledge base must
//! not grow.

use crate::config::DecisionThresholds;
use crate::decision_log::DecisionLog;
use crate::error::{AdvisorError, Result};
use crate::heuristics::{
    extract_technologies, jaccard, lower_set, significant_words, NormalizedText,
};
use crate::store::PatternStore;
use crate::types::{MatchCandidate, Pattern, PatternId, Requirement};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Phrases suggesting a scenario no stored pattern is likely to cover
pub const UNIQUE_SCENARIO_PHRASES: &[&str] = &[
    "never been done",
    "first of its kind",
    "novel",
    "unprecedented",
    "unique",
    "custom built",
    "bespoke",
    "proprietary",
    "cutting edge",
    "experimental",
    "no existing solution",
    "no off the shelf",
    "specialized hardware",
    "research prototype",
];

/// Weights of the conceptual-similarity factors
const KEYWORD_WEIGHT: f64 = 0.35;
const DOMAIN_WEIGHT: f64 = 0.2;
const TYPE_WEIGHT: f64 = 0.2;
const FEASIBILITY_WEIGHT: f64 = 0.15;
const COMPLIANCE_WEIGHT: f64 = 0.1;

/// Why a new pattern is being created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateTrigger {
    NoCandidates,
    LowMatchScore,
    NovelTechnology,
    TechnologyDifference,
    UniqueScenario,
    SpecificDomain,
    FactorsUnavailable,
}

impl CreateTrigger {
    fn describe(&self) -> &'static str {
        match self {
            CreateTrigger::NoCandidates => "no stored pattern survived matching",
            CreateTrigger::LowMatchScore => "the best match is too weak to reuse",
            CreateTrigger::NovelTechnology => {
                "the requirement relies on technology the library has not seen"
            }
            CreateTrigger::TechnologyDifference => {
                "the top candidate's technology stack is too different"
            }
            CreateTrigger::UniqueScenario => "the description reads as a one-off scenario",
            CreateTrigger::SpecificDomain => {
                "a specialised domain only found a mediocre match"
            }
            CreateTrigger::FactorsUnavailable => "decision factors could not be computed",
        }
    }
}

/// What the engine decided to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DecisionAction {
    Create { trigger: CreateTrigger },
    Enhance { pattern_id: PatternId },
    Reuse { pattern_id: PatternId },
    /// Nothing may change because the decision could not be audited
    Hold { reason: String },
}

/// Numbers behind a decision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionFactors {
    pub best_score: f64,
    pub novelty: f64,
    pub conceptual_similarity: f64,
    pub tech_difference: f64,
    pub unique_indicators: Vec<String>,
    pub specific_domain: Option<String>,
    pub requirement_technologies: Vec<String>,
}

/// Audit record for one decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternDecision {
    pub decision_id: String,
    pub timestamp: DateTime<Utc>,
    pub create_new: bool,
    pub action: DecisionAction,
    pub top_candidate: Option<PatternId>,
    pub candidate_count: usize,
    pub factors: Option<DecisionFactors>,
    pub rationale: String,
    /// Whether an enhancement was actually written
    #[serde(default)]
    pub enhanced: bool,
}

/// Requirement technologies: explicit stack, suggested stack and catalogue
/// names found in the description, lowercased.
pub fn requirement_technologies(requirement: &Requirement) -> HashSet<String> {
    let text = NormalizedText::new(&requirement.description);
    let mut techs = lower_set(&requirement.tech_stack);
    techs.extend(lower_set(&requirement.suggested_tech_stack()));
    techs.extend(lower_set(&extract_technologies(&text)));
    techs
}

/// Fraction of requirement technologies no stored pattern uses.
pub fn technology_novelty(requirement_tech: &HashSet<String>, patterns: &[Pattern]) -> f64 {
    if requirement_tech.is_empty() {
        return 0.0;
    }
    let known: HashSet<String> = patterns.iter().flat_map(|p| p.tech_set()).collect();
    let unseen = requirement_tech.difference(&known).count();
    unseen as f64 / requirement_tech.len() as f64
}

/// Jaccard distance between the pattern stack and requirement technologies.
pub fn technology_difference(pattern: &Pattern, requirement_tech: &HashSet<String>) -> f64 {
    if requirement_tech.is_empty() {
        return 0.0;
    }
    let stack = pattern.tech_set();
    if stack.is_empty() {
        return 1.0;
    }
    1.0 - jaccard(&stack, requirement_tech)
}

/// Weighted overlap of keywords, domain, types, feasibility and
/// compliance. Factors the requirement says nothing about are left out of
/// the normalization.
pub fn conceptual_similarity(requirement: &Requirement, pattern: &Pattern) -> f64 {
    let mut score = 0.0;
    let mut weight = 0.0;

    let req_words = significant_words(&requirement.description);
    let pat_words = significant_words(&format!("{} {}", pattern.name, pattern.description));
    let smaller = req_words.len().min(pat_words.len());
    let keyword_overlap = if smaller == 0 {
        0.0
    } else {
        req_words.intersection(&pat_words).count() as f64 / smaller as f64
    };
    score += KEYWORD_WEIGHT * keyword_overlap;
    weight += KEYWORD_WEIGHT;

    if let Some(domain) = requirement.domain_hint() {
        weight += DOMAIN_WEIGHT;
        if pattern.domain.trim().to_lowercase() == domain {
            score += DOMAIN_WEIGHT;
        }
    }

    let req_types = lower_set(&requirement.pattern_types);
    if !req_types.is_empty() {
        let have = lower_set(&pattern.pattern_type);
        weight += TYPE_WEIGHT;
        score += TYPE_WEIGHT * req_types.intersection(&have).count() as f64 / req_types.len() as f64;
    }

    if let Some(verdict) = requirement.external_feasibility() {
        weight += FEASIBILITY_WEIGHT;
        if verdict == pattern.feasibility {
            score += FEASIBILITY_WEIGHT;
        }
    }

    let req_compliance = lower_set(&requirement.compliance);
    if !req_compliance.is_empty() {
        let have = lower_set(&pattern.compliance);
        weight += COMPLIANCE_WEIGHT;
        score += COMPLIANCE_WEIGHT * req_compliance.intersection(&have).count() as f64
            / req_compliance.len() as f64;
    }

    if weight == 0.0 {
        0.0
    } else {
        score / weight
    }
}

pub struct DecisionEngine {
    thresholds: DecisionThresholds,
    log: Option<Box<dyn DecisionLog>>,
}

impl DecisionEngine {
    pub fn new(thresholds: DecisionThresholds, log: Option<Box<dyn DecisionLog>>) -> Self {
        Self { thresholds, log }
    }

    /// Compute every factor. Errors when the top candidate cannot be
    /// resolved or a score comes out non-finite.
    pub fn compute_factors(
        &self,
        candidates: &[MatchCandidate],
        requirement: &Requirement,
        patterns: &[Pattern],
    ) -> Result<DecisionFactors> {
        let techs = requirement_technologies(requirement);
        let text = NormalizedText::new(&requirement.description);
        let unique_indicators: Vec<String> = UNIQUE_SCENARIO_PHRASES
            .iter()
            .filter(|p| text.has(p))
            .map(|p| p.to_string())
            .collect();
        let specific_domain = requirement.domain_hint().filter(|d| {
            !self
                .thresholds
                .generic_domains
                .iter()
                .any(|g| g.eq_ignore_ascii_case(d))
        });

        let (best_score, conceptual, difference) = match candidates.first() {
            None => (0.0, 0.0, if techs.is_empty() { 0.0 } else { 1.0 }),
            Some(top) => {
                let pattern = patterns
                    .iter()
                    .find(|p| p.pattern_id == top.pattern_id)
                    .ok_or_else(|| AdvisorError::PatternNotFound {
                        id: top.pattern_id.to_string(),
                    })?;
                (
                    top.blended_score,
                    conceptual_similarity(requirement, pattern),
                    technology_difference(pattern, &techs),
                )
            }
        };

        let novelty = technology_novelty(&techs, patterns);
        for (name, value) in [
            ("best_score", best_score),
            ("novelty", novelty),
            ("conceptual_similarity", conceptual),
            ("tech_difference", difference),
        ] {
            if !value.is_finite() {
                return Err(AdvisorError::invalid_requirement(format!(
                    "{} is not finite",
                    name
                )));
            }
        }

        let mut requirement_technologies: Vec<String> = techs.into_iter().collect();
        requirement_technologies.sort();

        Ok(DecisionFactors {
            best_score,
            novelty,
            conceptual_similarity: conceptual,
            tech_difference: difference,
            unique_indicators,
            specific_domain,
            requirement_technologies,
        })
    }

    /// First creation trigger that fires, if any.
    pub fn creation_trigger(
        &self,
        candidate_count: usize,
        factors: &DecisionFactors,
    ) -> Option<CreateTrigger> {
        let t = &self.thresholds;
        if candidate_count == 0 {
            return Some(CreateTrigger::NoCandidates);
        }
        if factors.best_score < t.min_match_score {
            return Some(CreateTrigger::LowMatchScore);
        }
        if factors.novelty >= t.novelty && factors.conceptual_similarity < t.conceptual_similarity {
            return Some(CreateTrigger::NovelTechnology);
        }
        if factors.tech_difference >= t.tech_difference {
            return Some(CreateTrigger::TechnologyDifference);
        }
        if factors.unique_indicators.len() >= t.unique_indicator_hits {
            return Some(CreateTrigger::UniqueScenario);
        }
        if factors.specific_domain.is_some()
            && factors.best_score >= t.min_match_score
            && factors.best_score < t.mediocre_ceiling
        {
            return Some(CreateTrigger::SpecificDomain);
        }
        None
    }

    /// Decide without side effects.
    pub fn decide(
        &self,
        candidates: &[MatchCandidate],
        requirement: &Requirement,
        patterns: &[Pattern],
    ) -> PatternDecision {
        let top = candidates.first().map(|c| c.pattern_id);
        let (action, factors) = match self.compute_factors(candidates, requirement, patterns) {
            Err(e) => {
                tracing::warn!(error = %e, "decision factors unavailable, creating new pattern");
                (
                    DecisionAction::Create {
                        trigger: CreateTrigger::FactorsUnavailable,
                    },
                    None,
                )
            }
            Ok(factors) => {
                let action = match (self.creation_trigger(candidates.len(), &factors), top) {
                    (Some(trigger), _) => DecisionAction::Create { trigger },
                    (None, Some(pattern_id))
                        if factors.conceptual_similarity >= self.thresholds.enhance_similarity
                            && factors.novelty <= self.thresholds.enhance_max_novelty =>
                    {
                        DecisionAction::Enhance { pattern_id }
                    }
                    (None, Some(pattern_id)) => DecisionAction::Reuse { pattern_id },
                    // creation_trigger fires on zero candidates
                    (None, None) => DecisionAction::Create {
                        trigger: CreateTrigger::NoCandidates,
                    },
                };
                (action, Some(factors))
            }
        };

        let rationale = rationale(&action, factors.as_ref());
        PatternDecision {
            decision_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            create_new: matches!(action, DecisionAction::Create { .. }),
            action,
            top_candidate: top,
            candidate_count: candidates.len(),
            factors,
            rationale,
            enhanced: false,
        }
    }

    /// Log a decision. A sink failure turns it into `Hold`.
    fn record(&self, mut decision: PatternDecision) -> PatternDecision {
        tracing::info!(
            decision_id = %decision.decision_id,
            action = ?decision.action,
            create_new = decision.create_new,
            candidates = decision.candidate_count,
            factors = ?decision.factors,
            rationale = %decision.rationale,
            "pattern decision"
        );

        let Some(log) = &self.log else {
            return decision;
        };
        let logged = serde_json::to_value(&decision)
            .map_err(AdvisorError::from)
            .and_then(|v| log.append(&v));
        if let Err(e) = logged {
            tracing::error!(decision_id = %decision.decision_id, error = %e, "decision log failed, holding");
            decision.action = DecisionAction::Hold {
                reason: format!("decision log unavailable: {}", e),
            };
            decision.create_new = false;
            decision.rationale = format!("{} Held: the decision could not be recorded.", decision.rationale);
        }
        decision
    }

    /// Decide, log, and apply an enhancement when that is the outcome.
    pub fn should_create_new_pattern(
        &self,
        candidates: &[MatchCandidate],
        requirement: &Requirement,
        store: &mut PatternStore,
    ) -> PatternDecision {
        let decision = self.decide(candidates, requirement, store.patterns());
        let mut decision = self.record(decision);

        if let DecisionAction::Enhance { pattern_id } = &decision.action {
            let enhancement = requirement.enhancement();
            if enhancement.is_empty() {
                tracing::debug!(pattern_id = %pattern_id, "no enhancement material in requirement");
            } else {
                match store.enhance(pattern_id, &enhancement) {
                    Ok(changed) => decision.enhanced = changed,
                    Err(e) => tracing::warn!(pattern_id = %pattern_id, error = %e, "enhancement failed"),
                }
            }
        }
        decision
    }
}

fn rationale(action: &DecisionAction, factors: Option<&DecisionFactors>) -> String {
    let numbers = factors
        .map(|f| {
            format!(
                " (best {:.2}, novelty {:.2}, similarity {:.2}, tech difference {:.2})",
                f.best_score, f.novelty, f.conceptual_similarity, f.tech_difference
            )
        })
        .unwrap_or_default();
    match action {
        DecisionAction::Create { trigger } => {
            format!("Create a new pattern: {}{}.", trigger.describe(), numbers)
        }
        DecisionAction::Enhance { pattern_id } => format!(
            "Enhance {}: conceptually close with familiar technology{}.",
            pattern_id, numbers
        ),
        DecisionAction::Reuse { pattern_id } => {
            format!("Reuse {} as is{}.", pattern_id, numbers)
        }
        DecisionAction::Hold { reason } => format!("Hold: {}.", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::{pattern, write};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    struct FailingLog;

    impl DecisionLog for FailingLog {
        fn append(&self, _record: &Value) -> Result<()> {
            Err(AdvisorError::DecisionLog("disk full".to_string()))
        }
    }

    #[derive(Clone, Default)]
    struct MemoryLog(Arc<Mutex<Vec<Value>>>);

    impl DecisionLog for MemoryLog {
        fn append(&self, record: &Value) -> Result<()> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::new(DecisionThresholds::default(), None)
    }

    fn library() -> Vec<Pattern> {
        vec![
            pattern("PAT-001", "finance", &["document_processing"], &["Python", "Tesseract OCR"], 0.9),
            pattern("PAT-002", "support", &["conversational_agent"], &["LangChain", "OpenAI API"], 0.8),
        ]
    }

    fn candidate(id: &str, score: f64) -> MatchCandidate {
        MatchCandidate {
            pattern_id: id.parse().unwrap(),
            tag_score: 1.0,
            vector_score: score,
            blended_score: score,
            pattern_confidence: 0.9,
            rationale: String::new(),
        }
    }

    /// A requirement that mirrors PAT-001 exactly
    fn mirror_of_first() -> Requirement {
        let p = &library()[0];
        let mut req = Requirement::new(p.description.clone());
        req.domain = Some("finance".to_string());
        req.pattern_types = p.pattern_type.clone();
        req.tech_stack = p.tech_stack.clone();
        req
    }

    fn trigger(decision: &PatternDecision) -> Option<CreateTrigger> {
        match decision.action {
            DecisionAction::Create { trigger } => Some(trigger),
            _ => None,
        }
    }

    #[test]
    fn test_no_candidates_creates() {
        let d = engine().decide(&[], &Requirement::new("Reconcile bank statements"), &library());
        assert!(d.create_new);
        assert_eq!(trigger(&d), Some(CreateTrigger::NoCandidates));
    }

    #[test]
    fn test_low_score_creates() {
        let d = engine().decide(&[candidate("PAT-001", 0.3)], &mirror_of_first(), &library());
        assert_eq!(trigger(&d), Some(CreateTrigger::LowMatchScore));
    }

    #[test]
    fn test_identical_stack_enhances() {
        let req = mirror_of_first();
        let e = engine();
        let factors = e
            .compute_factors(&[candidate("PAT-001", 0.85)], &req, &library())
            .unwrap();
        assert!(factors.tech_difference.abs() < 1e-9);
        assert!(factors.novelty < 0.3);
        assert!(factors.conceptual_similarity >= 0.7);

        let d = e.decide(&[candidate("PAT-001", 0.85)], &req, &library());
        assert!(!d.create_new);
        assert_eq!(d.action, DecisionAction::Enhance { pattern_id: "PAT-001".parse().unwrap() });
    }

    #[test]
    fn test_novel_technology_creates() {
        let mut req = Requirement::new("Stream telemetry from factory sensors into dashboards");
        req.tech_stack = vec!["Flink".to_string(), "InfluxDB".to_string(), "Grafana".to_string()];
        let d = engine().decide(&[candidate("PAT-001", 0.8)], &req, &library());
        let f = d.factors.as_ref().unwrap();
        assert_eq!(f.novelty, 1.0);
        assert_eq!(trigger(&d), Some(CreateTrigger::NovelTechnology));
    }

    #[test]
    fn test_technology_difference_creates() {
        let mut req = mirror_of_first();
        req.tech_stack = vec!["LangChain".to_string(), "OpenAI API".to_string()];
        req.description = "Automate finance work using language models".to_string();
        let d = engine().decide(&[candidate("PAT-001", 0.85)], &req, &library());
        assert_eq!(trigger(&d), Some(CreateTrigger::TechnologyDifference));
    }

    #[test]
    fn test_unique_scenario_creates() {
        let mut req = mirror_of_first();
        req.description = format!("{} A novel, first of its kind approach", req.description);
        let d = engine().decide(&[candidate("PAT-001", 0.85)], &req, &library());
        assert_eq!(trigger(&d), Some(CreateTrigger::UniqueScenario));
    }

    #[test]
    fn test_specific_domain_with_mediocre_match_creates() {
        let d = engine().decide(&[candidate("PAT-001", 0.55)], &mirror_of_first(), &library());
        assert_eq!(trigger(&d), Some(CreateTrigger::SpecificDomain));

        let mut generic = mirror_of_first();
        generic.domain = Some("general".to_string());
        let d = engine().decide(&[candidate("PAT-001", 0.55)], &generic, &library());
        assert!(!d.create_new);
    }

    #[test]
    fn test_technology_difference_edges() {
        let p = &library()[0];
        assert_eq!(technology_difference(p, &HashSet::new()), 0.0);
        let mut empty = p.clone();
        empty.tech_stack.clear();
        let techs: HashSet<String> = ["python".to_string()].into_iter().collect();
        assert_eq!(technology_difference(&empty, &techs), 1.0);
    }

    #[test]
    fn test_unresolvable_top_candidate_fails_open() {
        let d = engine().decide(&[candidate("TRAD-099", 0.9)], &mirror_of_first(), &library());
        assert!(d.create_new);
        assert_eq!(trigger(&d), Some(CreateTrigger::FactorsUnavailable));
        assert!(d.factors.is_none());
    }

    #[test]
    fn test_log_failure_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PatternStore::new(dir.path());
        store.load().unwrap();
        let e = DecisionEngine::new(DecisionThresholds::default(), Some(Box::new(FailingLog)));
        let d = e.should_create_new_pattern(&[], &Requirement::new("Reconcile bank statements"), &mut store);
        assert!(!d.create_new);
        assert!(matches!(d.action, DecisionAction::Hold { .. }));
    }

    #[test]
    fn test_enhancement_is_applied_and_logged() {
        let dir = tempfile::tempdir().unwrap();
        for p in library() {
            write(dir.path(), &p);
        }
        let mut store = PatternStore::new(dir.path());
        store.load().unwrap();

        let log = MemoryLog::default();
        let e = DecisionEngine::new(DecisionThresholds::default(), Some(Box::new(log.clone())));
        let mut req = mirror_of_first();
        req.analysis.insert("insights".into(), Value::from("Vendors send scans twice a day"));

        let d = e.should_create_new_pattern(&[candidate("PAT-001", 0.85)], &req, &mut store);
        assert!(d.enhanced);
        assert_eq!(log.0.lock().unwrap().len(), 1);
        let stored = store.get(&"PAT-001".parse().unwrap()).unwrap();
        assert_eq!(stored.insights.as_deref(), Some("Vendors send scans twice a day"));
    }
}
