//! Multi-signal pattern matching
//!
//! Three signals per pattern:
//! 1. Tag score - structured criteria (domain, pattern types) that match
//! 2. Vector score - embedding similarity of the descriptions
//! 3. Stored confidence - how much the pattern itself is trusted
//!
//! Tag filtering decides who is in the race, the blend decides the order,
//! and hard constraints get the last word.

use crate::config::MatchWeights;
use crate::heuristics::lower_set;
use crate::index::VectorIndex;
use crate::types::{Constraints, MatchCandidate, Pattern, PatternId, Requirement};
use std::collections::HashMap;

/// Tag score given to every pattern when the requirement has no criteria
pub const NEUTRAL_TAG_SCORE: f64 = 0.5;

/// A pattern that survived tag filtering
#[derive(Debug, Clone, PartialEq)]
pub struct TagCandidate {
    pub pattern_id: PatternId,
    pub tag_score: f64,
    /// Human-readable list of what matched
    pub matched: Vec<String>,
}

/// Score patterns by the fraction of structured criteria they satisfy.
///
/// Criteria are the requirement's domain (one criterion) and each of its
/// pattern types (one criterion each). No criteria: everyone gets
/// [`NEUTRAL_TAG_SCORE`]. Criteria but zero matches: excluded.
pub fn filter_by_tags(requirement: &Requirement, patterns: &[Pattern]) -> Vec<TagCandidate> {
    let domain = requirement.domain_hint();
    let wanted_types = lower_set(&requirement.pattern_types);
    let total = domain.is_some() as usize + wanted_types.len();

    if total == 0 {
        return patterns
            .iter()
            .map(|p| TagCandidate {
                pattern_id: p.pattern_id,
                tag_score: NEUTRAL_TAG_SCORE,
                matched: Vec::new(),
            })
            .collect();
    }

    patterns
        .iter()
        .filter_map(|p| {
            let mut matched = Vec::new();
            if let Some(d) = &domain {
                if p.domain.trim().to_lowercase() == *d {
                    matched.push(format!("domain {}", d));
                }
            }
            let have = lower_set(&p.pattern_type);
            let mut overlap: Vec<&String> = wanted_types.intersection(&have).collect();
            overlap.sort();
            matched.extend(overlap.into_iter().map(|t| format!("type {}", t)));

            if matched.is_empty() {
                return None;
            }
            Some(TagCandidate {
                pattern_id: p.pattern_id,
                tag_score: matched.len() as f64 / total as f64,
                matched,
            })
        })
        .collect()
}

/// Weighted blend of the three signals, best first. A missing vector score
/// counts as 0. The sort is stable, so ties keep tag-filter order.
pub fn blend(
    tag_candidates: &[TagCandidate],
    vector_scores: &HashMap<PatternId, f64>,
    pattern_confidences: &HashMap<PatternId, f64>,
    weights: &MatchWeights,
) -> Vec<MatchCandidate> {
    let mut blended: Vec<MatchCandidate> = tag_candidates
        .iter()
        .map(|tc| {
            let vector_score = vector_scores.get(&tc.pattern_id).copied().unwrap_or(0.0);
            let pattern_confidence = pattern_confidences.get(&tc.pattern_id).copied().unwrap_or(0.0);
            let blended_score = weights.tag * tc.tag_score
                + weights.vector * vector_score
                + weights.confidence * pattern_confidence;

            let criteria = if tc.matched.is_empty() {
                "no structured criteria".to_string()
            } else {
                tc.matched.join(", ")
            };
            MatchCandidate {
                pattern_id: tc.pattern_id,
                tag_score: tc.tag_score,
                vector_score,
                blended_score,
                pattern_confidence,
                rationale: format!(
                    "tag {:.2} ({}), vector {:.2}, stored confidence {:.2} -> blended {:.2}",
                    tc.tag_score, criteria, vector_score, pattern_confidence, blended_score
                ),
            }
        })
        .collect();

    blended.sort_by(|a, b| b.blended_score.total_cmp(&a.blended_score));
    blended
}

/// Drop candidates that violate hard constraints:
/// - the pattern's own constraints name a technology the requirement bans,
/// - the pattern's stack uses a technology the requirement bans, or
/// - the pattern itself bans an integration the requirement needs.
pub fn apply_constraints(
    candidates: Vec<MatchCandidate>,
    patterns: &[Pattern],
    constraints: &Constraints,
) -> Vec<MatchCandidate> {
    let banned = lower_set(&constraints.banned_technologies);
    let required = lower_set(&constraints.required_integrations);
    if banned.is_empty() && required.is_empty() {
        return candidates;
    }
    let by_id: HashMap<PatternId, &Pattern> = patterns.iter().map(|p| (p.pattern_id, p)).collect();

    candidates
        .into_iter()
        .filter(|c| {
            let Some(pattern) = by_id.get(&c.pattern_id) else {
                return false;
            };
            let self_banned = lower_set(&pattern.constraints.banned_tools);
            if let Some(tech) = self_banned.intersection(&banned).next() {
                tracing::debug!(pattern_id = %c.pattern_id, tech = %tech, "dropped: pattern declares a banned technology");
                return false;
            }
            if let Some(tech) = pattern.tech_set().intersection(&banned).next() {
                tracing::debug!(pattern_id = %c.pattern_id, tech = %tech, "dropped: uses banned technology");
                return false;
            }
            if let Some(tool) = self_banned.intersection(&required).next() {
                tracing::debug!(pattern_id = %c.pattern_id, tool = %tool, "dropped: pattern bans a required integration");
                return false;
            }
            true
        })
        .collect()
}

/// Runs the full matching pass against a pattern set and its index
pub struct Matcher {
    weights: MatchWeights,
    top_k: usize,
}

impl Matcher {
    pub fn new(weights: MatchWeights, top_k: usize) -> Self {
        Self { weights, top_k }
    }

    /// Vector scores keyed by pattern. `index` must be built over
    /// `patterns` descriptions in slice order; hits whose text disagrees
    /// with the pattern at that position are ignored.
    pub fn vector_scores(
        &self,
        requirement: &Requirement,
        patterns: &[Pattern],
        index: &VectorIndex,
    ) -> HashMap<PatternId, f64> {
        let mut scores = HashMap::new();
        for hit in index.search(&requirement.description, self.top_k) {
            match patterns.get(hit.position) {
                Some(p) if p.description == hit.text => {
                    scores.insert(p.pattern_id, hit.similarity);
                }
                _ => tracing::warn!(position = hit.position, "index out of sync with pattern set"),
            }
        }
        scores
    }

    /// Tag filter, blend, then constraints.
    pub fn match_requirement(
        &self,
        requirement: &Requirement,
        patterns: &[Pattern],
        index: &VectorIndex,
    ) -> Vec<MatchCandidate> {
        if patterns.is_empty() {
            return Vec::new();
        }
        let tagged = filter_by_tags(requirement, patterns);
        let vector_scores = self.vector_scores(requirement, patterns, index);
        let confidences: HashMap<PatternId, f64> = patterns
            .iter()
            .map(|p| (p.pattern_id, p.confidence_score))
            .collect();

        let blended = blend(&tagged, &vector_scores, &confidences, &self.weights);
        // An explicitly requested stack is needed just like an integration
        let mut constraints = requirement.constraints();
        constraints
            .required_integrations
            .extend(requirement.tech_stack.iter().cloned());
        let candidates = apply_constraints(blended, patterns, &constraints);
        tracing::debug!(
            patterns = patterns.len(),
            tagged = tagged.len(),
            candidates = candidates.len(),
            "matching complete"
        );
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::store::fixtures::pattern;
    use std::sync::Arc;

    fn id(s: &str) -> PatternId {
        s.parse().unwrap()
    }

    fn library() -> Vec<Pattern> {
        vec![
            pattern("PAT-001", "finance", &["document_processing"], &["Python", "Tesseract OCR"], 0.9),
            pattern("PAT-002", "support", &["conversational_agent"], &["LangChain"], 0.7),
            pattern("PAT-003", "finance", &["data_integration"], &["Airflow", "PostgreSQL"], 0.6),
        ]
    }

    #[test]
    fn test_no_criteria_gives_neutral_score() {
        let req = Requirement::new("Automate something useful please");
        let tagged = filter_by_tags(&req, &library());
        assert_eq!(tagged.len(), 3);
        assert!(tagged.iter().all(|t| t.tag_score == NEUTRAL_TAG_SCORE));
    }

    #[test]
    fn test_criteria_fraction_and_exclusion() {
        let mut req = Requirement::new("Extract totals from scanned invoices");
        req.domain = Some("Finance".to_string());
        req.pattern_types = vec!["document_processing".to_string()];

        let tagged = filter_by_tags(&req, &library());
        assert_eq!(tagged.len(), 2);
        assert_eq!(tagged[0].pattern_id, id("PAT-001"));
        assert_eq!(tagged[0].tag_score, 1.0);
        assert_eq!(tagged[1].pattern_id, id("PAT-003"));
        assert_eq!(tagged[1].tag_score, 0.5);
    }

    #[test]
    fn test_blend_example() {
        let tagged = vec![TagCandidate { pattern_id: id("PAT-001"), tag_score: 0.8, matched: vec![] }];
        let vectors = HashMap::from([(id("PAT-001"), 0.9)]);
        let confidences = HashMap::from([(id("PAT-001"), 0.9)]);
        let out = blend(&tagged, &vectors, &confidences, &MatchWeights::default());
        assert!((out[0].blended_score - 0.87).abs() < 1e-9);
    }

    #[test]
    fn test_blend_missing_vector_and_stable_ties() {
        let tagged = vec![
            TagCandidate { pattern_id: id("PAT-002"), tag_score: 0.5, matched: vec![] },
            TagCandidate { pattern_id: id("PAT-001"), tag_score: 0.5, matched: vec![] },
            TagCandidate { pattern_id: id("PAT-003"), tag_score: 1.0, matched: vec![] },
        ];
        let confidences = HashMap::from([(id("PAT-001"), 0.5), (id("PAT-002"), 0.5), (id("PAT-003"), 0.5)]);
        let out = blend(&tagged, &HashMap::new(), &confidences, &MatchWeights::default());
        let order: Vec<String> = out.iter().map(|c| c.pattern_id.to_string()).collect();
        assert_eq!(order, vec!["PAT-003", "PAT-002", "PAT-001"]);
        assert_eq!(out[1].vector_score, 0.0);
    }

    #[test]
    fn test_apply_constraints() {
        let mut patterns = library();
        patterns[1].constraints.banned_tools = vec!["Zendesk".to_string()];
        let candidates = blend(
            &filter_by_tags(&Requirement::new("Anything goes here really"), &patterns),
            &HashMap::new(),
            &HashMap::new(),
            &MatchWeights::default(),
        );
        let constraints = Constraints {
            banned_technologies: vec!["postgresql".to_string()],
            required_integrations: vec!["zendesk".to_string()],
        };
        let kept = apply_constraints(candidates, &patterns, &constraints);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].pattern_id, id("PAT-001"));
    }

    #[test]
    fn test_pattern_declared_ban_matches_requirement_ban() {
        let mut patterns = vec![pattern("PAT-001", "ops", &["workflow"], &["Python"], 0.8)];
        patterns[0].constraints.banned_tools = vec!["Zapier".to_string()];
        let candidates = || {
            blend(
                &filter_by_tags(&Requirement::new("Sync leads between two systems"), &patterns),
                &HashMap::new(),
                &HashMap::new(),
                &MatchWeights::default(),
            )
        };

        let banned = Constraints {
            banned_technologies: vec!["zapier".to_string()],
            required_integrations: vec![],
        };
        assert!(apply_constraints(candidates(), &patterns, &banned).is_empty());

        let disjoint = Constraints {
            banned_technologies: vec!["Make".to_string()],
            required_integrations: vec![],
        };
        let kept = apply_constraints(candidates(), &patterns, &disjoint);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].pattern_id, id("PAT-001"));
    }

    #[test]
    fn test_match_requirement_honors_requirement_bans() {
        let mut patterns = library();
        patterns[2].constraints.banned_tools = vec!["Zapier".to_string()];
        let index = VectorIndex::new(Arc::new(HashingEmbedder::default()));
        let mut req = Requirement::new("Move finance data between systems nightly");
        req.banned_technologies = vec!["Zapier".to_string()];

        let out = Matcher::new(MatchWeights::default(), 10).match_requirement(&req, &patterns, &index);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|c| c.pattern_id != id("PAT-003")));
    }

    #[test]
    fn test_empty_library() {
        let matcher = Matcher::new(MatchWeights::default(), 10);
        let index = VectorIndex::new(Arc::new(HashingEmbedder::default()));
        let out = matcher.match_requirement(&Requirement::new("Route inbound emails"), &[], &index);
        assert!(out.is_empty());
    }

    #[test]
    fn test_match_requirement_uses_vectors() {
        let patterns = library();
        let mut index = VectorIndex::new(Arc::new(HashingEmbedder::default()));
        let texts: Vec<String> = patterns.iter().map(|p| p.description.clone()).collect();
        index.build(&texts).unwrap();

        let matcher = Matcher::new(MatchWeights::default(), 10);
        let req = Requirement::new(patterns[1].description.clone());
        let out = matcher.match_requirement(&req, &patterns, &index);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].pattern_id, id("PAT-002"));
        assert!((out[0].vector_score - 1.0).abs() < 1e-6);
    }
}
