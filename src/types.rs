//! Core types for the pattern advisor
//!
//! Patterns are the persisted knowledge base; requirements, candidates and
//! recommendations are per-invocation values that never outlive a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Minimum number of non-blank characters a requirement description needs.
pub const MIN_DESCRIPTION_LEN: usize = 10;

/// Family a pattern belongs to, encoded as the identifier prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// `PAT-` general automation patterns
    General,
    /// `APAT-` agentic (LLM/agent driven) patterns
    Agentic,
    /// `TRAD-` traditional scripted/RPA patterns
    Traditional,
}

impl PatternKind {
    pub const ALL: [PatternKind; 3] = [
        PatternKind::General,
        PatternKind::Agentic,
        PatternKind::Traditional,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            PatternKind::General => "PAT",
            PatternKind::Agentic => "APAT",
            PatternKind::Traditional => "TRAD",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.prefix() == prefix)
    }
}

/// Pattern identifier: `<PREFIX>-<NNN>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PatternId {
    kind: PatternKind,
    number: u16,
}

impl PartialOrd for PatternKind {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PatternKind {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.prefix().cmp(other.prefix())
    }
}

impl PatternId {
    /// Largest number representable in the three-digit suffix.
    pub const MAX_NUMBER: u16 = 999;

    pub fn new(kind: PatternKind, number: u16) -> Option<Self> {
        (number <= Self::MAX_NUMBER).then_some(Self { kind, number })
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    pub fn number(&self) -> u16 {
        self.number
    }
}

impl FromStr for PatternId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, digits) = s
            .split_once('-')
            .ok_or_else(|| format!("'{}' is not of the form PREFIX-NNN", s))?;
        let kind = PatternKind::from_prefix(prefix)
            .ok_or_else(|| format!("unknown pattern prefix '{}'", prefix))?;
        if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("'{}' must end in exactly three digits", s));
        }
        let number = digits
            .parse::<u16>()
            .map_err(|e| format!("bad pattern number in '{}': {}", s, e))?;
        Ok(Self { kind, number })
    }
}

impl TryFrom<String> for PatternId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PatternId> for String {
    fn from(id: PatternId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:03}", self.kind.prefix(), self.number)
    }
}

/// How much of a process can be automated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feasibility {
    #[serde(rename = "Automatable")]
    Automatable,
    #[serde(rename = "Partially Automatable")]
    PartiallyAutomatable,
    #[serde(rename = "Not Automatable")]
    NotAutomatable,
}

impl Feasibility {
    /// Lenient parse for advisory input. Canonical names, snake_case and a
    /// few common spellings are accepted; anything else is `None`.
    pub fn parse_loose(raw: &str) -> Option<Self> {
        let norm: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '_' || c == '-' { ' ' } else { c })
            .collect();
        match norm.split_whitespace().collect::<Vec<_>>().join(" ").as_str() {
            "automatable" | "fully automatable" | "yes" => Some(Feasibility::Automatable),
            "partially automatable" | "partial" | "partially" => {
                Some(Feasibility::PartiallyAutomatable)
            }
            "not automatable" | "no" | "manual" => Some(Feasibility::NotAutomatable),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Feasibility::Automatable => "Automatable",
            Feasibility::PartiallyAutomatable => "Partially Automatable",
            Feasibility::NotAutomatable => "Not Automatable",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Feasibility::Automatable => 2,
            Feasibility::PartiallyAutomatable => 1,
            Feasibility::NotAutomatable => 0,
        }
    }

    /// One step less automatable; `NotAutomatable` stays put.
    pub fn downgrade(&self) -> Self {
        match self {
            Feasibility::Automatable => Feasibility::PartiallyAutomatable,
            _ => Feasibility::NotAutomatable,
        }
    }

    /// The less automatable of the two.
    pub fn min(self, other: Self) -> Self {
        if other.rank() < self.rank() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Feasibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Constraints a pattern declares about its own deployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternConstraints {
    #[serde(default, alias = "banned_technologies")]
    pub banned_tools: Vec<String>,
    #[serde(default)]
    pub required_integrations: Vec<String>,
}

/// A stored, reusable automation solution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_id: PatternId,
    pub name: String,
    pub description: String,
    pub feasibility: Feasibility,
    pub pattern_type: Vec<String>,
    pub tech_stack: Vec<String>,
    pub confidence_score: f64,
    pub constraints: PatternConstraints,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compliance: Vec<String>,

    // Enhancement fields: set once, never overwritten
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insights: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenges: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_approach: Option<String>,

    // Volatile bookkeeping, not part of the pattern's meaning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Pattern {
    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name is empty".to_string());
        }
        if self.description.trim().is_empty() {
            return Err("description is empty".to_string());
        }
        if !self.confidence_score.is_finite() || !(0.0..=1.0).contains(&self.confidence_score) {
            return Err(format!(
                "confidence_score {} outside [0, 1]",
                self.confidence_score
            ));
        }
        if self.domain.trim().is_empty() {
            return Err("domain is empty".to_string());
        }
        let mut seen = HashSet::new();
        for tech in &self.tech_stack {
            if !seen.insert(tech.to_lowercase()) {
                return Err(format!("duplicate technology '{}' in tech_stack", tech));
            }
        }
        Ok(())
    }

    /// Lowercased technology names for set comparisons.
    pub fn tech_set(&self) -> HashSet<String> {
        self.tech_stack.iter().map(|t| t.to_lowercase()).collect()
    }

    /// Fill in enhancement fields that are still empty. Returns whether
    /// anything changed.
    pub fn merge_enhancement(&mut self, enhancement: &Enhancement) -> bool {
        fn fill(slot: &mut Option<String>, value: &Option<String>) -> bool {
            let empty = slot.as_deref().map(|s| s.trim().is_empty()).unwrap_or(true);
            match value {
                Some(v) if empty && !v.trim().is_empty() => {
                    *slot = Some(v.trim().to_string());
                    true
                }
                _ => false,
            }
        }

        let a = fill(&mut self.insights, &enhancement.insights);
        let b = fill(&mut self.challenges, &enhancement.challenges);
        let c = fill(&mut self.recommended_approach, &enhancement.recommended_approach);
        a || b || c
    }
}

/// Additive information for an existing pattern
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enhancement {
    pub insights: Option<String>,
    pub challenges: Option<String>,
    pub recommended_approach: Option<String>,
}

impl Enhancement {
    pub fn is_empty(&self) -> bool {
        self.insights.is_none() && self.challenges.is_none() && self.recommended_approach.is_none()
    }
}

/// Hard constraints a requirement imposes on candidate patterns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default)]
    pub banned_technologies: Vec<String>,
    #[serde(default)]
    pub required_integrations: Vec<String>,
}

/// A free-text process description with optional structured hints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requirement {
    pub description: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub pattern_types: Vec<String>,
    #[serde(default)]
    pub compliance: Vec<String>,
    #[serde(default)]
    pub integrations: Vec<String>,
    #[serde(default)]
    pub banned_technologies: Vec<String>,
    /// Technologies the requester already named
    #[serde(default)]
    pub tech_stack: Vec<String>,
    /// Transactions or items per day
    #[serde(default)]
    pub daily_volume: Option<u64>,
    #[serde(default)]
    pub sla_hours: Option<f64>,
    #[serde(default)]
    pub workflow_steps: Vec<String>,
    /// "low" | "medium" | "high"
    #[serde(default)]
    pub data_sensitivity: Option<String>,
    #[serde(default)]
    pub human_review: Option<bool>,
    /// Externally computed analysis. Advisory only; see [`crate::confidence`].
    #[serde(default)]
    pub analysis: Map<String, Value>,
}

impl Requirement {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let len = self.description.chars().filter(|c| !c.is_whitespace()).count();
        if len < MIN_DESCRIPTION_LEN {
            return Err(format!(
                "description needs at least {} non-blank characters, got {}",
                MIN_DESCRIPTION_LEN, len
            ));
        }
        Ok(())
    }

    pub fn constraints(&self) -> Constraints {
        Constraints {
            banned_technologies: self.banned_technologies.clone(),
            required_integrations: self.integrations.clone(),
        }
    }

    /// Domain hint, lowercased, `None` when blank.
    pub fn domain_hint(&self) -> Option<String> {
        self.domain
            .as_deref()
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
    }

    /// Externally supplied feasibility verdict, if present and valid.
    pub fn external_feasibility(&self) -> Option<Feasibility> {
        ["feasibility", "llm_feasibility"]
            .iter()
            .filter_map(|k| self.analysis.get(*k))
            .find_map(|v| v.as_str().and_then(Feasibility::parse_loose))
    }

    /// Externally suggested technologies.
    pub fn suggested_tech_stack(&self) -> Vec<String> {
        ["suggested_tech_stack", "tech_stack"]
            .iter()
            .filter_map(|k| self.analysis.get(*k))
            .find_map(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str())
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Externally supplied explanation text.
    pub fn explanation(&self) -> Option<String> {
        ["explanation", "reasoning", "rationale"]
            .iter()
            .filter_map(|k| self.analysis.get(*k))
            .find_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Insight/challenge/approach fields carried by the external analysis.
    pub fn enhancement(&self) -> Enhancement {
        let text = |keys: &[&str]| -> Option<String> {
            keys.iter().filter_map(|k| self.analysis.get(*k)).find_map(|v| match v {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Array(items) => {
                    let parts: Vec<&str> = items.iter().filter_map(|i| i.as_str()).collect();
                    (!parts.is_empty()).then(|| parts.join("; "))
                }
                _ => None,
            })
        };
        Enhancement {
            insights: text(&["insights", "llm_insights"]),
            challenges: text(&["challenges", "llm_challenges"]),
            recommended_approach: text(&["recommended_approach", "llm_recommended_approach"]),
        }
    }
}

/// A scored pattern candidate. Audit trail only, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub pattern_id: PatternId,
    pub tag_score: f64,
    pub vector_score: f64,
    pub blended_score: f64,
    pub pattern_confidence: f64,
    pub rationale: String,
}

/// Final output for one pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub pattern_id: PatternId,
    pub feasibility: Feasibility,
    pub confidence: f64,
    pub tech_stack: Vec<String>,
    pub rationale: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_id_roundtrip() {
        let id: PatternId = "APAT-007".parse().unwrap();
        assert_eq!(id.kind(), PatternKind::Agentic);
        assert_eq!(id.number(), 7);
        assert_eq!(id.to_string(), "APAT-007");
    }

    #[test]
    fn test_pattern_id_rejects_malformed() {
        assert!("PAT-1".parse::<PatternId>().is_err());
        assert!("PAT-1000".parse::<PatternId>().is_err());
        assert!("XYZ-001".parse::<PatternId>().is_err());
        assert!("PAT001".parse::<PatternId>().is_err());
        assert!(PatternId::new(PatternKind::General, 1000).is_none());
    }

    #[test]
    fn test_feasibility_parse_loose() {
        assert_eq!(
            Feasibility::parse_loose("partially_automatable"),
            Some(Feasibility::PartiallyAutomatable)
        );
        assert_eq!(Feasibility::parse_loose(" Automatable "), Some(Feasibility::Automatable));
        assert_eq!(Feasibility::parse_loose("maybe"), None);
    }

    #[test]
    fn test_feasibility_downgrade_never_upgrades() {
        assert_eq!(Feasibility::Automatable.downgrade(), Feasibility::PartiallyAutomatable);
        assert_eq!(Feasibility::NotAutomatable.downgrade(), Feasibility::NotAutomatable);
        assert_eq!(
            Feasibility::NotAutomatable.min(Feasibility::Automatable),
            Feasibility::NotAutomatable
        );
    }

    #[test]
    fn test_feasibility_rejects_unknown_variant() {
        let result: Result<Feasibility, _> = serde_json::from_str("\"Sometimes\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_enhancement_is_additive() {
        let mut pattern: Pattern = serde_json::from_value(serde_json::json!({
            "pattern_id": "PAT-001",
            "name": "Invoice intake",
            "description": "Extract invoice fields",
            "feasibility": "Automatable",
            "pattern_type": ["document_processing"],
            "tech_stack": ["Python"],
            "confidence_score": 0.8,
            "constraints": {},
            "domain": "finance",
            "insights": "Existing insight"
        }))
        .unwrap();

        let changed = pattern.merge_enhancement(&Enhancement {
            insights: Some("New insight".to_string()),
            challenges: Some("Vendor formats vary".to_string()),
            recommended_approach: None,
        });

        assert!(changed);
        assert_eq!(pattern.insights.as_deref(), Some("Existing insight"));
        assert_eq!(pattern.challenges.as_deref(), Some("Vendor formats vary"));
        assert!(pattern.recommended_approach.is_none());
        assert!(!pattern.merge_enhancement(&Enhancement::default()));
    }

    #[test]
    fn test_requirement_validation() {
        assert!(Requirement::new("too short").validate().is_err());
        assert!(Requirement::new("Process incoming invoices").validate().is_ok());
    }

    #[test]
    fn test_requirement_enhancement_from_analysis() {
        let mut req = Requirement::new("Process incoming invoices");
        req.analysis.insert("llm_insights".into(), serde_json::json!(["a", "b"]));
        req.analysis.insert("challenges".into(), serde_json::json!("c"));
        let e = req.enhancement();
        assert_eq!(e.insights.as_deref(), Some("a; b"));
        assert_eq!(e.challenges.as_deref(), Some("c"));
        assert!(e.recommended_approach.is_none());
    }
}
