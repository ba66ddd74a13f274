//! Pattern synthesis for requirements the library does not cover
//!
//! A new pattern is derived from the requirement text with keyword tables,
//! given a fresh identifier and written through the store's gated write
//! path. Nothing here calls out to a model; external analysis on the
//! requirement is used when it is present and valid.

use crate::confidence;
use crate::error::{AdvisorError, Result};
use crate::heuristics::{
    detect_all, detect_best, is_physical_task, significant_words, KeywordTable, NormalizedText,
    COMPLEXITY_KEYWORDS,
};
use crate::store::PatternStore;
use crate::types::{Feasibility, Pattern, PatternConstraints, PatternId, PatternKind, Requirement};
use chrono::Utc;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::HashSet;

pub const AUTOMATION_TYPES: KeywordTable = &[
    (
        "agentic_ai",
        &["agent", "autonomous", "llm", "language model", "reasoning", "decide on its own"],
    ),
    (
        "conversational",
        &["chatbot", "conversation", "chat with", "virtual assistant", "answer questions"],
    ),
    (
        "document_processing",
        &["document", "invoice", "pdf", "ocr", "scanned", "receipt", "contract", "form"],
    ),
    (
        "data_integration",
        &["sync", "integrat", "etl", "import", "export", "migrat", "api"],
    ),
    (
        "workflow_automation",
        &["approval", "workflow", "route", "escalat", "onboard", "assign"],
    ),
    (
        "reporting_analytics",
        &["report", "dashboard", "analytics", "metric", "forecast", "kpi"],
    ),
    (
        "communication",
        &["email", "notif", "reminder", "sms", "newsletter"],
    ),
    (
        "rpa",
        &["screen", "click", "copy paste", "desktop application", "legacy ui", "mainframe"],
    ),
];

/// Automation types whose patterns get the agentic prefix
const AGENTIC_TYPES: &[&str] = &["agentic_ai", "conversational"];
/// Automation types whose patterns get the traditional prefix
const TRADITIONAL_TYPES: &[&str] = &["rpa"];

pub const DATA_FLOW: KeywordTable = &[
    ("real_time", &["real time", "instant", "immediately", "live", "stream"]),
    ("event_driven", &["trigger", "upon", "arrives", "webhook", "as soon as", "whenever"]),
    ("batch", &["nightly", "daily", "every day", "weekly", "monthly", "batch", "end of day"]),
];

pub const INTEGRATION_POINTS: KeywordTable = &[
    ("email", &["email", "inbox", "outlook", "gmail"]),
    ("crm", &["crm", "salesforce", "hubspot"]),
    ("erp", &["erp", "sap", "netsuite", "oracle"]),
    ("database", &["database", "sql", "postgres", "mysql"]),
    ("spreadsheet", &["excel", "spreadsheet", "google sheets", "csv"]),
    ("api", &["api", "webhook", "rest"]),
    ("file_storage", &["sharepoint", "s3", "drive", "file share", "ftp"]),
    ("messaging", &["slack", "teams", "sms", "whatsapp"]),
    ("ticketing", &["ticket", "zendesk", "servicenow", "jira"]),
];

pub const USER_INTERACTION: KeywordTable = &[
    ("human_in_the_loop", &["approv", "review", "sign off", "manual check", "verify"]),
    ("self_service", &["portal", "self service", "chatbot", "customer facing"]),
    ("fully_automated", &["automatic", "unattended", "no human", "hands off"]),
];

pub const PROCESSING_TYPE: KeywordTable = &[
    (
        "ml_inference",
        &["classif", "predict", "extract", "sentiment", "recogni", "summari"],
    ),
    ("rules_based", &["rule", "threshold", "validat", "match", "policy"]),
    ("transformation", &["transform", "convert", "format", "normaliz", "clean"]),
];

pub const SCALABILITY: KeywordTable = &[
    ("high", &["millions", "thousands", "high volume", "enterprise", "global"]),
    ("medium", &["hundreds", "department", "growing", "several teams"]),
];

pub const SECURITY_NEEDS: KeywordTable = &[
    ("pii", &["personal data", "pii", "ssn", "social security", "customer data"]),
    ("phi", &["patient", "medical", "health record", "hipaa"]),
    ("financial", &["payment", "credit card", "bank", "payroll"]),
    ("credentials", &["password", "credential", "secret", "api key"]),
];

/// Starting technology stack per automation type
pub const STACK_BY_AUTOMATION_TYPE: &[(&str, &[&str])] = &[
    ("agentic_ai", &["Python", "LangChain", "OpenAI API", "PostgreSQL"]),
    ("conversational", &["Python", "Rasa", "OpenAI API", "Redis"]),
    ("document_processing", &["Python", "Tesseract OCR", "spaCy", "PostgreSQL"]),
    ("data_integration", &["Python", "Airflow", "PostgreSQL", "Docker"]),
    ("workflow_automation", &["Camunda", "Node.js", "PostgreSQL", "Docker"]),
    ("reporting_analytics", &["Python", "dbt", "Snowflake", "Metabase"]),
    ("communication", &["Python", "Celery", "SendGrid", "Redis"]),
    ("rpa", &["UiPath", "Python", "SQL Server"]),
];

pub const GENERIC_STACK: &[&str] = &["Python", "FastAPI", "PostgreSQL", "Docker"];

/// Fallback automation type when nothing in the text matches
const GENERAL_AUTOMATION: &str = "general_automation";

/// Heuristic reading of a requirement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequirementAnalysis {
    pub automation_type: String,
    pub data_flow: String,
    pub integration_points: Vec<String>,
    pub user_interaction: String,
    pub processing_type: String,
    pub scalability: String,
    pub security_needs: Vec<String>,
    pub complexity_hits: usize,
    pub physical: bool,
}

impl RequirementAnalysis {
    /// Analysis that assumes nothing beyond the physical-task check.
    pub fn minimal(requirement: &Requirement) -> Self {
        let text = NormalizedText::new(&requirement.description);
        Self {
            automation_type: GENERAL_AUTOMATION.to_string(),
            data_flow: "on_demand".to_string(),
            integration_points: Vec::new(),
            user_interaction: "minimal".to_string(),
            processing_type: "rules_based".to_string(),
            scalability: "low".to_string(),
            security_needs: Vec::new(),
            complexity_hits: 0,
            physical: is_physical_task(&text),
        }
    }

    /// Full keyword analysis. `None` when the text has no content words to
    /// work with.
    pub fn analyze(requirement: &Requirement) -> Option<Self> {
        if significant_words(&requirement.description).is_empty() {
            return None;
        }
        let joined = std::iter::once(requirement.description.as_str())
            .chain(requirement.workflow_steps.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        let text = NormalizedText::new(&joined);

        let scalability = match requirement.daily_volume {
            Some(v) if v >= 100_000 => "high",
            Some(v) if v >= 1_000 => "medium",
            Some(_) => "low",
            None => detect_best(&text, SCALABILITY).unwrap_or("low"),
        };

        let mut integration_points: Vec<String> = detect_all(&text, INTEGRATION_POINTS)
            .into_iter()
            .map(String::from)
            .collect();
        for explicit in &requirement.integrations {
            let lower = explicit.trim().to_lowercase();
            if !lower.is_empty() && !integration_points.contains(&lower) {
                integration_points.push(lower);
            }
        }

        let mut security_needs: Vec<String> = detect_all(&text, SECURITY_NEEDS)
            .into_iter()
            .map(String::from)
            .collect();
        for regime in &requirement.compliance {
            let lower = regime.trim().to_lowercase();
            if !lower.is_empty() && !security_needs.contains(&lower) {
                security_needs.push(lower);
            }
        }
        if requirement
            .data_sensitivity
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("high"))
            && !security_needs.iter().any(|s| s == "sensitive_data")
        {
            security_needs.push("sensitive_data".to_string());
        }

        let user_interaction = match requirement.human_review {
            Some(true) => "human_in_the_loop",
            _ => detect_best(&text, USER_INTERACTION).unwrap_or("minimal"),
        };

        Some(Self {
            automation_type: detect_best(&text, AUTOMATION_TYPES)
                .unwrap_or(GENERAL_AUTOMATION)
                .to_string(),
            data_flow: detect_best(&text, DATA_FLOW).unwrap_or("on_demand").to_string(),
            integration_points,
            user_interaction: user_interaction.to_string(),
            processing_type: detect_best(&text, PROCESSING_TYPE)
                .unwrap_or("rules_based")
                .to_string(),
            scalability: scalability.to_string(),
            security_needs,
            complexity_hits: text.count_hits(COMPLEXITY_KEYWORDS),
            physical: is_physical_task(&text),
        })
    }

    pub fn kind(&self) -> PatternKind {
        let t = self.automation_type.as_str();
        if AGENTIC_TYPES.contains(&t) {
            PatternKind::Agentic
        } else if TRADITIONAL_TYPES.contains(&t) {
            PatternKind::Traditional
        } else {
            PatternKind::General
        }
    }

    fn summary(&self) -> String {
        let list = |items: &[String]| {
            if items.is_empty() {
                "none detected".to_string()
            } else {
                items.join(", ")
            }
        };
        format!(
            "Data flow: {}; integrations: {}; user interaction: {}; processing: {}; scalability: {}; security: {}",
            self.data_flow,
            list(&self.integration_points),
            self.user_interaction,
            self.processing_type,
            self.scalability,
            list(&self.security_needs),
        )
    }
}

/// Pick the next identifier for `kind`: highest known number plus one.
/// When the known ids cannot be read or the range is exhausted, one random
/// pick among the unused numbers is tried before giving up.
pub fn allocate_id(kind: PatternKind, store: &PatternStore) -> Result<PatternId> {
    let known = match store.known_ids() {
        Ok(known) => {
            let next = known
                .iter()
                .filter(|id| id.kind() == kind)
                .map(|id| id.number() + 1)
                .max()
                .unwrap_or(1);
            if let Some(id) = PatternId::new(kind, next) {
                return Ok(id);
            }
            tracing::warn!(prefix = kind.prefix(), "identifier range exhausted, trying random fallback");
            known
        }
        Err(e) => {
            tracing::warn!(prefix = kind.prefix(), error = %e, "id scan failed, trying random fallback");
            store.patterns().iter().map(|p| p.pattern_id).collect()
        }
    };
    random_unused(kind, &known)
}

fn random_unused(kind: PatternKind, known: &HashSet<PatternId>) -> Result<PatternId> {
    let free: Vec<PatternId> = (1..=PatternId::MAX_NUMBER)
        .filter_map(|n| PatternId::new(kind, n))
        .filter(|id| !known.contains(id))
        .collect();
    free.choose(&mut rand::thread_rng())
        .copied()
        .ok_or_else(|| AdvisorError::IdAllocation {
            prefix: kind.prefix().to_string(),
        })
}

/// Stack for the automation type, merged behind the explicit and suggested
/// stacks, minus anything banned. Case-insensitive de-duplication.
pub fn build_tech_stack(requirement: &Requirement, automation_type: &str) -> Vec<String> {
    let base: &[&str] = STACK_BY_AUTOMATION_TYPE
        .iter()
        .find(|(t, _)| *t == automation_type)
        .map(|(_, stack)| *stack)
        .unwrap_or(GENERIC_STACK);
    let banned: HashSet<String> = requirement
        .banned_technologies
        .iter()
        .map(|b| b.trim().to_lowercase())
        .collect();

    let mut seen = HashSet::new();
    requirement
        .tech_stack
        .iter()
        .cloned()
        .chain(requirement.suggested_tech_stack())
        .chain(base.iter().map(|s| s.to_string()))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .filter(|t| !banned.contains(&t.to_lowercase()))
        .filter(|t| seen.insert(t.to_lowercase()))
        .collect()
}

fn heuristic_feasibility(analysis: &RequirementAnalysis) -> Feasibility {
    if analysis.physical {
        return Feasibility::NotAutomatable;
    }
    if analysis.complexity_hits >= 2
        || analysis.user_interaction == "human_in_the_loop"
        || analysis.automation_type == GENERAL_AUTOMATION
    {
        return Feasibility::PartiallyAutomatable;
    }
    Feasibility::Automatable
}

fn heuristic_confidence(requirement: &Requirement, analysis: &RequirementAnalysis) -> f64 {
    let mut score: f64 = 0.5;
    if analysis.automation_type != GENERAL_AUTOMATION {
        score += 0.15;
    }
    score += 0.05 * analysis.integration_points.len().min(3) as f64;
    if requirement.domain_hint().is_some() {
        score += 0.05;
    }
    if !requirement.workflow_steps.is_empty() {
        score += 0.05;
    }
    score -= 0.1 * analysis.complexity_hits as f64;
    score.clamp(0.0, 1.0)
}

fn humanize(snake: &str) -> String {
    snake
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn short_title(description: &str) -> String {
    let words: Vec<&str> = description.split_whitespace().take(8).collect();
    let mut title = words.join(" ");
    if description.split_whitespace().count() > 8 {
        title.push_str("...");
    }
    title
}

#[derive(Debug, Default)]
pub struct PatternSynthesizer;

impl PatternSynthesizer {
    pub fn new() -> Self {
        Self
    }

    /// Build the pattern without touching the repository.
    pub fn synthesize(
        &self,
        requirement: &Requirement,
        session_id: &str,
        pattern_id: PatternId,
        analysis: &RequirementAnalysis,
    ) -> Pattern {
        let (feasibility, confidence_score) = if analysis.physical {
            (Feasibility::NotAutomatable, 1.0)
        } else {
            let feasibility = requirement.external_feasibility().unwrap_or_else(|| {
                if requirement.analysis.contains_key("feasibility") {
                    tracing::debug!("unrecognized external feasibility, using heuristic");
                }
                heuristic_feasibility(analysis)
            });
            let confidence = confidence::extract(&requirement.analysis)
                .unwrap_or_else(|| heuristic_confidence(requirement, analysis));
            (feasibility, confidence.clamp(0.0, 1.0))
        };

        let mut pattern_type = vec![analysis.automation_type.clone()];
        for t in requirement.pattern_types.iter().chain([&analysis.processing_type]) {
            let lower = t.trim().to_lowercase();
            if !lower.is_empty() && !pattern_type.contains(&lower) {
                pattern_type.push(lower);
            }
        }

        let enhancement = requirement.enhancement();
        Pattern {
            pattern_id,
            name: format!(
                "{}: {}",
                humanize(&analysis.automation_type),
                short_title(&requirement.description)
            ),
            description: requirement.description.trim().to_string(),
            feasibility,
            pattern_type,
            tech_stack: build_tech_stack(requirement, &analysis.automation_type),
            confidence_score,
            constraints: PatternConstraints {
                banned_tools: requirement.banned_technologies.clone(),
                required_integrations: requirement.integrations.clone(),
            },
            domain: requirement.domain_hint().unwrap_or_else(|| "general".to_string()),
            compliance: requirement.compliance.clone(),
            insights: Some(enhancement.insights.unwrap_or_else(|| analysis.summary())),
            challenges: enhancement.challenges,
            recommended_approach: enhancement.recommended_approach,
            created_at: Some(Utc::now()),
            session_id: Some(session_id.to_string()),
        }
    }

    /// Analyze, allocate an id, build and persist a new pattern.
    pub fn create_pattern(
        &self,
        requirement: &Requirement,
        session_id: &str,
        store: &mut PatternStore,
    ) -> Result<Pattern> {
        requirement
            .validate()
            .map_err(AdvisorError::invalid_requirement)?;
        if session_id.trim().is_empty() {
            return Err(AdvisorError::InvalidSession);
        }
        store.load()?;

        let analysis = RequirementAnalysis::analyze(requirement).unwrap_or_else(|| {
            tracing::warn!("keyword analysis found nothing, using minimal analysis");
            RequirementAnalysis::minimal(requirement)
        });
        let kind = analysis.kind();
        let pattern_id = allocate_id(kind, store)
            .map_err(|e| AdvisorError::blocked(e.to_string()))?;
        let pattern = self.synthesize(requirement, session_id, pattern_id, &analysis);

        tracing::info!(
            pattern_id = %pattern.pattern_id,
            automation_type = %analysis.automation_type,
            feasibility = %pattern.feasibility,
            confidence = pattern.confidence_score,
            session_id,
            "synthesizing pattern"
        );
        store.save_pattern(pattern.clone())?;
        Ok(pattern)
    }
}
