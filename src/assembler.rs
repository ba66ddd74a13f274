//! Recommendation assembly
//!
//! Turns ranked candidates into final recommendations: feasibility,
//! confidence, technology stack and rationale per candidate, then sorted by
//! confidence. Feasibility may only move towards "Not Automatable" from the
//! pattern's own verdict; external analysis wins when it is valid.

use crate::config::AssemblyConfig;
use crate::confidence;
use crate::heuristics::{
    compliance_severity, is_physical_task, KeywordTable, NormalizedText, COMPLEXITY_KEYWORDS,
};
use crate::types::{Feasibility, MatchCandidate, Pattern, PatternId, Recommendation, Requirement};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Technology -> description keywords that call for it
pub const DOMAIN_TECH_CATALOG: KeywordTable = &[
    ("Tesseract OCR", &["scanned", "ocr", "handwritten", "paper"]),
    ("spaCy", &["entity", "named entities", "nlp", "free text"]),
    ("SendGrid", &["send email", "email notification", "newsletter"]),
    ("Twilio", &["sms", "text message", "phone call"]),
    ("Stripe", &["payment", "card charge", "subscription billing"]),
    ("DocuSign", &["signature", "e sign"]),
    ("Apache Kafka", &["stream", "real time", "event bus"]),
    ("Redis", &["cache", "rate limit"]),
    ("Elasticsearch", &["full text search", "search across"]),
    ("Metabase", &["dashboard", "kpi"]),
    ("HashiCorp Vault", &["credential", "secret", "api key"]),
    ("Salesforce", &["crm"]),
];

/// Interchangeable technologies used to diversify identical stacks
pub const TECH_ALTERNATIVES: &[(&str, &[&str])] = &[
    ("python", &["Node.js", "Go", "Java"]),
    ("node.js", &["Python", "Go", "TypeScript"]),
    ("fastapi", &["Flask", "Django", "Express"]),
    ("postgresql", &["MySQL", "MongoDB", "SQL Server"]),
    ("mysql", &["PostgreSQL", "MariaDB"]),
    ("mongodb", &["PostgreSQL", "DynamoDB"]),
    ("docker", &["Podman", "AWS Lambda", "Kubernetes"]),
    ("kubernetes", &["AWS ECS", "Nomad"]),
    ("airflow", &["Prefect", "Dagster", "Temporal"]),
    ("celery", &["RQ", "Sidekiq", "Temporal"]),
    ("redis", &["Memcached", "RabbitMQ"]),
    ("rabbitmq", &["Kafka", "AWS SQS"]),
    ("kafka", &["AWS Kinesis", "Pulsar"]),
    ("langchain", &["LlamaIndex", "Semantic Kernel"]),
    ("openai api", &["Anthropic API", "Azure OpenAI"]),
    ("tesseract ocr", &["AWS Textract", "Google Document AI"]),
    ("uipath", &["Power Automate", "Automation Anywhere"]),
    ("camunda", &["Temporal", "n8n"]),
    ("snowflake", &["BigQuery", "Redshift"]),
    ("metabase", &["Superset", "Power BI"]),
    ("sendgrid", &["Mailgun", "AWS SES"]),
];

/// Tools appended when no substitution yields a fresh stack
const COMPLEMENTARY_TOOLS: &[&str] = &["Prometheus", "Grafana", "Terraform", "Sentry", "OpenTelemetry"];

/// A 0..1 score and the factors that produced it
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Assessment {
    pub score: f64,
    pub factors: Vec<String>,
}

impl Assessment {
    fn add(&mut self, amount: f64, factor: impl Into<String>) {
        self.score += amount;
        self.factors.push(factor.into());
    }

    fn finish(mut self) -> Self {
        self.score = self.score.clamp(0.0, 1.0);
        self
    }
}

/// Implementation complexity implied by the requirement.
pub fn assess_complexity(requirement: &Requirement) -> Assessment {
    let text = NormalizedText::new(&requirement.description);
    let mut a = Assessment::default();

    match requirement.data_sensitivity.as_deref().map(str::to_lowercase).as_deref() {
        Some("high") => a.add(0.25, "highly sensitive data"),
        Some("medium") => a.add(0.1, "moderately sensitive data"),
        _ => {}
    }
    let integrations = requirement.integrations.len();
    if integrations > 2 {
        a.add(
            (0.1 * (integrations - 2) as f64).min(0.3),
            format!("{} integrations", integrations),
        );
    }
    match requirement.workflow_steps.len() {
        n if n > 10 => a.add(0.2, format!("{} workflow steps", n)),
        n if n > 5 => a.add(0.1, format!("{} workflow steps", n)),
        _ => {}
    }
    match requirement.daily_volume {
        Some(v) if v > 100_000 => a.add(0.2, format!("{} items per day", v)),
        Some(v) if v > 10_000 => a.add(0.1, format!("{} items per day", v)),
        _ => {}
    }
    let hits: Vec<&str> = COMPLEXITY_KEYWORDS
        .iter()
        .copied()
        .filter(|k| text.has(k))
        .collect();
    if !hits.is_empty() {
        a.add((0.1 * hits.len() as f64).min(0.3), format!("mentions {}", hits.join(", ")));
    }
    if is_physical_task(&text) {
        a.add(0.5, "physical work");
    }
    a.finish()
}

/// Operational and regulatory risk implied by the requirement.
pub fn assess_risk(requirement: &Requirement) -> Assessment {
    let text = NormalizedText::new(&requirement.description);
    let mut a = Assessment::default();

    let compliance: f64 = requirement
        .compliance
        .iter()
        .map(|c| compliance_severity(c))
        .sum();
    if compliance > 0.0 {
        a.add(compliance.min(0.5), format!("{} compliance", requirement.compliance.join("/")));
    }
    if requirement.human_review == Some(true) {
        a.add(0.15, "mandatory human review");
    }
    match requirement.sla_hours {
        Some(h) if h < 1.0 => a.add(0.2, format!("{}h SLA", h)),
        Some(h) if h < 4.0 => a.add(0.1, format!("{}h SLA", h)),
        _ => {}
    }
    if requirement
        .data_sensitivity
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("high"))
    {
        a.add(0.15, "exposure of sensitive data");
    }
    if is_physical_task(&text) {
        a.add(0.4, "physical safety");
    }
    a.finish()
}

/// Fraction of optional requirement hints that are filled in
pub fn completeness(requirement: &Requirement) -> f64 {
    let present = [
        requirement.domain_hint().is_some(),
        !requirement.pattern_types.is_empty(),
        !requirement.compliance.is_empty(),
        !requirement.integrations.is_empty(),
        !requirement.tech_stack.is_empty(),
        requirement.daily_volume.is_some(),
        requirement.sla_hours.is_some(),
        !requirement.workflow_steps.is_empty(),
        requirement.data_sensitivity.is_some(),
        requirement.human_review.is_some(),
    ];
    present.iter().filter(|p| **p).count() as f64 / present.len() as f64
}

/// Order-independent identity of a stack
pub fn stack_signature(stack: &[String]) -> String {
    let mut items: Vec<String> = stack.iter().map(|t| t.trim().to_lowercase()).collect();
    items.sort();
    items.dedup();
    items.join("|")
}

/// Make `stack` differ from every signature in `seen`, substituting one
/// technology at a time from [`TECH_ALTERNATIVES`] before falling back to a
/// complementary tool. Banned technologies are never introduced.
pub fn diversify(
    stack: Vec<String>,
    seen: &HashSet<String>,
    banned: &HashSet<String>,
    max_len: usize,
) -> Vec<String> {
    if !seen.contains(&stack_signature(&stack)) {
        return stack;
    }
    let present: HashSet<String> = stack.iter().map(|t| t.to_lowercase()).collect();
    let usable = |t: &str| {
        let lower = t.to_lowercase();
        !present.contains(&lower) && !banned.contains(&lower)
    };

    for (i, tech) in stack.iter().enumerate() {
        let lower = tech.to_lowercase();
        let Some((_, alternatives)) = TECH_ALTERNATIVES.iter().find(|(t, _)| *t == lower) else {
            continue;
        };
        for alt in alternatives.iter().filter(|a| usable(a)) {
            let mut candidate = stack.clone();
            candidate[i] = alt.to_string();
            if !seen.contains(&stack_signature(&candidate)) {
                return candidate;
            }
        }
    }

    for tool in COMPLEMENTARY_TOOLS.iter().filter(|t| usable(t)) {
        let mut candidate = stack.clone();
        if candidate.len() >= max_len && !candidate.is_empty() {
            candidate.pop();
        }
        candidate.push(tool.to_string());
        if !seen.contains(&stack_signature(&candidate)) {
            return candidate;
        }
    }

    tracing::warn!(signature = %stack_signature(&stack), "could not diversify technology stack");
    stack
}

pub struct RecommendationAssembler {
    config: AssemblyConfig,
}

impl RecommendationAssembler {
    pub fn new(config: AssemblyConfig) -> Self {
        Self { config }
    }

    /// Downgrade-only feasibility unless a valid external verdict exists.
    pub fn feasibility(
        &self,
        requirement: &Requirement,
        pattern: &Pattern,
        complexity: &Assessment,
        risk: &Assessment,
    ) -> Feasibility {
        if let Some(verdict) = requirement.external_feasibility() {
            return verdict;
        }
        let mut feasibility = pattern.feasibility;
        for (score, threshold) in [
            (complexity.score, self.config.complexity_threshold),
            (risk.score, self.config.risk_threshold),
        ] {
            if score >= self.config.severe_threshold {
                feasibility = feasibility.downgrade().downgrade();
            } else if score >= threshold {
                feasibility = feasibility.downgrade();
            }
        }
        if is_physical_task(&NormalizedText::new(&requirement.description)) {
            feasibility = feasibility.min(Feasibility::NotAutomatable);
        }
        feasibility
    }

    /// External confidence (with per-index jitter) or the heuristic blend.
    pub fn confidence(
        &self,
        requirement: &Requirement,
        candidate: &MatchCandidate,
        feasibility: Feasibility,
        risk: &Assessment,
        index: usize,
    ) -> f64 {
        if let Some(external) = confidence::extract(&requirement.analysis) {
            return (external - index as f64 * self.config.confidence_jitter).clamp(0.0, 1.0);
        }
        let risky = risk.score >= self.config.risk_threshold;
        let multiplier = match feasibility {
            Feasibility::Automatable => 1.0,
            Feasibility::PartiallyAutomatable if risky => 0.7,
            Feasibility::PartiallyAutomatable => 0.8,
            Feasibility::NotAutomatable if risky => 0.3,
            Feasibility::NotAutomatable => 0.4,
        };
        let blended = 0.5 * candidate.blended_score
            + 0.3 * candidate.pattern_confidence
            + 0.2 * completeness(requirement);
        (blended * multiplier).clamp(0.0, 1.0)
    }

    /// Pattern stack plus catalogue entries the description calls for,
    /// without duplicates or banned technologies, capped in length.
    pub fn tech_stack(&self, requirement: &Requirement, pattern: &Pattern) -> Vec<String> {
        let text = NormalizedText::new(&requirement.description);
        let banned: HashSet<String> = requirement
            .banned_technologies
            .iter()
            .map(|b| b.trim().to_lowercase())
            .collect();
        let triggered = DOMAIN_TECH_CATALOG
            .iter()
            .filter(|(_, keywords)| text.has_any(keywords))
            .map(|(tech, _)| tech.to_string());

        let mut seen = HashSet::new();
        pattern
            .tech_stack
            .iter()
            .cloned()
            .chain(triggered)
            .filter(|t| !banned.contains(&t.to_lowercase()))
            .filter(|t| seen.insert(t.to_lowercase()))
            .take(self.config.max_stack_len)
            .collect()
    }

    pub fn rationale(
        &self,
        requirement: &Requirement,
        pattern: &Pattern,
        candidate: &MatchCandidate,
        feasibility: Feasibility,
        complexity: &Assessment,
        risk: &Assessment,
    ) -> String {
        if let Some(explanation) = requirement.explanation() {
            if candidate.blended_score >= self.config.high_match_quality {
                return format!(
                    "{}. {} ({}) closely matches this process with a {:.0}% match.",
                    explanation.trim_end_matches('.'),
                    pattern.pattern_id,
                    pattern.name,
                    candidate.blended_score * 100.0
                );
            }
        }

        let mut parts = vec![format!(
            "{} based on {} ({}).",
            feasibility, pattern.pattern_id, pattern.name
        )];
        parts.push(
            match feasibility {
                Feasibility::Automatable => {
                    "The process is structured enough for end-to-end automation."
                }
                Feasibility::PartiallyAutomatable => {
                    "Some steps need human judgment or carry elevated risk."
                }
                Feasibility::NotAutomatable => {
                    "Core steps depend on physical work or judgment automation cannot replace."
                }
            }
            .to_string(),
        );
        if !complexity.factors.is_empty() {
            parts.push(format!("Complexity drivers: {}.", complexity.factors.join(", ")));
        }
        if !risk.factors.is_empty() {
            parts.push(format!("Risk factors: {}.", risk.factors.join(", ")));
        }
        parts.join(" ")
    }

    /// Assemble recommendations for the best candidates, highest confidence
    /// first. Candidates whose pattern is unknown are skipped.
    pub fn assemble(
        &self,
        requirement: &Requirement,
        candidates: &[MatchCandidate],
        patterns: &[Pattern],
    ) -> Vec<Recommendation> {
        let by_id: HashMap<PatternId, &Pattern> = patterns.iter().map(|p| (p.pattern_id, p)).collect();
        let complexity = assess_complexity(requirement);
        let risk = assess_risk(requirement);
        let banned: HashSet<String> = requirement
            .banned_technologies
            .iter()
            .map(|b| b.trim().to_lowercase())
            .collect();
        let mut signatures = HashSet::new();
        let mut recommendations = Vec::new();

        for (index, candidate) in candidates
            .iter()
            .take(self.config.max_recommendations)
            .enumerate()
        {
            let Some(pattern) = by_id.get(&candidate.pattern_id) else {
                tracing::warn!(pattern_id = %candidate.pattern_id, "candidate pattern missing, skipping");
                continue;
            };
            let feasibility = self.feasibility(requirement, pattern, &complexity, &risk);
            let confidence = self.confidence(requirement, candidate, feasibility, &risk, index);
            let stack = diversify(
                self.tech_stack(requirement, pattern),
                &signatures,
                &banned,
                self.config.max_stack_len,
            );
            signatures.insert(stack_signature(&stack));
            let rationale =
                self.rationale(requirement, pattern, candidate, feasibility, &complexity, &risk);

            recommendations.push(Recommendation {
                pattern_id: candidate.pattern_id,
                feasibility,
                confidence,
                tech_stack: stack,
                rationale,
            });
        }

        recommendations.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        tracing::debug!(
            recommendations = recommendations.len(),
            complexity = complexity.score,
            risk = risk.score,
            "recommendations assembled"
        );
        recommendations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::fixtures::pattern;
    use proptest::prelude::*;
    use serde_json::json;

    fn candidate(p: &Pattern, blended: f64) -> MatchCandidate {
        MatchCandidate {
            pattern_id: p.pattern_id,
            tag_score: 0.5,
            vector_score: blended,
            blended_score: blended,
            pattern_confidence: p.confidence_score,
            rationale: String::new(),
        }
    }

    fn assembler() -> RecommendationAssembler {
        RecommendationAssembler::new(AssemblyConfig::default())
    }

    #[test]
    fn test_identical_stacks_get_distinct_signatures() {
        let stack = ["Python", "PostgreSQL", "Docker"];
        let patterns = vec![
            pattern("PAT-001", "finance", &[], &stack, 0.8),
            pattern("PAT-002", "finance", &[], &stack, 0.7),
            pattern("PAT-003", "finance", &[], &stack, 0.6),
        ];
        let candidates: Vec<MatchCandidate> = patterns.iter().map(|p| candidate(p, 0.7)).collect();
        let recs = assembler().assemble(
            &Requirement::new("Reconcile vendor statements against ledger entries"),
            &candidates,
            &patterns,
        );
        assert_eq!(recs.len(), 3);
        let signatures: HashSet<String> = recs.iter().map(|r| stack_signature(&r.tech_stack)).collect();
        assert_eq!(signatures.len(), 3);
    }

    #[test]
    fn test_diversify_respects_bans() {
        let stack = vec!["Python".to_string()];
        let seen: HashSet<String> = ["python".to_string(), "node.js".to_string()].into_iter().collect();
        let banned: HashSet<String> = ["go".to_string()].into_iter().collect();
        assert_eq!(diversify(stack, &seen, &banned, 8), vec!["Java".to_string()]);
    }

    #[test]
    fn test_feasibility_never_upgrades() {
        let mut p = pattern("PAT-001", "finance", &[], &["Python"], 0.8);
        p.feasibility = Feasibility::PartiallyAutomatable;
        let req = Requirement::new("Reconcile vendor statements against ledger entries");
        let a = assembler();
        let f = a.feasibility(&req, &p, &assess_complexity(&req), &assess_risk(&req));
        assert_eq!(f, Feasibility::PartiallyAutomatable);
    }

    #[test]
    fn test_complexity_and_risk_downgrade() {
        let p = pattern("PAT-001", "health", &[], &["Python"], 0.8);
        let mut req = Requirement::new("Triage complex legacy mainframe records for patients");
        req.compliance = vec!["HIPAA".to_string(), "GDPR".to_string(), "SOX".to_string()];
        req.human_review = Some(true);
        req.data_sensitivity = Some("high".to_string());
        req.integrations = vec!["EHR".into(), "CRM".into(), "ERP".into(), "Fax".into()];

        let complexity = assess_complexity(&req);
        let risk = assess_risk(&req);
        assert!(complexity.score >= 0.7, "{:?}", complexity);
        assert!(risk.score >= 0.7, "{:?}", risk);
        let f = assembler().feasibility(&req, &p, &complexity, &risk);
        assert_eq!(f, Feasibility::NotAutomatable);
    }

    #[test]
    fn test_physical_task_forces_not_automatable() {
        let p = pattern("PAT-001", "facilities", &[], &["Python"], 0.8);
        let req = Requirement::new("Mop the warehouse floor and vacuum the offices");
        let recs = assembler().assemble(&req, &[candidate(&p, 0.9)], &[p.clone()]);
        assert_eq!(recs[0].feasibility, Feasibility::NotAutomatable);
    }

    #[test]
    fn test_external_verdict_and_confidence() {
        let p = pattern("PAT-001", "finance", &[], &["Python"], 0.8);
        let q = pattern("PAT-002", "finance", &[], &["Python"], 0.8);
        let mut req = Requirement::new("Reconcile vendor statements against ledger entries");
        req.analysis.insert("feasibility".into(), json!("Not Automatable"));
        req.analysis.insert("llm_confidence".into(), json!("87%"));

        let recs = assembler().assemble(
            &req,
            &[candidate(&p, 0.9), candidate(&q, 0.8)],
            &[p.clone(), q.clone()],
        );
        assert_eq!(recs[0].feasibility, Feasibility::NotAutomatable);
        assert!((recs[0].confidence - 0.87).abs() < 1e-9);
        assert!((recs[1].confidence - 0.86).abs() < 1e-9);
    }

    #[test]
    fn test_stack_adds_catalogue_and_drops_banned() {
        let p = pattern("PAT-001", "finance", &[], &["Python", "PostgreSQL"], 0.8);
        let mut req = Requirement::new("Read scanned paper forms and charge the payment");
        req.banned_technologies = vec!["postgresql".to_string()];
        let stack = assembler().tech_stack(&req, &p);
        assert_eq!(stack, vec!["Python", "Tesseract OCR", "Stripe"]);
    }

    #[test]
    fn test_rationale_uses_explanation_on_strong_match() {
        let p = pattern("PAT-001", "finance", &[], &["Python"], 0.8);
        let mut req = Requirement::new("Reconcile vendor statements against ledger entries");
        req.analysis.insert("explanation".into(), json!("Statements follow a fixed layout"));
        let a = assembler();
        let none = Assessment::default();

        let strong = a.rationale(&req, &p, &candidate(&p, 0.9), Feasibility::Automatable, &none, &none);
        assert!(strong.starts_with("Statements follow a fixed layout."));
        assert!(strong.contains("PAT-001"));

        let weak = a.rationale(&req, &p, &candidate(&p, 0.5), Feasibility::Automatable, &none, &none);
        assert!(!weak.contains("fixed layout"));
        assert!(weak.starts_with("Automatable based on PAT-001"));
    }

    #[test]
    fn test_unknown_candidates_are_skipped() {
        let p = pattern("PAT-001", "finance", &[], &["Python"], 0.8);
        let ghost = pattern("PAT-777", "finance", &[], &["Python"], 0.8);
        let recs = assembler().assemble(
            &Requirement::new("Reconcile vendor statements against ledger entries"),
            &[candidate(&ghost, 0.9), candidate(&p, 0.8)],
            &[p.clone()],
        );
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].pattern_id, p.pattern_id);
    }

    proptest! {
        #[test]
        fn prop_recommendations_sorted_by_confidence(
            scores in prop::collection::vec((0.0f64..=1.0, 0.0f64..=1.0), 1..8)
        ) {
            let patterns: Vec<Pattern> = scores
                .iter()
                .enumerate()
                .map(|(i, (_, conf))| pattern(&format!("PAT-{:03}", i + 1), "finance", &[], &["Python"], *conf))
                .collect();
            let candidates: Vec<MatchCandidate> = patterns
                .iter()
                .zip(&scores)
                .map(|(p, (blended, _))| candidate(p, *blended))
                .collect();
            let recs = assembler().assemble(
                &Requirement::new("Reconcile vendor statements against ledger entries"),
                &candidates,
                &patterns,
            );
            for pair in recs.windows(2) {
                prop_assert!(pair[0].confidence >= pair[1].confidence);
            }
            for r in &recs {
                prop_assert!((0.0..=1.0).contains(&r.confidence));
            }
        }
    }
}
