//! Import loosely-shaped pattern JSON into a pattern repository
//!
//! Usage: cargo run --bin import -- <dirs...> [--out DIR]
//!
//! Accepts one pattern per file, an array of patterns, or `{"patterns": [...]}`.
//! Field names vary between sources, so common aliases are accepted. Every
//! document is validated and written through the store's gated write path;
//! identifiers that are missing, malformed or already taken get a fresh one.

use anyhow::{Context, Result};
use pattern_advisor::{
    config::AdvisorConfig,
    confidence,
    store::PatternStore,
    synthesizer::allocate_id,
    types::{Feasibility, Pattern, PatternConstraints, PatternId, PatternKind},
};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Document {
    Many(Vec<RawPattern>),
    Wrapped { patterns: Vec<RawPattern> },
    One(Box<RawPattern>),
}

impl Document {
    fn into_patterns(self) -> Vec<RawPattern> {
        match self {
            Document::Many(items) | Document::Wrapped { patterns: items } => items,
            Document::One(item) => vec![*item],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawPattern {
    #[serde(alias = "pattern_id")]
    id: Option<String>,
    #[serde(alias = "title")]
    name: Option<String>,
    #[serde(alias = "summary")]
    description: Option<String>,
    feasibility: Option<String>,
    #[serde(alias = "pattern_types", alias = "tags")]
    pattern_type: Option<StringOrList>,
    #[serde(alias = "technology_stack", alias = "tools")]
    tech_stack: Option<StringOrList>,
    #[serde(alias = "confidence_score")]
    confidence: Option<serde_json::Value>,
    domain: Option<String>,
    compliance: Option<StringOrList>,
    #[serde(default)]
    constraints: PatternConstraints,
    insights: Option<String>,
    challenges: Option<String>,
    recommended_approach: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    List(Vec<String>),
    // "Python, FastAPI, PostgreSQL"
    One(String),
}

impl StringOrList {
    fn into_vec(self) -> Vec<String> {
        let items = match self {
            StringOrList::List(items) => items,
            StringOrList::One(s) => s.split(',').map(String::from).collect(),
        };
        let mut seen = HashSet::new();
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && seen.insert(s.to_lowercase()))
            .collect()
    }
}

impl RawPattern {
    /// The identifier the source asked for, if well-formed
    fn requested_id(&self) -> Option<PatternId> {
        self.id.as_deref().and_then(|s| s.trim().parse().ok())
    }

    fn kind(&self) -> PatternKind {
        if let Some(id) = self.requested_id() {
            return id.kind();
        }
        // Malformed ids often still carry a usable prefix
        self.id
            .as_deref()
            .and_then(|s| s.split(['-', '_']).next())
            .and_then(|p| PatternKind::from_prefix(&p.to_uppercase()))
            .unwrap_or(PatternKind::General)
    }

    fn into_pattern(self, pattern_id: PatternId) -> std::result::Result<Pattern, String> {
        let description = self
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .ok_or("missing description")?;
        let name = self
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| description.split_whitespace().take(6).collect::<Vec<_>>().join(" "));

        let feasibility = match self.feasibility.as_deref() {
            Some(raw) => Feasibility::parse_loose(raw).unwrap_or_else(|| {
                eprintln!("   ! unknown feasibility {:?}, using Partially Automatable", raw);
                Feasibility::PartiallyAutomatable
            }),
            None => Feasibility::PartiallyAutomatable,
        };
        let confidence_score = self
            .confidence
            .as_ref()
            .and_then(confidence::parse_value)
            .unwrap_or(0.5);

        Ok(Pattern {
            pattern_id,
            name,
            description,
            feasibility,
            pattern_type: self.pattern_type.map(StringOrList::into_vec).unwrap_or_default(),
            tech_stack: self.tech_stack.map(StringOrList::into_vec).unwrap_or_default(),
            confidence_score,
            constraints: self.constraints,
            domain: self
                .domain
                .map(|d| d.trim().to_lowercase())
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| "general".to_string()),
            compliance: self.compliance.map(StringOrList::into_vec).unwrap_or_default(),
            insights: self.insights,
            challenges: self.challenges,
            recommended_approach: self.recommended_approach,
            created_at: Some(chrono::Utc::now()),
            session_id: None,
        })
    }
}

fn main() -> Result<()> {
    let mut args: Vec<String> = std::env::args().collect();

    let out_dir = match args.iter().position(|a| a == "--out") {
        Some(i) if i + 1 < args.len() => {
            let dir = PathBuf::from(args.remove(i + 1));
            args.remove(i);
            dir
        }
        _ => AdvisorConfig::load(None)?.pattern_dir,
    };

    if args.len() < 2 {
        eprintln!("Usage: {} <pattern-source-dirs...> [--out DIR]", args[0]);
        eprintln!("Example: {} ./legacy-patterns --out ./patterns", args[0]);
        std::process::exit(1);
    }

    println!("Importing into {:?}", out_dir);
    let mut store = PatternStore::new(&out_dir);
    store.load()?;

    let mut imported = 0;
    let mut skipped = 0;

    for arg in &args[1..] {
        let source = PathBuf::from(arg);
        if !source.exists() {
            eprintln!("Warning: {} does not exist, skipping", arg);
            continue;
        }
        println!("\nProcessing: {:?}", source);
        let (i, s) = import_directory(&mut store, &source)?;
        imported += i;
        skipped += s;
    }

    println!("\n========================================");
    println!("Import complete!");
    println!("  Imported: {}", imported);
    println!("  Skipped:  {}", skipped);
    println!("  Library:  {} patterns", store.patterns().len());
    println!("========================================");

    Ok(())
}

fn import_directory(store: &mut PatternStore, dir: &Path) -> Result<(usize, usize)> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut imported = 0;
    let mut skipped = 0;
    for path in files {
        match import_file(store, &path) {
            Ok((i, s)) => {
                imported += i;
                skipped += s;
            }
            Err(e) => {
                eprintln!("  ✗ {:?}: {:#}", path, e);
                skipped += 1;
            }
        }
    }
    Ok((imported, skipped))
}

fn import_file(store: &mut PatternStore, path: &Path) -> Result<(usize, usize)> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let document: Document =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))?;

    let mut imported = 0;
    let mut skipped = 0;
    for raw in document.into_patterns() {
        match import_pattern(store, raw) {
            Ok(id) => {
                println!("  ✓ {}", id);
                imported += 1;
            }
            Err(e) => {
                eprintln!("  ✗ {:?}: {:#}", path, e);
                skipped += 1;
            }
        }
    }
    Ok((imported, skipped))
}

fn import_pattern(store: &mut PatternStore, raw: RawPattern) -> Result<PatternId> {
    let known = store.known_ids()?;
    let pattern_id = match raw.requested_id() {
        Some(id) if !known.contains(&id) => id,
        requested => {
            let fresh = allocate_id(raw.kind(), store)?;
            if let Some(id) = requested {
                println!("  ~ {} already taken, importing as {}", id, fresh);
            }
            fresh
        }
    };
    let pattern = raw.into_pattern(pattern_id).map_err(anyhow::Error::msg)?;
    store.save_pattern(pattern)?;
    Ok(pattern_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_alias_fields_and_coercion() {
        let raw: RawPattern = serde_json::from_value(json!({
            "pattern_id": "APAT-004",
            "title": "Support triage agent",
            "summary": "Classify and route inbound support tickets",
            "feasibility": "partially_automatable",
            "tags": "support, triage",
            "tools": ["LangChain", "langchain", "Zendesk"],
            "confidence_score": "85%",
            "domain": "Support"
        }))
        .unwrap();

        assert_eq!(raw.kind(), PatternKind::Agentic);
        let p = raw.into_pattern("APAT-004".parse().unwrap()).unwrap();
        assert_eq!(p.feasibility, Feasibility::PartiallyAutomatable);
        assert_eq!(p.pattern_type, vec!["support", "triage"]);
        assert_eq!(p.tech_stack, vec!["LangChain", "Zendesk"]);
        assert!((p.confidence_score - 0.85).abs() < 1e-9);
        assert_eq!(p.domain, "support");
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_document_shapes() {
        let many: Document = serde_json::from_str(r#"[{"description": "a"}, {"description": "b"}]"#).unwrap();
        assert_eq!(many.into_patterns().len(), 2);
        let wrapped: Document = serde_json::from_str(r#"{"patterns": [{"description": "a"}]}"#).unwrap();
        assert_eq!(wrapped.into_patterns().len(), 1);
        let one: Document = serde_json::from_str(r#"{"id": "PAT-001", "description": "a"}"#).unwrap();
        assert_eq!(one.into_patterns().len(), 1);
    }

    #[test]
    fn test_taken_ids_are_reassigned() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PatternStore::new(dir.path());
        store.load().unwrap();

        let raw = || RawPattern {
            id: Some("PAT-007".to_string()),
            description: Some("Reconcile card transactions nightly".to_string()),
            ..Default::default()
        };
        let first = import_pattern(&mut store, raw()).unwrap();
        let second = import_pattern(&mut store, raw()).unwrap();
        assert_eq!(first.to_string(), "PAT-007");
        assert_eq!(second.to_string(), "PAT-008");
        assert_eq!(store.patterns().len(), 2);
    }

    #[test]
    fn test_missing_description_is_skipped() {
        let raw = RawPattern {
            name: Some("Nameless".to_string()),
            ..Default::default()
        };
        assert!(raw.into_pattern("PAT-001".parse().unwrap()).is_err());
    }
}
