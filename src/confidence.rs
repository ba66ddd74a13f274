//! Confidence extraction from external analysis output
//!
//! Analysis providers hand back confidence in every shape imaginable: bare
//! numbers, "87%", prose, JSON embedded in prose, nested objects, lists.
//! Each shape is one strategy; the first strategy that yields a value wins.
//! The extractor never errors. Anything it cannot read is `None`, and
//! anything it returns lies in [0, 1].

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Primary key, then legacy aliases, in lookup order
pub const CONFIDENCE_KEYS: &[&str] = &[
    "confidence",
    "llm_confidence",
    "confidence_score",
    "confidence_level",
];

/// Raw analysis blobs searched after the direct keys
pub const RAW_ANALYSIS_KEYS: &[&str] = &["raw_analysis", "raw_llm_response", "analysis"];

/// Keys accepted inside a container or embedded document
const FIELD_KEYS: &[&str] = &["confidence", "confidence_score", "score"];

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(-?\d+(?:\.\d+)?)\s*%").unwrap());

static DECIMAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-?\d+\.\d+").unwrap());

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?\s*%?").unwrap());

static EMBEDDED_DOC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{[^{}]*\}").unwrap());

static FREE_TEXT_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)confidence(?:\s+(?:level|score))?\s*[:=]\s*(\d+(?:\.\d+)?)\s*(%)?",
        r"(?i)confidence(?:\s+(?:level|score))?\s+(?:is|of|at)\s+(\d+(?:\.\d+)?)\s*(%)?",
        r"(?i)(\d+(?:\.\d+)?)\s*(%)\s+confiden(?:t|ce)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

type StringStrategy = fn(&str) -> Option<f64>;

/// Ordered string strategies. First success wins.
const STRING_STRATEGIES: &[(&str, StringStrategy)] = &[
    ("direct", parse_direct),
    ("percentage", parse_percentage),
    ("decimal", parse_decimal),
    ("embedded_document", parse_embedded_document),
    ("free_text", parse_free_text),
];

/// Look up a confidence value in an analysis map by key priority.
pub fn extract(analysis: &Map<String, Value>) -> Option<f64> {
    for key in CONFIDENCE_KEYS {
        if let Some(value) = analysis.get(*key) {
            if let Some(c) = parse_value(value) {
                tracing::debug!(key, confidence = c, "confidence extracted");
                return Some(c);
            }
            tracing::debug!(key, "confidence key present but unreadable");
        }
    }
    for key in RAW_ANALYSIS_KEYS {
        if let Some(c) = analysis.get(*key).and_then(parse_value) {
            tracing::debug!(key, confidence = c, "confidence extracted from raw analysis");
            return Some(c);
        }
    }
    None
}

/// Parse one value of unknown shape.
pub fn parse_value(value: &Value) -> Option<f64> {
    parse_at_depth(value, 0)
}

fn parse_at_depth(value: &Value, depth: usize) -> Option<f64> {
    match value {
        Value::Bool(_) | Value::Null => None,
        Value::Number(n) => n.as_f64().and_then(validate),
        Value::String(s) => parse_str(s),
        Value::Object(map) if depth == 0 => FIELD_KEYS
            .iter()
            .filter_map(|k| map.get(*k))
            .find_map(|v| parse_at_depth(v, depth + 1)),
        Value::Array(items) => match items.first() {
            Some(Value::Number(n)) => n.as_f64().and_then(validate),
            _ => None,
        },
        Value::Object(_) => None,
    }
}

/// Run the string strategies in order.
pub fn parse_str(raw: &str) -> Option<f64> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    STRING_STRATEGIES.iter().find_map(|(name, strategy)| {
        let value = strategy(text)?;
        tracing::trace!(strategy = name, value, "confidence string parsed");
        Some(value)
    })
}

/// Reject non-finite values and clamp into [0, 1].
pub fn validate(value: f64) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    let clamped = value.clamp(0.0, 1.0);
    if clamped != value {
        tracing::debug!(original = value, clamped, "confidence clamped");
    }
    Some(clamped)
}

fn parse_direct(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().and_then(validate)
}

fn parse_percentage(text: &str) -> Option<f64> {
    let caps = PERCENT_RE.captures(text)?;
    let pct: f64 = caps.get(1)?.as_str().parse().ok()?;
    validate(pct / 100.0)
}

fn parse_decimal(text: &str) -> Option<f64> {
    let m = DECIMAL_RE.find(text)?;
    m.as_str().parse::<f64>().ok().and_then(validate)
}

fn parse_embedded_document(text: &str) -> Option<f64> {
    let doc = EMBEDDED_DOC_RE.find(text)?.as_str();
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(doc) {
        if let Some(c) = FIELD_KEYS
            .iter()
            .filter_map(|k| map.get(*k))
            .find_map(|v| parse_at_depth(v, 1))
        {
            return Some(c);
        }
    }
    // Not valid JSON, or no usable field: scan the fragment itself
    let m = NUMBER_RE.find(doc)?.as_str().trim();
    match m.strip_suffix('%') {
        Some(pct) => pct.trim().parse::<f64>().ok().and_then(|p| validate(p / 100.0)),
        None => m.parse::<f64>().ok().and_then(validate),
    }
}

fn parse_free_text(text: &str) -> Option<f64> {
    FREE_TEXT_RES.iter().find_map(|re| {
        let caps = re.captures(text)?;
        let n: f64 = caps.get(1)?.as_str().parse().ok()?;
        // "confidence: 85" reads as a percentage
        let scaled = if caps.get(2).is_some() || n > 1.0 { n / 100.0 } else { n };
        validate(scaled)
    })
}
