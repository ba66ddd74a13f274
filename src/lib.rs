//! pattern-advisor - automation pattern recommendations
//!
//! Turns a free-text description of a business process into ranked
//! automation recommendations by matching it against a library of reusable
//! patterns, and grows that library when nothing fits.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use pattern_advisor::{Advisor, AdvisorConfig, Requirement};
//!
//! let mut advisor = Advisor::open(AdvisorConfig::load(None)?)?;
//! let mut req = Requirement::new("Extract totals from scanned supplier invoices");
//! req.domain = Some("finance".into());
//!
//! let report = advisor.recommend(&req, "session-42")?;
//! println!("{:?}", report.decision.action);
//! for rec in report.recommendations {
//!     println!("{} {} {:.0}%", rec.pattern_id, rec.feasibility, rec.confidence * 100.0);
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Requirement
//!     │
//!     ▼
//! Matcher ──── PatternStore (JSON documents)
//!     │   └─── VectorIndex (Embedder: ONNX | HTTP | hashing)
//!     ▼
//! DecisionEngine ──► reuse / enhance / PatternSynthesizer
//!     │                                  │
//!     │              DecisionLog (JSONL) └──► PatternStore write gate
//!     ▼
//! RecommendationAssembler (ConfidenceExtractor)
//!     │
//!     ▼
//! Vec<Recommendation>
//! ```

pub mod advisor;
pub mod assembler;
pub mod confidence;
pub mod config;
pub mod decision;
pub mod decision_log;
pub mod embeddings;
pub mod error;
pub mod heuristics;
pub mod index;
pub mod matcher;
pub mod store;
pub mod synthesizer;
pub mod types;

// Pipeline
pub use advisor::{Advisor, AdvisorReport, AdvisorStats};
pub use config::AdvisorConfig;
pub use error::{AdvisorError, Result};
pub use types::*;

// Components
pub use assembler::RecommendationAssembler;
pub use decision::{DecisionAction, DecisionEngine, PatternDecision};
pub use decision_log::{DecisionLog, JsonlDecisionLog};
pub use index::VectorIndex;
pub use matcher::Matcher;
pub use store::{PatternStore, WriteGate};
pub use synthesizer::PatternSynthesizer;

// Embeddings
pub use embeddings::{build_embedder, Embedder, HashingEmbedder, EMBEDDING_DIM};
