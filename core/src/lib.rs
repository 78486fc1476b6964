//! Deterministic health signal pipeline.
//!
//! Raw readings are translated into four bounded scores, gated for safety,
//! checked for cross-signal patterns, and routed to a reasoning scaffold
//! before any generated text is produced. Generated text is then checked
//! against the scaffold's guardrails.

pub mod audit;
pub mod detection;
pub mod error;
pub mod escalation;
pub mod exports;
pub mod guardrail;
pub mod pipeline;
pub mod privacy;
pub mod routing;
pub mod scaffold;
pub mod signals;
pub mod snapshot;
pub mod trends;

pub use pipeline::{AnalysisRequest, AnalysisResult, NarrativeGenerator, Pipeline};
