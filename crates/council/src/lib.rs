//! The three-stage council protocol: Propose → Rank → Synthesize.
//!
//! Stage 1 queries every active personality in parallel; Stage 2 has each
//! personality rank the others' anonymized answers (self-excluded); Stage 3
//! hands proposals and votes to a chairman model (or a named consensus
//! strategy) for the final synthesis.

pub mod attribution;
pub mod consensus;
pub mod engine;
pub mod history;
pub mod ranking;
pub mod types;

pub use engine::{CouncilEngine, CouncilOutcome, SynthesisMode, TenantContext};
pub use types::{
    AggregateRanking, LabelMap, LabelTarget, Stage1Result, Stage2Result, Stage3Result,
    TranscriptMessage,
};
