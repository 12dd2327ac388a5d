//! Scoring-based routing of work to agent pools.
//!
//! The router filters registered agents down to the requested pool and
//! capability, scores each candidate on success history, recent context,
//! declared specialization, and current load, then records every selection
//! as an immutable audit row. A retry wrapper re-scores on transient
//! dispatch failures while excluding agents that already failed within the
//! same sequence.
//!
//! # Main types
//!
//! - [`AgentRouter`] — candidate filtering, scoring, and audit writes.
//! - [`ScoreBreakdown`] — per-component score contributions for one candidate.

/// Retry wrapper over routing plus a caller-supplied dispatch attempt.
pub mod retry;
/// Candidate filtering and scoring.
pub mod router;

pub use router::{AgentRouter, ScoreBreakdown};
