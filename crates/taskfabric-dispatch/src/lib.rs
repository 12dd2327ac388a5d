//! Dispatch coordination: capacity gating, pause/resume, heartbeats, and
//! the orchestrator tying routing to the message bus.
//!
//! # Main types
//!
//! - [`Dispatcher`] — Submit path, resume cycle, and result ingestion.
//! - [`CapacityGate`] / [`ResumeWorker`] — Pause work when a pool is
//!   saturated and release it once capacity recovers.
//! - [`HeartbeatSweeper`] — Marks agents offline when heartbeats lapse.
//! - [`NotificationSink`] — Seam for terminal task notifications.

/// Capacity gating and the pause/resume worker.
pub mod capacity;
/// Heartbeat ingestion and staleness sweeping.
pub mod heartbeat;
/// The dispatch orchestrator.
pub mod orchestrator;

pub use capacity::{CapacityGate, PausedWork, ResumeWorker};
pub use heartbeat::{apply_heartbeat, HeartbeatSweeper};
pub use orchestrator::{Dispatcher, LogSink, NotificationSink, ResultOutcome, SubmitOutcome};
