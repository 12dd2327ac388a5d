//! Shared persistence layer for dispatch coordination.
//!
//! Service instances never share in-process state; agent registrations,
//! performance history, the routing audit trail, the pause queue, and task
//! status all flow through a [`DispatchStore`]. Implementations hand out
//! immutable snapshots rather than live references.
//!
//! # Main types
//!
//! - [`DispatchStore`] — Repository contract for the six coordinated entities.
//! - [`MemoryStore`] — `RwLock`-table store for tests and single-process use.
//! - [`FileStore`] — JSONL-durable pause queue on top of [`MemoryStore`].

/// File-backed store with a durable pause queue.
pub mod file;
/// In-memory store.
pub mod memory;
/// The repository contract.
pub mod repository;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use repository::DispatchStore;
