//! Ticket workflow graph execution engine.
//!
//! A workflow is a directed graph of steps, each bound to a responsible
//! role. Tickets enter at the start sentinel and advance along
//! action-gated transitions; each step visit produces an assignment
//! chosen by per-role round-robin rotation, with an SLA deadline derived
//! from ticket priority. Assignment state is an append-only history log —
//! "current status" is always derived, never stored.

pub mod assign;
pub mod authoring;
pub mod directory;
pub mod error;
pub mod executor;
pub mod sla;
pub mod store;
pub mod tracker;
pub mod types;

pub use assign::Assigner;
pub use error::EngineError;
pub use executor::Engine;
pub use store::{MemoryStore, WorkflowStore};
pub use tracker::Tracker;
