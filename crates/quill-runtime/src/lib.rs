//! # quill-runtime
//!
//! The layer that turns steps into runs: a supervisor that drives the
//! step/route loop on its own task, a persistence seam for the audit trail
//! and finished documents, and tracing setup for embedders.
//!
//! ```text
//!   RunSupervisor::start ──► [run task]
//!                               │ route → step → persist → events
//!                               ▼
//!   RunHandle ── subscribe() / stop() / wait()
//! ```

pub mod logging;
pub mod persist;
pub mod supervisor;

pub use logging::init_tracing;
pub use persist::{InMemoryPersistence, Persistence};
pub use supervisor::{RunHandle, RunSupervisor};
