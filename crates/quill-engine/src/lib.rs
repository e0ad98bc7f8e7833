//! # quill-engine
//!
//! The production pipeline of Quill: the steps that take a run from
//! conversation to finished document, the placeholder syntax they speak,
//! and the router that decides what happens after each step.
//!
//! ```text
//!   controller ⇄ attachment
//!       │ (ready_to_write)
//!       ▼
//!    writer ──► diagram ──► assembler ──► image ──► guard ──► done
//!       │                      │            ▲
//!       └──────────────────────┴────────────┘   (branches skip what the
//!                                                draft doesn't need)
//! ```

pub mod context;
pub mod parse;
pub mod placeholder;
pub mod router;
pub mod steps;

pub use context::StepContext;
pub use router::{route, Decision, Terminal};
pub use steps::run_step;
