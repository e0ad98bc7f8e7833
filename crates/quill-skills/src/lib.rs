//! # quill-skills
//!
//! The skill-based production path: a planner that decomposes a writing plan
//! into an ordered list of atomic skills, and an executor that runs them
//! strictly in sequence, streaming output and accumulating the draft.

pub mod executor;
pub mod planner;

pub use planner::plan_skills;
pub use quill_core::{Skill, SkillKind, SkillStatus};
