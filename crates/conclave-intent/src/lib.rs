//! Two-stage intent routing: AI-driven candidate generation over the
//! registered skills, then a structured decision — run a skill, reply as
//! the model, or ask the user for clarification.

pub mod router;
pub mod skills;
pub mod slots;

pub use router::{IntentRouter, RouteAction, RouteOutcome};
pub use skills::{FnSkill, Skill, SkillDescriptor, SkillError, SkillRegistry};
