//! Onboarding system: the guarded tool-orchestration loop.
//!
//! A turn derives the user's step from the store, offers the model only the
//! tools that step allows, executes the fenced calls it emits, and guards
//! against claims of work that was never done. Two flows share the core:
//! crew prospects and boat owners.

pub mod agent;
pub mod executor;
pub mod guard;
pub mod model;
pub mod normalize;
pub mod parser;
pub mod prompts;
pub mod routes;
pub mod state;
pub mod types;

pub use agent::{AgentDeps, OnboardingAgent};
pub use executor::ToolExecutor;
pub use guard::{ClaimFamily, ClaimRule, ClaimRules, GuardVerdict, HallucinationGuard};
pub use model::Flow;
pub use parser::{ParsedResponse, parse_tool_calls};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use state::{OnboardingStep, StepFacts, allowed_tool_names, derive_step};
pub use types::{EntityFlags, ToolCall, ToolResult, TurnRequest, TurnResponse};
