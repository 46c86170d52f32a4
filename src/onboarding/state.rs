//! Onboarding state machine: derives which step the user is in.
//!
//! The step is never stored. It is recomputed every turn (and after every
//! successful mutation inside a turn) from which entities exist in the store.

use serde::{Deserialize, Serialize};

use super::model::Flow;

/// The steps of an onboarding conversation.
///
/// Owner: SignUp → CreateProfile → AddBoat → AddJourney → Completed.
/// Prospect: SignUp → CreateProfile → Completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    SignUp,
    CreateProfile,
    AddBoat,
    AddJourney,
    Completed,
}

/// Existence facts the step is derived from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StepFacts {
    pub identity_present: bool,
    pub has_profile: bool,
    pub has_boat: bool,
    pub has_journey: bool,
}

/// Read-only reference tools available at every step.
pub const DEFINITION_TOOLS: [&str; 3] = [
    "get_experience_level_definitions",
    "get_risk_level_definitions",
    "get_skill_definitions",
];

const PROSPECT_SIGN_UP: &[&str] = &[
    DEFINITION_TOOLS[0],
    DEFINITION_TOOLS[1],
    DEFINITION_TOOLS[2],
    "search_journeys",
    "suggest_sign_up",
];
const PROSPECT_CREATE_PROFILE: &[&str] = &[
    DEFINITION_TOOLS[0],
    DEFINITION_TOOLS[1],
    DEFINITION_TOOLS[2],
    "create_profile",
];
const PROSPECT_COMPLETED: &[&str] = &[
    DEFINITION_TOOLS[0],
    DEFINITION_TOOLS[1],
    DEFINITION_TOOLS[2],
    "search_journeys",
    "update_user_profile",
];
const OWNER_SIGN_UP: &[&str] = &[
    DEFINITION_TOOLS[0],
    DEFINITION_TOOLS[1],
    DEFINITION_TOOLS[2],
    "suggest_sign_up",
];
const OWNER_CREATE_PROFILE: &[&str] = &[
    DEFINITION_TOOLS[0],
    DEFINITION_TOOLS[1],
    DEFINITION_TOOLS[2],
    "create_profile",
];
const OWNER_ADD_BOAT: &[&str] = &[
    DEFINITION_TOOLS[0],
    DEFINITION_TOOLS[1],
    DEFINITION_TOOLS[2],
    "create_boat",
    "update_user_profile",
];
const OWNER_ADD_JOURNEY: &[&str] = &[
    DEFINITION_TOOLS[0],
    DEFINITION_TOOLS[1],
    DEFINITION_TOOLS[2],
    "list_boats",
    "update_boat",
    "create_journey",
];
const OWNER_COMPLETED: &[&str] = &[
    DEFINITION_TOOLS[0],
    DEFINITION_TOOLS[1],
    DEFINITION_TOOLS[2],
    "list_boats",
    "update_boat",
    "list_journeys",
    "update_user_profile",
];

impl OnboardingStep {
    /// The mutation that creates this step's primary entity, if any.
    pub fn terminal_tool(&self, flow: Flow) -> Option<&'static str> {
        match (flow, self) {
            (_, Self::CreateProfile) => Some("create_profile"),
            (Flow::Owner, Self::AddBoat) => Some("create_boat"),
            (Flow::Owner, Self::AddJourney) => Some("create_journey"),
            _ => None,
        }
    }

    /// Whether onboarding is finished for this flow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Whether the step occurs in the given flow at all.
    pub fn belongs_to(&self, flow: Flow) -> bool {
        match flow {
            Flow::Owner => true,
            Flow::Prospect => !matches!(self, Self::AddBoat | Self::AddJourney),
        }
    }

    /// Short human label used in the prompt's state snapshot.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SignUp => "sign up",
            Self::CreateProfile => "create profile",
            Self::AddBoat => "add boat",
            Self::AddJourney => "add first journey",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SignUp => "sign_up",
            Self::CreateProfile => "create_profile",
            Self::AddBoat => "add_boat",
            Self::AddJourney => "add_journey",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Derive the current step. Pure and total.
pub fn derive_step(flow: Flow, facts: StepFacts) -> OnboardingStep {
    if !facts.identity_present {
        return OnboardingStep::SignUp;
    }
    if !facts.has_profile {
        return OnboardingStep::CreateProfile;
    }
    match flow {
        Flow::Prospect => OnboardingStep::Completed,
        Flow::Owner if !facts.has_boat => OnboardingStep::AddBoat,
        Flow::Owner if !facts.has_journey => OnboardingStep::AddJourney,
        Flow::Owner => OnboardingStep::Completed,
    }
}

/// The static allow-list for a step.
///
/// Steps outside the flow fall back to the flow's completed list.
pub fn allowed_tool_names(flow: Flow, step: OnboardingStep) -> &'static [&'static str] {
    use OnboardingStep::*;
    match (flow, step) {
        (Flow::Prospect, SignUp) => PROSPECT_SIGN_UP,
        (Flow::Prospect, CreateProfile) => PROSPECT_CREATE_PROFILE,
        (Flow::Prospect, AddBoat | AddJourney | Completed) => PROSPECT_COMPLETED,
        (Flow::Owner, SignUp) => OWNER_SIGN_UP,
        (Flow::Owner, CreateProfile) => OWNER_CREATE_PROFILE,
        (Flow::Owner, AddBoat) => OWNER_ADD_BOAT,
        (Flow::Owner, AddJourney) => OWNER_ADD_JOURNEY,
        (Flow::Owner, Completed) => OWNER_COMPLETED,
    }
}
