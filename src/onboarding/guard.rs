//! Catches responses that claim a save happened when no call was made.
//!
//! Detection is a set of [`ClaimRule`]s, each tying a regex to a mutating
//! tool. The rules are approximate by nature; they live apart from the loop
//! so they can be tuned and tested on their own.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::parser::looks_like_tool_call;
use super::prompts::{assume_exists_message, malformed_retry_message, nudge_message};

/// What kind of false claim a rule detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimFamily {
    /// "Here's a summary of your profile..."
    CompletionSummary,
    /// "Your boat has been saved!"
    SuccessClaim,
}

#[derive(Debug, Clone)]
pub struct ClaimRule {
    pub tool: String,
    pub family: ClaimFamily,
    pub regex: Regex,
}

impl ClaimRule {
    pub fn new(tool: &str, family: ClaimFamily, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            tool: tool.to_string(),
            family,
            regex: Regex::new(pattern)?,
        })
    }
}

static DEFAULT_RULES: LazyLock<Vec<ClaimRule>> = LazyLock::new(|| {
    [
        (
            "create_profile",
            ClaimFamily::SuccessClaim,
            r"(?i)\b(?:your|the)\s+(?:crew\s+|skipper\s+)?profile\s+(?:has\s+been|is|was)\s+(?:now\s+|all\s+)?(?:successfully\s+)?(?:saved|created|set\s+up|ready|complete)",
        ),
        (
            "create_profile",
            ClaimFamily::CompletionSummary,
            r"(?i)\b(?:summary|recap)\s+of\s+your\s+profile\b|\bI(?:'ve|\s+have)\s+(?:saved|created|set\s+up)\s+your\s+profile\b",
        ),
        (
            "create_boat",
            ClaimFamily::SuccessClaim,
            r"(?i)\b(?:boat|yacht|vessel)\b[^.!?\n]{0,60}\b(?:has\s+been|is\s+now|was)\s+(?:successfully\s+)?(?:saved|added|created|registered|listed)\b",
        ),
        (
            "create_boat",
            ClaimFamily::CompletionSummary,
            r"(?i)\bI(?:'ve|\s+have)\s+(?:added|saved|registered|created)\s+(?:your|the)\s+(?:boat|yacht|vessel)\b",
        ),
        (
            "create_journey",
            ClaimFamily::SuccessClaim,
            r"(?i)\b(?:journey|trip|passage|voyage)\b[^.!?\n]{0,60}\b(?:has\s+been|is\s+now|was)\s+(?:successfully\s+)?(?:saved|added|created|published|set\s+up)\b",
        ),
        (
            "create_journey",
            ClaimFamily::CompletionSummary,
            r"(?i)\bI(?:'ve|\s+have)\s+(?:added|saved|created|set\s+up)\s+(?:your|the)\s+(?:first\s+)?(?:journey|trip|passage|voyage)\b",
        ),
        (
            "update_user_profile",
            ClaimFamily::SuccessClaim,
            r"(?i)\bI(?:'ve|\s+have)\s+updated\s+your\s+profile\b",
        ),
        (
            "update_boat",
            ClaimFamily::SuccessClaim,
            r"(?i)\bI(?:'ve|\s+have)\s+updated\s+(?:your|the)\s+(?:boat|yacht)\b",
        ),
    ]
    .into_iter()
    .map(|(tool, family, pattern)| ClaimRule {
        tool: tool.to_string(),
        family,
        regex: Regex::new(pattern).unwrap(),
    })
    .collect()
});

/// An extendable set of claim rules.
#[derive(Debug, Clone, Default)]
pub struct ClaimRules {
    rules: Vec<ClaimRule>,
}

impl ClaimRules {
    pub fn default_rules() -> Self {
        Self {
            rules: DEFAULT_RULES.clone(),
        }
    }

    pub fn push(&mut self, rule: ClaimRule) {
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule matching `text` whose tool is allowed and not yet executed.
    pub fn find_claim(
        &self,
        text: &str,
        allowed: &[&str],
        executed: &HashSet<String>,
    ) -> Option<&ClaimRule> {
        self.rules.iter().find(|rule| {
            allowed.contains(&rule.tool.as_str())
                && !executed.contains(&rule.tool)
                && rule.regex.is_match(text)
        })
    }
}

/// What the loop should do with a response that carried no tool calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    /// Treat the text as the final answer.
    Accept,
    /// Ask the model to emit the call it claimed.
    Nudge { tool: String, message: String },
    /// Cap reached: tell the model to move on.
    AssumeExists { tool: String, message: String },
    /// Call-like text failed to parse: ask for a corrected block.
    RetryMalformed { message: String },
}

impl GuardVerdict {
    /// Synthetic message to append before the next iteration, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Accept => None,
            Self::Nudge { message, .. }
            | Self::AssumeExists { message, .. }
            | Self::RetryMalformed { message } => Some(message),
        }
    }
}

/// Per-turn guard state.
#[derive(Debug)]
pub struct HallucinationGuard<'a> {
    rules: &'a ClaimRules,
    nudge_cap: u32,
    malformed_cap: u32,
    nudges: HashMap<String, u32>,
    assumed: HashSet<String>,
    malformed_retries: u32,
}

impl<'a> HallucinationGuard<'a> {
    pub fn new(rules: &'a ClaimRules, nudge_cap: u32, malformed_cap: u32) -> Self {
        Self {
            rules,
            nudge_cap,
            malformed_cap,
            nudges: HashMap::new(),
            assumed: HashSet::new(),
            malformed_retries: 0,
        }
    }

    pub fn nudge_count(&self, tool: &str) -> u32 {
        self.nudges.get(tool).copied().unwrap_or(0)
    }

    /// Classify a response that produced no executable calls.
    ///
    /// `executed` holds the tools that already succeeded this turn; claims
    /// about those are true and pass.
    pub fn inspect(
        &mut self,
        text: &str,
        dropped_blocks: usize,
        allowed: &[&str],
        executed: &HashSet<String>,
    ) -> GuardVerdict {
        if (dropped_blocks > 0 || looks_like_tool_call(text))
            && self.malformed_retries < self.malformed_cap
        {
            self.malformed_retries += 1;
            tracing::debug!(
                retry = self.malformed_retries,
                dropped_blocks,
                "Requesting corrected tool call"
            );
            return GuardVerdict::RetryMalformed {
                message: malformed_retry_message().to_string(),
            };
        }

        let Some(rule) = self.rules.find_claim(text, allowed, executed) else {
            return GuardVerdict::Accept;
        };
        let tool = rule.tool.clone();
        let count = self.nudges.entry(tool.clone()).or_insert(0);
        if *count < self.nudge_cap {
            *count += 1;
            tracing::info!(tool = %tool, family = ?rule.family, nudge = *count, "Unbacked claim, nudging");
            let message = nudge_message(&tool);
            return GuardVerdict::Nudge { tool, message };
        }
        if self.assumed.insert(tool.clone()) {
            tracing::info!(tool = %tool, "Nudge cap reached, assuming record exists");
            let message = assume_exists_message(&tool);
            return GuardVerdict::AssumeExists { tool, message };
        }
        GuardVerdict::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER_ADD_BOAT: &[&str] = &["create_boat", "update_user_profile"];

    #[test]
    fn default_rules_cover_terminal_tools() {
        let rules = ClaimRules::default_rules();
        for tool in ["create_profile", "create_boat", "create_journey"] {
            let families: HashSet<ClaimFamily> = rules
                .rules
                .iter()
                .filter(|r| r.tool == tool)
                .map(|r| r.family)
                .collect();
            assert_eq!(families.len(), 2, "{tool}");
        }
    }

    #[test]
    fn claim_without_call_is_nudged() {
        let rules = ClaimRules::default_rules();
        let mut guard = HallucinationGuard::new(&rules, 2, 2);
        let verdict = guard.inspect(
            "Great news, your boat Saltwhistle has been saved!",
            0,
            OWNER_ADD_BOAT,
            &HashSet::new(),
        );
        assert!(matches!(verdict, GuardVerdict::Nudge { ref tool, .. } if tool == "create_boat"));
        assert!(verdict.message().unwrap().contains("create_boat"));
    }

    #[test]
    fn nudges_bounded_then_assume_then_accept() {
        let rules = ClaimRules::default_rules();
        let mut guard = HallucinationGuard::new(&rules, 2, 2);
        let text = "I've added your boat to your account.";
        let verdicts: Vec<GuardVerdict> = (0..6)
            .map(|_| guard.inspect(text, 0, OWNER_ADD_BOAT, &HashSet::new()))
            .collect();
        let nudges = verdicts
            .iter()
            .filter(|v| matches!(v, GuardVerdict::Nudge { .. }))
            .count();
        assert_eq!(nudges, 2);
        assert!(matches!(verdicts[2], GuardVerdict::AssumeExists { .. }));
        assert!(verdicts[3..].iter().all(|v| *v == GuardVerdict::Accept));
        assert_eq!(guard.nudge_count("create_boat"), 2);
    }

    #[test]
    fn executed_tool_claims_pass() {
        let rules = ClaimRules::default_rules();
        let mut guard = HallucinationGuard::new(&rules, 2, 2);
        let executed = HashSet::from(["create_boat".to_string()]);
        let verdict = guard.inspect("Your boat has been saved.", 0, OWNER_ADD_BOAT, &executed);
        assert_eq!(verdict, GuardVerdict::Accept);
    }

    #[test]
    fn claims_about_tools_outside_step_pass() {
        let rules = ClaimRules::default_rules();
        let mut guard = HallucinationGuard::new(&rules, 2, 2);
        let verdict = guard.inspect(
            "Your profile has been saved.",
            0,
            OWNER_ADD_BOAT,
            &HashSet::new(),
        );
        assert_eq!(verdict, GuardVerdict::Accept);
    }

    #[test]
    fn malformed_retry_has_own_cap() {
        let rules = ClaimRules::default_rules();
        let mut guard = HallucinationGuard::new(&rules, 2, 1);
        let first = guard.inspect("Saving now.", 1, OWNER_ADD_BOAT, &HashSet::new());
        assert!(matches!(first, GuardVerdict::RetryMalformed { .. }));
        let second = guard.inspect("Saving now.", 1, OWNER_ADD_BOAT, &HashSet::new());
        assert_eq!(second, GuardVerdict::Accept);
    }

    #[test]
    fn plain_questions_accepted() {
        let rules = ClaimRules::default_rules();
        let mut guard = HallucinationGuard::new(&rules, 2, 2);
        let verdict = guard.inspect(
            "What is the name of your boat?",
            0,
            OWNER_ADD_BOAT,
            &HashSet::new(),
        );
        assert_eq!(verdict, GuardVerdict::Accept);
    }

    #[test]
    fn custom_rules_extend_the_set() {
        let mut rules = ClaimRules::default();
        assert!(rules.is_empty());
        rules.push(
            ClaimRule::new("create_boat", ClaimFamily::SuccessClaim, r"(?i)all aboard").unwrap(),
        );
        let mut guard = HallucinationGuard::new(&rules, 1, 0);
        let verdict = guard.inspect("All aboard!", 0, &["create_boat"], &HashSet::new());
        assert!(matches!(verdict, GuardVerdict::Nudge { .. }));
    }
}
