//! Tool registry: every tool the onboarding loop can reach, keyed by name.

use std::collections::HashMap;
use std::sync::Arc;

use crate::onboarding::model::Flow;
use crate::onboarding::state::{OnboardingStep, allowed_tool_names};
use crate::tools::builtin::boat::{CreateBoatTool, ListBoatsTool, UpdateBoatTool};
use crate::tools::builtin::journey::{CreateJourneyTool, ListJourneysTool, SearchJourneysTool};
use crate::tools::builtin::profile::{CreateProfileTool, UpdateUserProfileTool};
use crate::tools::builtin::reference::{
    ExperienceLevelDefinitionsTool, RiskLevelDefinitionsTool, SkillDefinitionsTool,
    SuggestSignUpTool,
};
use crate::tools::tool::{Tool, ToolDefinition};

/// Registry of available tools.
///
/// Built once at startup and shared read-only across turns. Which tools a
/// turn may actually call is decided by the step table, not by the registry.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry holding all built-in onboarding tools.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ExperienceLevelDefinitionsTool));
        registry.register(Arc::new(RiskLevelDefinitionsTool));
        registry.register(Arc::new(SkillDefinitionsTool));
        registry.register(Arc::new(SuggestSignUpTool));
        registry.register(Arc::new(CreateProfileTool));
        registry.register(Arc::new(UpdateUserProfileTool));
        registry.register(Arc::new(CreateBoatTool));
        registry.register(Arc::new(UpdateBoatTool));
        registry.register(Arc::new(ListBoatsTool));
        registry.register(Arc::new(CreateJourneyTool));
        registry.register(Arc::new(ListJourneysTool));
        registry.register(Arc::new(SearchJourneysTool));
        registry
    }

    /// Register a tool. A later registration under the same name replaces
    /// the earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Replaced existing tool registration");
        } else {
            tracing::debug!(tool = %name, "Registered tool");
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// Definitions for every registered tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Definitions offered to the model at `step`, in step-table order.
    ///
    /// Names in the table that are not registered, and disabled tools, are
    /// left out.
    pub fn tools_for_step(&self, flow: Flow, step: OnboardingStep) -> Vec<ToolDefinition> {
        allowed_tool_names(flow, step)
            .iter()
            .filter_map(|name| self.tools.get(*name))
            .map(|tool| tool.definition())
            .filter(|def| !def.disabled)
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
