//! Tools the model can invoke during onboarding.

pub mod builtin;
pub mod registry;
pub mod tool;

pub use registry::ToolRegistry;
pub use tool::{
    Tool, ToolAccess, ToolCategory, ToolContext, ToolDefinition, ToolError, ToolOutput,
};
