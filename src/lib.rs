//! Crew Assist: guarded LLM onboarding for a sailing crew-matching service.

pub mod config;
pub mod error;
pub mod llm;
pub mod onboarding;
pub mod store;
pub mod tools;
