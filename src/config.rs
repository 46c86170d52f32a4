//! Configuration types.

use crate::error::ConfigError;
use crate::llm::LlmBackend;
use crate::onboarding::model::Flow;

/// Tuning knobs for the onboarding loop.
///
/// Injected into [`OnboardingAgent`](crate::onboarding::OnboardingAgent) at
/// construction; nothing in the core reads ambient globals.
#[derive(Debug, Clone)]
pub struct OnboardingConfig {
    /// Maximum model calls per turn in the prospect flow.
    pub prospect_max_iterations: usize,
    /// Maximum model calls per turn in the owner flow.
    pub owner_max_iterations: usize,
    /// Maximum corrective nudges per mutating tool per turn.
    pub nudge_cap: u32,
    /// Maximum "your tool call did not parse" retries per turn.
    pub malformed_retry_cap: u32,
    /// Return a canned success message once a step's terminal mutation succeeds.
    pub short_circuit_on_terminal: bool,
    /// Log every rendered system prompt at debug level.
    pub log_prompts: bool,
    /// Token budget per model call.
    pub max_tokens: u32,
    /// Sampling temperature per model call.
    pub temperature: f32,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            prospect_max_iterations: 6,
            owner_max_iterations: 8,
            nudge_cap: 2,
            malformed_retry_cap: 2,
            short_circuit_on_terminal: true,
            log_prompts: false,
            max_tokens: 2048,
            temperature: 0.3,
        }
    }
}

impl OnboardingConfig {
    /// Iteration cap for one turn of `flow`.
    pub fn max_iterations(&self, flow: Flow) -> usize {
        match flow {
            Flow::Prospect => self.prospect_max_iterations,
            Flow::Owner => self.owner_max_iterations,
        }
    }

    /// Build from `CREW_ASSIST_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            prospect_max_iterations: env_parse(
                "CREW_ASSIST_PROSPECT_MAX_ITERATIONS",
                defaults.prospect_max_iterations,
            ),
            owner_max_iterations: env_parse(
                "CREW_ASSIST_OWNER_MAX_ITERATIONS",
                defaults.owner_max_iterations,
            ),
            nudge_cap: env_parse("CREW_ASSIST_NUDGE_CAP", defaults.nudge_cap),
            malformed_retry_cap: env_parse(
                "CREW_ASSIST_MALFORMED_RETRY_CAP",
                defaults.malformed_retry_cap,
            ),
            short_circuit_on_terminal: env_parse(
                "CREW_ASSIST_SHORT_CIRCUIT",
                defaults.short_circuit_on_terminal,
            ),
            log_prompts: env_parse("CREW_ASSIST_LOG_PROMPTS", defaults.log_prompts),
            max_tokens: env_parse("CREW_ASSIST_MAX_TOKENS", defaults.max_tokens),
            temperature: env_parse("CREW_ASSIST_TEMPERATURE", defaults.temperature),
        }
    }
}

/// Process-level settings for the HTTP binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: String,
    pub backend: LlmBackend,
    pub model: String,
    pub api_key: secrecy::SecretString,
}

impl ServerConfig {
    /// Read server settings from the environment.
    ///
    /// The API key variable depends on the backend: `ANTHROPIC_API_KEY` or
    /// `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = match std::env::var("CREW_ASSIST_LLM_BACKEND") {
            Ok(raw) => raw.parse::<LlmBackend>()?,
            Err(_) => LlmBackend::Anthropic,
        };

        let key_var = backend.api_key_var();
        let api_key = std::env::var(key_var)
            .map_err(|_| ConfigError::MissingEnvVar(key_var.to_string()))?;

        let model = std::env::var("CREW_ASSIST_MODEL")
            .unwrap_or_else(|_| backend.default_model().to_string());

        let port = match std::env::var("CREW_ASSIST_PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "CREW_ASSIST_PORT".to_string(),
                message: format!("'{raw}' is not a valid port"),
            })?,
            Err(_) => 8080,
        };

        let db_path = std::env::var("CREW_ASSIST_DB_PATH")
            .unwrap_or_else(|_| "./data/crew-assist.db".to_string());

        Ok(Self {
            port,
            db_path,
            backend,
            model,
            api_key: secrecy::SecretString::from(api_key),
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_caps() {
        let config = OnboardingConfig::default();
        assert_eq!(config.nudge_cap, 2);
        assert_eq!(config.prospect_max_iterations, 6);
        assert_eq!(config.owner_max_iterations, 8);
        assert!(config.short_circuit_on_terminal);
        assert!(!config.log_prompts);
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        assert_eq!(env_parse("CREW_ASSIST_TEST_UNSET_VARIABLE", 7usize), 7);
    }
}
