use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};

use crew_assist::config::{OnboardingConfig, ServerConfig};
use crew_assist::llm::{LlmConfig, create_provider};
use crew_assist::onboarding::model::Flow;
use crew_assist::onboarding::{AgentDeps, OnboardingAgent, OnboardingRouteState, onboarding_routes};
use crew_assist::store::{Database, LibSqlBackend};
use crew_assist::tools::ToolRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let server = ServerConfig::from_env().context("Invalid server configuration")?;
    let onboarding = OnboardingConfig::from_env();

    eprintln!("⛵ Crew Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", server.model);
    eprintln!("   Turn API: http://0.0.0.0:{}/api/onboarding/{{flow}}/turn", server.port);

    let llm = create_provider(&LlmConfig {
        backend: server.backend,
        api_key: server.api_key.clone(),
        model: server.model.clone(),
    })?;

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&server.db_path);
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", server.db_path))?,
    );
    eprintln!("   Database: {}", server.db_path);

    // ── Onboarding agents ───────────────────────────────────────────────
    let deps = AgentDeps {
        db: Arc::clone(&db),
        llm,
        tools: Arc::new(ToolRegistry::builtin()),
    };
    let state = OnboardingRouteState {
        prospect: Arc::new(OnboardingAgent::new(
            Flow::Prospect,
            onboarding.clone(),
            deps.clone(),
        )),
        owner: Arc::new(OnboardingAgent::new(Flow::Owner, onboarding, deps)),
        db,
    };

    let app = onboarding_routes(state).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server.port))
        .await
        .with_context(|| format!("Failed to bind port {}", server.port))?;
    tracing::info!(port = server.port, "Onboarding server started");
    axum::serve(listener, app).await?;
    Ok(())
}
