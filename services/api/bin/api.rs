//! Main Entrypoint for the Tutor API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading the curriculum and prompt templates.
//! 3. Building the LLM client, oracles and turn processor.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tutor_api::{
    config::{Config, Provider},
    router::create_router,
    state::AppState,
};
use tutor_core::{
    Curriculum, InMemorySessionStore, TurnConfig, TurnProcessor,
    llm_client::{LLMClient, OpenAICompatibleClient},
    llm_oracle::LlmTutor,
    prompts::PromptSet,
};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

fn load_curriculum(config: &Config) -> anyhow::Result<Curriculum> {
    match &config.curriculum_path {
        Some(path) => Curriculum::from_json_file(path)
            .with_context(|| format!("Failed to load curriculum from {}", path.display())),
        None => Ok(Curriculum::tic_tac_toe()),
    }
}

fn llm_config(config: &Config) -> anyhow::Result<OpenAIConfig> {
    let openai_config = match &config.provider {
        Provider::OpenAI => {
            info!("Using OpenAI provider.");
            let api_key = config
                .openai_api_key
                .as_ref()
                .context("OPENAI_API_KEY is required for the openai provider")?;
            OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base("https://api.openai.com/v1/")
        }
        Provider::Gemini => {
            info!("Using Gemini provider.");
            let api_key = config
                .gemini_api_key
                .as_ref()
                .context("GEMINI_API_KEY is required for the gemini provider")?;
            OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base("https://generativelanguage.googleapis.com/v1beta/openai")
        }
    };
    Ok(openai_config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Load Curriculum and Prompts ---
    let curriculum = Arc::new(load_curriculum(&config)?);
    info!(
        curriculum = %curriculum.name(),
        milestones = curriculum.len(),
        "Curriculum loaded."
    );
    let prompts = PromptSet::load(&config.prompts_path).with_context(|| {
        format!(
            "Failed to load prompts from {}",
            config.prompts_path.display()
        )
    })?;

    // --- 4. Initialize Shared Services ---
    let llm_client: Arc<dyn LLMClient> = Arc::new(OpenAICompatibleClient::new(
        llm_config(&config)?,
        config.chat_model.clone(),
    ));
    let tutor = Arc::new(LlmTutor::new(llm_client, prompts));

    let mut processor = TurnProcessor::new(
        curriculum,
        Arc::new(InMemorySessionStore::new()),
        tutor.clone(),
        TurnConfig {
            history_window: config.history_window,
            oracle_timeout: config.oracle_timeout,
            student_background: config.student_background.clone(),
        },
    );
    if config.phase_tracking {
        processor = processor
            .with_phase_oracle(tutor.clone())
            .with_reply_generator(tutor);
        info!("Phase tracking enabled.");
    }

    let app_state = Arc::new(AppState {
        processor: Arc::new(processor),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
