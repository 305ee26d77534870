use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use voice_detect_rs::{
    api::{self, AppState},
    auth::AuthService,
    config::{load_config, DbBackend},
    models::VoiceClassifier,
    storage::Database,
};

/// AI-generated voice detection service
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Address to bind (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding the scaler and classifier artifacts (overrides MODEL_DIR)
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Persistence backend: mongo, firebase, memory or none (overrides DB_BACKEND)
    #[arg(long)]
    db_backend: Option<DbBackend>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG may come from .env
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("🚀 Starting AI Voice Detection API");

    let args = Args::parse();
    let mut config = load_config().context("failed to load configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(model_dir) = args.model_dir {
        config.model_dir = model_dir;
    }
    if let Some(backend) = args.db_backend {
        config.database.backend = backend;
    }

    let classifier = VoiceClassifier::load(&config.model_dir).with_context(|| {
        format!(
            "failed to load classifier from {}",
            config.model_dir.display()
        )
    })?;

    let db = Database::connect(&config.database).await;
    let state = AppState::new(Arc::new(classifier), AuthService::from_config(&config), db);
    let app = api::router(state);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;
    log::info!(
        "🎧 API ready to accept requests on {}",
        listener.local_addr().context("failed to read local address")?
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    log::info!("👋 Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }
    log::info!("🛑 Shutdown requested");
}
