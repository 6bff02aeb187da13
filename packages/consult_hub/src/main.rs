use anyhow::{Context, Result};
use axum::{Router, routing::get};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod auth;
mod billing;
mod config;
mod db;
mod error;
mod handlers;
mod models;
mod repository;
mod session;
mod timeout;
mod ws;

use crate::config::{ConsultHubConfig, FileConfig, HubConfig, load_config, resolve_bind_addr};
use crate::db::Database;
use crate::repository::ChatRepository;
use crate::timeout::TimeoutSupervisor;
use crate::ws::ChatHub;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "consult-hub")]
#[command(about = "Real-time consultation chat hub and session-billing engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.consult_hub)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub server in the foreground
    Serve(ServeArgs),

    /// Mint an auth token for a participant and print it
    MintToken(MintTokenArgs),
}

#[derive(Parser, Default)]
struct ServeArgs {
    /// Host to bind to (overrides config.toml)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the server (overrides config.toml)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Parser)]
struct MintTokenArgs {
    /// Participant id the token authenticates as
    #[arg(long)]
    participant_id: i64,

    /// Token lifetime in hours (omit for a non-expiring token)
    #[arg(long)]
    expires_in_hours: Option<i64>,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub hub: Arc<ChatHub>,
    pub db: Arc<Database>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConsultHubConfig::new(cli.data_dir.clone())?;

    match cli.command {
        None => run_server(ServeArgs::default(), config).await,
        Some(Commands::Serve(args)) => run_server(args, config).await,
        Some(Commands::MintToken(args)) => mint_token_command(args, config).await,
    }
}

async fn mint_token_command(args: MintTokenArgs, config: ConsultHubConfig) -> Result<()> {
    let db = Database::new(&config).await?;
    let repo = ChatRepository::new(db.pool.clone());
    let expires_at = args
        .expires_in_hours
        .map(|h| chrono::Utc::now() + chrono::Duration::hours(h));
    let token = auth::mint_token(&repo, args.participant_id, expires_at).await?;
    println!("{token}");
    Ok(())
}

async fn run_server(args: ServeArgs, config: ConsultHubConfig) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "consult_hub=debug,tower_http=debug,info"
    } else {
        "consult_hub=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting consult-hub");

    let file_config: FileConfig = load_config(&config.data_dir)
        .extract()
        .context("Failed to load configuration")?;
    let hub_config = HubConfig::from_file(&file_config);
    let addr = resolve_bind_addr(&file_config, args.host.as_deref(), args.port)?;
    info!(
        "Config: inactivity_timeout={}s, sweep_interval={}s, platform_share={}%",
        hub_config.inactivity_timeout.as_secs(),
        hub_config.sweep_interval.as_secs(),
        hub_config.platform_share_percent
    );

    info!("Initializing database...");
    let db = Arc::new(Database::new(&config).await?);
    let repo = ChatRepository::new(db.pool.clone());

    let hub = ChatHub::new(repo, hub_config.clone());

    // Restart safety: sessions Active in the store resume timeout coverage
    // even if their participants never reconnect.
    hub.rehydrate().await?;

    let sweep_token = TimeoutSupervisor::spawn_sweep(hub.clone(), hub_config.sweep_interval);

    let app_state = AppState {
        hub: hub.clone(),
        db: db.clone(),
    };

    let app = Router::new()
        .route("/ws", get(ws::chat_websocket_handler))
        .route("/api/sessions/{id}", get(handlers::get_session))
        .route(
            "/api/sessions/{id}/billing",
            get(handlers::get_session_billing),
        )
        .route(
            "/api/sessions/{id}/messages",
            get(handlers::get_session_messages),
        )
        .route(
            "/api/counselors/online",
            get(handlers::get_online_counselors),
        )
        .route("/api/stats", get(handlers::get_stats))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let actual_addr = listener.local_addr()?;
    info!("consult-hub listening on http://{}", actual_addr);

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
        }
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    sweep_token.cancel();
    info!("consult-hub stopped");
    Ok(())
}
