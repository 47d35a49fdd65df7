//! # NVB Attention Backend - Main Application Entry Point
//!
//! Non-verbal behaviour controller for a desktop social robot. Microphone
//! audio streams in over WebSocket, per-channel detectors decide who is
//! speaking, and an attention arbiter turns that into gaze, icon and
//! backchannel intents once per cycle. An operator can override the robot
//! through a small HTTP command surface.
//!
//! ## Key Rust Concepts Used:
//! - **tasks**: every detector and the arbiter run as their own tokio task
//! - **channels**: `mpsc` queues carry audio frames, `watch` carries the focus view
//! - **Arc**: the registry and mailbox are shared between tasks without copying
//! - **select!**: the server and the shutdown signal race, whichever ends first wins
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, `config.toml`, environment)
//! - **audio**: PCM decoding, frame routing, speech scoring and detection
//! - **attention**: speaker registry, override mailbox, arbiter, actuation
//! - **websocket**: audio ingress actors
//! - **handlers** / **health**: the HTTP command and status surface
//! - **shutdown**: cooperative stop flag and bounded task join
//! - **state** / **error**: shared handler state and HTTP error responses

// Module declarations
mod attention;  // Registry, mailbox, arbiter, actuation (attention/ directory)
mod audio;      // Decoding, routing and detection (audio/ directory)
mod config;     // Configuration management (config.rs)
mod error;      // HTTP error responses (error.rs)
mod handlers;   // Command and status endpoints (handlers/ directory)
mod health;     // Health check endpoint (health.rs)
mod shutdown;   // Stop flag and task join (shutdown.rs)
mod state;      // Shared handler state (state.rs)
mod websocket;  // Audio ingress actors (websocket.rs)

use actix_cors::Cors;  // Cross-Origin Resource Sharing support
use actix_web::{web, App, HttpServer};  // Web framework
use anyhow::Result;    // Startup errors end the process
use crate::attention::arbiter::ArbiterConfig;
use crate::attention::{
    AttentionArbiter, ChannelGeometry, LoggingActuator, OverrideMailbox, SpeakerRegistry,
};
use crate::audio::{ChannelDetector, DetectorConfig, EarshotScorer, FrameRouter};
use crate::config::AppConfig;
use crate::shutdown::{join_with_timeout, ShutdownSignal};
use crate::state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;          // Bounded per-channel frame queues
use tokio::task::JoinHandle;
use tracing::{error, info, warn};  // Structured logging
use tracing_actix_web::TracingLogger;  // One span per HTTP request
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};  // Logging setup

/// Seconds the HTTP server gets to finish in-flight requests on stop.
const SERVER_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads and validates configuration** (fails fast on bad geometry or timings)
/// 2. **Spawns the background tasks**: one detector per channel, then the arbiter
/// 3. **Starts the HTTP server** with the command surface and audio WebSockets
/// 4. **Waits** for the server to exit or for a stop request
/// 5. **Joins the tasks** with a bounded timeout and reports any that hang
#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();
    init_tracing()?;

    // Defaults, then config.toml, then APP_* variables
    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting nvb-attention-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        channels = config.channels.len(),
        cadence_ms = config.arbiter.cadence_ms,
        "Configuration loaded: {}:{}",
        config.server.host,
        config.server.port
    );

    // Shared between the detectors, the arbiter and the handlers
    let shutdown = ShutdownSignal::new();
    let registry = Arc::new(SpeakerRegistry::new(config.channel_ids()));
    let mailbox = Arc::new(OverrideMailbox::new());
    let mut tasks: Vec<(String, JoinHandle<()>)> = Vec::new();

    // One detector task per channel, each fed by its own bounded queue
    let detector_config = DetectorConfig::from_app(&config);
    let mut router = FrameRouter::new();
    for channel in &config.channels {
        let (tx, rx) = mpsc::channel(config.audio.frame_queue_capacity);
        router.add_route(channel.id, channel.input_index, tx);

        let detector = ChannelDetector::new(
            channel.id,
            detector_config.clone(),
            Box::new(EarshotScorer::new()),
            registry.clone(),
        );
        tasks.push((
            format!("detector-{}", channel.id),
            tokio::spawn(detector.run(rx, shutdown.clone())),
        ));
    }

    let arbiter = AttentionArbiter::new(
        ArbiterConfig::from_app(&config),
        ChannelGeometry::from_channels(&config.channels),
        registry.clone(),
        mailbox.clone(),
    );
    let focus = arbiter.subscribe();
    tasks.push((
        "arbiter".to_string(),
        tokio::spawn(arbiter.run(Box::new(LoggingActuator::new()), shutdown.clone())),
    ));

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let join_timeout = Duration::from_millis(config.arbiter.join_timeout_ms);
    let app_state = AppState::new(config, registry, mailbox, router, focus, shutdown.clone());

    setup_signal_handlers(shutdown.clone());

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/action/{command}", web::get().to(handlers::run_action))
                    .route("/override", web::post().to(handlers::post_override))
                    .route("/stop", web::get().to(handlers::stop))
                    .route("/speakers", web::get().to(handlers::get_speakers))
                    .route("/focus", web::get().to(handlers::get_focus))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .route("/ws/audio", web::get().to(websocket::device_audio))
            .route("/ws/audio/{channel}", web::get().to(websocket::channel_audio))
            // Also provide health check at root level for convenience
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    // Signals raise the shared shutdown flag instead, see setup_signal_handlers
    .disable_signals()
    .shutdown_timeout(SERVER_SHUTDOWN_TIMEOUT_SECS)
    .run();

    // The handle lets us stop the server from outside its own future
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => info!("HTTP server exited"),
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
            }
            shutdown.trigger();
        }
        _ = shutdown.wait() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    // Detectors publish a final silent state, the arbiter flushes deferred intents
    let stragglers = join_with_timeout(tasks, join_timeout).await;
    if stragglers.is_empty() {
        info!("Server stopped gracefully");
    } else {
        warn!(?stragglers, "Server stopped with tasks still running");
    }
    Ok(())
}

/// Set up structured logging.
///
/// `RUST_LOG` controls the filter; if it is not set the default is
/// `nvb_attention_backend=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nvb_attention_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Raise the shutdown signal on SIGTERM or SIGINT (Ctrl+C).
fn setup_signal_handlers(shutdown: ShutdownSignal) {
    tokio::spawn(async move {
        wait_for_os_signal().await;
        shutdown.trigger();
    });
}

#[cfg(unix)]
async fn wait_for_os_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return std::future::pending().await;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
