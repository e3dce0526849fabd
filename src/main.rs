#![forbid(unsafe_code)]

//! `hive-relay` — Slack-hosted multi-instance AI assistant binary.
//!
//! Bootstraps configuration, detects the LLM provider, starts the Slack
//! Socket Mode integration, and runs the event dispatcher until
//! interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use hive_relay::config::GlobalConfig;
use hive_relay::provider::detect_provider;
use hive_relay::session::registry::SessionRegistry;
use hive_relay::slack::client::SlackService;
use hive_relay::slack::dispatcher::Dispatcher;
use hive_relay::workers::WorkerManager;
use hive_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "hive-relay", about = "Slack-hosted multi-instance AI assistant", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the state directory from the config file.
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("hive-relay bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config).map_err(|err| {
        AppError::Config(format!(
            "cannot load config '{}': {err} — copy config.toml next to the \
             binary, or pass --config <path>",
            args.config.display()
        ))
    })?;
    if let Some(state_dir) = args.state_dir {
        config.state_dir = state_dir;
    }
    config.load_credentials().await?;
    let config = Arc::new(config);
    info!("configuration loaded");

    // ── Detect provider from credentials ────────────────
    // A missing provider fails loudly here — never as a silent drop when
    // the first message arrives.
    let provider = detect_provider(&config)?;

    for instance in &config.instances {
        info!(
            name = %instance.name,
            persona = %instance.persona.name,
            emoji = %instance.persona.emoji,
            bundle = %instance.bundle,
            "instance ready"
        );
    }
    info!(default = %config.defaults.instance, "default instance");

    // ── Build core services ─────────────────────────────
    let workers = Arc::new(WorkerManager::new());
    let registry = SessionRegistry::new(Arc::clone(&config), provider, Arc::clone(&workers));

    let (slack, mut slack_runtime) = SlackService::start(&config.slack)?;
    let gateway: Arc<dyn hive_relay::slack::gateway::SlackGateway> = Arc::clone(&slack);
    let dispatcher = Dispatcher::new(Arc::clone(&config), Arc::clone(&registry), gateway);

    match slack.bot_user_id().await {
        Ok(user_id) => {
            info!(%user_id, "bot identity resolved");
            dispatcher.set_bot_user_id(&user_id);
        }
        Err(err) => warn!(%err, "could not resolve bot user id; mention parsing degraded"),
    }

    // Socket mode starts after the dispatcher is fully constructed so the
    // callbacks share the live state.
    slack_runtime.socket_task = Some(slack.start_socket_mode(Arc::clone(&dispatcher)));
    info!("slack socket mode started");

    // ── Background maintenance tasks ────────────────────
    let watchdog_slack = Arc::clone(&slack);
    let watchdog = tokio::spawn(async move {
        run_connection_watchdog(watchdog_slack).await;
    });

    let worker_timeout = Duration::from_secs(config.worker_timeout_seconds);
    let timeout_workers = Arc::clone(&workers);
    let worker_watchdog = tokio::spawn(async move {
        timeout_workers
            .run_timeout_watchdog(worker_timeout, Duration::from_secs(30))
            .await;
    });

    info!("hive-relay ready");

    // ── Wait for first shutdown signal ──────────────────
    shutdown_signal().await;
    info!("shutdown signal received — starting graceful shutdown");

    // A second Ctrl+C force-exits.
    tokio::spawn(async {
        shutdown_signal().await;
        error!("second shutdown signal received — forcing exit");
        std::process::exit(1);
    });

    let shutdown = async {
        workers.cancel_all().await;
        watchdog.abort();
        worker_watchdog.abort();
        if let Some(socket) = slack_runtime.socket_task.take() {
            socket.abort();
        }
        info!("slack runtime tasks stopped");
    };
    if tokio::time::timeout(Duration::from_secs(10), shutdown)
        .await
        .is_err()
    {
        error!("graceful shutdown timed out — exiting");
    }

    info!("hive-relay shut down");
    Ok(())
}

/// Periodic connection health check. Wall-clock jumps past the sleep
/// interval indicate an OS suspend; the websocket is then likely stale
/// and slack_morphism's own reconnect logic needs a health poke.
async fn run_connection_watchdog(slack: Arc<SlackService>) {
    const INTERVAL: Duration = Duration::from_secs(15);
    const HEALTH_EVERY: u32 = 8;

    let mut counter = 0u32;
    let mut last_wall = std::time::SystemTime::now();

    loop {
        tokio::time::sleep(INTERVAL).await;

        let now_wall = std::time::SystemTime::now();
        let elapsed_wall = now_wall
            .duration_since(last_wall)
            .unwrap_or(Duration::ZERO);
        if elapsed_wall > INTERVAL * 2 {
            warn!(
                jump_secs = elapsed_wall.as_secs(),
                "wall clock jumped — OS likely suspended; checking connection"
            );
            if let Err(err) = slack.health_check().await {
                error!(%err, "health check failed after suspend");
            }
        }
        last_wall = now_wall;

        counter += 1;
        if counter >= HEALTH_EVERY {
            counter = 0;
            if let Err(err) = slack.health_check().await {
                warn!(%err, "periodic health check failed");
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
