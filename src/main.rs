use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use post_relay::channels::{TelegramTransport, Transport};
use post_relay::config::RelayConfig;
use post_relay::control::ControlPanel;
use post_relay::pipeline::Router;
use post_relay::relay::Relay;
use post_relay::store::{LibSqlBackend, RuleStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env().context("Failed to read RELAY_* configuration")?;

    // Held until exit so buffered file logs are flushed
    let _log_guard = init_tracing(&config);

    eprintln!("📮 Post Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Control chat: {}", config.control_chat_id);
    eprintln!("   Database: {}", config.db_path.display());
    if let Some(dir) = &config.log_dir {
        eprintln!("   Log dir: {}", dir.display());
    }
    if config.enable_forbidden_content {
        eprintln!("   Forwarding protected content: enabled");
    }

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn RuleStore> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );

    // ── Transport + router ───────────────────────────────────────────────
    let transport: Arc<dyn Transport> =
        Arc::new(TelegramTransport::new(config.bot_token.clone()));
    let router = Arc::new(Router::new(Arc::clone(&transport), config.router_config()));

    let control = Arc::new(ControlPanel::new(
        Arc::clone(&transport),
        Arc::clone(&store),
        Arc::clone(&router),
        config.operator_config(),
    ));

    // Initial load doubles as the "ready" announcement in the control chat
    control
        .reload_and_report()
        .await
        .context("Failed to load rules")?;

    Relay::new(transport, router, control).run().await?;

    Ok(())
}

/// Console logging, plus a daily-rolling file when `RELAY_LOG_DIR` is set.
fn init_tracing(config: &RelayConfig) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "post-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}
