use std::sync::Arc;

use anyhow::Context;
use pot_automator::config::AppConfig;
use pot_automator::gateway::{BankGateway, MonzoGateway};
use pot_automator::setup;
use pot_automator::store::{Database, LibSqlBackend};
use pot_automator::webhook::{WebhookIntake, WebhookRouteState, webhook_routes};
use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Failed to read configuration")?;
    let _log_guard = init_tracing(&config);

    setup::check(&config)?;

    eprintln!("💷 Pot Automator v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Webhook: http://0.0.0.0:{}/hook", config.port);
    eprintln!("   Database: {}", config.db_path.display());

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );

    // ── Bank gateway ─────────────────────────────────────────────────────
    let gateway: Arc<dyn BankGateway> = Arc::new(
        MonzoGateway::new(config.bank.monzo()).context("Failed to create bank client")?,
    );

    let user = setup::bootstrap_user(&config, db.as_ref(), gateway.as_ref())
        .await
        .context("Startup bootstrap failed")?;
    tracing::info!(
        user_id = %user.id,
        account_id = user.account_id.as_deref().unwrap_or_default(),
        "User ready"
    );

    // ── HTTP server ──────────────────────────────────────────────────────
    let intake = WebhookIntake::assemble(
        Arc::clone(&db),
        Arc::clone(&gateway),
        config.grace_window,
        config.settle_delay,
    );
    let app = webhook_routes(WebhookRouteState { intake });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "Webhook server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}

/// Log to stdout, or to a daily-rolling file when a log directory is set.
fn init_tracing(config: &AppConfig) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "pot-automator.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            None
        }
    }
}
