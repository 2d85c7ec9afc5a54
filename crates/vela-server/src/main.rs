//! Vela control plane server

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vela_config::{LogFormat, ServerConfig};
use vela_core::{Clock, SystemClock};
use vela_db::{Database, create_pool, run_migrations};
use vela_scheduler::{
    BuildEnqueuer, CleanupLoop, PgQueue, PlatformDefaults, ScheduleEvaluator, SettingsRefresher,
    bootstrap_settings,
};
use vela_server::services::{DbPublisher, GithubScm, NativeCompiler};
use vela_server::supervisor::{Supervisor, shutdown_signal};
use vela_server::{AppState, routes};

/// Base delay before the first settings read.
const SETTINGS_INITIAL_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let config = ServerConfig::parse();
    init_tracing(&config);

    if let Err(e) = start(config).await {
        error!(error = %format!("{:#}", e), "vela-server stopped");
        std::process::exit(1);
    }
}

async fn start(config: ServerConfig) -> anyhow::Result<()> {
    config.validate()?;
    run(config).await
}

fn init_tracing(config: &ServerConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    info!("Connecting to database...");
    let pool = create_pool(&config.database_addr, config.database_max_connections).await?;
    run_migrations(&pool).await?;
    info!("Database connected");

    let db = Database::postgres(pool.clone());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let compiler = Arc::new(NativeCompiler::new(config.compiler_defaults()));
    let queue = Arc::new(PgQueue::new(pool, config.queue_defaults()));

    let settings = bootstrap_settings(
        db.settings.as_ref(),
        PlatformDefaults {
            repo_allowlist: config.repo_allowlist.clone(),
            schedule_allowlist: config.schedule_allowlist.clone(),
            max_dashboard_repos: config.max_dashboard_repos,
            queue_restart_limit: config.queue_restart_limit,
        },
        compiler.as_ref(),
        queue.as_ref(),
        clock.as_ref(),
        SETTINGS_INITIAL_DELAY,
    )
    .await?;

    let publisher = Arc::new(DbPublisher::new(
        compiler.clone(),
        queue.clone(),
        db.builds.clone(),
    ));
    let enqueuer = BuildEnqueuer::new(
        db.clone(),
        Arc::new(GithubScm::new(config.scm_api.clone())),
        publisher,
        queue,
        clock.clone(),
    );

    let refresher = SettingsRefresher::new(
        db.settings.clone(),
        settings.clone(),
        config.settings_refresh_interval,
    );
    let evaluator = ScheduleEvaluator::new(
        db.clone(),
        enqueuer,
        settings.clone(),
        clock.clone(),
        config.schedule_interval,
    );
    let cleanup = CleanupLoop::new(
        db.builds.clone(),
        clock.clone(),
        config.pending_approval_cleanup_interval,
    );

    let state = AppState::new(db, settings, clock, config.schedule_minimum_frequency);
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let mut supervisor = Supervisor::new(CancellationToken::new());

    supervisor.spawn("signal", shutdown_signal(supervisor.cancel_token()));

    let addr = config.server_addr;
    let token = supervisor.cancel_token();
    supervisor.spawn("http", async move {
        let listener = TcpListener::bind(addr).await?;
        info!("Starting server on {}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await?;
        Ok(())
    });

    let token = supervisor.cancel_token();
    supervisor.spawn("settings-refresher", async move {
        refresher.run(token).await;
        Ok(())
    });

    let token = supervisor.cancel_token();
    supervisor.spawn("scheduler", async move {
        evaluator.run(token).await;
        Ok(())
    });

    let token = supervisor.cancel_token();
    supervisor.spawn("approval-cleanup", async move {
        cleanup.run(token).await;
        Ok(())
    });

    supervisor.wait().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_config_fails_before_connecting() {
        let config = ServerConfig::try_parse_from([
            "vela-server",
            "--database-addr",
            "postgres://unreachable.invalid/vela",
            "--schedule-interval",
            "0",
        ])
        .unwrap();

        let err = start(config).await.unwrap_err();
        assert!(format!("{:#}", err).contains("schedule-interval"));
    }
}
