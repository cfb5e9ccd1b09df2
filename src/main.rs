use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

use formgate::api::{create_router, AppState};
use formgate::defense::DefensePipeline;
use formgate::notify::LogNotifier;
use formgate::store::{GuardStore, MemoryStore, PgGuardStore};
use formgate::GuardConfig;

/// Interval of the transient-state sweep, independent of request volume.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(GuardConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        e
    })?);

    init_logging(&config)?;

    info!("Starting formgate contact-form gateway");
    info!(
        "Defense settings: window={}ms, max_requests={}, spam_threshold={}",
        config.defense.window_ms, config.defense.max_requests, config.defense.spam_threshold
    );

    let store: Arc<dyn GuardStore> = if config.database.postgres_enabled {
        let pg = PgGuardStore::connect(
            &config.database.postgres_url,
            config.database.max_connections,
        )
        .await?;
        pg.init_schema().await?;
        Arc::new(pg)
    } else {
        info!("PostgreSQL disabled, using in-memory store");
        Arc::new(MemoryStore::new())
    };

    let pipeline = Arc::new(DefensePipeline::new(store.clone(), config.defense.clone()));

    // Periodic sweep of violation trackers and frequency counters.
    let sweeper = pipeline.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweeper.sweep();
        }
    });

    let state = AppState {
        pipeline,
        store,
        notifier: Arc::new(LogNotifier),
        log_requests: config.logging.log_requests,
        config: config.clone(),
    };
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind server address")?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}

fn init_logging(config: &GuardConfig) -> Result<()> {
    let level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .init();

    Ok(())
}
