use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;

use service_monitor::api::{self, AppState};
use service_monitor::cli::Cli;
use service_monitor::config::Config;
use service_monitor::db;
use service_monitor::error::AppError;
use service_monitor::jobs::{register_default_tasks, JobRunner, JobStores, NetworkExpiryLookup};
use service_monitor::logging::init_logging;
use service_monitor::metrics::AppMetrics;
use service_monitor::monitoring::{HttpChecker, SweepEngine, WhoisClient};
use service_monitor::repository::SqliteRepository;
use service_monitor::scheduler::Scheduler;

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    if let Err(err) = run().await {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = Config::from_env()
        .and_then(|config| config.apply_cli(&cli))
        .map_err(AppError::Config)?;
    tracing::info!("Service monitor starting with config: {:?}", config);

    let pool = db::create_pool(&config.database_url).await?;
    let repository = Arc::new(SqliteRepository::new(pool));
    let metrics = Arc::new(AppMetrics::new()?);

    let mut engine = SweepEngine::new();
    if let Some(max) = config.max_in_flight_checks {
        engine = engine.with_max_in_flight(max);
    }
    let lookup = NetworkExpiryLookup::new(
        config.tls_timeout(),
        WhoisClient::new(config.whois_timeout()),
    );
    let stores = JobStores {
        services: repository.clone(),
        alerts: repository.clone(),
        uptime: repository.clone(),
        expiries: repository.clone(),
        heartbeats: repository.clone(),
    };
    let runner = Arc::new(
        JobRunner::new(stores, Arc::new(HttpChecker::new(config.http_timeout())?))
            .with_engine(engine)
            .with_lookup(Arc::new(lookup))
            .with_warning_days(config.expiry_warning_days)
            .with_metrics(metrics.clone()),
    );

    let shutdown = CancellationToken::new();
    let scheduler = Scheduler::with_metrics(shutdown.clone(), metrics.clone());
    register_default_tasks(
        &scheduler,
        runner.clone(),
        &config.task_intervals(),
        config.scheduler_enabled,
    )
    .await?;
    if !config.scheduler_enabled {
        tracing::info!("Scheduler disabled; tasks only run on demand");
    }

    let app = api::create_app(AppState {
        scheduler: scheduler.clone(),
        runner,
        alerts: repository,
        metrics,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Listening on {}", config.bind_addr);

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", err);
            }
            tracing::info!("Shutdown signal received. Stopping tasks.");
            signal_token.cancel();
        })
        .await?;

    scheduler.shutdown();
    tracing::info!("Service monitor stopped cleanly");
    Ok(())
}
