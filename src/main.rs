use exam_proctor::{
    config::{Config, LogFormat},
    database::pool::{create_pool, run_migrations},
    routes, AppState,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Upper bound on attempts regraded per sweep.
const SWEEP_BATCH: i64 = 100;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,exam_proctor=debug,tower_http=info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let pool = create_pool(&config.database_url).await?;
    run_migrations(&pool).await?;

    let addr: SocketAddr = config.server_address.parse()?;
    let sweep_every = Duration::from_secs(config.grading_sweep_seconds.max(1));
    let app_state = AppState::with_postgres(config, pool);

    {
        let grading = app_state.grading.clone();
        tokio::spawn(async move {
            loop {
                match grading.sweep_ungraded(SWEEP_BATCH).await {
                    Ok(0) => {}
                    Ok(graded) => info!(graded, "Deferred grading completed"),
                    Err(e) => tracing::error!(error = ?e, "Grading sweeper error"),
                }
                tokio::time::sleep(sweep_every).await;
            }
        });
    }

    let app = routes::build_router(app_state);

    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
