use domogled_backend::api::{build_router, AppState};
use domogled_backend::config::Config;
use domogled_backend::{db, scheduler};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env().map_err(|e| {
        error!(error = %e, "failed to load configuration");
        e
    })?;

    info!("connecting to database");
    let pool = db::connect(&config).await.map_err(|e| {
        error!(error = %e, "failed to connect to database");
        e
    })?;
    info!("database connected");

    let bind_addr = config.bind_addr.clone();

    tokio::spawn(scheduler::run_forever(pool.clone(), config.clone()));

    let state = AppState::new(pool, config);
    let app = build_router(state);

    info!(addr = %bind_addr, "starting server");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
