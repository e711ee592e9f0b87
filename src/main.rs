use tokio::sync::watch;

mod app;
mod auth;
mod config;
mod credits;
mod db;
mod error;
mod generations;
mod provider;
mod rate_limit;
mod schemas;
mod state;
mod templates;
mod users;

use crate::generations::worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "wan_api=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = state::AppState::init().await?;

    db::migrate(&app_state.db).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = Worker::new(
        app_state.db.clone(),
        app_state.provider.clone(),
        app_state.config.worker.batch_size,
        app_state.config.worker.poll_interval(),
    );
    let worker_handle = tokio::spawn(worker.run(shutdown_rx.clone()));

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let app = app::build_app(app_state);
    app::serve(app, shutdown_rx).await?;

    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "worker task panicked");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to listen for SIGTERM"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
