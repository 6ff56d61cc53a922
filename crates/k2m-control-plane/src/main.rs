use k2m_control_plane::shared::config::Config;
use k2m_control_plane::{build_app, server};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("k2m_control_plane=info,info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting k2m Control Plane");

    let config = Config::from_env()?;
    let app = build_app(&config).await?;

    if config.permissions_enabled() {
        let report = app
            .reconciliation
            .sync_permissions()
            .await
            .map_err(|e| format!("{}: {}", e.error_code, e.message))?;
        info!(granted = report.granted, removed = report.removed, "Permissions synchronized");
    }

    if config.startup_ensure_deployed {
        let report = app
            .reconciliation
            .ensure_all_deployed()
            .await
            .map_err(|e| format!("{}: {}", e.error_code, e.message))?;
        info!(checked = report.checked, recreated = report.recreated, "Workloads ensured");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port()?));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, deploy_mode = %config.deploy_mode, "Control Plane initialized successfully");

    server::serve(listener, app.state, shutdown_signal()).await?;
    info!("Control Plane stopped");
    Ok(())
}
