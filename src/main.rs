use clap::Parser;
use sessionhub::cli::{Cli, Commands};
use sessionhub::config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut app_config = match &cli.config {
        Some(path) => config::load_config(path).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            config::AppConfig::default()
        }),
        None => config::load_default_config(),
    };

    if let Some(port) = cli.port {
        app_config.server.port = port;
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            if let Err(e) = sessionhub::gateway::run(app_config, shutdown_signal()).await {
                tracing::error!(error = %e, "gateway failed to start");
                std::process::exit(1);
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
