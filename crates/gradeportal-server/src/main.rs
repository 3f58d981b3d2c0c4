use std::env;

use gradeportal_server::App;
use gradeportal_server::config::loader::load_config;
use tokio::sync::watch;

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    CliArgument,
    EnvironmentVariable,
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (GRADEPORTAL_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // .env is optional
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    gradeportal_server::observability::init_tracing();

    let (config_path, source) = resolve_config_path();
    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(path = %config_path, source = %source, "Configuration loaded");

    gradeportal_server::observability::apply_logging_level(&cfg.logging.level);
    gradeportal_server::metrics::init_metrics(&cfg.metrics);

    let app = match App::build(cfg).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Startup failed: {e:#}");
            std::process::exit(2);
        }
    };

    let health = app.health().await;
    tracing::info!(
        status = ?health.status,
        store_mode = health.store_mode,
        store_reachable = health.store_reachable,
        storage = health.storage_backend,
        "Health check"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = app.spawn_worker(shutdown_rx);

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");

    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker
        && let Err(e) = handle.await
    {
        tracing::error!(error = %e, "Invalidation worker task failed");
    }
}

/// Priority order: `--config <path>`, then `GRADEPORTAL_CONFIG`, then
/// `gradeportal.toml`.
fn resolve_config_path() -> (String, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (path, ConfigSource::CliArgument);
        }
    }

    if let Ok(path) = env::var("GRADEPORTAL_CONFIG")
        && !path.is_empty()
    {
        return (path, ConfigSource::EnvironmentVariable);
    }

    ("gradeportal.toml".to_string(), ConfigSource::Default)
}
