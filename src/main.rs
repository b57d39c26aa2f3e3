use clap::Parser;
use mammoscan::{config, logging, model, pipeline, preprocessing, server, telemetry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Serve the mammogram classification form
#[derive(Parser, Debug)]
#[command(name = "mammoscan")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the bind address
    #[arg(long)]
    host: Option<String>,

    /// Override the port
    #[arg(short, long)]
    port: Option<u16>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut config::AppConfig) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 1. Load Config
    let (mut config, found) = config::AppConfig::load(&cli.config)?;
    cli.apply_overrides(&mut config);

    logging::init_logging(&config.logging);
    if !found {
        warn!(path = %cli.config.display(), "config file not found, using defaults");
    }

    // 2. Init
    model::loader::init_ort()?;
    let metrics = if config.metrics.enabled {
        Some(telemetry::install_prometheus()?)
    } else {
        None
    };

    // 3. Load both models once
    info!(
        extractor = %config.models.feature_extractor.path.display(),
        classifier = %config.models.classifier.path.display(),
        "loading models"
    );
    let extractor = model::load_extractor(&config.models.feature_extractor)?;
    let classifier = model::load_classifier(&config.models.classifier)?;
    let pipeline = pipeline::Pipeline::new(
        preprocessing::image::Preprocessor::new(&config.preprocessing),
        extractor,
        classifier,
    );

    // 4. Create Router
    let app = server::routes::create_router(server::types::AppState {
        pipeline: Arc::new(pipeline),
        views: server::views::Views::new()?,
        metrics,
        max_upload_bytes: config.server.max_upload_bytes(),
    });

    // 5. Bind & Serve
    let listener =
        TcpListener::bind(format!("{}:{}", config.server.host, config.server.port)).await?;
    info!(
        "Server listening on http://{}:{}",
        config.server.host, config.server.port
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_keep_config_values() {
        let cli = Cli::try_parse_from(["mammoscan"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config.yaml"));

        let mut config = config::AppConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8501);
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::try_parse_from([
            "mammoscan",
            "--config",
            "deploy/prod.yaml",
            "--host",
            "127.0.0.1",
            "-p",
            "9000",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("deploy/prod.yaml"));

        let mut config = config::AppConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_invalid_port_rejected() {
        assert!(Cli::try_parse_from(["mammoscan", "--port", "70000"]).is_err());
    }
}
