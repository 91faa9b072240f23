//! homr-predict - Main entry point
//!
//! Provisions model weights, then either runs a single prediction or serves
//! predictions over HTTP. Nothing is accepted until setup has completed.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use homr_common::config::{self, ConfigResolver, TomlConfig};
use homr_common::logging;
use tokio::signal;
use tracing::info;

use homr_predict::engine::{CommandEngine, RecognitionEngine};
use homr_predict::weights::WeightProvisioner;
use homr_predict::{build_router, setup, AppState, PredictRequest, Predictor};

/// Command-line arguments for homr-predict
#[derive(Parser, Debug)]
#[command(name = "homr-predict")]
#[command(about = "Optical music recognition prediction service")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long, global = true, env = "HOMR_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding model weights
    #[arg(short, long, global = true, env = "HOMR_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision model weights and exit
    Setup,

    /// Convert one sheet music image to MusicXML
    Predict {
        /// Input image
        #[arg(long)]
        image: PathBuf,

        /// Emit a large-page layout
        #[arg(long)]
        large_page: bool,

        /// Metronome marking in beats per minute
        #[arg(long)]
        metronome_bpm: Option<u32>,

        /// Tempo in beats per minute
        #[arg(long)]
        tempo_bpm: Option<u32>,
    },

    /// Provision weights, then serve predictions over HTTP
    Serve {
        /// Address to bind (overrides config)
        #[arg(long, env = "HOMR_HOST")]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long, env = "HOMR_PORT")]
        port: Option<u16>,
    },

    /// Write a config file populated with defaults
    InitConfig {
        /// Destination path
        path: PathBuf,
    },
}

/// What to do once setup has completed
enum Action {
    Setup,
    Predict(PredictRequest),
    Serve { host: Option<String>, port: Option<u16> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let action = match args.command {
        Command::InitConfig { path } => {
            config::write_toml_config(&TomlConfig::default(), &path)
                .with_context(|| format!("Failed to write config to {}", path.display()))?;
            println!("Wrote default config to {}", path.display());
            return Ok(());
        }
        Command::Setup => Action::Setup,
        Command::Predict {
            image,
            large_page,
            metronome_bpm,
            tempo_bpm,
        } => {
            let mut request = PredictRequest::new(image).with_large_page(large_page);
            if let Some(bpm) = metronome_bpm {
                request = request.with_metronome_bpm(bpm);
            }
            if let Some(bpm) = tempo_bpm {
                request = request.with_tempo_bpm(bpm);
            }
            Action::Predict(request)
        }
        Command::Serve { host, port } => Action::Serve { host, port },
    };

    let config = ConfigResolver::new(args.config)
        .load()
        .context("Failed to load configuration")?;
    logging::init_tracing(&config.logging).context("Failed to initialize logging")?;

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &config);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        root_folder = %root_folder.display(),
        "Starting homr-predict"
    );

    let engine: Arc<dyn RecognitionEngine> = Arc::new(CommandEngine::from_config(&config.engine));
    let provisioner = WeightProvisioner::from_config(config.models_dir(&root_folder), &config.weights)
        .context("Failed to create weight provisioner")?;
    let weights = setup(&provisioner, Arc::clone(&engine))
        .await
        .context("Model setup failed")?;

    match action {
        Action::Setup => {
            info!("Setup only; exiting");
            Ok(())
        }
        Action::Predict(request) => {
            let predictor = Predictor::from_config(&config, engine, weights);
            let prediction = tokio::task::spawn_blocking(move || predictor.predict(&request))
                .await
                .context("Prediction task panicked")?
                .context("Prediction failed")?;

            println!("{}", prediction.output.display());
            Ok(())
        }
        Action::Serve { host, port } => {
            let predictor = Arc::new(Predictor::from_config(&config, engine, weights));
            let host = host.unwrap_or_else(|| config.server.host.clone());
            serve(predictor, host, port.unwrap_or(config.server.port)).await
        }
    }
}

async fn serve(predictor: Arc<Predictor>, host: String, port: u16) -> Result<()> {
    let app = build_router(AppState::new(predictor));

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
