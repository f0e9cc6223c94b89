// Sorting line controller: loads configuration, selects hardware and
// serves the observer/command channel.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use sorter_core::{BackendPreference, SorterConfig};
use sorter_engine::SortingLine;
use sorter_eye::{load_vision_backend, VisionBackend};
use sorter_hal::{select_backend, BackendProvider};
use sorter_server::{router, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sorter")]
#[command(about = "Visual inspection and sorting line controller", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Listen address, overrides server.bind
    #[arg(long)]
    bind: Option<String>,

    /// Hardware backend, overrides hardware.backend
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Upper bound for parking and releasing hardware on exit
    #[arg(long, default_value = "5000")]
    cleanup_timeout_ms: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Auto,
    Real,
    Simulated,
}

impl From<BackendArg> for BackendPreference {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => BackendPreference::Auto,
            BackendArg::Real => BackendPreference::Real,
            BackendArg::Simulated => BackendPreference::Simulated,
        }
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    info!("Starting sorting line controller");

    let mut config = SorterConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(backend) = cli.backend {
        config.hardware.backend = backend.into();
    }
    config.validate().context("invalid configuration")?;

    let vision = load_vision_backend(&config.vision);
    info!("Vision backend: {}", vision.name());

    let provider: Arc<dyn BackendProvider> = Arc::new(select_backend);
    let bind = config.server.bind.clone();
    let line = Arc::new(
        SortingLine::start(config, provider, vision).context("failed to select hardware")?,
    );
    info!("Hardware: {}", line.engine().capabilities());

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!("Listening on {} (ws: /ws, health: /health)", bind);

    axum::serve(listener, router(AppState::new(line.clone())))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutting down");
    if let Err(e) = line
        .shutdown(Duration::from_millis(cli.cleanup_timeout_ms))
        .await
    {
        error!("Shutdown incomplete: {}", e);
    }
    info!("Stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
