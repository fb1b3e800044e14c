// src/bin/replaygate.rs

use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use replaygate::config::split_csv;
use replaygate::http::{self, AppState};
use replaygate::{
    init_logging, replay, ConfigOverrides, GatewayConfig, LogFormat, ReplayOptions, SharedClock,
    StorageLimiterSet, SystemClock,
};

/// Limiter flags shared by both commands
#[derive(Debug, StructOpt)]
struct LimiterArgs {
    /// Rate limiting algorithm
    #[structopt(short, long, possible_values = &["token_bucket", "sliding_window", "fixed_window"])]
    algorithm: Option<String>,

    /// Requests admitted per window
    #[structopt(short, long)]
    rate: Option<i64>,

    /// Window length, e.g. "1m" or "500ms"
    #[structopt(short, long)]
    window: Option<String>,

    /// Bucket capacity for the token bucket
    #[structopt(short, long)]
    burst: Option<i64>,

    /// JSON configuration file
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Run the HTTP gateway
    Serve {
        /// Listen address; ":8080" binds every interface
        #[structopt(long)]
        addr: Option<String>,

        /// Backend for the main limiter
        #[structopt(long, possible_values = &["memory", "redis", "crdt"])]
        storage_backend: Option<String>,

        /// Start with traffic recording enabled
        #[structopt(long)]
        record: bool,

        #[structopt(flatten)]
        limiter: LimiterArgs,
    },

    /// Replay recorded traffic from a file and print a summary
    Replay {
        /// JSON file written by /api/recordings/export
        #[structopt(short, long, parse(from_os_str))]
        file: PathBuf,

        /// Playback speed; 0 replays without pauses
        #[structopt(long, default_value = "0")]
        speed: f64,

        /// Only replay these client keys (comma separated)
        #[structopt(long)]
        keys: Option<String>,

        /// Only replay these endpoints, e.g. "GET /api/profile" (comma separated)
        #[structopt(long)]
        endpoints: Option<String>,

        #[structopt(flatten)]
        limiter: LimiterArgs,
    },
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "replaygate",
    about = "Rate-limited HTTP gateway with traffic recording and replay"
)]
struct Opt {
    /// Emit logs as JSON lines
    #[structopt(long, global = true)]
    log_json: bool,

    #[structopt(subcommand)]
    command: Command,
}

impl LimiterArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            algorithm: self.algorithm.clone(),
            rate: self.rate,
            window: self.window.clone(),
            burst: self.burst,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let opt = Opt::from_args();

    let format = if opt.log_json {
        LogFormat::Json
    } else {
        LogFormat::from_env()
    };
    init_logging(format);

    match opt.command {
        Command::Serve {
            addr,
            storage_backend,
            record,
            limiter,
        } => {
            let flags = ConfigOverrides {
                addr,
                storage_backend,
                record: record.then_some(true),
                ..limiter.overrides()
            };
            let config = GatewayConfig::load(limiter.config.as_deref(), &flags)?;
            serve(config).await
        }
        Command::Replay {
            file,
            speed,
            keys,
            endpoints,
            limiter,
        } => {
            let config = GatewayConfig::load(limiter.config.as_deref(), &limiter.overrides())?;
            let mut options = ReplayOptions::new(config.limiter);
            options.speed = speed;
            options.keys = keys.as_deref().map(split_csv).unwrap_or_default();
            options.endpoints = endpoints.as_deref().map(split_csv).unwrap_or_default();
            run_replay(file, options).await
        }
    }
}

async fn serve(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let clock: SharedClock = Arc::new(SystemClock);
    let addr = config.bind_addr();
    let shutdown_timeout = config.server.shutdown_timeout;

    info!(
        addr = %addr,
        algorithm = config.limiter.algorithm.as_str(),
        rate = config.limiter.rate,
        window = %humantime::format_duration(config.limiter.window),
        backend = config.storage.backend.as_str(),
        recording = config.recording.enabled,
        "starting gateway"
    );

    let limiters = Arc::new(StorageLimiterSet::build(&config, clock.clone()).await?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState::new(config, clock, limiters.clone(), shutdown_rx);
    let app = http::router(state)?;

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        // Stops replays that are still running
        let _ = shutdown_tx.send(true);
    })
    .await?;

    match tokio::time::timeout(shutdown_timeout, limiters.close()).await {
        Ok(Ok(())) => info!("storage backends closed"),
        Ok(Err(err)) => error!(error = %err, "failed to close storage backends"),
        Err(_) => warn!(
            timeout = %humantime::format_duration(shutdown_timeout),
            "storage backends did not close before the shutdown deadline"
        ),
    }
    info!("gateway stopped");
    Ok(())
}

async fn run_replay(file: PathBuf, options: ReplayOptions) -> Result<(), Box<dyn std::error::Error>> {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("received Ctrl+C, cancelling replay");
            let _ = cancel_tx.send(true);
        }
    });

    info!(
        file = %file.display(),
        algorithm = options.settings.algorithm.as_str(),
        rate = options.settings.rate,
        window = %humantime::format_duration(options.settings.window),
        speed = options.speed,
        "replaying traffic"
    );
    let summary = replay::run_file(&file, &options, cancel_rx).await?;

    println!("Total records: {}", summary.total_records);
    println!("Replayed:      {}", summary.replayed);
    println!("Allowed:       {}", summary.allowed);
    println!("Denied:        {}", summary.denied);
    summary.table().printstd();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
