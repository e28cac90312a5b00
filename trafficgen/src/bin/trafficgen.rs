use std::{env, net::SocketAddr, path::PathBuf};

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::{
    runtime::Builder,
    signal,
    time::{Duration, sleep},
};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};
use trafficgen::{
    config::{self, StartRequest},
    controller::{self, Controller},
    generator::Plan,
};

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error("Invalid start request: {0}")]
    Validation(#[from] trafficgen::config::ValidationError),
    #[error(transparent)]
    Controller(#[from] controller::Error),
    #[error("Parsing Prometheus address failed: {0}")]
    PrometheusAddr(#[from] std::net::AddrParseError),
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate traffic until interrupted or the duration elapses
    Run(RunArgs),
    /// Validate a start request and exit
    ConfigCheck(ConfigCheckArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// path on disk to the start request, `TRAFFICGEN_CONFIG` takes precedence
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
    /// seconds to generate traffic for, unbounded if absent
    #[clap(long)]
    duration_seconds: Option<u64>,
    /// address to expose prometheus metrics on
    #[clap(long)]
    prometheus_addr: Option<String>,
}

#[derive(clap::Args)]
struct ConfigCheckArgs {
    /// path on disk to the start request
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
}

fn default_config_path() -> String {
    "/etc/trafficgen/trafficgen.yaml".to_string()
}

fn load_request(config_path: &str) -> Result<StartRequest, Error> {
    if let Ok(contents) = env::var("TRAFFICGEN_CONFIG") {
        debug!("Using config from env var 'TRAFFICGEN_CONFIG'");
        Ok(StartRequest::from_yaml_str(&contents)?)
    } else {
        debug!("Attempting to open configuration file at: {config_path}");
        Ok(StartRequest::from_path(&PathBuf::from(config_path))?)
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .finish()
        .init();
}

fn validate(config_path: &str) -> Result<(), Error> {
    let request = load_request(config_path)?;
    Plan::new(request)?;
    info!("Configuration file is valid");
    Ok(())
}

async fn inner_main(
    request: StartRequest,
    duration: Option<Duration>,
    prometheus_addr: Option<SocketAddr>,
) -> Result<(), Error> {
    if let Some(addr) = prometheus_addr {
        let builder = PrometheusBuilder::new().with_http_listener(addr);
        tokio::spawn(async move {
            if let Err(err) = builder.install() {
                error!("Failed to install prometheus recorder: {err}");
            }
        });
    }

    let controller = Controller::new();
    controller.start(request).await?;

    let elapsed = async {
        match duration {
            Some(duration) => sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        res = signal::ctrl_c() => {
            res?;
            info!("received ctrl-c");
        }
        () = elapsed => {
            info!("run duration elapsed");
        }
    }

    let snapshot = controller.snapshot().await;
    info!("Stopping at {rps} RPS", rps = snapshot.rps);
    controller.stop().await?;
    Ok(())
}

fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    let args = match cli.command {
        Commands::ConfigCheck(args) => {
            init_tracing(false);
            match validate(&args.config_path) {
                Ok(()) => std::process::exit(0),
                Err(err) => {
                    error!("Configuration validation failed: {err}");
                    std::process::exit(1)
                }
            }
        }
        Commands::Run(args) => args,
    };

    let request = load_request(&args.config_path);
    init_tracing(request.as_ref().is_ok_and(|request| request.config.debug));
    let request = request.inspect_err(|err| error!("Could not load start request: {err}"))?;

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting trafficgen {version} run.");

    let prometheus_addr = args
        .prometheus_addr
        .as_deref()
        .map(str::parse::<SocketAddr>)
        .transpose()?;
    let duration = args.duration_seconds.map(Duration::from_secs);

    let runtime = Builder::new_multi_thread().enable_all().build()?;
    let res = runtime.block_on(inner_main(request, duration, prometheus_addr));
    runtime.shutdown_timeout(Duration::from_secs(1));
    info!("Bye. :)");
    res
}
