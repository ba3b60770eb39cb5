mod args;
mod ble;

use std::{env, process::ExitCode, sync::Arc};

use anyhow::{Context as _, Result, anyhow};
use args::Args;
use clap::Parser as _;
use ruuvi_mqtt::{
    config::{Config, ConfigFile},
    delivery::run_delivery,
    ingest::Ingester,
    supervisor::{Stage, supervise},
};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::ble::ingest_advertisements;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.debug) {
        eprintln!("{e:#}");
        return ExitCode::from(1);
    }

    if let Err(e) = run(args).await {
        error!("{e:#}");
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}

async fn run(args: Args) -> Result<()> {
    let file = args
        .config
        .as_deref()
        .map(ConfigFile::load)
        .transpose()
        .context("failed to load config file")?;
    debug!(?file, "config after loading config file");

    let config = Config::resolve(file, args.overrides()).context("invalid configuration")?;
    debug!(?config, "completed config");
    let config = Arc::new(config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        broker = %config.broker.host,
        buffer_size = config.buffer_size,
        "ruuvi-mqtt starting"
    );

    let (tx, rx) = mpsc::channel(config.buffer_size);

    let stages = vec![
        Stage::spawn(
            "ruuvi",
            ingest_advertisements(Ingester::new(config.clone(), tx)),
        ),
        Stage::spawn("mqtt", run_delivery(config, rx)),
    ];

    Err(supervise(stages).await)
}

fn init_logging(debug: bool) -> Result<()> {
    let default_directives = if debug {
        "info,ruuvi_mqtt=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);

    // The journal timestamps every line itself.
    let result = if env::var_os("INVOCATION_ID").is_some() {
        subscriber.without_time().try_init()
    } else {
        subscriber.try_init()
    };

    result.map_err(|e| anyhow!("failed to initialize logging: {e}"))
}
