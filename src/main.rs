use color_eyre::{eyre::eyre, Result};
use fieldtelemetry::app;
use fieldtelemetry::config::AppConfig;
use fieldtelemetry::telemetry::DeviceClass;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const USAGE: &str = "usage: fieldtelemetry [gps|env|hea|all] [config.toml]";

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let mut args = std::env::args().skip(1);
    let classes = match args.next().as_deref() {
        None | Some("all") => DeviceClass::ALL.to_vec(),
        Some("-h") | Some("--help") => {
            println!("{}", USAGE);
            return Ok(());
        }
        Some(raw) => vec![DeviceClass::parse(raw)
            .ok_or_else(|| eyre!("Unknown device class {:?}. {}", raw, USAGE))?],
    };
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(AppConfig::default_path);

    let config = Arc::new(AppConfig::load(&config_path).await?);
    if config.broker.dry_run {
        warn!("Dry run enabled, nothing is sent to {}", config.broker.endpoint());
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        shutdown.cancel();
    });

    let mut publishers = Vec::new();
    for class in classes {
        let config = config.clone();
        let cancel = cancel.clone();
        let span = info_span!("publisher", class = %class);
        let handle = tokio::spawn(
            async move { app::run_class(&config, class, cancel).await }.instrument(span),
        );
        publishers.push((class, handle));
    }

    let mut failures = 0;
    for (class, handle) in publishers {
        match handle.await {
            Ok(Ok(stats)) => info!(
                "{}: {} published, {} failed, {} reconnects",
                class, stats.published, stats.failed, stats.reconnects
            ),
            Ok(Err(e)) if e.is_cancelled() => info!("{}: stopped before first publish", class),
            Ok(Err(e)) => {
                error!("{}: {}", class, e);
                failures += 1;
            }
            Err(e) => {
                error!("{}: publisher task aborted: {}", class, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(eyre!("{} publisher(s) failed", failures));
    }
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
