use anyhow::Result;
use clap::Parser;
use motioncam::{Camera, Dispatcher, EventTransport, LogTransport, MotionCamConfig, SyntheticSource};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

const DELIVERY_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "motioncam")]
#[command(about = "Camera client with motion-vector based motion detection")]
#[command(version)]
#[command(long_about = "Consumes an H.264 stream and its motion vectors, detects sustained motion, \
and hands motion clips and timelapse images to a media server. Optional outputs stream the raw \
video over TCP or relay it to YouTube.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "motioncam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the camera")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rotated file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Drive the camera with generated frames instead of hardware
    #[arg(long, help = "Feed the camera from the built-in synthetic source")]
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting motioncam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match MotionCamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        if args.validate_config {
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
        return Err(e.into());
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let (dispatcher, delivery) = Dispatcher::spawn(build_transport(&config)?);

    let camera = Arc::new(Camera::new(config, dispatcher).map_err(|e| {
        error!("Failed to create camera: {}", e);
        e
    })?);

    camera.start().await.map_err(|e| {
        error!("Failed to start camera: {}", e);
        e
    })?;

    let cancel = CancellationToken::new();
    let source = if args.simulate {
        info!("Simulation mode - frames come from the synthetic source");
        Some(SyntheticSource::new(Arc::clone(&camera)).spawn(cancel.clone()))
    } else {
        info!("Waiting for frames from the camera driver");
        None
    };

    wait_for_shutdown().await?;

    cancel.cancel();
    if let Some(source) = source {
        if let Err(e) = source.await {
            error!("Synthetic source ended abnormally: {}", e);
        }
    }

    camera.stop().await;
    drop(camera);

    // The delivery worker finishes once the last dispatcher is gone
    if tokio::time::timeout(DELIVERY_DRAIN_TIMEOUT, delivery).await.is_err() {
        warn!("Gave up waiting for pending deliveries");
    }

    info!("motioncam stopped");
    Ok(())
}

fn build_transport(config: &MotionCamConfig) -> Result<Arc<dyn EventTransport>> {
    match config.server.address.as_deref() {
        #[cfg(feature = "http_transport")]
        Some(address) => {
            let timeout = Duration::from_secs(config.server.request_timeout_seconds);
            let transport = motioncam::HttpTransport::new(address, timeout)?;
            info!("Delivering events to {}", transport.base_url());
            Ok(Arc::new(transport))
        }
        #[cfg(not(feature = "http_transport"))]
        Some(address) => {
            warn!(
                "Built without HTTP support; events for {} will only be logged",
                address
            );
            Ok(Arc::new(LogTransport))
        }
        None => {
            info!("No server address configured; events will only be logged");
            Ok(Arc::new(LogTransport))
        }
    }
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received SIGINT signal (Ctrl+C)");
            }
            _ = sigterm.recv() => info!("Received SIGTERM signal"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received SIGINT signal (Ctrl+C)");
    }

    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("motioncam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "motioncam.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# motioncam configuration file");
    println!("# Every setting can also be given as MOTIONCAM_<SECTION>__<KEY>, e.g. MOTIONCAM_MOTION__MIN_BLOCKS");
    println!();
    println!("{}", toml::to_string_pretty(&MotionCamConfig::default())?);
    Ok(())
}
