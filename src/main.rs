use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use farmcam::{FarmcamApp, FarmcamConfig};

#[derive(Parser, Debug)]
#[command(name = "farmcam")]
#[command(about = "Farm security camera backend with object detection, siren control and alerting")]
#[command(version)]
#[command(long_about = "A farm security backend that pulls a remote camera feed, runs sampled \
frames through an external object detector, and on a qualifying detection sounds the siren, \
sends a push notification, records a clip and logs the event. Exposes an HTTP API for status, \
manual controls, the live feed and event history.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "farmcam.toml", help = "Path to TOML configuration file")]
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
    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle special modes that don't require full initialization
    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting Farmcam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match FarmcamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    config.validate().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;

    let app = FarmcamApp::new(config).map_err(|e| {
        error!("Failed to initialize system: {}", e);
        e
    })?;

    app.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("Farmcam exited cleanly");
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
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
        .unwrap_or_else(|_| EnvFilter::new(format!("farmcam={}", log_level)));

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

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print the default configuration in TOML format
fn print_default_config() -> Result<()> {
    let default_config = r#"[camera]
# Candidate stream URLs, tried in order on (re)connect
stream_urls = ["http://192.168.43.77:81/stream"]
# Single-shot snapshot fallback URL (optional)
# snapshot_url = "http://192.168.43.77/capture"
# Target processing frame rate
fps = 15
# Timeouts for stream reads and connection attempts, in seconds
read_timeout_secs = 5
connect_timeout_secs = 5
# Consecutive failed reads before the stream handle is force-released
max_consecutive_failures = 3
# Delay between read retries / after a forced release, in milliseconds
retry_delay_ms = 300
reconnect_delay_ms = 2000

[detection]
# Inference endpoint; detection is disabled when unset
# url = "http://127.0.0.1:9000/detect"
# Minimum confidence (exclusive) for a detection to qualify
confidence_threshold = 0.3
# Class names that may trigger an alert
allowed_classes = ["person", "elephant", "cow"]
# Run the detector every Nth frame
frame_skip = 3
# Minimum seconds between alerts of the same type
cooldown_seconds = 30
timeout_secs = 10

[arming]
# Minutes the system stays disarmed before re-arming itself
auto_rearm_minutes = 60
# Orchestrator poll interval while disarmed, in milliseconds
idle_poll_ms = 1000

[siren]
# Siren device endpoint; state changes are local-only when unset
# url = "http://192.168.43.90/siren"
# Seconds after an alert before the siren is switched off automatically
auto_off_seconds = 60
timeout_secs = 3

[notifier]
# Push credentials; notifications are skipped when unset
# app_id = "..."
# api_key = "..."
api_url = "https://onesignal.com/api/v1/notifications"

[recording]
# Enable clip recording on alerts
enabled = true
# Base path for storing clips
path = "./clips"
# Clip duration in seconds
clip_seconds = 120
# Pre-event context retained in the frame buffer, in seconds
pre_event_seconds = 5

[server]
ip = "0.0.0.0"
port = 8000

[database]
path = "farmcam.db"

[system]
# Device identifier recorded on persisted events
device_id = "ESP32-CAM-01"
"#;

    println!("# Farmcam configuration file");
    println!("# All values shown are the defaults");
    println!();
    println!("{}", default_config);
    Ok(())
}
