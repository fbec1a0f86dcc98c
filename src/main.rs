use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rtc_file_streamer::config::{self, AppConfig};
use rtc_file_streamer::state::AppState;
use rtc_file_streamer::web;

/// How long running sessions get to wind down on shutdown
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// rtc-file-streamer command line arguments
#[derive(Parser, Debug)]
#[command(name = "rtc-file-streamer")]
#[command(version, about = "Stream a video file to browsers over WebRTC", long_about = None)]
struct CliArgs {
    /// JSON configuration file
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides config file)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides config file)
    #[arg(short = 'p', long, value_name = "PORT")]
    http_port: Option<u16>,

    /// Directory holding the video file (overrides config file)
    #[arg(long, value_name = "DIR")]
    video_dir: Option<String>,

    /// Video file name inside the video directory (overrides config file)
    #[arg(long, value_name = "FILE")]
    video_file: Option<String>,

    /// Static assets directory (overrides config file)
    #[arg(long, value_name = "DIR")]
    static_dir: Option<String>,

    /// ffmpeg executable (overrides config file)
    #[arg(long, value_name = "PATH")]
    ffmpeg: Option<String>,

    /// Maximum concurrent sessions (overrides config file)
    #[arg(long, value_name = "N")]
    max_sessions: Option<usize>,

    /// Write the effective configuration to FILE and exit
    #[arg(long, value_name = "FILE")]
    save_config: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging with CLI arguments
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting rtc-file-streamer v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(args.config.as_deref()).await?;
    apply_cli_overrides(&mut config, &args);
    config.validate()?;

    if let Some(path) = &args.save_config {
        config::save_config(path, &config).await?;
        tracing::info!("Configuration written to {}", path.display());
        return Ok(());
    }

    // Create the video directory if missing; the file itself is checked per session
    let video_dir = config.video.dir_path();
    if !video_dir.exists() {
        tokio::fs::create_dir_all(&video_dir).await?;
        tracing::info!("Created video directory: {}", video_dir.display());
    }
    let video_path = config.video.video_path();
    if !video_path.is_file() {
        tracing::warn!("Video file not found yet: {}", video_path.display());
    }

    let ip: IpAddr = config
        .web
        .bind_address
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid bind address: {}", config.web.bind_address))?;
    let addr = SocketAddr::new(ip, config.web.http_port);

    tracing::info!(
        "Streaming {} as {}x{}@{} ({} sessions max)",
        video_path.display(),
        config.video.width,
        config.video.height,
        config.video.fps,
        config.session.max_sessions
    );

    let state = AppState::new(config);
    let app = web::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting HTTP server on http://{}", listener.local_addr()?);

    // Setup graceful shutdown
    let shutdown = state.shutdown.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutdown signal received");
        shutdown.cancel();
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
    {
        tracing::error!("HTTP server error: {}", e);
    }

    cleanup(&state).await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Command line flags win over the config file
fn apply_cli_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(addr) = &args.address {
        config.web.bind_address = addr.clone();
    }
    if let Some(port) = args.http_port {
        config.web.http_port = port;
    }
    if let Some(dir) = &args.static_dir {
        config.web.static_dir = dir.clone();
    }
    if let Some(dir) = &args.video_dir {
        config.video.dir = dir.clone();
    }
    if let Some(file) = &args.video_file {
        config.video.file = file.clone();
    }
    if let Some(ffmpeg) = &args.ffmpeg {
        config.video.ffmpeg_path = ffmpeg.clone();
    }
    if let Some(max) = args.max_sessions {
        config.session.max_sessions = max;
    }
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    // Build filter string based on effective level
    let filter = match effective_level {
        LogLevel::Error => "rtc_file_streamer=error,tower_http=error,webrtc=error",
        LogLevel::Warn => "rtc_file_streamer=warn,tower_http=warn,webrtc=warn",
        LogLevel::Info => "rtc_file_streamer=info,tower_http=info,webrtc=warn",
        LogLevel::Verbose => "rtc_file_streamer=debug,tower_http=info,webrtc=warn",
        LogLevel::Debug => "rtc_file_streamer=debug,tower_http=debug,webrtc=info",
        LogLevel::Trace => "rtc_file_streamer=trace,tower_http=debug,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Wait for background sessions after the root token was cancelled
async fn cleanup(state: &Arc<AppState>) {
    state.shutdown.cancel();
    state.tasks.close();

    let active = state.active_sessions();
    if active > 0 {
        tracing::info!("Waiting for {} session(s) to close", active);
    }

    if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, state.tasks.wait())
        .await
        .is_err()
    {
        tracing::warn!(
            "{} session task(s) still running after {}s, exiting anyway",
            state.tasks.len(),
            SHUTDOWN_DRAIN_TIMEOUT.as_secs()
        );
    }
}
