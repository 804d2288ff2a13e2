//! WebRTC → RTMP forwarder binary entry point
//!
//! Serves the HTTP signaling surface; every accepted offer starts a session
//! that relays the publisher's tracks into an `ffmpeg` child pushing to
//! RTMP.
//!
//! # Usage
//!
//! ```bash
//! # Default: listen on 0.0.0.0:8090, ffmpeg from PATH
//! cargo run --bin webrtc_rtmp_server
//!
//! # Custom transcoder and working directory
//! cargo run --bin webrtc_rtmp_server -- \
//!   --bind 127.0.0.1:9000 \
//!   --ffmpeg /usr/local/bin/ffmpeg \
//!   --working-dir /var/lib/forwarder
//!
//! # Configure STUN servers
//! cargo run --bin webrtc_rtmp_server -- \
//!   --stun-servers stun:stun.l.google.com:19302,stun:stun1.l.google.com:19302
//! ```

use clap::Parser;
use remotemedia_webrtc_rtmp::{ForwarderConfig, SignalingAdapter, SignalingServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// WebRTC → RTMP forwarder
///
/// Accepts WebRTC publish offers over HTTP and re-broadcasts the media to
/// RTMP through ffmpeg.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// HTTP signaling bind address
    #[arg(long, default_value = "0.0.0.0:8090", env = "FORWARDER_BIND")]
    bind: SocketAddr,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302",
        env = "FORWARDER_STUN_SERVERS"
    )]
    stun_servers: Vec<String>,

    /// Transcoder program
    #[arg(long, default_value = "ffmpeg", env = "FORWARDER_FFMPEG")]
    ffmpeg: PathBuf,

    /// SDP description handed to the transcoder
    #[arg(long, default_value = "rtp-forwarder.sdp", env = "FORWARDER_SDP_FILE")]
    sdp_file: PathBuf,

    /// Working directory for the transcoder
    #[arg(long, env = "FORWARDER_WORKING_DIR")]
    working_dir: Option<PathBuf>,

    /// Picture Loss Indication interval in milliseconds
    #[arg(long, default_value_t = 2000, env = "FORWARDER_PLI_INTERVAL")]
    pli_interval_ms: u64,

    /// Transcoder exit wait during teardown in milliseconds
    #[arg(long, default_value_t = 500, env = "FORWARDER_TEARDOWN_SETTLE")]
    teardown_settle_ms: u64,

    /// Write the SDP description if it is missing
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "FORWARDER_WRITE_SDP")]
    write_sdp_file: bool,

    /// Forward transcoder stderr to the log
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "FORWARDER_DIAGNOSTICS")]
    forward_diagnostics: bool,
}

/// Build ForwarderConfig from CLI arguments
fn build_config_from_args(args: &Args) -> ForwarderConfig {
    let mut config = ForwarderConfig::default()
        .with_stun_servers(args.stun_servers.clone())
        .with_transcoder_program(args.ffmpeg.clone())
        .with_pli_interval_ms(args.pli_interval_ms);

    if let Some(dir) = &args.working_dir {
        config = config.with_working_dir(dir.clone());
    }

    config.teardown_settle_ms = args.teardown_settle_ms;
    config.transcoder.sdp_path = args.sdp_file.clone();
    config.transcoder.write_sdp_file = args.write_sdp_file;
    config.transcoder.forward_diagnostics = args.forward_diagnostics;
    config
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Set up Ctrl+C handler at the very start
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);

    ctrlc::set_handler(move || {
        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("[SIGNAL] Shutdown already in progress, forcing immediate exit");
            std::process::exit(0);
        }
        eprintln!("\n[SIGNAL] Ctrl+C received, shutting down");

        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_secs(3));
            eprintln!("[WATCHDOG] Graceful shutdown timeout (3s), forcing exit");
            std::process::exit(0);
        });
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("forwarder-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing()?;

    let config = build_config_from_args(&args);
    info!(
        bind = %args.bind,
        stun_servers = ?config.stun_servers,
        transcoder = ?config.transcoder.program,
        sdp_path = ?config.transcoder.sdp_path,
        working_dir = ?config.transcoder.working_dir,
        pli_interval_ms = config.pli_interval_ms,
        "Configuration loaded"
    );

    // Validates the configuration
    let adapter = SignalingAdapter::new(config)?;

    let shutdown_future = async move {
        while !shutdown_flag.load(Ordering::SeqCst) {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
        info!("Shutdown signal received, stopping signaling server...");
    };

    SignalingServer::new(args.bind, adapter)
        .serve(shutdown_future)
        .await?;

    info!("Forwarder shut down gracefully");
    Ok(())
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing with EnvFilter for RUST_LOG support
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}
