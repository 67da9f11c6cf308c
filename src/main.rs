use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

// Use mimalloc as the global allocator for the binary (non-Windows only)
#[cfg(not(windows))]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

use srtla_rec::{receiver, resolver};

#[derive(Parser, Debug)]
#[command(
    name = "srtla_rec",
    author,
    version,
    disable_version_flag = true,
    about = "SRTLA receiver: terminates bonded uplinks and forwards one SRT stream"
)]
struct Cli {
    /// Print the version and exit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::SetTrue)]
    print_version: bool,

    /// Port to bind the SRTLA socket to
    #[arg(long = "srtla_port", default_value_t = 5000)]
    srtla_port: u16,

    /// Hostname of the downstream SRT server
    #[arg(long = "srt_hostname", default_value = "127.0.0.1")]
    srt_hostname: String,

    /// Port of the downstream SRT server
    #[arg(long = "srt_port", default_value_t = 4001)]
    srt_port: u16,

    /// Set logging level (trace, debug, info, warn, error, critical)
    #[arg(long = "log_level", default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Cli::parse();
    if args.print_version {
        println!(
            "{} ({}@{}{}) [{}]",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_BRANCH"),
            env!("GIT_HASH"),
            env!("GIT_DIRTY"),
            env!("CARGO_PKG_NAME")
        );
        return Ok(());
    }

    let level_valid = init_logging(&args.log_level);
    if !level_valid {
        warn!(
            "invalid log level '{}' specified, using 'info' as default",
            args.log_level
        );
    }

    let srt_addr = resolver::resolve_srt_address(&args.srt_hostname, args.srt_port)
        .await
        .context("resolve SRT server address")?;

    receiver::run_receiver(args.srtla_port, srt_addr)
        .await
        .context("srtla_rec failed")
}

/// Initialize the subscriber; an explicit RUST_LOG filter overrides the CLI
/// level. Returns false when the requested level was not recognized.
fn init_logging(level: &str) -> bool {
    let (directive, valid) = match level {
        "trace" | "debug" | "info" | "warn" | "error" => (level, true),
        // `critical` has no tracing counterpart; error is the closest.
        "critical" => ("error", true),
        _ => ("info", false),
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    valid
}
