//! DNS-SD Browse Example
//!
//! Browses for a service type on all interfaces, resolves every instance
//! that appears and logs each event to stderr until interrupted.
//!
//! # Usage
//!
//! ```
//! cargo run --package sdbrowse --example browse
//! ```
//!
//! Browse another type with verbose loop diagnostics:
//! ```
//! cargo run --package sdbrowse --example browse -- --service-type _http._tcp -v
//! ```

use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use sdbrowse::{
    BrowseConfig, ClientFlags, DEFAULT_SERVICE_TYPE, Discovery, DnsSdConfig, MdnsClient, MioLoop,
    ServiceType,
};

#[derive(Parser, Debug)]
#[command(name = "DNS-SD Browse")]
#[command(version = "0.1.0")]
#[command(about = "Browse and resolve DNS-SD services on the local network")]
struct Args {
    /// Service type to browse for
    #[arg(long, default_value = DEFAULT_SERVICE_TYPE)]
    service_type: String,

    /// Resolve timeout in seconds (1 to 86400)
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..=86400))]
    resolve_timeout: u64,

    /// Drop announcements made by this host
    #[arg(long)]
    ignore_own: bool,

    #[arg(short, long)]
    verbose: bool,

    /// Any extra argument turns on verbose output as well
    #[arg(trailing_var_arg = true, hide = true)]
    extra: Vec<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let verbose = args.verbose || !args.extra.is_empty();

    let log_level = if verbose {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .target(env_logger::Target::Stderr)
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} [{}] {} - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                chrono::Local::now().format("%H:%M:%S.%6f"),
                record.args()
            )
        })
        .filter(None, log_level)
        .parse_default_env()
        .init();

    let service_type = match ServiceType::new(&args.service_type) {
        Ok(service_type) => service_type,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let event_loop = match MioLoop::new() {
        Ok(event_loop) => event_loop.with_verbose(verbose),
        Err(err) => {
            eprintln!("Failed to create event loop: {err}");
            return ExitCode::FAILURE;
        }
    };
    let interrupter = event_loop.interrupter();
    if let Err(err) = ctrlc::set_handler(move || interrupter.interrupt()) {
        log::warn!("cannot install interrupt handler: {err}");
    }

    let client = MdnsClient::new(
        DnsSdConfig::default().with_resolve_timeout(Duration::from_secs(args.resolve_timeout)),
    );
    let mut flags = ClientFlags::NONE;
    if args.ignore_own {
        flags = flags | ClientFlags::IGNORE_OWN;
    }
    let config = BrowseConfig::new(service_type).with_client_flags(flags);

    let mut discovery = match Discovery::new(event_loop, client, config) {
        Ok(discovery) => discovery,
        Err(err) => {
            eprintln!("Failed to start browsing: {err}");
            return ExitCode::FAILURE;
        }
    };
    log::info!("browsing for {}", discovery.service_type());

    let code = match discovery.run() {
        Ok(termination) => {
            log::debug!("loop finished: {termination}");
            termination.exit_code()
        }
        Err(err) => {
            log::error!("event loop failed: {err}");
            1
        }
    };
    discovery.shutdown();

    ExitCode::from(code)
}
