//! tproxy-door: transparent-proxy connection terminator
//!
//! This is the main entry point for the door.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! sudo ./tproxy-door
//!
//! # Run with custom configuration
//! sudo ./tproxy-door -c /path/to/config.json
//!
//! # Run with environment overrides
//! TPROXY_DOOR_LOG_LEVEL=debug sudo ./tproxy-door
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use tproxy_door::config::{load_config_with_env, Config, ListenMode};
use tproxy_door::connection::{run_accept_loop, ConnectionManager};
use tproxy_door::door::DoorHandler;
use tproxy_door::session::{DirectDispatcher, Dispatcher};
use tproxy_door::tproxy::{has_net_admin_capability, is_root, DoorListener};

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/tproxy-door/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("tproxy-door v{}", tproxy_door::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"tproxy-door v{}

Transparent-proxy connection terminator: relays intercepted TCP connections
to a fixed destination or to the destination they were redirected from.

USAGE:
    tproxy-door [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/tproxy-door/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    TPROXY_DOOR_LISTEN_ADDR      Override listen address
    TPROXY_DOOR_LOG_LEVEL        Override log level (trace, debug, info, warn, error)
    TPROXY_DOOR_MAX_CONNECTIONS  Override maximum connections
    TPROXY_DOOR_IDLE_TIMEOUT     Override idle timeout in seconds (0 = default)

REQUIREMENTS (tproxy mode):
    - Linux kernel with TPROXY support
    - CAP_NET_ADMIN capability (or root)
    - iptables TPROXY rules configured

EXAMPLE:
    iptables -t mangle -A PREROUTING -i wg-ingress -p tcp -j TPROXY \
        --on-ip 127.0.0.1 --on-port 7893 --tproxy-mark 0x1
    ip rule add fwmark 0x1 lookup 100
    ip route add local 0.0.0.0/0 dev lo table 100

    sudo tproxy-door -c /etc/tproxy-door/config.json
"#,
        tproxy_door::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "tokio=warn".parse() {
        filter = filter.add_directive(directive);
    }

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target)
        .with_span_events(FmtSpan::CLOSE);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Check system prerequisites
fn check_prerequisites(config: &Config) {
    if config.listen.mode == ListenMode::Tproxy && !is_root() && !has_net_admin_capability() {
        warn!("Not running as root and CAP_NET_ADMIN not detected");
        warn!("TPROXY mode requires CAP_NET_ADMIN capability");
        // Let the socket creation fail with a clearer error
    }
    if config.door.follow_redirect && config.listen.mode == ListenMode::Plain {
        warn!("door.follow_redirect is set but a plain listener never recovers destinations");
    }
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    if args.generate_config {
        tproxy_door::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    let config = load_config_with_env(&args.config_path).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            args.config_path.display()
        )
    })?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config);

    info!("tproxy-door v{}", tproxy_door::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    check_prerequisites(&config);

    let handler = DoorHandler::new(config.door.clone())
        .context("Invalid door configuration")?
        .with_buffer_size(config.connection.buffer_size);
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(
        DirectDispatcher::new(&config.connection).with_idle_timeout(config.door.idle_timeout()),
    );

    info!(
        "Door accepts {:?}, idle timeout {}s, follow_redirect={}, dispatcher={}",
        handler.networks(),
        config.door.idle_timeout().as_secs(),
        config.door.follow_redirect,
        dispatcher.name()
    );

    let connection_manager = Arc::new(ConnectionManager::new(
        &config.connection,
        Arc::new(handler),
        dispatcher,
    ));

    let listener = DoorListener::bind(&config.listen).context("Failed to create listener")?;

    info!(
        "tproxy-door ready on {} (mode: {})",
        listener.listen_addr(),
        listener.mode()
    );
    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    let accept_result = tokio::select! {
        result = run_accept_loop(listener, Arc::clone(&connection_manager)) => result,
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
            Ok(())
        }
        () = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
            Ok(())
        }
    };

    info!("Shutting down...");
    connection_manager.shutdown().await;

    let stats = connection_manager.stats_snapshot();
    info!(
        "Final stats: {} total connections, {} completed, {} errored, {} rejected",
        stats.total_accepted, stats.completed, stats.errored, stats.rejected
    );
    info!(
        "Failures: {} no destination, {} dispatch, {} request, {} response, {} idle, {} interrupted",
        stats.no_destination,
        stats.dispatch_failed,
        stats.request_failed,
        stats.response_failed,
        stats.timed_out,
        stats.interrupted
    );
    info!(
        "Transferred: {} bytes up, {} bytes down",
        stats.bytes_up, stats.bytes_down
    );

    info!("Shutdown complete");

    accept_result.context("Accept loop error")
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
