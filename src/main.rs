//! termbridge - serve an interactive terminal UI to the browser
//!
//! Each WebSocket connection gets its own pseudo terminal and its own
//! instance of the chat UI. Keystrokes arrive as WebSocket messages, screen
//! output goes back as binary frames, and a resize control frame remounts
//! the UI at the new size.
//!
//! # Quick Start
//!
//! ```text
//! termbridge                     # ws://127.0.0.1:3000/term, sentinel framing
//! termbridge --json -b 0.0.0.0:8080
//! ```
//!
//! # Resize framing
//!
//! | Framing | Resize message |
//! |---------|----------------|
//! | sentinel | byte `0xFF` followed by `cols,rows` |
//! | json | `{"type":"resize","cols":80,"rows":24}` |

mod config;
mod core;
mod server;
mod ui;

use std::cell::RefCell;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::LocalSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::Config;
use crate::core::{Framing, SessionManager};
use crate::ui::ChatApp;

/// Command line overrides
#[derive(Debug, Default)]
struct CliOptions {
    config_file: Option<PathBuf>,
    bind: Option<SocketAddr>,
    path: Option<String>,
    framing: Option<Framing>,
    mount_on_open: bool,
    init_config: bool,
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("termbridge {}", VERSION);
}

fn print_help() {
    eprintln!("termbridge {} - Serve a terminal UI to the browser over a WebSocket", VERSION);
    eprintln!();
    eprintln!("Usage: termbridge [OPTIONS]");
    eprintln!();
    eprintln!("Server options:");
    eprintln!("  -b, --bind <ADDR>     Listen address (default: 127.0.0.1:3000)");
    eprintln!("  --path <PATH>         WebSocket path (default: /term)");
    eprintln!();
    eprintln!("Protocol options:");
    eprintln!("  --sentinel            Resize as 0xFF \"cols,rows\" (default)");
    eprintln!("  --json                Resize as {{\"type\":\"resize\",\"cols\":C,\"rows\":R}}");
    eprintln!("  --mount-on-open       Mount the UI before the first resize");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("  -c, --config <FILE>   Read configuration from FILE");
    eprintln!("  --init-config         Write the default configuration and exit");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  RUST_LOG              Log filter, overrides log_level");
    eprintln!();
    eprintln!("Configuration: ~/.termbridge/config.toml");
}

fn parse_args() -> Result<CliOptions, String> {
    let args: Vec<String> = env::args().collect();
    let mut options = CliOptions::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-b" | "--bind" => {
                i += 1;
                let value = args.get(i).ok_or("Missing address argument")?;
                let addr = value
                    .parse()
                    .map_err(|_| format!("Invalid address: {}", value))?;
                options.bind = Some(addr);
            }
            "--path" => {
                i += 1;
                let value = args.get(i).ok_or("Missing path argument")?;
                if !value.starts_with('/') {
                    return Err(format!("Path must start with '/': {}", value));
                }
                options.path = Some(value.clone());
            }
            "--json" => options.framing = Some(Framing::Json),
            "--sentinel" => options.framing = Some(Framing::Sentinel),
            "--mount-on-open" => options.mount_on_open = true,
            "-c" | "--config" => {
                i += 1;
                let value = args.get(i).ok_or("Missing config file argument")?;
                options.config_file = Some(PathBuf::from(value));
            }
            "--init-config" => options.init_config = true,
            arg => {
                return Err(format!("Unknown argument: {}", arg));
            }
        }
        i += 1;
    }

    Ok(options)
}

/// Merge the config file with command line overrides
fn load_config(options: &CliOptions) -> anyhow::Result<Config> {
    let mut config = match &options.config_file {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };

    if let Some(bind) = options.bind {
        config.server.bind = bind;
    }
    if let Some(path) = &options.path {
        config.server.path = path.clone();
    }
    if let Some(framing) = options.framing {
        config.protocol.framing = framing;
    }
    if options.mount_on_open {
        config.protocol.mount_on_open = true;
    }
    Ok(config)
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("Invalid log_level: {}", config.log_level))?;

    let result = match &config.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
    };
    result.context("Failed to install logger")
}

fn main() -> anyhow::Result<()> {
    let options = match parse_args() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let config = load_config(&options)?;

    if options.init_config {
        let path = config.save()?;
        eprintln!("Wrote {}", path.display());
        return Ok(());
    }

    init_logging(&config)?;
    info!("termbridge {} starting...", VERSION);

    // Sessions are Rc-based, so everything runs on one thread
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;
    let local = LocalSet::new();
    local.block_on(&runtime, run(config))
}

async fn run(config: Config) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    let addr = server::display_addr(listener.local_addr()?);
    eprintln!(
        "termbridge listening on ws://{}{} ({} framing)",
        addr, config.server.path, config.protocol.framing
    );

    let app = ChatApp::new(config.app.clone());
    let manager = Rc::new(RefCell::new(SessionManager::new(app, config.session_options())));

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::task::spawn_local(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
        shutdown.cancel();
    });

    server::serve(listener, &config.server.path, manager, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_file() {
        let options = CliOptions {
            bind: Some("0.0.0.0:9000".parse().unwrap()),
            path: Some("/tty".to_string()),
            framing: Some(Framing::Json),
            mount_on_open: true,
            ..Default::default()
        };
        let path = std::env::temp_dir().join(format!("termbridge-cli-{}.toml", std::process::id()));
        std::fs::write(&path, "[server]\npath = \"/ignored\"\n[terminal]\nrows = 50\n").unwrap();
        let options = CliOptions {
            config_file: Some(path.clone()),
            ..options
        };

        let config = load_config(&options);
        let _ = std::fs::remove_file(&path);
        let config = config.unwrap();

        assert_eq!(config.server.bind.port(), 9000);
        assert_eq!(config.server.path, "/tty");
        assert_eq!(config.protocol.framing, Framing::Json);
        assert!(config.protocol.mount_on_open);
        assert_eq!(config.terminal.rows, 50);
    }

    #[test]
    fn test_explicit_missing_config_is_an_error() {
        let options = CliOptions {
            config_file: Some(PathBuf::from("/definitely/not/here.toml")),
            ..Default::default()
        };
        assert!(load_config(&options).is_err());
    }
}
