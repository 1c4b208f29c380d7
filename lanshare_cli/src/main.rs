//! LanShare CLI - pair devices and receive files on your local network
//!
//! Usage:
//!   lanshare listen                  - Accept pairings and incoming files
//!   lanshare info                    - Show the pairing payload for this host
//!   lanshare pair <addr> --token <t> - Pair with a listening host
//!   lanshare send <addr> <file>      - Send a file to a listening host

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// LanShare - token paired file sharing for your terminal
#[derive(Parser)]
#[command(name = "lanshare")]
#[command(author = "LanShare Team")]
#[command(version)]
#[command(about = "Pair devices and receive files over your local network")]
#[command(long_about = r#"
LanShare receives files from paired devices on the same network.

On the receiving machine:
  $ lanshare listen

Copy the pairing payload it prints, then on the sending machine:
  $ lanshare pair --payload '<payload>'
  $ lanshare send 192.168.1.20:40123 ./photo.jpg
"#)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept pairing requests and incoming files (run on the receiving machine)
    Listen {
        /// Port to listen on (defaults to the last used port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Custom device name (defaults to hostname)
        #[arg(short, long)]
        name: Option<String>,

        /// Directory to save received files into
        #[arg(short, long)]
        download_dir: Option<PathBuf>,

        /// Accept every file without prompting
        #[arg(short, long)]
        yes: bool,

        /// Exit after handling a single connection
        #[arg(long)]
        once: bool,
    },

    /// Show the pairing payload of this machine
    Info,

    /// Pair with a listening machine
    Pair {
        /// Address of the listener (IP:port)
        #[arg(required_unless_present = "payload")]
        address: Option<String>,

        /// Pairing token shown by the listener
        #[arg(short, long, required_unless_present = "payload")]
        token: Option<String>,

        /// Pairing payload printed by `lanshare info`
        #[arg(long, conflicts_with_all = ["address", "token"])]
        payload: Option<String>,
    },

    /// Send a file to a listening machine
    Send {
        /// Address of the listener (IP:port)
        address: String,

        /// File to send
        file: PathBuf,
    },

    /// Manage devices paired with this machine
    Devices {
        #[command(subcommand)]
        action: Option<DevicesAction>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum DevicesAction {
    /// List all paired devices
    List,
    /// Forget a paired device
    Remove {
        /// Device id as shown by `devices list`
        device_id: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show config file path
    Path,
    /// Set where received files are saved
    SetDownloadDir {
        dir: PathBuf,
    },
    /// Set the name this device presents
    SetName {
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_target(false)
        .init();

    match cli.command {
        Commands::Listen {
            port,
            name,
            download_dir,
            yes,
            once,
        } => {
            commands::listen::run(commands::listen::ListenOptions {
                port,
                name,
                download_dir,
                auto_accept: yes,
                once,
            })
            .await
        }
        Commands::Info => commands::info::run(),
        Commands::Pair {
            address,
            token,
            payload,
        } => commands::pair::run(address, token, payload).await,
        Commands::Send { address, file } => commands::send::run(address, file).await,
        Commands::Devices { action } => {
            commands::devices::run(action.map(|a| match a {
                DevicesAction::List => commands::devices::Action::List,
                DevicesAction::Remove { device_id } => commands::devices::Action::Remove(device_id),
            }))
        }
        Commands::Config { action } => run_config(action),
    }
}

fn run_config(action: ConfigAction) -> Result<()> {
    use colored::Colorize;

    match action {
        ConfigAction::Show => {
            let cfg = config::Config::load_with_identity()?;
            println!("{}", "Configuration:".bold());
            println!("  {} Device id: {}", "•".cyan(), cfg.device_id);
            println!("  {} Device name: {}", "•".cyan(), cfg.device_name());
            println!(
                "  {} Download directory: {}",
                "•".cyan(),
                cfg.download_dir()?.display()
            );
            println!("  {} Auto accept: {}", "•".cyan(), cfg.auto_accept);
            match cfg.server.port {
                Some(port) => println!("  {} Port: {}", "•".cyan(), port),
                None => println!("  {} Port: {}", "•".cyan(), "last used".dimmed()),
            }
        }
        ConfigAction::Path => {
            let path = config::Config::path()?;
            println!("{}", path.display());
        }
        ConfigAction::SetDownloadDir { dir } => {
            let mut cfg = config::Config::load()?;
            let dir = if dir.is_absolute() {
                dir
            } else {
                std::env::current_dir()?.join(dir)
            };
            cfg.download_dir = Some(dir.clone());
            cfg.save()?;
            println!("{} Download directory: {}", "✓".green(), dir.display().to_string().cyan());
        }
        ConfigAction::SetName { name } => {
            let mut cfg = config::Config::load()?;
            cfg.device_name = Some(name.clone());
            cfg.save()?;
            println!("{} Device name: {}", "✓".green(), name.cyan());
        }
    }
    Ok(())
}
