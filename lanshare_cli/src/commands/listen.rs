//! Listen command - Accept pairing requests and incoming files

use anyhow::Result;
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Confirm, Input};
use lanshare_core::{
    identity::local_addresses,
    resolver::unique_path,
    ChannelResolver, DeviceRegistry, DirectoryResolver, FileShareServer, IdentityStore,
    SavePathResolver, SaveRequest, ServerEvent,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{error, format_bytes, info, success, warn};
use crate::config::Config;

/// How long in-flight transfers may finish after Ctrl+C
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ListenOptions {
    pub port: Option<u16>,
    pub name: Option<String>,
    pub download_dir: Option<PathBuf>,
    pub auto_accept: bool,
    pub once: bool,
}

pub async fn run(options: ListenOptions) -> Result<()> {
    let cfg = Config::load_with_identity()?;

    let mut server_config = cfg.server.clone();
    if let Some(port) = options.port {
        server_config = server_config.with_port(port);
    }
    let device_name = options.name.unwrap_or_else(|| cfg.device_name());
    server_config = server_config.with_device_name(&device_name);

    let download_dir = match options.download_dir {
        Some(dir) => dir,
        None => cfg.download_dir()?,
    };
    let auto_accept = options.auto_accept || cfg.auto_accept;

    // Print header
    println!();
    println!("{}", "  LANSHARE LISTENER  ".on_bright_blue().white().bold());
    println!();

    let store = IdentityStore::open_default()?;
    let registry = Arc::new(DeviceRegistry::open_default()?);
    registry.on_device_paired(|device| {
        tracing::debug!("Registry now includes {}", device.device_id);
    });

    let (resolver, prompt_task): (Arc<dyn SavePathResolver>, _) = if auto_accept {
        (Arc::new(DirectoryResolver::new(download_dir.clone())), None)
    } else {
        let (resolver, requests) = ChannelResolver::new(4);
        let dir = download_dir.clone();
        (Arc::new(resolver), Some(tokio::spawn(answer_prompts(requests, dir))))
    };

    let mut server = FileShareServer::bind(server_config, &store, registry, resolver).await?;
    let identity = server.identity().clone();
    let payload = server.pairing_info().to_payload()?;

    info(&format!("Device name: {}", identity.display_name.cyan()));
    info(&format!("Port: {}", identity.port.to_string().cyan()));
    info(&format!("Saving files to: {}", download_dir.display().to_string().cyan()));
    if auto_accept {
        warn("Accepting every offered file without asking");
    }
    println!();

    let addresses = local_addresses();
    if !addresses.is_empty() {
        println!("{}", "Local IP addresses:".bold());
        for addr in addresses.iter().filter(|a| a.is_ipv4()) {
            println!("  {} {}", "•".green(), addr);
        }
        println!();
    }

    println!("{}", "Pairing token:".bold());
    println!("  {}", identity.token.yellow());
    println!("{}", "Pairing payload:".bold());
    println!("  {}", payload.dimmed());
    println!();
    println!("{}", "Press Ctrl+C to stop".dimmed());
    println!();

    let (event_tx, event_rx) = mpsc::channel(32);
    let event_handler = tokio::spawn(print_events(event_rx));

    if options.once {
        server.handle_one(event_tx).await?;
    } else {
        let handle = server.shutdown_handle();
        let server_task = tokio::spawn(async move { server.run(event_tx).await });

        tokio::signal::ctrl_c().await?;
        println!();
        info("Shutting down...");
        handle.stop();
        if let Err(e) = server_task.await? {
            error(&format!("Server error: {}", e));
        }

        if handle.in_flight() > 0 {
            info(&format!(
                "Waiting for {} transfer(s) to finish...",
                handle.in_flight()
            ));
        }
        if !handle.drain(DRAIN_TIMEOUT).await {
            warn("Transfers still running, aborting them");
            handle.abort_in_flight();
            handle.drain(Duration::from_secs(1)).await;
        }
    }

    let _ = tokio::time::timeout(Duration::from_secs(1), event_handler).await;
    if let Some(task) = prompt_task {
        task.abort();
    }

    success("LanShare listener stopped");
    Ok(())
}

async fn print_events(mut event_rx: mpsc::Receiver<ServerEvent>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            ServerEvent::Started { address } => {
                info(&format!("Listening on {}", address));
            }
            ServerEvent::ClientConnected { address } => {
                info(&format!("Connection from {}", address.to_string().yellow()));
            }
            ServerEvent::DevicePaired { device } => {
                println!();
                success(&format!(
                    "Paired with {} ({})",
                    device.device_name.green().bold(),
                    device.device_ip
                ));
                println!("  {} Device id: {}", "→".cyan(), device.device_id.dimmed());
                println!();
            }
            ServerEvent::PairingRejected { address, reason } => {
                warn(&format!("Pairing from {} rejected: {}", address, reason));
            }
            ServerEvent::FileReceived {
                file_name,
                path,
                bytes,
                complete,
            } => {
                if complete {
                    success(&format!(
                        "Received {} ({})",
                        file_name.green().bold(),
                        format_bytes(bytes)
                    ));
                } else {
                    warn(&format!(
                        "Transfer of {} ended early after {}",
                        file_name,
                        format_bytes(bytes)
                    ));
                }
                println!("  {} {}", "→".cyan(), path.display().to_string().dimmed());
            }
            ServerEvent::TransferCancelled { file_name } => {
                info(&format!("Declined {}", file_name));
            }
            ServerEvent::TransferRejected { file_name, reason } => {
                warn(&format!("Rejected {}: {}", file_name, reason));
            }
            ServerEvent::Error { address, message } => {
                error(&format!("Error with {}: {}", address, message));
            }
            ServerEvent::Stopped => {
                info("No longer accepting connections");
            }
        }
    }
}

/// Answer save requests one at a time from the terminal
async fn answer_prompts(mut requests: mpsc::Receiver<SaveRequest>, download_dir: PathBuf) {
    while let Some(request) = requests.recv().await {
        if request.is_cancelled() {
            tracing::debug!("Skipping stale request for {}", request.suggested_name());
            continue;
        }

        let name = request.suggested_name().to_string();
        let dir = download_dir.clone();

        let decision = tokio::task::spawn_blocking(move || prompt_for_path(&name, &dir))
            .await
            .ok()
            .and_then(|answer| match answer {
                Ok(path) => path,
                Err(e) => {
                    error(&format!("Prompt failed: {}", e));
                    None
                }
            });

        if request.is_cancelled() {
            warn(&format!("{} is no longer waiting for an answer", request.suggested_name()));
            continue;
        }
        request.respond(decision);
    }
}

fn prompt_for_path(name: &str, dir: &Path) -> Result<Option<PathBuf>> {
    println!();
    let accept = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Accept incoming file {}?", name))
        .default(true)
        .interact()?;

    if !accept {
        return Ok(None);
    }

    std::fs::create_dir_all(dir)?;
    let suggested = unique_path(dir, name);
    let base = dir.to_path_buf();
    let answer: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Save as")
        .default(suggested.display().to_string())
        .validate_with(move |answer: &String| check_destination(&resolve_answer(answer, &base)))
        .interact_text()?;

    Ok(Some(resolve_answer(&answer, dir)))
}

/// Relative answers are placed inside the download directory
fn resolve_answer(answer: &str, dir: &Path) -> PathBuf {
    let path = PathBuf::from(answer.trim());
    if path.is_absolute() {
        path
    } else {
        dir.join(path)
    }
}

/// Received files never replace existing ones
fn check_destination(path: &Path) -> std::result::Result<(), String> {
    if path.exists() {
        return Err(format!("{} already exists", path.display()));
    }
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => {
            Err(format!("{} is not a directory", parent.display()))
        }
        _ => Ok(()),
    }
}
