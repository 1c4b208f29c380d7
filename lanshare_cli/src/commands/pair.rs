//! Pair command - Pair with a listening machine

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use lanshare_core::{LanshareError, PairingClient, PairingInfo};
use std::time::Duration;

use super::{error, info, success};
use crate::config::Config;

pub async fn run(
    address: Option<String>,
    token: Option<String>,
    payload: Option<String>,
) -> Result<()> {
    println!();
    println!("{}", "  LANSHARE PAIRING  ".on_bright_magenta().white().bold());
    println!();

    let (address, token) = resolve_target(address, token, payload)?;
    let cfg = Config::load_with_identity()?;

    info(&format!("Connecting to {}...", address.cyan()));

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.magenta} {msg}")?,
    );
    spinner.set_message("Presenting pairing token...");
    spinner.enable_steady_tick(Duration::from_millis(80));

    let client = PairingClient::new(&cfg.device_id, &cfg.device_name());
    let result = client.pair(&address, &token).await;

    spinner.finish_and_clear();

    match result {
        Ok(pairing) => {
            success(&format!(
                "Paired with {}!",
                pairing.server_name.green().bold()
            ));
            println!(
                "  {} Send files with: {}",
                "→".cyan(),
                format!("lanshare send {} <file>", address).dimmed()
            );
            Ok(())
        }
        Err(LanshareError::Pairing(reason)) => {
            error(&format!("Pairing refused: {}", reason));
            Err(anyhow!("Pairing refused: {}", reason))
        }
        Err(e) => {
            error(&format!("Pairing failed: {}", e));
            Err(e.into())
        }
    }
}

/// Address and token from either explicit arguments or a pairing payload
fn resolve_target(
    address: Option<String>,
    token: Option<String>,
    payload: Option<String>,
) -> Result<(String, String)> {
    if let Some(payload) = payload {
        let pairing =
            PairingInfo::from_payload(&payload).context("Could not read pairing payload")?;
        return Ok((pairing.address(), pairing.token));
    }

    match (address, token) {
        (Some(address), Some(token)) => Ok((address, token)),
        _ => Err(anyhow!("Provide an address and --token, or --payload")),
    }
}
