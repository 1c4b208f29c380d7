//! Info command - Show the pairing payload of this machine

use anyhow::Result;
use colored::Colorize;
use lanshare_core::{IdentityStore, PairingInfo};

use super::{info, warn};

pub fn run() -> Result<()> {
    let store = IdentityStore::open_default()?;
    let identity = store.load();

    if !identity.has_token() {
        warn("This machine has no pairing identity yet");
        println!();
        println!("Create one with: {}", "lanshare listen".cyan());
        return Ok(());
    }

    let pairing = PairingInfo::from(&identity);

    println!("{}", "Pairing details:".bold());
    println!("  {} Name: {}", "•".cyan(), pairing.device_name.cyan());
    println!("  {} Address: {}", "•".cyan(), pairing.address());
    println!("  {} Token: {}", "•".cyan(), pairing.token.yellow());
    println!();
    println!("{}", "Payload:".bold());
    println!("  {}", pairing.to_payload()?);
    println!();
    info(&format!(
        "Identity stored at {}",
        store.path().display().to_string().dimmed()
    ));

    Ok(())
}
