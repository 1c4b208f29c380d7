//! Devices command - Manage devices paired with this machine

use anyhow::Result;
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Confirm};
use lanshare_core::{DeviceRegistry, PairedDevice};

use super::{error, info, success};

pub enum Action {
    List,
    Remove(String),
}

pub fn run(action: Option<Action>) -> Result<()> {
    let registry = DeviceRegistry::open_default()?;

    match action.unwrap_or(Action::List) {
        Action::List => list_devices(&registry),
        Action::Remove(device_id) => remove_device(&registry, &device_id),
    }
}

fn list_devices(registry: &DeviceRegistry) -> Result<()> {
    let devices = registry.all();

    if devices.is_empty() {
        println!("{}", "No paired devices.".dimmed());
        println!();
        println!("Pair a device by running {} here", "lanshare listen".cyan());
        return Ok(());
    }

    println!("{}", "Paired devices:".bold());
    println!();
    for line in device_lines(&devices) {
        println!("{}", line);
    }
    println!();

    Ok(())
}

fn device_lines(devices: &[PairedDevice]) -> Vec<String> {
    devices
        .iter()
        .enumerate()
        .map(|(i, device)| {
            format!(
                "  {} {} {} {}",
                format!("[{}]", i).yellow(),
                device.device_name.cyan().bold(),
                device.device_ip.dimmed(),
                device.device_id.dimmed()
            )
        })
        .collect()
}

fn remove_device(registry: &DeviceRegistry, device_id: &str) -> Result<()> {
    let device = match registry.get(device_id) {
        Some(device) => device,
        None => {
            error(&format!("No paired device with id {}", device_id));
            return Ok(());
        }
    };

    info(&format!(
        "Device: {} ({})",
        device.device_name.cyan(),
        device.device_ip
    ));

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Forget this device?")
        .default(false)
        .interact()?;

    if !confirmed {
        info("Cancelled");
        return Ok(());
    }

    if registry.delete(device_id) {
        success(&format!("Forgot {}", device.device_name));
    } else {
        error("Could not update the paired device list");
    }

    Ok(())
}
