//! Send command - Push a file to a listening machine

use anyhow::{anyhow, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use lanshare_core::{FileSender, SendOutcome};
use std::path::PathBuf;

use super::{error, format_bytes, info, success, warn};

pub async fn run(address: String, file: PathBuf) -> Result<()> {
    if !file.is_file() {
        return Err(anyhow!("Not a file: {}", file.display()));
    }
    let size = std::fs::metadata(&file)?.len();

    info(&format!(
        "Sending {} ({}) to {}",
        file.display().to_string().cyan(),
        format_bytes(size),
        address.cyan()
    ));
    info("Waiting for the receiver to accept...");

    let bar = ProgressBar::new(size);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{bar:40.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
            .progress_chars("=> "),
    );

    let progress = bar.clone();
    let sender = FileSender::new().with_progress(move |sent| progress.set_position(sent));
    let result = sender.send_file(&address, &file).await;

    match result {
        Ok(SendOutcome::Delivered { bytes }) => {
            bar.finish_and_clear();
            success(&format!("Delivered {}", format_bytes(bytes).green().bold()));
            Ok(())
        }
        Ok(SendOutcome::Cancelled) => {
            bar.abandon();
            warn("The receiver declined the file");
            Ok(())
        }
        Ok(SendOutcome::Rejected) => {
            bar.abandon();
            error("The receiver rejected the file size");
            Err(anyhow!("File rejected by {}", address))
        }
        Err(e) => {
            bar.abandon();
            error(&format!("Transfer failed: {}", e));
            Err(e.into())
        }
    }
}
