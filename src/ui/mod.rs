//! Terminal presentation helpers: sizes, progress, prompts.

use anyhow::Result;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Password};
use indicatif::{ProgressBar, ProgressStyle};

/// Human-readable byte size, `300.00 B` / `1.50 GiB` style.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["B", "kiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} ZiB")
}

/// Progress bar for one backup, sized by the declared backup size.
///
/// The declared size is only advisory — the sum of the actual file sizes can
/// land above or below it, so the position is allowed to pass the length.
pub fn backup_progress(declared_bytes: u64) -> ProgressBar {
    let style = ProgressStyle::with_template("{percent:>3}% [{bar:32}] {bytes}/{total_bytes} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::new(declared_bytes.max(1)).with_style(style)
}

/// Per-backup acceptance prompt. `--yes` accepts everything silently.
pub fn confirm_backup(id: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    let accepted = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Do you want {id}?"))
        .default(false)
        .interact()?;
    Ok(accepted)
}

/// Hidden-input prompt for the legacy password login.
pub fn prompt_password(email: &str) -> Result<String> {
    let password = Password::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Enter your password for {email}"))
        .interact()?;
    Ok(password)
}
