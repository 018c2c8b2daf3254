pub mod auth;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod sync;
pub mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use crate::auth::{Credentials, TokenProvider};
use crate::catalog::{BackupMetadata, BackupRecord, CatalogClient};
use crate::cli::{Cli, Command};
use crate::config::Settings;
use crate::sync::SyncOptions;

/// CLI entrypoint: resolve credentials, open a session, run the command.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_or_init(&cli.settings)?;
    let credentials = Credentials::from_settings(&settings.auth)?;
    let session = TokenProvider::new(credentials)?
        .obtain()
        .context("authentication failed")?;
    tracing::debug!(expiry = ?session.expiry, "session established");
    let client = CatalogClient::new(session)?;

    match cli.command {
        Command::Info => cmd_info(&client, &cli),
        Command::List => cmd_list(&client, &cli),
        Command::Sync => cmd_sync(&client, &cli),
    }
}

fn cmd_info(client: &CatalogClient, cli: &Cli) -> Result<()> {
    for backup in client.backups() {
        let backup = backup.context("listing backups failed")?;
        if !ui::confirm_backup(backup.id(), cli.yes)? {
            continue;
        }
        match backup.parsed_metadata() {
            Ok(meta) => print_backup_info(&backup, &meta),
            Err(err) => {
                tracing::warn!(backup = %backup.id(), error = %err, "backup carries unusable metadata");
            }
        }
    }
    Ok(())
}

fn print_backup_info(backup: &BackupRecord, meta: &BackupMetadata) {
    println!(
        "\nBackup {} Size: {} Uploaded: {}",
        backup.id().bold(),
        ui::human_size(meta.backup_size),
        backup.update_time
    );
    println!("  WhatsApp version  : {}", meta.version_of_app_when_backup);
    if let Some(protected) = meta.password_protected_backup_enabled {
        println!("  Password protected: {protected}");
    }
    println!(
        "  Messages          : {} ({})",
        meta.num_of_messages,
        ui::human_size(meta.chatdb_size)
    );
    println!(
        "  Media files       : {} ({})",
        meta.num_of_media_files,
        ui::human_size(meta.media_size)
    );
    println!("  Photos            : {}", meta.num_of_photos);
    println!(
        "  Videos            : included={} ({})",
        meta.include_videos_in_backup,
        ui::human_size(meta.video_size)
    );
}

fn cmd_list(client: &CatalogClient, cli: &Cli) -> Result<()> {
    for backup in client.backups() {
        let backup = backup.context("listing backups failed")?;
        if !ui::confirm_backup(backup.id(), cli.yes)? {
            continue;
        }

        let mut files = 0u64;
        let mut total = 0u64;
        let mut aborted = false;
        for record in client.backup_files(&backup) {
            let record = match record {
                Ok(record) => record,
                Err(err) => {
                    // Same containment as sync: report and move to the next
                    // backup instead of sinking the run.
                    tracing::warn!(backup = %backup.id(), error = %err, "file listing failed");
                    aborted = true;
                    break;
                }
            };
            match (record.relative_path(), record.size()) {
                (Ok(path), Ok(size)) => {
                    println!("{}", path.display());
                    files += 1;
                    total += size;
                }
                (Err(err), _) | (_, Err(err)) => {
                    tracing::warn!(name = %record.name, error = %err, "skipping malformed file record");
                }
            }
        }
        if !aborted {
            println!("{files} files ({})", ui::human_size(total));
        }
    }
    Ok(())
}

fn cmd_sync(client: &CatalogClient, cli: &Cli) -> Result<()> {
    let opts = SyncOptions {
        dest_root: cli.dest.clone(),
        log_path: cli.log.clone(),
        jobs: cli.jobs,
        assume_yes: cli.yes,
    };
    let report = sync::run_sync(client, &opts)?;

    let line = format!(
        "Synced {} backup(s), {} failed, {} declined",
        report.synced.len(),
        report.failed,
        report.declined
    );
    if report.failed > 0 {
        println!("{}", console::style(line).yellow());
    } else {
        println!("{}", console::style(line).green());
    }
    Ok(())
}
