//! Sync engine: drive each accepted backup through the download pool.
//!
//! # Architecture
//!
//! - **integrity**: size + MD5 verification of local files
//! - **scheduler**: bounded worker pool fetching what the checker rejects
//! - **log**: append-only md5sum-compatible record of everything verified
//!
//! One backup moves through `LISTING → DOWNLOADING → DONE`. Failures are
//! contained per backup: the driver reports the failure with its context and
//! moves on to the next backup, so one broken backup never sinks a run.
//!
//! # Example
//!
//! ```rust,ignore
//! use wabackup::sync::{run_sync, SyncOptions};
//!
//! let report = run_sync(&client, &options)?;
//! println!("{} backups synced, {} failed", report.synced.len(), report.failed);
//! ```

pub mod integrity;
pub mod log;
pub mod scheduler;

pub use log::SyncLog;
pub use scheduler::{DEFAULT_JOBS, FetchError, FileOutcome, Scheduler, SyncError};

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::catalog::{BackupRecord, CatalogClient};
use crate::ui;

/// Options for one `sync` run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Root the backup tree is written under.
    pub dest_root: PathBuf,
    /// Checksum log, shared by every backup of the run.
    pub log_path: PathBuf,
    /// Worker-pool size per backup.
    pub jobs: usize,
    /// Accept every backup without prompting.
    pub assume_yes: bool,
}

/// Totals for one synced backup.
#[derive(Debug, Clone, Default)]
pub struct BackupSummary {
    pub id: String,
    /// Files verified or downloaded.
    pub files: u64,
    /// Bytes those files add up to.
    pub bytes: u64,
    /// How many of them were actually fetched.
    pub downloaded: u64,
}

/// Totals for the whole run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub synced: Vec<BackupSummary>,
    pub failed: u64,
    pub declined: u64,
}

/// Sync every accepted backup. Only a failure to enumerate the backups at
/// all aborts the run; anything below that is contained per backup.
pub fn run_sync(client: &CatalogClient, opts: &SyncOptions) -> Result<RunReport> {
    let mut log = SyncLog::open(&opts.log_path)
        .with_context(|| format!("opening sync log {}", opts.log_path.display()))?;
    let mut report = RunReport::default();

    for backup in client.backups() {
        let backup = backup.context("listing backups failed")?;
        if !ui::confirm_backup(backup.id(), opts.assume_yes)? {
            report.declined += 1;
            continue;
        }

        let declared = declared_size(&backup);
        println!(
            "Backup {} Size: {} Uploaded: {}",
            backup.id(),
            ui::human_size(declared),
            backup.update_time
        );

        match sync_one(client, &backup, opts, &mut log) {
            Ok(summary) => {
                println!("{} files ({})", summary.files, ui::human_size(summary.bytes));
                report.synced.push(summary);
            }
            Err(err) => {
                warn!(
                    backup = %backup.id(),
                    size = %ui::human_size(declared),
                    uploaded = %backup.update_time,
                    error = %err,
                    "backup sync failed, continuing with the next one"
                );
                report.failed += 1;
            }
        }
    }

    Ok(report)
}

fn sync_one(
    client: &CatalogClient,
    backup: &BackupRecord,
    opts: &SyncOptions,
    log: &mut SyncLog<File>,
) -> std::result::Result<BackupSummary, SyncError> {
    let bar = ui::backup_progress(declared_size(backup));
    let scheduler = Scheduler::new(client, &opts.dest_root, opts.jobs);
    let mut summary = BackupSummary {
        id: backup.id().to_string(),
        ..Default::default()
    };

    let result = scheduler.run(client.backup_files(backup), |outcome| {
        summary.files += 1;
        summary.bytes += outcome.size;
        if outcome.downloaded {
            summary.downloaded += 1;
        }
        bar.set_position(summary.bytes);
        if let Some(name) = outcome.path.file_name() {
            bar.set_message(name.to_string_lossy().into_owned());
        }
        log.record(&outcome.md5, &outcome.path)
    });
    bar.finish_and_clear();
    result?;

    info!(
        backup = %summary.id,
        files = summary.files,
        downloaded = summary.downloaded,
        "backup complete"
    );
    Ok(summary)
}

/// The declared backup size drives only progress display; an unusable value
/// degrades to zero instead of failing the backup.
fn declared_size(backup: &BackupRecord) -> u64 {
    backup.size().unwrap_or_else(|err| {
        warn!(backup = %backup.id(), error = %err, "backup declares an unusable size");
        0
    })
}
