//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_SETTINGS_PATH;
use crate::sync::DEFAULT_JOBS;

#[derive(Debug, Parser)]
#[command(
    name = "wabackup",
    version,
    about = "Download WhatsApp backups from Google Drive",
    long_about = "Download WhatsApp backups stored in Google Drive's app-data area,\n\
                  verify every file against its catalog digest, and keep an\n\
                  md5sum-compatible log of everything synced."
)]
pub struct Cli {
    /// Settings file holding the account credentials.
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_PATH)]
    pub settings: PathBuf,

    /// Directory the backup tree is written under.
    #[arg(long, global = true, default_value = ".")]
    pub dest: PathBuf,

    /// Concurrent downloads per backup.
    #[arg(long, global = true, default_value_t = DEFAULT_JOBS)]
    pub jobs: usize,

    /// Checksum log appended to during sync.
    #[arg(long, global = true, default_value = "md5sum.txt")]
    pub log: PathBuf,

    /// Accept every backup without prompting.
    #[arg(long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the metadata of each backup.
    Info,
    /// List every file of each backup.
    List,
    /// Download everything not already present and valid.
    Sync,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_wired() {
        let cli = Cli::parse_from(["wabackup", "sync"]);
        assert_eq!(cli.settings, PathBuf::from("settings.toml"));
        assert_eq!(cli.dest, PathBuf::from("."));
        assert_eq!(cli.jobs, DEFAULT_JOBS);
        assert_eq!(cli.log, PathBuf::from("md5sum.txt"));
        assert!(!cli.yes);
        assert!(matches!(cli.command, Command::Sync));
    }

    #[test]
    fn global_flags_work_after_the_subcommand() {
        let cli = Cli::parse_from(["wabackup", "sync", "--yes", "--jobs", "4", "--dest", "out"]);
        assert!(cli.yes);
        assert_eq!(cli.jobs, 4);
        assert_eq!(cli.dest, PathBuf::from("out"));
    }
}
