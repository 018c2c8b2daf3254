//! Append-only sync log, compatible with `md5sum -c`.
//!
//! One line per verified-or-downloaded file, `<lowercase-hex> *<path>`, in
//! completion order (concurrency-dependent — consumers must not assume path
//! ordering). Each line is flushed before the next file is recorded, so a
//! killed run leaves a coherent prefix of completed entries. The log spans
//! the whole multi-backup run and is opened in append mode: re-runs append
//! fresh entries for every file they verify, so duplicates across runs are
//! expected.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

pub struct SyncLog<W: Write> {
    out: W,
}

impl SyncLog<File> {
    pub fn open(path: &Path) -> io::Result<Self> {
        let out = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { out })
    }
}

impl<W: Write> SyncLog<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Append one entry and flush it to the OS before returning.
    pub fn record(&mut self, md5: &[u8; 16], relative_path: &Path) -> io::Result<()> {
        let line = format!("{} *{}\n", hex::encode(md5), relative_path.display());
        self.out.write_all(line.as_bytes())?;
        self.out.flush()
    }
}
