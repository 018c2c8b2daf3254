//! Bounded-concurrency download scheduling.
//!
//! One worker pool per backup. The file-record stream is pulled lazily by a
//! producer thread into a bounded task queue, so catalog listing overlaps
//! with downloading but can never race unboundedly ahead of a slow disk.
//! Workers verify-or-fetch one file at a time; completions flow back to the
//! caller's thread in whatever order workers finish.
//!
//! A fetched file is streamed to a sibling `.part` path, re-verified against
//! the catalog digest, and only then renamed into place — a killed process
//! leaves nothing at the final path that the integrity check would accept
//! by accident.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::records::RecordError;
use crate::catalog::{ApiError, CatalogClient, FileRecord};
use crate::sync::integrity;

/// Default worker-pool size per backup.
pub const DEFAULT_JOBS: usize = 10;

/// A file the pool settled: verified in place or downloaded.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    /// Path relative to the destination root; also the log path.
    pub path: PathBuf,
    pub size: u64,
    pub md5: [u8; 16],
    /// false when the file was already present and valid.
    pub downloaded: bool,
}

/// Failure fetching one file.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("writing {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("{path}: downloaded bytes do not match the catalog digest")]
    DigestMismatch { path: PathBuf },
}

/// Why one backup's sync stopped early.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("listing backup files failed: {0}")]
    Listing(ApiError),

    #[error("fetching `{name}` failed: {source}")]
    File { name: String, source: FetchError },

    #[error("writing the sync log failed: {0}")]
    Log(#[from] io::Error),
}

/// A file record with its fields parsed up front, so malformed records are
/// rejected before they occupy a worker.
struct FileTask {
    name: String,
    rel_path: PathBuf,
    size: u64,
    md5: [u8; 16],
}

impl FileTask {
    fn parse(record: &FileRecord) -> Result<Self, RecordError> {
        Ok(Self {
            name: record.name.clone(),
            rel_path: record.relative_path()?,
            size: record.size()?,
            md5: record.md5()?,
        })
    }

    fn io(&self, source: io::Error) -> FetchError {
        FetchError::Io {
            path: self.rel_path.clone(),
            source,
        }
    }
}

pub struct Scheduler<'c> {
    client: &'c CatalogClient,
    dest_root: PathBuf,
    jobs: usize,
}

impl<'c> Scheduler<'c> {
    pub fn new(client: &'c CatalogClient, dest_root: impl Into<PathBuf>, jobs: usize) -> Self {
        Self {
            client,
            dest_root: dest_root.into(),
            jobs: jobs.max(1),
        }
    }

    /// Drive one backup's file stream through the pool.
    ///
    /// `on_complete` runs on the calling thread for every settled file, in
    /// completion order; it is where the caller appends the sync log and
    /// advances progress. The first failure — a page fetch, a file fetch, or
    /// the log itself — stops the listing, lets in-flight downloads drain,
    /// and is returned. Completions that arrive after the first failure are
    /// left for the next run to re-verify.
    pub fn run<I, F>(&self, files: I, mut on_complete: F) -> Result<(), SyncError>
    where
        I: Iterator<Item = Result<FileRecord, ApiError>> + Send,
        F: FnMut(&FileOutcome) -> io::Result<()>,
    {
        let (task_tx, task_rx) = bounded::<FileTask>(self.jobs * 2);
        let (done_tx, done_rx) = bounded::<Result<FileOutcome, SyncError>>(self.jobs);
        let stop = AtomicBool::new(false);
        let listing_error: Mutex<Option<ApiError>> = Mutex::new(None);
        let mut first_error: Option<SyncError> = None;

        thread::scope(|scope| {
            for _ in 0..self.jobs {
                let task_rx = task_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    for task in task_rx {
                        if done_tx.send(self.fetch(task)).is_err() {
                            break;
                        }
                    }
                });
            }
            // Workers hold the only live clones now; the channels close when
            // the producer and the pool wind down.
            drop(task_rx);
            drop(done_tx);

            let stop = &stop;
            let listing_error = &listing_error;
            scope.spawn(move || {
                for record in files {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    match record {
                        Ok(record) => {
                            let task = match FileTask::parse(&record) {
                                Ok(task) => task,
                                Err(err) => {
                                    warn!(name = %record.name, error = %err, "skipping malformed file record");
                                    continue;
                                }
                            };
                            if task_tx.send(task).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            *listing_error.lock() = Some(err);
                            break;
                        }
                    }
                }
            });

            for result in done_rx {
                match result {
                    Ok(outcome) => {
                        if first_error.is_some() {
                            continue;
                        }
                        if let Err(err) = on_complete(&outcome) {
                            stop.store(true, Ordering::Relaxed);
                            first_error = Some(SyncError::Log(err));
                        }
                    }
                    Err(err) => {
                        if first_error.is_none() {
                            stop.store(true, Ordering::Relaxed);
                            first_error = Some(err);
                        } else {
                            debug!(error = %err, "follow-up failure after the first reported one");
                        }
                    }
                }
            }
        });

        if let Some(err) = first_error {
            return Err(err);
        }
        if let Some(err) = listing_error.into_inner() {
            return Err(SyncError::Listing(err));
        }
        Ok(())
    }

    /// Settle one file: accept it in place, or fetch it.
    fn fetch(&self, task: FileTask) -> Result<FileOutcome, SyncError> {
        let dest = self.dest_root.join(&task.rel_path);

        let valid = integrity::is_valid(&dest, task.size, &task.md5).map_err(|err| {
            SyncError::File {
                name: task.name.clone(),
                source: task.io(err),
            }
        })?;
        if valid {
            debug!(path = %task.rel_path.display(), "already present and valid");
            return Ok(FileOutcome {
                path: task.rel_path,
                size: task.size,
                md5: task.md5,
                downloaded: false,
            });
        }

        // One retry when the bytes that land on disk fail verification.
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.download_once(&task, &dest) {
                Ok(()) => {
                    return Ok(FileOutcome {
                        path: task.rel_path,
                        size: task.size,
                        md5: task.md5,
                        downloaded: true,
                    });
                }
                Err(FetchError::DigestMismatch { .. }) if attempts == 1 => {
                    warn!(name = %task.name, "downloaded bytes failed verification, retrying once");
                }
                Err(source) => {
                    return Err(SyncError::File {
                        name: task.name,
                        source,
                    });
                }
            }
        }
    }

    fn download_once(&self, task: &FileTask, dest: &Path) -> Result<(), FetchError> {
        if let Some(parent) = dest.parent() {
            // Racing workers may create the same directory; create_dir_all
            // treats an existing one as success.
            fs::create_dir_all(parent).map_err(|err| task.io(err))?;
        }

        let mut body = self.client.get_media(&task.name)?;

        let tmp = part_path(dest);
        let result = (|| {
            let mut out = File::create(&tmp).map_err(|err| task.io(err))?;
            io::copy(&mut body, &mut out).map_err(|err| task.io(err))?;
            out.sync_all().map_err(|err| task.io(err))?;
            drop(out);

            if !integrity::is_valid(&tmp, task.size, &task.md5).map_err(|err| task.io(err))? {
                return Err(FetchError::DigestMismatch {
                    path: task.rel_path.clone(),
                });
            }
            fs::rename(&tmp, dest).map_err(|err| task.io(err))
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Session;
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use httpmock::prelude::*;
    use md5::{Digest, Md5};
    use serial_test::serial;
    use std::time::{Duration, Instant};

    fn test_client(server: &MockServer) -> CatalogClient {
        let session = Session {
            access_token: "test-token".into(),
            expiry: None,
        };
        CatalogClient::with_base_url(session, server.base_url()).unwrap()
    }

    fn record_for(n: u32, content: &[u8]) -> FileRecord {
        let digest: [u8; 16] = Md5::digest(content).into();
        serde_json::from_value(serde_json::json!({
            "name": format!("clients/wa/backups/1/files/f{n}"),
            "sizeBytes": content.len().to_string(),
            "md5Hash": BASE64.encode(digest),
        }))
        .unwrap()
    }

    fn mock_media<'a>(server: &'a MockServer, n: u32, content: &[u8]) -> httpmock::Mock<'a> {
        let body = content.to_vec();
        server.mock(move |when, then| {
            when.method(GET)
                .path(format!("/clients/wa/backups/1/files/f{n}"))
                .query_param("alt", "media");
            then.status(200).body(body);
        })
    }

    fn collect_outcomes(
        scheduler: &Scheduler<'_>,
        records: Vec<Result<FileRecord, ApiError>>,
    ) -> (Result<(), SyncError>, Vec<FileOutcome>) {
        let mut outcomes = Vec::new();
        let result = scheduler.run(records.into_iter(), |outcome| {
            outcomes.push(outcome.clone());
            Ok(())
        });
        (result, outcomes)
    }

    #[test]
    fn downloads_missing_and_skips_valid_files() {
        let server = MockServer::start();
        let tmp = tempfile::tempdir().unwrap();
        let client = test_client(&server);

        // f1 already present and valid; f2 missing; f3 present but corrupt.
        let present = b"present and correct";
        fs::create_dir_all(tmp.path().join("1/files")).unwrap();
        fs::write(tmp.path().join("1/files/f1"), present).unwrap();
        fs::write(tmp.path().join("1/files/f3"), b"stale bytes").unwrap();

        let fresh = b"fresh from the catalog";
        let repaired = b"repaired contents";
        let m2 = mock_media(&server, 2, fresh);
        let m3 = mock_media(&server, 3, repaired);

        let scheduler = Scheduler::new(&client, tmp.path(), 4);
        let records = vec![
            Ok(record_for(1, present)),
            Ok(record_for(2, fresh)),
            Ok(record_for(3, repaired)),
        ];
        let (result, outcomes) = collect_outcomes(&scheduler, records);
        result.unwrap();

        assert_eq!(outcomes.len(), 3);
        let by_name = |n: &str| {
            outcomes
                .iter()
                .find(|o| o.path.ends_with(n))
                .unwrap()
        };
        assert!(!by_name("f1").downloaded);
        assert!(by_name("f2").downloaded);
        assert!(by_name("f3").downloaded);

        assert_eq!(fs::read(tmp.path().join("1/files/f2")).unwrap(), fresh);
        assert_eq!(fs::read(tmp.path().join("1/files/f3")).unwrap(), repaired);
        assert_eq!(m2.hits(), 1);
        assert_eq!(m3.hits(), 1);

        // No temp files survive a clean run.
        for entry in fs::read_dir(tmp.path().join("1/files")).unwrap() {
            let name = entry.unwrap().file_name();
            assert!(!name.to_string_lossy().ends_with(".part"), "leftover {name:?}");
        }
    }

    #[test]
    fn malformed_records_are_skipped() {
        let server = MockServer::start();
        let tmp = tempfile::tempdir().unwrap();
        let client = test_client(&server);

        let mut bad = record_for(1, b"whatever");
        bad.md5_hash = "not base64!".into();

        let scheduler = Scheduler::new(&client, tmp.path(), 2);
        let (result, outcomes) = collect_outcomes(&scheduler, vec![Ok(bad)]);
        result.unwrap();
        assert!(outcomes.is_empty());
    }

    #[test]
    fn digest_mismatch_is_retried_once_then_fails() {
        let server = MockServer::start();
        let tmp = tempfile::tempdir().unwrap();
        let client = test_client(&server);

        // The server keeps returning bytes that do not match the record.
        let mock = mock_media(&server, 1, b"corrupted body");
        let record = record_for(1, b"expected body!");

        let scheduler = Scheduler::new(&client, tmp.path(), 1);
        let (result, outcomes) = collect_outcomes(&scheduler, vec![Ok(record)]);

        assert!(matches!(
            result,
            Err(SyncError::File {
                source: FetchError::DigestMismatch { .. },
                ..
            })
        ));
        assert!(outcomes.is_empty());
        assert_eq!(mock.hits(), 2);
        assert!(!tmp.path().join("1/files/f1").exists());
        assert!(!tmp.path().join("1/files/f1.part").exists());
    }

    #[test]
    fn listing_failure_surfaces_after_queued_files_settle() {
        let server = MockServer::start();
        let tmp = tempfile::tempdir().unwrap();
        let client = test_client(&server);

        let content = b"only file";
        mock_media(&server, 1, content);

        let scheduler = Scheduler::new(&client, tmp.path(), 2);
        let records = vec![
            Ok(record_for(1, content)),
            Err(ApiError::Status {
                url: "https://example.test/page-2".into(),
                status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            }),
        ];
        let (result, outcomes) = collect_outcomes(&scheduler, records);

        assert!(matches!(result, Err(SyncError::Listing(_))));
        assert_eq!(outcomes.len(), 1);
        assert!(tmp.path().join("1/files/f1").exists());
    }

    #[test]
    #[serial]
    fn pool_runs_downloads_concurrently_up_to_the_limit() {
        let server = MockServer::start();
        let tmp = tempfile::tempdir().unwrap();
        let client = test_client(&server);

        let delay = Duration::from_millis(400);
        let content = b"delayed payload bytes";
        let mut records = Vec::new();
        for n in 1..=4 {
            let body = content.to_vec();
            server.mock(move |when, then| {
                when.method(GET)
                    .path(format!("/clients/wa/backups/1/files/f{n}"))
                    .query_param("alt", "media");
                then.status(200).body(body).delay(delay);
            });
            records.push(Ok(record_for(n, content)));
        }

        let scheduler = Scheduler::new(&client, tmp.path(), 2);
        let start = Instant::now();
        let (result, outcomes) = collect_outcomes(&scheduler, records);
        let elapsed = start.elapsed();
        result.unwrap();

        assert_eq!(outcomes.len(), 4);
        // Two workers over four delayed files: two waves, not four.
        assert!(elapsed >= delay.mul_f32(1.9), "finished too fast: {elapsed:?}");
        assert!(elapsed < delay.mul_f32(3.5), "no overlap observed: {elapsed:?}");
    }
}
