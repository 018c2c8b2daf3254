//! Record types returned by the backup catalog.
//!
//! The catalog speaks JSON with a few quirks inherited from the Drive app-data
//! API: byte sizes arrive as decimal strings, file digests as base64 MD5, and
//! backup metadata as a JSON document nested inside a string field. The types
//! here keep the raw wire form and expose typed accessors, so a single bad
//! field can be diagnosed and skipped without losing the rest of a listing.

use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Leading resource-name segments (`clients/wa/backups`) stripped when
/// deriving a local path from a file's hierarchical name.
const STRIPPED_SEGMENTS: usize = 3;

/// Errors raised while interpreting a single catalog record.
///
/// These are per-record failures: callers skip the offending record with a
/// diagnostic and keep going.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("`{name}` declares a non-decimal sizeBytes `{value}`")]
    BadSize { name: String, value: String },

    #[error("`{name}` carries an md5Hash that is not valid base64: {source}")]
    BadDigest {
        name: String,
        source: base64::DecodeError,
    },

    #[error("`{name}` carries an md5Hash of {len} bytes, expected 16")]
    DigestLength { name: String, len: usize },

    #[error("resource name `{name}` is too short to derive a local path")]
    ShortName { name: String },

    #[error("resource name `{name}` contains an unsafe path segment `{segment}`")]
    UnsafeSegment { name: String, segment: String },

    #[error("backup `{name}` carries no metadata")]
    MissingMetadata { name: String },

    #[error("metadata of `{name}` is not valid JSON: {source}")]
    BadMetadata {
        name: String,
        source: serde_json::Error,
    },
}

/// One backup as listed under `clients/wa/backups`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    /// Hierarchical resource name, e.g. `clients/wa/backups/1614879600000`.
    pub name: String,
    /// Declared total size in bytes, as a decimal string.
    pub size_bytes: String,
    /// Upload timestamp (ISO-8601, printed verbatim).
    pub update_time: String,
    /// Opaque metadata blob: a JSON document inside a JSON string.
    #[serde(default)]
    pub metadata: Option<String>,
}

impl BackupRecord {
    /// Last segment of the resource name, used to address the backup in
    /// prompts and reports.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Declared total size in bytes.
    pub fn size(&self) -> Result<u64, RecordError> {
        parse_size(&self.name, &self.size_bytes)
    }

    /// Parse the nested metadata document.
    pub fn parsed_metadata(&self) -> Result<BackupMetadata, RecordError> {
        let raw = self.metadata.as_deref().ok_or(RecordError::MissingMetadata {
            name: self.name.clone(),
        })?;
        serde_json::from_str(raw).map_err(|source| RecordError::BadMetadata {
            name: self.name.clone(),
            source,
        })
    }
}

/// Metadata document embedded in a backup record.
///
/// Fields the server is known to omit on old backups are optional; everything
/// else is required so a truncated document is caught up front.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    #[serde(deserialize_with = "lenient_u64")]
    pub backup_size: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub chatdb_size: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub media_size: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub video_size: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub num_of_messages: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub num_of_media_files: u64,
    #[serde(deserialize_with = "lenient_u64")]
    pub num_of_photos: u64,
    #[serde(default)]
    pub include_videos_in_backup: bool,
    pub version_of_app_when_backup: String,
    #[serde(default)]
    pub password_protected_backup_enabled: Option<bool>,
}

/// One file as listed under `<backup>/files`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Hierarchical resource name; encodes the backup id and relative path.
    pub name: String,
    /// Declared size in bytes, as a decimal string.
    pub size_bytes: String,
    /// Expected content hash: base64 of the 16-byte MD5 digest.
    pub md5_hash: String,
}

impl FileRecord {
    /// Declared size in bytes.
    pub fn size(&self) -> Result<u64, RecordError> {
        parse_size(&self.name, &self.size_bytes)
    }

    /// Expected content digest.
    pub fn md5(&self) -> Result<[u8; 16], RecordError> {
        let bytes = BASE64
            .decode(&self.md5_hash)
            .map_err(|source| RecordError::BadDigest {
                name: self.name.clone(),
                source,
            })?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| RecordError::DigestLength {
                name: self.name.clone(),
                len: bytes.len(),
            })
    }

    /// Local path relative to the destination root: the resource name with the
    /// bucket/app/backup marker segments stripped.
    pub fn relative_path(&self) -> Result<PathBuf, RecordError> {
        let segments: Vec<&str> = self.name.split('/').collect();
        if segments.len() <= STRIPPED_SEGMENTS {
            return Err(RecordError::ShortName {
                name: self.name.clone(),
            });
        }
        let mut path = PathBuf::new();
        for segment in &segments[STRIPPED_SEGMENTS..] {
            // A listing should never be able to escape the destination root.
            if segment.is_empty() || *segment == "." || *segment == ".." {
                return Err(RecordError::UnsafeSegment {
                    name: self.name.clone(),
                    segment: (*segment).to_string(),
                });
            }
            path.push(segment);
        }
        Ok(path)
    }
}

fn parse_size(name: &str, value: &str) -> Result<u64, RecordError> {
    value.parse().map_err(|_| RecordError::BadSize {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Accept a count as either a JSON number or a decimal string; the metadata
/// blob has shipped both over the years.
fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
