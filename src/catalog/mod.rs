//! Remote backup catalog access.
//!
//! The catalog is a REST-style hierarchical resource API: backups live under
//! `clients/wa/backups`, each backup's files under `<backup>/files`, and both
//! listings are cursor-paginated. File bodies are fetched from the same
//! resource path with `alt=media`.
//!
//! - **client**: authenticated HTTP wrapper with typed errors
//! - **pages**: lazy cursor-following pagination
//! - **records**: wire types and their typed accessors
//!
//! # Usage
//!
//! ```rust,ignore
//! use wabackup::auth::Session;
//! use wabackup::catalog::CatalogClient;
//!
//! let client = CatalogClient::new(session)?;
//! for backup in client.backups() {
//!     let backup = backup?;
//!     for file in client.backup_files(&backup) {
//!         println!("{}", file?.relative_path()?.display());
//!     }
//! }
//! ```

pub mod client;
pub mod pages;
pub mod records;

pub use client::{ApiError, CatalogClient};
pub use pages::Paginator;
pub use records::{BackupMetadata, BackupRecord, FileRecord, RecordError};
