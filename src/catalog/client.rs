//! Authenticated HTTP access to the backup catalog.
//!
//! Thin wrapper around a blocking reqwest client: one method for JSON listing
//! pages, one for `alt=media` byte streams. Every failure surfaces as a typed
//! [`ApiError`] so callers can always tell "empty listing" from "request
//! failed".

use std::time::Duration;

use thiserror::Error;

use crate::auth::Session;
use crate::catalog::pages::Paginator;
use crate::catalog::records::{BackupRecord, FileRecord};

const DEFAULT_BASE_URL: &str = "https://backup.googleapis.com/v1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A catalog request that did not produce a usable response.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Transport { url: String, source: reqwest::Error },

    #[error("{url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("{url} returned a body that is not valid JSON: {source}")]
    BadBody { url: String, source: reqwest::Error },
}

/// Client for the hierarchical backup resource API.
pub struct CatalogClient {
    http: reqwest::blocking::Client,
    base_url: String,
    session: Session,
}

impl CatalogClient {
    /// Build a client bound to one authenticated session. The base URL honors
    /// `WABACKUP_API_BASE` so tests can point it at a local server.
    pub fn new(session: Session) -> Result<Self, ApiError> {
        let base_url =
            std::env::var("WABACKUP_API_BASE").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::with_base_url(session, base_url)
    }

    pub fn with_base_url(session: Session, base_url: String) -> Result<Self, ApiError> {
        // No overall timeout: media bodies can be multi-gigabyte and stream
        // for however long the link needs.
        let http = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(ApiError::Client)?;
        Ok(Self {
            http,
            base_url,
            session,
        })
    }

    /// All backups of the authenticated account, lazily paginated.
    pub fn backups(&self) -> Paginator<'_, BackupRecord> {
        Paginator::new(self, "clients/wa/backups")
    }

    /// All files of one backup, lazily paginated.
    pub fn backup_files(&self, backup: &BackupRecord) -> Paginator<'_, FileRecord> {
        Paginator::new(self, format!("{}/files", backup.name))
    }

    /// Fetch one listing page as JSON.
    pub fn get_page(
        &self,
        path: &str,
        page_token: Option<&str>,
    ) -> Result<serde_json::Value, ApiError> {
        let url = self.url_for(path);
        let mut request = self.http.get(&url);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }
        let response = self.send(request, &url)?;
        response.json().map_err(|source| ApiError::BadBody {
            url: url.clone(),
            source,
        })
    }

    /// Fetch a file body as a byte stream. The returned response implements
    /// `Read`; callers copy it straight to disk.
    pub fn get_media(&self, path: &str) -> Result<reqwest::blocking::Response, ApiError> {
        let url = self.url_for(path);
        let request = self.http.get(&url).query(&[("alt", "media")]);
        self.send(request, &url)
    }

    fn send(
        &self,
        request: reqwest::blocking::RequestBuilder,
        url: &str,
    ) -> Result<reqwest::blocking::Response, ApiError> {
        let response = request
            .bearer_auth(&self.session.access_token)
            .send()
            .map_err(|source| ApiError::Transport {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(response)
    }

    /// Join the base URL with a resource path, percent-encoding each segment.
    /// File names can legally contain `%` and `+`, which must survive the
    /// round trip.
    fn url_for(&self, path: &str) -> String {
        let encoded: Vec<String> = path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/{}", self.base_url.trim_end_matches('/'), encoded.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn test_client(server: &MockServer) -> CatalogClient {
        let session = Session {
            access_token: "test-token".into(),
            expiry: None,
        };
        CatalogClient::with_base_url(session, server.base_url()).unwrap()
    }

    #[test]
    fn url_for_encodes_awkward_segments() {
        let session = Session {
            access_token: "t".into(),
            expiry: None,
        };
        let client =
            CatalogClient::with_base_url(session, "https://example.test/v1".into()).unwrap();
        assert_eq!(
            client.url_for("clients/wa/backups/1/files/Media/IMG 100%+.jpg"),
            "https://example.test/v1/clients/wa/backups/1/files/Media/IMG%20100%25%2B.jpg"
        );
    }

    #[test]
    fn get_page_sends_bearer_and_token() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/clients/wa/backups")
                .query_param("pageToken", "t-2")
                .header("authorization", "Bearer test-token");
            then.status(200).json_body(serde_json::json!({"backups": []}));
        });

        let page = test_client(&server)
            .get_page("clients/wa/backups", Some("t-2"))
            .unwrap();
        mock.assert();
        assert!(page.get("backups").is_some());
    }

    #[test]
    fn get_page_surfaces_http_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/clients/wa/backups");
            then.status(503);
        });

        let err = test_client(&server)
            .get_page("clients/wa/backups", None)
            .unwrap_err();
        assert!(matches!(err, ApiError::Status { status, .. } if status.as_u16() == 503));
    }

    #[test]
    fn get_media_requests_the_media_mode() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/clients/wa/backups/1/files/chat.db")
                .query_param("alt", "media");
            then.status(200).body("raw bytes");
        });

        let mut response = test_client(&server)
            .get_media("clients/wa/backups/1/files/chat.db")
            .unwrap();
        let mut body = String::new();
        std::io::Read::read_to_string(&mut response, &mut body).unwrap();
        mock.assert();
        assert_eq!(body, "raw bytes");
    }
}
