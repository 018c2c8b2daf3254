//! Token exchange against the Google Android auth endpoint.
//!
//! The catalog only needs a bearer token; everything here exists to obtain
//! one. Two thin POSTs cover both credential shapes:
//!
//! 1. `master_token` from settings (preferred — password logins have been
//!    blocked by Google for years) is exchanged directly for an OAuth access
//!    token scoped to the Drive app-data area.
//! 2. `email` + app password performs the legacy master login first, then the
//!    same exchange. The RSA-enveloped password variant is deliberately not
//!    implemented; an app password is sent as-is.
//!
//! The resulting [`Session`] is an explicit value handed to the catalog
//! client constructor. Nothing here is process-global, and token refresh is
//! out of scope: a run either finishes on one token or fails.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::AuthSettings;
use crate::ui;

/// OAuth scope granting access to WhatsApp's Drive app-data area.
const OAUTH_SCOPE: &str = "oauth2:https://www.googleapis.com/auth/drive.appdata";
/// Package and signature the token must be minted for.
const APP_PACKAGE: &str = "com.whatsapp";
const APP_SIGNATURE: &str = "38a0f7d505fe18fec64fbf343ecaaaf310dbd799";

const DEFAULT_AUTH_BASE: &str = "https://android.googleapis.com";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// An authenticated session: the bearer token plus its declared expiry.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub expiry: Option<DateTime<Utc>>,
}

/// Credentials resolved from settings (and, for the password fallback, from
/// an interactive prompt).
#[derive(Debug, Clone)]
pub enum Credentials {
    MasterToken {
        android_id: String,
        token: String,
    },
    Password {
        android_id: String,
        email: String,
        password: String,
    },
}

impl Credentials {
    /// Choose the credential shape from settings, prompting for the password
    /// when the legacy flow is selected without one on file.
    pub fn from_settings(auth: &AuthSettings) -> anyhow::Result<Self> {
        let android_id = auth.android_id.clone();
        if let Some(token) = &auth.master_token {
            return Ok(Credentials::MasterToken {
                android_id,
                token: token.clone(),
            });
        }
        let email = auth
            .email
            .clone()
            .context("settings carry neither master_token nor email")?;
        let password = match auth.password.as_deref() {
            Some(password) if !password.is_empty() => password.to_string(),
            _ => ui::prompt_password(&email)?,
        };
        Ok(Credentials::Password {
            android_id,
            email,
            password,
        })
    }

    fn android_id(&self) -> &str {
        match self {
            Credentials::MasterToken { android_id, .. } => android_id,
            Credentials::Password { android_id, .. } => android_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),

    #[error("token exchange request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("authentication rejected: {0}")]
    Rejected(String),

    #[error("auth response carried no token")]
    MissingToken,
}

/// Performs the credential handshake and hands back a [`Session`].
pub struct TokenProvider {
    http: reqwest::blocking::Client,
    base_url: String,
    credentials: Credentials,
}

impl TokenProvider {
    /// Build a provider for the given credentials. The endpoint base honors
    /// `WABACKUP_AUTH_BASE` so tests can point it at a local server.
    pub fn new(credentials: Credentials) -> Result<Self, AuthError> {
        let http = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(AuthError::Client)?;
        let base_url = std::env::var("WABACKUP_AUTH_BASE")
            .unwrap_or_else(|_| DEFAULT_AUTH_BASE.to_string());
        Ok(Self {
            http,
            base_url,
            credentials,
        })
    }

    /// Run the handshake: master login when needed, then the OAuth exchange.
    pub fn obtain(&self) -> Result<Session, AuthError> {
        let master = match &self.credentials {
            Credentials::MasterToken { token, .. } => token.clone(),
            Credentials::Password {
                email, password, ..
            } => self.master_login(email, password)?,
        };
        self.oauth_exchange(&master)
    }

    fn master_login(&self, email: &str, password: &str) -> Result<String, AuthError> {
        let android_id = self.credentials.android_id();
        let response = self.post_auth(&[
            ("accountType", "HOSTED_OR_GOOGLE"),
            ("Email", email),
            ("Passwd", password),
            ("service", "ac2dm"),
            ("source", "android"),
            ("androidId", android_id),
            ("device_country", "us"),
            ("operatorCountry", "us"),
            ("lang", "en"),
            ("sdk_version", "17"),
        ])?;
        response
            .get("Token")
            .cloned()
            .ok_or(AuthError::MissingToken)
    }

    fn oauth_exchange(&self, master_token: &str) -> Result<Session, AuthError> {
        let android_id = self.credentials.android_id();
        let response = self.post_auth(&[
            ("accountType", "HOSTED_OR_GOOGLE"),
            ("Token", master_token),
            ("has_permission", "1"),
            ("service", OAUTH_SCOPE),
            ("source", "android"),
            ("androidId", android_id),
            ("app", APP_PACKAGE),
            ("client_sig", APP_SIGNATURE),
            ("device_country", "us"),
            ("operatorCountry", "us"),
            ("lang", "en"),
            ("sdk_version", "17"),
        ])?;

        let access_token = response
            .get("Auth")
            .cloned()
            .ok_or(AuthError::MissingToken)?;
        let expiry = response
            .get("Expiry")
            .and_then(|raw| raw.parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        Ok(Session {
            access_token,
            expiry,
        })
    }

    /// POST a form to `/auth` and parse the `key=value` line response. An
    /// `Error=` line wins over the HTTP status: the endpoint reports bad
    /// credentials as 403 with a parseable body.
    fn post_auth(&self, form: &[(&str, &str)]) -> Result<HashMap<String, String>, AuthError> {
        let url = format!("{}/auth", self.base_url);
        let body = self.http.post(&url).form(form).send()?.text()?;
        let fields = parse_key_values(&body);
        if let Some(error) = fields.get("Error") {
            return Err(AuthError::Rejected(error.clone()));
        }
        Ok(fields)
    }
}

fn parse_key_values(body: &str) -> HashMap<String, String> {
    body.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn provider_for(server: &MockServer) -> TokenProvider {
        let http = reqwest::blocking::Client::new();
        TokenProvider {
            http,
            base_url: server.base_url(),
            credentials: Credentials::MasterToken {
                android_id: "0000000000000000".into(),
                token: "aas_et/master".into(),
            },
        }
    }

    #[test]
    fn parses_key_value_body() {
        let fields = parse_key_values("Auth=abc\nExpiry=1700000000\nnoise\n");
        assert_eq!(fields.get("Auth").map(String::as_str), Some("abc"));
        assert_eq!(fields.get("Expiry").map(String::as_str), Some("1700000000"));
        assert!(!fields.contains_key("noise"));
    }

    #[test]
    fn obtain_exchanges_master_token() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/auth");
            then.status(200).body("Auth=bearer-token\nExpiry=1893456000\n");
        });

        let session = provider_for(&server).obtain().unwrap();
        mock.assert();
        assert_eq!(session.access_token, "bearer-token");
        assert_eq!(
            session.expiry,
            DateTime::from_timestamp(1_893_456_000, 0)
        );
    }

    #[test]
    fn password_flow_performs_two_exchanges() {
        let server = MockServer::start();
        // Both steps hit /auth; a body carrying both keys satisfies each.
        let mock = server.mock(|when, then| {
            when.method(POST).path("/auth");
            then.status(200).body("Token=aas_et/master\nAuth=bearer-token\n");
        });

        let provider = TokenProvider {
            http: reqwest::blocking::Client::new(),
            base_url: server.base_url(),
            credentials: Credentials::Password {
                android_id: "0000000000000000".into(),
                email: "alias@gmail.com".into(),
                password: "app-password".into(),
            },
        };

        let session = provider.obtain().unwrap();
        assert_eq!(session.access_token, "bearer-token");
        assert_eq!(session.expiry, None);
        assert_eq!(mock.hits(), 2);
    }

    #[test]
    fn obtain_surfaces_rejection() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/auth");
            then.status(403).body("Error=BadAuthentication\n");
        });

        let err = provider_for(&server).obtain().unwrap_err();
        assert!(matches!(err, AuthError::Rejected(ref reason) if reason == "BadAuthentication"));
    }

    #[test]
    fn obtain_requires_a_token() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/auth");
            then.status(200).body("SID=ignored\n");
        });

        let err = provider_for(&server).obtain().unwrap_err();
        assert!(matches!(err, AuthError::MissingToken));
    }
}
