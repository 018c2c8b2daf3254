//! Settings file handling.
//!
//! Credentials live in `settings.toml` next to where the tool is run. On
//! first use the file does not exist yet: a commented template is written
//! and the run stops with an error telling the user to fill it in, which
//! keeps credentials out of argv and shell history.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_SETTINGS_PATH: &str = "settings.toml";

const SETTINGS_TEMPLATE: &str = r#"[auth]
# The result of `adb shell settings get secure android_id` on the device
# that owns the backups.
android_id = "0000000000000000"

# Preferred: a master token for the Google account. When set, the
# email/password pair below is ignored.
#master_token = "aas_et/..."

# Legacy fallback: account email plus an app password. You will be
# prompted for the password if it is left unset.
email = "alias@gmail.com"
#password = "yourpassword"
"#;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no settings found; wrote a template to {path} — fill in your credentials and re-run")]
    TemplateCreated { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} is not valid TOML: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("settings are incomplete: {0}")]
    Incomplete(&'static str),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub auth: AuthSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    pub android_id: String,
    #[serde(default)]
    pub master_token: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Settings {
    /// Load settings; when the file does not exist yet, write the template
    /// and report that instead of proceeding with placeholder credentials.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            fs::write(path, SETTINGS_TEMPLATE).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
            return Err(ConfigError::TemplateCreated {
                path: path.to_path_buf(),
            });
        }
        Self::load(path)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.android_id.trim().is_empty() {
            return Err(ConfigError::Incomplete("auth.android_id is empty"));
        }
        if self.auth.master_token.is_none() && self.auth.email.is_none() {
            return Err(ConfigError::Incomplete(
                "set auth.master_token, or auth.email for the legacy login",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_round_trips_through_the_parser() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.toml");

        let err = Settings::load_or_init(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TemplateCreated { .. }));

        // The template must itself be valid, loadable TOML.
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.auth.android_id, "0000000000000000");
        assert_eq!(settings.auth.email.as_deref(), Some("alias@gmail.com"));
        assert_eq!(settings.auth.master_token, None);
        assert_eq!(settings.auth.password, None);
    }

    #[test]
    fn load_accepts_a_master_token_only_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.toml");
        fs::write(
            &path,
            "[auth]\nandroid_id = \"abcdef0123456789\"\nmaster_token = \"aas_et/secret\"\n",
        )
        .unwrap();

        let settings = Settings::load_or_init(&path).unwrap();
        assert_eq!(settings.auth.master_token.as_deref(), Some("aas_et/secret"));
    }

    #[test]
    fn load_rejects_missing_credentials() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.toml");
        fs::write(&path, "[auth]\nandroid_id = \"abcdef0123456789\"\n").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(ConfigError::Incomplete(_))
        ));

        fs::write(&path, "[auth]\nandroid_id = \"\"\nmaster_token = \"t\"\n").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(ConfigError::Incomplete(_))
        ));
    }

    #[test]
    fn load_rejects_broken_toml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.toml");
        fs::write(&path, "[auth\nandroid_id=").unwrap();
        assert!(matches!(Settings::load(&path), Err(ConfigError::Parse { .. })));
    }
}
