use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("failed to read credentials from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid credentials file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Sender id and API key for the connection server.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Reads a `{"username": .., "password": ..}` JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CredentialsError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| CredentialsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| CredentialsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{Credentials, CredentialsError};

    #[test]
    fn loads_username_and_password() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"username": "12345", "password": "api-key"}}"#).expect("write");

        let creds = Credentials::load(file.path()).expect("credentials should load");
        assert_eq!(creds.username, "12345");
        assert_eq!(creds.password, "api-key");
        assert!(!format!("{creds:?}").contains("api-key"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = Credentials::load(dir.path().join("absent.json")).expect_err("no file");
        assert!(matches!(err, CredentialsError::Io { .. }));
    }

    #[test]
    fn missing_field_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"username": "12345"}}"#).expect("write");
        let err = Credentials::load(file.path()).expect_err("password missing");
        assert!(matches!(err, CredentialsError::Parse { .. }));
        assert!(err.to_string().contains("password"));
    }
}
