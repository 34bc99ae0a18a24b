use crate::domain::models::OAuthToken;
use crate::infrastructure::error::InfraError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<OAuthToken>, InfraError>;
    fn save(&self, token: &OAuthToken) -> Result<(), InfraError>;
    /// Human-readable location, used in error messages.
    fn describe(&self) -> String;
}

/// Token JSON persisted at a fixed path.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<OAuthToken>, InfraError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let token = serde_json::from_str::<OAuthToken>(&raw).map_err(|error| {
            InfraError::Credential(format!("invalid token file {}: {error}", self.path.display()))
        })?;
        Ok(Some(token))
    }

    fn save(&self, token: &OAuthToken) -> Result<(), InfraError> {
        let formatted = serde_json::to_string_pretty(token)?;
        // Write beside the target, then rename, so a crash never leaves half a token file.
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, format!("{formatted}\n"))?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    token: Mutex<Option<OAuthToken>>,
}

impl InMemoryCredentialStore {
    pub fn with_token(token: OAuthToken) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn load(&self) -> Result<Option<OAuthToken>, InfraError> {
        let guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(guard.clone())
    }

    fn save(&self, token: &OAuthToken) -> Result<(), InfraError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = Some(token.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory credential store".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use tempfile::tempdir;

    fn sample_token() -> OAuthToken {
        OAuthToken {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: DateTime::<Utc>::from_timestamp(1_718_000_000, 0),
            token_type: "bearer".to_string(),
            scope: Some("offline read:workout".to_string()),
        }
    }

    #[test]
    fn file_store_returns_none_when_file_is_absent() {
        let dir = tempdir().expect("tempdir");
        let store = FileCredentialStore::new(dir.path().join("whoop-tokens.json"));
        assert!(store.load().expect("load").is_none());
    }

    #[test]
    fn file_store_round_trips_token() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("whoop-tokens.json");
        let store = FileCredentialStore::new(&path);

        store.save(&sample_token()).expect("save");
        assert_eq!(store.load().expect("load"), Some(sample_token()));
        assert!(!path.with_extension("json.tmp").exists());

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(raw["expires_at"], serde_json::json!(1_718_000_000));
        assert_eq!(raw["refresh_token"], serde_json::json!("refresh"));
    }

    #[test]
    fn file_store_reports_corrupt_token_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("whoop-tokens.json");
        fs::write(&path, "{ not json").expect("write");

        let error = FileCredentialStore::new(&path).load().expect_err("corrupt file");
        assert!(matches!(error, InfraError::Credential(_)));
    }
}
