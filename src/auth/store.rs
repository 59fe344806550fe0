use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::credential::Credential;
use super::error::AuthError;

/// Secure persistence for the controller's credential.
pub trait CredentialStore: Send + Sync {
    fn retrieve(&self, identifier: &str) -> Result<Option<Credential>, AuthError>;
    fn store(&self, credential: &Credential, identifier: &str) -> Result<(), AuthError>;
    fn clear(&self, identifier: &str) -> Result<(), AuthError>;
}

/// File-backed credential store using one TOML file per identifier.
///
/// # Example
/// ```no_run
/// use courier::auth::{Credential, CredentialStore, FileCredentialStore};
///
/// let store = FileCredentialStore::new_default();
/// store.store(&Credential::bearer("access"), "courier:api.example.com")?;
/// # Ok::<(), courier::auth::AuthError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    base_dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn new_default() -> Self {
        Self {
            base_dir: default_courier_dir(),
        }
    }

    fn credential_path(&self, identifier: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.toml", normalize_label(identifier)))
    }

    fn ensure_parent(path: &Path) -> Result<(), AuthError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn retrieve(&self, identifier: &str) -> Result<Option<Credential>, AuthError> {
        let path = self.credential_path(identifier);
        let raw = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AuthError::Io(err.to_string())),
        };
        let file: CredentialFile = toml::from_str(&raw)?;
        Ok(Some(file.credential))
    }

    fn store(&self, credential: &Credential, identifier: &str) -> Result<(), AuthError> {
        let path = self.credential_path(identifier);
        Self::ensure_parent(&path)?;
        let file = CredentialFile {
            version: 1,
            identifier: identifier.to_string(),
            saved_at: Utc::now(),
            credential: credential.clone(),
        };
        let serialized = toml::to_string(&file)?;
        fs::write(&path, serialized)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn clear(&self, identifier: &str) -> Result<(), AuthError> {
        let path = self.credential_path(identifier);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AuthError::Io(err.to_string())),
        }
    }
}

/// In-process store, mostly for tests and short-lived tools.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn retrieve(&self, identifier: &str) -> Result<Option<Credential>, AuthError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(identifier).cloned())
    }

    fn store(&self, credential: &Credential, identifier: &str) -> Result<(), AuthError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier.to_string(), credential.clone());
        Ok(())
    }

    fn clear(&self, identifier: &str) -> Result<(), AuthError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identifier);
        Ok(())
    }
}

// `credential` goes last: TOML requires tables after plain values.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialFile {
    version: u32,
    identifier: String,
    saved_at: DateTime<Utc>,
    credential: Credential,
}

pub(crate) fn default_courier_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".courier"))
        .unwrap_or_else(|| PathBuf::from(".courier"))
}

fn normalize_label(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "default".to_string();
    }
    let mut out = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() || lower == '-' || lower == '.' {
            out.push(lower);
        } else {
            out.push('-');
        }
    }
    if out.trim_matches(|c| c == '-' || c == '.').is_empty() {
        "default".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, FileCredentialStore) {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn credential_round_trip_works() {
        let (_dir, store) = temp_store();
        let expiry = Utc::now() + Duration::hours(1);
        let credential = Credential::bearer("access")
            .with_refresh_token("refresh")
            .with_expires_at(expiry);
        store.store(&credential, "courier:api.example.com").unwrap();
        let loaded = store.retrieve("courier:api.example.com").unwrap().unwrap();
        assert_eq!(loaded.access_token.as_deref(), Some("access"));
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(loaded.expires_at.map(|e| e.timestamp()), Some(expiry.timestamp()));
    }

    #[test]
    fn missing_identifier_returns_none() {
        let (_dir, store) = temp_store();
        assert!(store.retrieve("nothing-here").unwrap().is_none());
    }

    #[test]
    fn clear_removes_credential() {
        let (_dir, store) = temp_store();
        store.store(&Credential::basic("u", "p"), "svc").unwrap();
        store.clear("svc").unwrap();
        assert!(store.retrieve("svc").unwrap().is_none());
        store.clear("svc").unwrap();
    }

    #[test]
    fn labels_are_filesystem_safe() {
        assert_eq!(normalize_label("courier:API.example.com"), "courier-api.example.com");
        assert_eq!(normalize_label("  "), "default");
        assert_eq!(normalize_label("../"), "default");
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryCredentialStore::new();
        store.store(&Credential::bearer("t"), "id").unwrap();
        assert_eq!(
            store.retrieve("id").unwrap().and_then(|c| c.access_token),
            Some("t".to_string())
        );
        store.clear("id").unwrap();
        assert!(store.retrieve("id").unwrap().is_none());
    }
}
