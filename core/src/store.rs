/*
    spotify-export-rs | Rust CLI tool to export playlists and their tracks.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Credential store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Credential store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("Credential store lock was poisoned")]
    Poisoned,
}

/// Tokens and refresh bookkeeping persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub authorized: bool,
    #[serde(default)]
    pub last_refresh_epoch_seconds: Option<i64>,
}

impl CredentialRecord {
    /// A record for a freshly completed grant.
    pub fn authorized(access_token: String, refresh_token: String, now: i64) -> Self {
        Self {
            access_token: Some(access_token),
            refresh_token: Some(refresh_token),
            authorized: true,
            last_refresh_epoch_seconds: Some(now),
        }
    }

    /// `authorized` implies both tokens are non-empty and a refresh time is recorded.
    pub fn is_consistent(&self) -> bool {
        if !self.authorized {
            return true;
        }
        let filled = |t: &Option<String>| t.as_deref().is_some_and(|s| !s.is_empty());
        filled(&self.access_token)
            && filled(&self.refresh_token)
            && self.last_refresh_epoch_seconds.is_some()
    }
}

/// Persistence boundary for the credential record.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<CredentialRecord, StoreError>;
    fn save(&self, record: &CredentialRecord) -> Result<(), StoreError>;
}

/// Keeps the record in memory only. Used by tests and by callers that
/// handle persistence themselves.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    record: Mutex<CredentialRecord>,
}

impl MemoryCredentialStore {
    pub fn new(record: CredentialRecord) -> Self {
        Self {
            record: Mutex::new(record),
        }
    }

    pub fn snapshot(&self) -> CredentialRecord {
        self.record
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<CredentialRecord, StoreError> {
        self.record
            .lock()
            .map(|r| r.clone())
            .map_err(|_| StoreError::Poisoned)
    }

    fn save(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let mut guard = self.record.lock().map_err(|_| StoreError::Poisoned)?;
        *guard = record.clone();
        Ok(())
    }
}

/// JSON file store, similar in spirit to rspotify's token cache file.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<CredentialRecord, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(CredentialRecord::default()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(CredentialRecord::default()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn save(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let json = serde_json::to_string_pretty(record)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_record_is_consistent() {
        assert!(CredentialRecord::default().is_consistent());
    }

    #[test]
    fn test_authorized_record_requires_tokens_and_timestamp() {
        let good = CredentialRecord::authorized("a".into(), "r".into(), 10);
        assert!(good.is_consistent());

        let mut missing_refresh = good.clone();
        missing_refresh.refresh_token = Some(String::new());
        assert!(!missing_refresh.is_consistent());

        let mut missing_time = good;
        missing_time.last_refresh_epoch_seconds = None;
        assert!(!missing_time.is_consistent());
    }

    #[test]
    fn test_file_store_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("creds.json"));
        assert_eq!(store.load().unwrap(), CredentialRecord::default());
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("creds.json");
        let record = CredentialRecord::authorized("access".into(), "refresh".into(), 1_700_000_000);

        FileCredentialStore::new(&path).save(&record).unwrap();
        let loaded = FileCredentialStore::new(&path).load().unwrap();

        assert_eq!(loaded, record);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileCredentialStore::new(&path).load(),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryCredentialStore::default();
        let record = CredentialRecord::authorized("a".into(), "r".into(), 5);
        store.save(&record).unwrap();
        assert_eq!(store.snapshot(), record);
    }
}
