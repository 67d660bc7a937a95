//! File records and wrapped key material.
//!
//! [`MetadataStore`] is the collaborator the pipelines talk to. The
//! production deployment may back it with a relational database;
//! [`JsonRecordStore`] keeps everything in one JSON file, loaded into memory
//! and flushed atomically (temp file + rename) after every change.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use cv_core::{CvError, CvResult, FileRecord};
use cv_crypto::{unwrap_key_material, wrap_key_material, KeyMaterial, MasterKey};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new record. Fails if `file_id` is already taken.
    async fn create_record(&self, record: &FileRecord) -> CvResult<()>;

    /// [`CvError::NotFound`] if there is no such record.
    async fn get_record(&self, file_id: &str) -> CvResult<FileRecord>;

    /// Records whose `expires_at` is at or before `now`.
    async fn list_expired(&self, now: u64) -> CvResult<Vec<FileRecord>>;

    /// Remove a record and the key material it references. Removing a
    /// missing record succeeds.
    async fn delete_record(&self, file_id: &str) -> CvResult<()>;

    async fn put_key(&self, key_ref: &str, material: &KeyMaterial) -> CvResult<()>;

    /// [`CvError::NotFound`] if no key material is stored under `key_ref`.
    async fn get_key(&self, key_ref: &str) -> CvResult<KeyMaterial>;

    /// Remove key material that no record references (an aborted store).
    async fn delete_key(&self, key_ref: &str) -> CvResult<()>;
}

/// On-disk layout of the JSON store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    records: BTreeMap<String, FileRecord>,
    /// key_ref → base64(wrapped key material)
    #[serde(default)]
    keys: BTreeMap<String, String>,
}

/// Single-file metadata store. Key material is only ever persisted wrapped
/// under the master key.
pub struct JsonRecordStore {
    path: Option<PathBuf>,
    master: MasterKey,
    state: Mutex<Snapshot>,
}

impl JsonRecordStore {
    /// Load the store at `path`, or start empty if the file does not exist.
    pub fn open(path: &Path, master: MasterKey) -> CvResult<Self> {
        let state = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                CvError::Metadata(format!("reading record store {}: {e}", path.display()))
            })?;
            serde_json::from_str(&content).map_err(|e| {
                CvError::Metadata(format!("parsing record store {}: {e}", path.display()))
            })?
        } else {
            Snapshot::default()
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            master,
            state: Mutex::new(state),
        })
    }

    /// A store that is never written to disk.
    pub fn in_memory(master: MasterKey) -> Self {
        Self {
            path: None,
            master,
            state: Mutex::new(Snapshot::default()),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Apply `change` to a copy of the state, persist it, then publish it.
    /// A failed flush leaves the in-memory state untouched.
    async fn update<F>(&self, change: F) -> CvResult<()>
    where
        F: FnOnce(&mut Snapshot) -> CvResult<()> + Send,
    {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        change(&mut next)?;

        if let Some(path) = &self.path {
            flush(path, &next).await?;
        }
        *state = next;
        Ok(())
    }
}

async fn flush(path: &Path, snapshot: &Snapshot) -> CvResult<()> {
    let io_err = |what: &str, p: &Path, e: std::io::Error| {
        CvError::Metadata(format!("{what} {}: {e}", p.display()))
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err("creating record store dir", parent, e))?;
        }
    }

    let json = serde_json::to_string_pretty(snapshot)
        .map_err(|e| CvError::Metadata(format!("serializing record store: {e}")))?;

    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, json)
        .await
        .map_err(|e| io_err("writing record store temp", &tmp_path, e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| io_err("renaming record store", path, e))?;

    debug!(path = %path.display(), records = snapshot.records.len(), "record store flushed");
    Ok(())
}

#[async_trait]
impl MetadataStore for JsonRecordStore {
    async fn create_record(&self, record: &FileRecord) -> CvResult<()> {
        let record = record.clone();
        self.update(move |s| {
            if s.records.contains_key(&record.file_id) {
                return Err(CvError::Metadata(format!(
                    "record already exists: {}",
                    record.file_id
                )));
            }
            s.records.insert(record.file_id.clone(), record);
            Ok(())
        })
        .await
    }

    async fn get_record(&self, file_id: &str) -> CvResult<FileRecord> {
        self.state
            .lock()
            .await
            .records
            .get(file_id)
            .cloned()
            .ok_or_else(|| CvError::NotFound(format!("file {file_id}")))
    }

    async fn list_expired(&self, now: u64) -> CvResult<Vec<FileRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .filter(|r| r.is_expired(now))
            .cloned()
            .collect())
    }

    async fn delete_record(&self, file_id: &str) -> CvResult<()> {
        let file_id = file_id.to_string();
        self.update(move |s| {
            if let Some(record) = s.records.remove(&file_id) {
                s.keys.remove(&record.key_ref);
            }
            Ok(())
        })
        .await
    }

    async fn put_key(&self, key_ref: &str, material: &KeyMaterial) -> CvResult<()> {
        let wrapped = STANDARD.encode(wrap_key_material(&self.master, material)?);
        let key_ref = key_ref.to_string();
        self.update(move |s| {
            s.keys.insert(key_ref, wrapped);
            Ok(())
        })
        .await
    }

    async fn get_key(&self, key_ref: &str) -> CvResult<KeyMaterial> {
        let encoded = self
            .state
            .lock()
            .await
            .keys
            .get(key_ref)
            .cloned()
            .ok_or_else(|| CvError::NotFound(format!("key material {key_ref}")))?;

        let wrapped = STANDARD
            .decode(encoded)
            .map_err(|e| CvError::Metadata(format!("corrupt wrapped key {key_ref}: {e}")))?;
        Ok(unwrap_key_material(&self.master, &wrapped)?)
    }

    async fn delete_key(&self, key_ref: &str) -> CvResult<()> {
        let key_ref = key_ref.to_string();
        self.update(move |s| {
            s.keys.remove(&key_ref);
            Ok(())
        })
        .await
    }
}
