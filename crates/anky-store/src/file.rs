//! JSON-file store
//!
//! Layout under the store directory:
//!
//! ```text
//! artifacts/<artifact-id>.json   artifact + status history
//! sessions/<session-id>.json     writing session
//! users/<user-id>.json           linked identity
//! ```
//!
//! Every write is atomic (temp file, fsync, rename). Read-modify-write
//! operations run under one in-process mutex, so `claim` is a
//! compare-and-swap for all tasks sharing a `FileStore`. Separate processes
//! pointed at the same directory are not coordinated.

use anky_utils::atomic_write::write_file_atomic_if_changed;
use anky_utils::error::RepositoryError;
use anky_utils::types::{
    Artifact, ArtifactId, ArtifactStatus, SessionId, SocialIdentity, UserId, WritingSession,
};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::record::ArtifactRecord;
use crate::{ArtifactRepository, SessionRepository, UserDirectory};

const ARTIFACTS_DIR: &str = "artifacts";
const SESSIONS_DIR: &str = "sessions";
const USERS_DIR: &str = "users";

#[derive(Debug, Default, Serialize, Deserialize)]
struct UserRecord {
    #[serde(default)]
    social_identity: Option<SocialIdentity>,
}

#[derive(Debug)]
pub struct FileStore {
    root: Utf8PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Fails if `dir` is not valid UTF-8 or the directories cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let root = Utf8PathBuf::from_path_buf(dir.as_ref().to_path_buf()).map_err(|path| {
            RepositoryError::Other(format!("store directory {} is not UTF-8", path.display()))
        })?;
        for sub in [ARTIFACTS_DIR, SESSIONS_DIR, USERS_DIR] {
            fs::create_dir_all(root.join(sub))?;
        }
        debug!(root = %root, "File store opened");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn record_path(&self, dir: &str, id: impl std::fmt::Display) -> Utf8PathBuf {
        self.root.join(dir).join(format!("{id}.json"))
    }

    fn artifact_path(&self, id: ArtifactId) -> Utf8PathBuf {
        self.record_path(ARTIFACTS_DIR, id)
    }

    fn read_record(&self, id: ArtifactId) -> Result<Option<ArtifactRecord>, RepositoryError> {
        read_json(&self.artifact_path(id))
    }

    fn load_record(&self, id: ArtifactId) -> Result<ArtifactRecord, RepositoryError> {
        self.read_record(id)?
            .ok_or(RepositoryError::ArtifactNotFound(id))
    }

    fn write_record(&self, record: &ArtifactRecord) -> Result<bool, RepositoryError> {
        write_json(&self.artifact_path(record.artifact.id), record)
    }

    /// Every artifact record on disk. Unreadable files are skipped with a warning.
    fn all_records(&self) -> Result<Vec<ArtifactRecord>, RepositoryError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(self.root.join(ARTIFACTS_DIR))? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Ok(path) = Utf8PathBuf::from_path_buf(path) else {
                continue;
            };
            match read_json::<ArtifactRecord>(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(path = %path, error = %e, "Skipping unreadable artifact record"),
            }
        }
        Ok(records)
    }

    fn existing_for_session(
        &self,
        artifact: &Artifact,
    ) -> Result<Option<ArtifactId>, RepositoryError> {
        Ok(self
            .all_records()?
            .into_iter()
            .map(|record| record.artifact)
            .find(|other| other.session_id == artifact.session_id && other.id != artifact.id)
            .map(|other| other.id))
    }
}

fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<Option<T>, RepositoryError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<bool, RepositoryError> {
    let mut content = serde_json::to_vec_pretty(value)?;
    content.push(b'\n');
    write_file_atomic_if_changed(path, &content)
        .map_err(|e| RepositoryError::Other(format!("{e:#}")))
}

#[async_trait]
impl ArtifactRepository for FileStore {
    async fn create(&self, artifact: &Artifact) -> Result<(), RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let existing = match self.read_record(artifact.id)? {
            Some(_) => Some(artifact.id),
            None => self.existing_for_session(artifact)?,
        };
        if let Some(existing) = existing {
            return Err(RepositoryError::Duplicate {
                session_id: artifact.session_id,
                existing,
            });
        }
        self.write_record(&ArtifactRecord::new(artifact.clone()))?;
        Ok(())
    }

    async fn save(&self, artifact: &Artifact) -> Result<bool, RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let record = match self.read_record(artifact.id)? {
            Some(mut record) => {
                if !record.update(artifact) {
                    return Ok(false);
                }
                record
            }
            None => {
                if let Some(existing) = self.existing_for_session(artifact)? {
                    return Err(RepositoryError::Duplicate {
                        session_id: artifact.session_id,
                        existing,
                    });
                }
                ArtifactRecord::new(artifact.clone())
            }
        };
        self.write_record(&record)
    }

    async fn get(&self, id: ArtifactId) -> Result<Artifact, RepositoryError> {
        Ok(self.load_record(id)?.artifact)
    }

    async fn find_by_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<Artifact>, RepositoryError> {
        Ok(self
            .all_records()?
            .into_iter()
            .map(|record| record.artifact)
            .find(|artifact| artifact.session_id == session_id))
    }

    async fn list_unfinished(&self) -> Result<Vec<Artifact>, RepositoryError> {
        let mut unfinished: Vec<Artifact> = self
            .all_records()?
            .into_iter()
            .map(|record| record.artifact)
            .filter(|artifact| !artifact.status().is_terminal())
            .collect();
        unfinished.sort_by_key(|artifact| artifact.created_at);
        Ok(unfinished)
    }

    async fn claim(
        &self,
        id: ArtifactId,
        owner: &str,
        ttl: Duration,
    ) -> Result<Artifact, RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load_record(id)?;
        record.claim(owner, ttl, Utc::now())?;
        self.write_record(&record)?;
        Ok(record.artifact)
    }

    async fn release(&self, id: ArtifactId, owner: &str) -> Result<(), RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load_record(id)?;
        if record.release(owner) {
            self.write_record(&record)?;
        }
        Ok(())
    }

    async fn status_history(&self, id: ArtifactId) -> Result<Vec<ArtifactStatus>, RepositoryError> {
        Ok(self.load_record(id)?.status_history)
    }
}

#[async_trait]
impl SessionRepository for FileStore {
    async fn get_session(&self, id: SessionId) -> Result<WritingSession, RepositoryError> {
        read_json(&self.record_path(SESSIONS_DIR, id))?.ok_or(RepositoryError::SessionNotFound(id))
    }

    async fn save_session(&self, session: &WritingSession) -> Result<(), RepositoryError> {
        let _guard = self.write_lock.lock().await;
        write_json(&self.record_path(SESSIONS_DIR, session.id), session)?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for FileStore {
    async fn social_identity(
        &self,
        user_id: UserId,
    ) -> Result<Option<SocialIdentity>, RepositoryError> {
        Ok(read_json::<UserRecord>(&self.record_path(USERS_DIR, user_id))?
            .and_then(|user| user.social_identity))
    }

    async fn link_identity(
        &self,
        user_id: UserId,
        identity: SocialIdentity,
    ) -> Result<(), RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(USERS_DIR, user_id);
        let mut user = read_json::<UserRecord>(&path)?.unwrap_or_default();
        user.social_identity = Some(identity);
        write_json(&path, &user)?;
        Ok(())
    }
}
