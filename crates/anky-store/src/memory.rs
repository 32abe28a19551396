use anky_utils::error::RepositoryError;
use anky_utils::types::{
    Artifact, ArtifactId, ArtifactStatus, SessionId, SocialIdentity, UserId, WritingSession,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::record::ArtifactRecord;
use crate::{ArtifactRepository, SessionRepository, UserDirectory};

/// Process-local store. Every artifact mutation happens under one write lock,
/// which makes `claim` a compare-and-swap.
#[derive(Debug, Default)]
pub struct MemoryStore {
    artifacts: RwLock<HashMap<ArtifactId, ArtifactRecord>>,
    sessions: RwLock<HashMap<SessionId, WritingSession>>,
    identities: RwLock<HashMap<UserId, SocialIdentity>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn existing_for_session(
    artifacts: &HashMap<ArtifactId, ArtifactRecord>,
    artifact: &Artifact,
) -> Option<ArtifactId> {
    artifacts
        .values()
        .map(|record| &record.artifact)
        .find(|other| other.session_id == artifact.session_id && other.id != artifact.id)
        .map(|other| other.id)
}

#[async_trait]
impl ArtifactRepository for MemoryStore {
    async fn create(&self, artifact: &Artifact) -> Result<(), RepositoryError> {
        let mut artifacts = self.artifacts.write().await;
        let existing = artifacts
            .contains_key(&artifact.id)
            .then_some(artifact.id)
            .or_else(|| existing_for_session(&artifacts, artifact));
        if let Some(existing) = existing {
            return Err(RepositoryError::Duplicate {
                session_id: artifact.session_id,
                existing,
            });
        }
        artifacts.insert(artifact.id, ArtifactRecord::new(artifact.clone()));
        Ok(())
    }

    async fn save(&self, artifact: &Artifact) -> Result<bool, RepositoryError> {
        let mut artifacts = self.artifacts.write().await;
        if let Some(record) = artifacts.get_mut(&artifact.id) {
            return Ok(record.update(artifact));
        }
        if let Some(existing) = existing_for_session(&artifacts, artifact) {
            return Err(RepositoryError::Duplicate {
                session_id: artifact.session_id,
                existing,
            });
        }
        artifacts.insert(artifact.id, ArtifactRecord::new(artifact.clone()));
        Ok(true)
    }

    async fn get(&self, id: ArtifactId) -> Result<Artifact, RepositoryError> {
        self.artifacts
            .read()
            .await
            .get(&id)
            .map(|record| record.artifact.clone())
            .ok_or(RepositoryError::ArtifactNotFound(id))
    }

    async fn find_by_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<Artifact>, RepositoryError> {
        Ok(self
            .artifacts
            .read()
            .await
            .values()
            .find(|record| record.artifact.session_id == session_id)
            .map(|record| record.artifact.clone()))
    }

    async fn list_unfinished(&self) -> Result<Vec<Artifact>, RepositoryError> {
        let mut unfinished: Vec<Artifact> = self
            .artifacts
            .read()
            .await
            .values()
            .filter(|record| !record.artifact.status().is_terminal())
            .map(|record| record.artifact.clone())
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
        let mut artifacts = self.artifacts.write().await;
        let record = artifacts
            .get_mut(&id)
            .ok_or(RepositoryError::ArtifactNotFound(id))?;
        record.claim(owner, ttl, Utc::now())?;
        Ok(record.artifact.clone())
    }

    async fn release(&self, id: ArtifactId, owner: &str) -> Result<(), RepositoryError> {
        let mut artifacts = self.artifacts.write().await;
        let record = artifacts
            .get_mut(&id)
            .ok_or(RepositoryError::ArtifactNotFound(id))?;
        record.release(owner);
        Ok(())
    }

    async fn status_history(&self, id: ArtifactId) -> Result<Vec<ArtifactStatus>, RepositoryError> {
        self.artifacts
            .read()
            .await
            .get(&id)
            .map(|record| record.status_history.clone())
            .ok_or(RepositoryError::ArtifactNotFound(id))
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn get_session(&self, id: SessionId) -> Result<WritingSession, RepositoryError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::SessionNotFound(id))
    }

    async fn save_session(&self, session: &WritingSession) -> Result<(), RepositoryError> {
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn social_identity(
        &self,
        user_id: UserId,
    ) -> Result<Option<SocialIdentity>, RepositoryError> {
        Ok(self.identities.read().await.get(&user_id).cloned())
    }

    async fn link_identity(
        &self,
        user_id: UserId,
        identity: SocialIdentity,
    ) -> Result<(), RepositoryError> {
        self.identities.write().await.insert(user_id, identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_rejects_second_artifact() {
        contract::create_rejects_second_artifact(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        contract::save_is_idempotent(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_missing_artifact_is_not_found() {
        contract::missing_artifact_is_not_found(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        contract::claim_is_exclusive(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken() {
        contract::expired_lease_can_be_taken(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_terminal_artifact_cannot_be_claimed() {
        contract::terminal_artifact_cannot_be_claimed(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_unfinished_are_listed() {
        contract::unfinished_are_listed(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_sessions_and_identities() {
        contract::sessions_and_identities(&MemoryStore::new()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_have_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let artifact = Artifact::new(&contract::session());
        store.create(&artifact).await.unwrap();

        let mut tasks = Vec::new();
        for worker in 0..16 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store
                    .claim(artifact.id, &format!("worker-{worker}"), Duration::from_secs(60))
                    .await
                    .is_ok()
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
