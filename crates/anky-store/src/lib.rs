//! Persistence for the anky pipeline
//!
//! Three narrow repositories, each a plain read/write surface:
//!
//! - [`ArtifactRepository`] - artifact records, their status history, and the
//!   per-artifact lease that keeps a second run off an artifact
//! - [`SessionRepository`] - writing sessions
//! - [`UserDirectory`] - linked social identities
//!
//! [`MemoryStore`] and [`FileStore`] implement all three.

mod file;
mod memory;
mod record;

pub use file::FileStore;
pub use memory::MemoryStore;

use anky_utils::error::RepositoryError;
use anky_utils::types::{
    Artifact, ArtifactId, ArtifactStatus, SessionId, SocialIdentity, UserId, WritingSession,
};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Insert a new artifact.
    ///
    /// Fails with `Duplicate` when the session already owns an artifact.
    async fn create(&self, artifact: &Artifact) -> Result<(), RepositoryError>;

    /// Upsert `artifact`. Returns `false` when the stored record was already
    /// identical and nothing was written.
    async fn save(&self, artifact: &Artifact) -> Result<bool, RepositoryError>;

    async fn get(&self, id: ArtifactId) -> Result<Artifact, RepositoryError>;

    async fn find_by_session(
        &self,
        session_id: SessionId,
    ) -> Result<Option<Artifact>, RepositoryError>;

    /// Artifacts not yet `completed` or `failed`, oldest first.
    async fn list_unfinished(&self) -> Result<Vec<Artifact>, RepositoryError>;

    /// Take the lease on `id` for `owner`.
    ///
    /// Succeeds when the artifact is unleased, its lease expired, or `owner`
    /// already holds it (the lease is then renewed). Fails with `LeaseHeld`
    /// when someone else holds a live lease and with `Terminal` once the
    /// artifact is finished. Returns the artifact as stored after the claim.
    async fn claim(
        &self,
        id: ArtifactId,
        owner: &str,
        ttl: Duration,
    ) -> Result<Artifact, RepositoryError>;

    /// Drop `owner`'s lease on `id`. A lease held by someone else is left alone.
    async fn release(&self, id: ArtifactId, owner: &str) -> Result<(), RepositoryError>;

    /// Distinct statuses persisted for `id`, in the order they were written.
    async fn status_history(&self, id: ArtifactId) -> Result<Vec<ArtifactStatus>, RepositoryError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get_session(&self, id: SessionId) -> Result<WritingSession, RepositoryError>;

    async fn save_session(&self, session: &WritingSession) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// The user's linked publishing identity, if any.
    async fn social_identity(
        &self,
        user_id: UserId,
    ) -> Result<Option<SocialIdentity>, RepositoryError>;

    async fn link_identity(
        &self,
        user_id: UserId,
        identity: SocialIdentity,
    ) -> Result<(), RepositoryError>;
}

/// Behaviour every repository implementation must share.
#[cfg(test)]
pub(crate) mod contract {
    use super::*;
    use anky_utils::types::Lease;
    use chrono::Utc;

    pub(crate) fn session() -> WritingSession {
        WritingSession::start(UserId::new(), "what is alive in you?")
    }

    pub(crate) async fn create_rejects_second_artifact(repo: &dyn ArtifactRepository) {
        let session = session();
        let first = Artifact::new(&session);
        repo.create(&first).await.unwrap();

        let second = Artifact::new(&session);
        let err = repo.create(&second).await.unwrap_err();
        assert!(
            matches!(err, RepositoryError::Duplicate { existing, .. } if existing == first.id)
        );
        // an upsert cannot sneak a second one in either
        assert!(repo.save(&second).await.is_err());

        let found = repo.find_by_session(session.id).await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert!(repo.find_by_session(SessionId::new()).await.unwrap().is_none());
    }

    pub(crate) async fn save_is_idempotent(repo: &dyn ArtifactRepository) {
        let mut artifact = Artifact::new(&session());
        repo.create(&artifact).await.unwrap();

        artifact.advance(ArtifactStatus::StartingProcessing).unwrap();
        assert!(repo.save(&artifact).await.unwrap());
        assert!(!repo.save(&artifact).await.unwrap());

        artifact.advance(ArtifactStatus::StartingProcessing).unwrap();
        assert!(!repo.save(&artifact).await.unwrap());

        artifact.reflection = "a story".into();
        assert!(repo.save(&artifact).await.unwrap());

        assert_eq!(
            repo.status_history(artifact.id).await.unwrap(),
            vec![ArtifactStatus::Created, ArtifactStatus::StartingProcessing]
        );
        assert_eq!(repo.get(artifact.id).await.unwrap(), artifact);
    }

    pub(crate) async fn missing_artifact_is_not_found(repo: &dyn ArtifactRepository) {
        let id = ArtifactId::new();
        assert!(matches!(
            repo.get(id).await.unwrap_err(),
            RepositoryError::ArtifactNotFound(missing) if missing == id
        ));
        assert!(matches!(
            repo.claim(id, "w", Duration::from_secs(5)).await.unwrap_err(),
            RepositoryError::ArtifactNotFound(_)
        ));
    }

    pub(crate) async fn claim_is_exclusive(repo: &dyn ArtifactRepository) {
        let artifact = Artifact::new(&session());
        repo.create(&artifact).await.unwrap();
        let ttl = Duration::from_secs(60);

        let claimed = repo.claim(artifact.id, "worker-a", ttl).await.unwrap();
        assert_eq!(claimed.lease.as_ref().unwrap().owner, "worker-a");

        // renewal by the holder
        repo.claim(artifact.id, "worker-a", ttl).await.unwrap();

        let err = repo.claim(artifact.id, "worker-b", ttl).await.unwrap_err();
        assert!(matches!(err, RepositoryError::LeaseHeld { ref owner, .. } if owner == "worker-a"));

        // a stranger's release does nothing
        repo.release(artifact.id, "worker-b").await.unwrap();
        assert!(repo.claim(artifact.id, "worker-b", ttl).await.is_err());

        repo.release(artifact.id, "worker-a").await.unwrap();
        assert!(repo.get(artifact.id).await.unwrap().lease.is_none());
        repo.claim(artifact.id, "worker-b", ttl).await.unwrap();
    }

    pub(crate) async fn expired_lease_can_be_taken(repo: &dyn ArtifactRepository) {
        let mut artifact = Artifact::new(&session());
        let now = Utc::now();
        artifact.lease = Some(Lease {
            owner: "crashed".into(),
            acquired_at: now - chrono::Duration::hours(2),
            expires_at: now - chrono::Duration::hours(1),
        });
        repo.create(&artifact).await.unwrap();

        let claimed = repo
            .claim(artifact.id, "recovery", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(claimed.lease.unwrap().owner, "recovery");
    }

    pub(crate) async fn terminal_artifact_cannot_be_claimed(repo: &dyn ArtifactRepository) {
        let mut artifact = Artifact::new(&session());
        repo.create(&artifact).await.unwrap();
        artifact.fail("boom");
        repo.save(&artifact).await.unwrap();

        let err = repo
            .claim(artifact.id, "w", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Terminal {
                status: ArtifactStatus::Failed,
                ..
            }
        ));
        assert!(repo.list_unfinished().await.unwrap().is_empty());
    }

    pub(crate) async fn unfinished_are_listed(repo: &dyn ArtifactRepository) {
        let a = Artifact::new(&session());
        let mut b = Artifact::new(&session());
        repo.create(&a).await.unwrap();
        repo.create(&b).await.unwrap();
        for next in &ArtifactStatus::SEQUENCE[1..] {
            b.advance(*next).unwrap();
        }
        repo.save(&b).await.unwrap();

        let unfinished = repo.list_unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, a.id);
        assert_eq!(
            repo.status_history(b.id).await.unwrap(),
            vec![ArtifactStatus::Created, ArtifactStatus::Completed]
        );
    }

    pub(crate) async fn sessions_and_identities<R>(repo: &R)
    where
        R: SessionRepository + UserDirectory,
    {
        let mut session = session();
        assert!(matches!(
            repo.get_session(session.id).await.unwrap_err(),
            RepositoryError::SessionNotFound(_)
        ));
        repo.save_session(&session).await.unwrap();
        session.artifact_id = Some(ArtifactId::new());
        repo.save_session(&session).await.unwrap();
        assert_eq!(repo.get_session(session.id).await.unwrap(), session);

        assert!(repo.social_identity(session.user_id).await.unwrap().is_none());
        let identity = SocialIdentity {
            signer_uuid: "signer".into(),
            fid: Some(7),
        };
        repo.link_identity(session.user_id, identity.clone())
            .await
            .unwrap();
        assert_eq!(
            repo.social_identity(session.user_id).await.unwrap(),
            Some(identity)
        );
    }
}
