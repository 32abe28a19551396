//! Stored artifact record and the lease rules shared by every store

use anky_utils::error::RepositoryError;
use anky_utils::types::{Artifact, ArtifactStatus, Lease};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An artifact plus the distinct statuses it has been saved with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ArtifactRecord {
    #[serde(flatten)]
    pub artifact: Artifact,
    #[serde(default)]
    pub status_history: Vec<ArtifactStatus>,
}

impl ArtifactRecord {
    pub fn new(artifact: Artifact) -> Self {
        Self {
            status_history: vec![artifact.status()],
            artifact,
        }
    }

    /// Replace the stored artifact. Returns whether anything changed.
    pub fn update(&mut self, artifact: &Artifact) -> bool {
        if self.artifact == *artifact {
            return false;
        }
        if self.status_history.last() != Some(&artifact.status()) {
            self.status_history.push(artifact.status());
        }
        self.artifact = artifact.clone();
        true
    }

    pub fn claim(
        &mut self,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let artifact = &mut self.artifact;
        if artifact.status().is_terminal() {
            return Err(RepositoryError::Terminal {
                artifact_id: artifact.id,
                status: artifact.status(),
            });
        }
        if let Some(lease) = artifact
            .lease
            .as_ref()
            .filter(|lease| lease.owner != owner && !lease.is_expired_at(now))
        {
            return Err(RepositoryError::LeaseHeld {
                artifact_id: artifact.id,
                owner: lease.owner.clone(),
            });
        }

        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| RepositoryError::Other(format!("lease ttl {ttl:?} is out of range")))?;
        let acquired_at = match &artifact.lease {
            Some(lease) if lease.owner == owner && !lease.is_expired_at(now) => lease.acquired_at,
            _ => now,
        };
        artifact.lease = Some(Lease {
            owner: owner.to_string(),
            acquired_at,
            expires_at: now + ttl,
        });
        Ok(())
    }

    /// Returns whether a lease was dropped.
    pub fn release(&mut self, owner: &str) -> bool {
        if self
            .artifact
            .lease
            .as_ref()
            .is_some_and(|lease| lease.owner == owner)
        {
            self.artifact.lease = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anky_utils::types::{UserId, WritingSession};

    fn record() -> ArtifactRecord {
        ArtifactRecord::new(Artifact::new(&WritingSession::start(UserId::new(), "p")))
    }

    #[test]
    fn renewal_keeps_acquisition_time() {
        let mut record = record();
        let t0 = Utc::now();
        record.claim("a", Duration::from_secs(10), t0).unwrap();
        let t1 = t0 + chrono::Duration::seconds(5);
        record.claim("a", Duration::from_secs(10), t1).unwrap();

        let lease = record.artifact.lease.unwrap();
        assert_eq!(lease.acquired_at, t0);
        assert_eq!(lease.expires_at, t1 + chrono::Duration::seconds(10));
    }

    #[test]
    fn serialized_record_reads_like_an_artifact() {
        let record = record();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "created");
        assert_eq!(json["status_history"][0], "created");
        let back: ArtifactRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
