use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use super::domain::{
    Challenge, EntityFilter, Municipality, MunicipalityId, Partnership, Pilot, ScoreSnapshot,
    SnapshotId,
};

/// Snapshot plus the "current" municipality fields it must be committed with.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotCommit {
    pub snapshot: ScoreSnapshot,
    pub active_pilots: u32,
    pub completed_pilots: u32,
}

/// Result of an upsert keyed by (municipality, as_of).
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedSnapshot {
    pub snapshot: ScoreSnapshot,
    /// The municipality's stored rank once the commit has been applied.
    pub rank: Option<u32>,
    /// `false` when a snapshot already existed for the same as-of timestamp.
    pub created: bool,
}

/// Opaque entity store queried by simple filters.
///
/// `commit_snapshot` must be all-or-nothing: the snapshot and the municipality's
/// current fields are written together or not at all. A commit that moves a
/// current score also re-ranks every active municipality in the same write.
pub trait EntityStore: Send + Sync {
    fn list_municipalities(
        &self,
        filter: &EntityFilter,
    ) -> impl Future<Output = Result<Vec<Municipality>, StoreError>> + Send;

    fn list_challenges(
        &self,
        filter: &EntityFilter,
    ) -> impl Future<Output = Result<Vec<Challenge>, StoreError>> + Send;

    fn list_pilots(
        &self,
        filter: &EntityFilter,
    ) -> impl Future<Output = Result<Vec<Pilot>, StoreError>> + Send;

    fn list_partnerships(
        &self,
        filter: &EntityFilter,
    ) -> impl Future<Output = Result<Vec<Partnership>, StoreError>> + Send;

    /// Snapshots for one municipality, ascending by `as_of`.
    fn score_history(
        &self,
        municipality_id: &MunicipalityId,
    ) -> impl Future<Output = Result<Vec<ScoreSnapshot>, StoreError>> + Send;

    /// Most recent snapshot of each listed municipality that has one.
    fn latest_snapshots(
        &self,
        municipality_ids: &[MunicipalityId],
    ) -> impl Future<Output = Result<Vec<ScoreSnapshot>, StoreError>> + Send;

    fn commit_snapshot(
        &self,
        commit: SnapshotCommit,
    ) -> impl Future<Output = Result<CommittedSnapshot, StoreError>> + Send;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("entity store unavailable: {0}")]
    Unavailable(String),
    #[error("entity store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("municipality {0} not found")]
    NotFound(MunicipalityId),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::NotFound(_))
    }
}

/// Emitted once a recalculation has been committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRecalculated {
    pub municipality_id: MunicipalityId,
    pub snapshot_id: SnapshotId,
    pub overall_score: f64,
    pub rank: Option<u32>,
    pub as_of: DateTime<Utc>,
    pub created: bool,
}

/// Outbound hook for downstream read paths (view caches, notifications).
pub trait RecalculationPublisher: Send + Sync {
    fn publish(&self, event: ScoreRecalculated) -> Result<(), PublishError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("event transport unavailable: {0}")]
    Transport(String),
}

/// Fan-out publisher; read paths call [`BroadcastPublisher::subscribe`].
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<ScoreRecalculated>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScoreRecalculated> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(64)
    }
}

impl RecalculationPublisher for BroadcastPublisher {
    fn publish(&self, event: ScoreRecalculated) -> Result<(), PublishError> {
        let municipality_id = event.municipality_id.clone();
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!(%municipality_id, receivers, "recalculation event broadcast");
            }
            Err(_) => {
                debug!(%municipality_id, "recalculation event dropped; no subscribers");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> ScoreRecalculated {
        ScoreRecalculated {
            municipality_id: MunicipalityId::new("abha"),
            snapshot_id: SnapshotId::generate(),
            overall_score: 50.0,
            rank: Some(1),
            as_of: Utc::now(),
            created: true,
        }
    }

    #[test]
    fn broadcast_without_subscribers_is_not_an_error() {
        let publisher = BroadcastPublisher::default();
        assert!(publisher.publish(event()).is_ok());
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let publisher = BroadcastPublisher::new(4);
        let mut receiver = publisher.subscribe();
        let sent = event();
        publisher.publish(sent.clone()).expect("publish succeeds");
        let received = receiver.recv().await.expect("event delivered");
        assert_eq!(received, sent);
    }

    #[test]
    fn not_found_is_not_transient() {
        assert!(!StoreError::NotFound(MunicipalityId::new("x")).is_transient());
        assert!(StoreError::Unavailable("down".to_string()).is_transient());
        assert!(StoreError::Timeout(Duration::from_millis(5)).is_transient());
    }
}
