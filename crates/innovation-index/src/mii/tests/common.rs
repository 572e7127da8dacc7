use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::mii::domain::{
    Challenge, ChallengeStatus, CityType, DisplayName, EntityFilter, Municipality, MunicipalityId,
    Partnership, PartnershipStatus, Pilot, PilotStage, ScoreSnapshot,
};
use crate::mii::memory::InMemoryEntityStore;
use crate::mii::repository::{
    CommittedSnapshot, EntityStore, PublishError, RecalculationPublisher, ScoreRecalculated,
    SnapshotCommit, StoreError,
};
use crate::mii::service::{MiiService, RetryPolicy};

pub(super) fn id(value: &str) -> MunicipalityId {
    MunicipalityId::new(value)
}

pub(super) fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn municipality(value: &str, region: &str, city_type: CityType) -> Municipality {
    Municipality {
        id: id(value),
        name: DisplayName {
            en: value.to_string(),
            ar: format!("بلدية {value}"),
        },
        region: region.to_string(),
        city_type,
        population: 250_000,
        mii_score: None,
        mii_rank: None,
        latest_snapshot_id: None,
        active_pilots: 0,
        completed_pilots: 0,
        is_active: true,
        is_deleted: false,
    }
}

pub(super) fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        store_timeout: Duration::from_millis(50),
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
    }
}

/// Adds challenges, pilots, and partnerships with the given status mix.
pub(super) struct Portfolio {
    pub(super) open_challenges: usize,
    pub(super) resolved_challenges: usize,
    pub(super) active_pilots: usize,
    pub(super) completed_pilots: usize,
    pub(super) active_partnerships: usize,
}

pub(super) fn seed_portfolio(store: &InMemoryEntityStore, owner: &str, portfolio: Portfolio) {
    let owner_id = id(owner);
    let challenges = std::iter::repeat(ChallengeStatus::Open)
        .take(portfolio.open_challenges)
        .chain(std::iter::repeat(ChallengeStatus::Resolved).take(portfolio.resolved_challenges));
    for (index, status) in challenges.enumerate() {
        store.insert_challenge(Challenge {
            id: format!("{owner}-challenge-{index}"),
            municipality_id: owner_id.clone(),
            status,
            is_deleted: false,
        });
    }

    let pilots = std::iter::repeat(PilotStage::Active)
        .take(portfolio.active_pilots)
        .chain(std::iter::repeat(PilotStage::Completed).take(portfolio.completed_pilots));
    for (index, stage) in pilots.enumerate() {
        store.insert_pilot(Pilot {
            id: format!("{owner}-pilot-{index}"),
            municipality_id: owner_id.clone(),
            stage,
            is_deleted: false,
        });
    }

    for index in 0..portfolio.active_partnerships {
        store.insert_partnership(Partnership {
            id: format!("{owner}-partnership-{index}"),
            municipality_id: owner_id.clone(),
            status: PartnershipStatus::Active,
            is_deleted: false,
        });
    }
}

/// Pilots [3 completed, 2 active], challenges [5 open, 1 resolved], partnerships [2 active].
pub(super) fn reference_portfolio() -> Portfolio {
    Portfolio {
        open_challenges: 5,
        resolved_challenges: 1,
        active_pilots: 2,
        completed_pilots: 3,
        active_partnerships: 2,
    }
}

pub(super) fn scenario_store() -> InMemoryEntityStore {
    let store = InMemoryEntityStore::default();
    store.insert_municipality(municipality("abha", "Asir", CityType::City));
    store.insert_municipality(municipality("jeddah", "Makkah", CityType::MajorCity));
    store.insert_municipality(municipality("taif", "Makkah", CityType::City));
    seed_portfolio(&store, "abha", reference_portfolio());
    seed_portfolio(
        &store,
        "jeddah",
        Portfolio {
            open_challenges: 9,
            resolved_challenges: 4,
            active_pilots: 5,
            completed_pilots: 6,
            active_partnerships: 5,
        },
    );
    seed_portfolio(
        &store,
        "taif",
        Portfolio {
            open_challenges: 2,
            resolved_challenges: 0,
            active_pilots: 1,
            completed_pilots: 0,
            active_partnerships: 0,
        },
    );
    store
}

pub(super) type TestService<S> = MiiService<S, RecordingPublisher>;

pub(super) fn build_service<S: EntityStore + 'static>(
    store: S,
) -> (TestService<S>, Arc<S>, Arc<RecordingPublisher>) {
    let store = Arc::new(store);
    let publisher = Arc::new(RecordingPublisher::default());
    let service = MiiService::new(store.clone(), publisher.clone(), fast_policy());
    (service, store, publisher)
}

#[derive(Default, Clone)]
pub(super) struct RecordingPublisher {
    events: Arc<Mutex<Vec<ScoreRecalculated>>>,
}

impl RecordingPublisher {
    pub(super) fn events(&self) -> Vec<ScoreRecalculated> {
        self.events.lock().expect("publisher mutex poisoned").clone()
    }
}

impl RecalculationPublisher for RecordingPublisher {
    fn publish(&self, event: ScoreRecalculated) -> Result<(), PublishError> {
        self.events
            .lock()
            .expect("publisher mutex poisoned")
            .push(event);
        Ok(())
    }
}

pub(super) struct FailingPublisher;

impl RecalculationPublisher for FailingPublisher {
    fn publish(&self, _event: ScoreRecalculated) -> Result<(), PublishError> {
        Err(PublishError::Transport("broker offline".to_string()))
    }
}

pub(super) struct UnavailableStore;

impl EntityStore for UnavailableStore {
    async fn list_municipalities(
        &self,
        _filter: &EntityFilter,
    ) -> Result<Vec<Municipality>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    async fn list_challenges(&self, _filter: &EntityFilter) -> Result<Vec<Challenge>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    async fn list_pilots(&self, _filter: &EntityFilter) -> Result<Vec<Pilot>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    async fn list_partnerships(
        &self,
        _filter: &EntityFilter,
    ) -> Result<Vec<Partnership>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    async fn score_history(
        &self,
        _municipality_id: &MunicipalityId,
    ) -> Result<Vec<ScoreSnapshot>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    async fn latest_snapshots(
        &self,
        _municipality_ids: &[MunicipalityId],
    ) -> Result<Vec<ScoreSnapshot>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    async fn commit_snapshot(
        &self,
        _commit: SnapshotCommit,
    ) -> Result<CommittedSnapshot, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Fault {
    /// `list_pilots` hangs past every timeout.
    HangOnFetch,
    /// `commit_snapshot` hangs past every timeout before reaching the store.
    HangOnCommit,
    /// `list_pilots` fails this many times, then recovers.
    FailPilots(u32),
    /// `score_history` comes back newest-first.
    ReversedHistory,
    /// `commit_snapshot` reports the municipality as gone.
    MissingOnCommit,
}

/// Wraps the in-memory store and injects a single fault.
pub(super) struct FaultyStore {
    pub(super) inner: InMemoryEntityStore,
    fault: Fault,
    calls: AtomicU32,
    commit_calls: AtomicU32,
}

impl FaultyStore {
    pub(super) fn new(inner: InMemoryEntityStore, fault: Fault) -> Self {
        Self {
            inner,
            fault,
            calls: AtomicU32::new(0),
            commit_calls: AtomicU32::new(0),
        }
    }

    pub(super) fn pilot_calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub(super) fn commit_calls(&self) -> u32 {
        self.commit_calls.load(Ordering::SeqCst)
    }
}

const HANG: Duration = Duration::from_secs(3_600);

impl EntityStore for FaultyStore {
    async fn list_municipalities(
        &self,
        filter: &EntityFilter,
    ) -> Result<Vec<Municipality>, StoreError> {
        self.inner.list_municipalities(filter).await
    }

    async fn list_challenges(&self, filter: &EntityFilter) -> Result<Vec<Challenge>, StoreError> {
        self.inner.list_challenges(filter).await
    }

    async fn list_pilots(&self, filter: &EntityFilter) -> Result<Vec<Pilot>, StoreError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.fault {
            Fault::HangOnFetch => {
                tokio::time::sleep(HANG).await;
                self.inner.list_pilots(filter).await
            }
            Fault::FailPilots(failures) if call <= failures => {
                Err(StoreError::Unavailable(format!("pilot table locked (call {call})")))
            }
            _ => self.inner.list_pilots(filter).await,
        }
    }

    async fn list_partnerships(
        &self,
        filter: &EntityFilter,
    ) -> Result<Vec<Partnership>, StoreError> {
        self.inner.list_partnerships(filter).await
    }

    async fn score_history(
        &self,
        municipality_id: &MunicipalityId,
    ) -> Result<Vec<ScoreSnapshot>, StoreError> {
        let mut history = self.inner.score_history(municipality_id).await?;
        if self.fault == Fault::ReversedHistory {
            history.reverse();
        }
        Ok(history)
    }

    async fn latest_snapshots(
        &self,
        municipality_ids: &[MunicipalityId],
    ) -> Result<Vec<ScoreSnapshot>, StoreError> {
        self.inner.latest_snapshots(municipality_ids).await
    }

    async fn commit_snapshot(
        &self,
        commit: SnapshotCommit,
    ) -> Result<CommittedSnapshot, StoreError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        match self.fault {
            Fault::HangOnCommit => tokio::time::sleep(HANG).await,
            Fault::MissingOnCommit => {
                return Err(StoreError::NotFound(commit.snapshot.municipality_id));
            }
            _ => {}
        }
        self.inner.commit_snapshot(commit).await
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

pub(super) fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
