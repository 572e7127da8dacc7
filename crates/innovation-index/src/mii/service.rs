use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::aggregator::{
    aggregate, aggregate_counts, EntityCounts, RelatedEntities, FORMULA_VERSION,
};
use super::domain::{EntityFilter, Municipality, MunicipalityId, ScoreSnapshot, SnapshotId};
use super::insights::derive_insights;
use super::repository::{
    EntityStore, RecalculationPublisher, ScoreRecalculated, SnapshotCommit, StoreError,
};
use super::scoring::{rank_municipalities, rank_of, DimensionScores, NationalStats};
use super::trend::{analyze, yearly_points, InvalidSeriesError, TrendAnalysis};
use super::views::{MiiView, RankingEntry};

/// Timeout and exponential backoff applied to every entity-store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub store_timeout: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(2),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Lifecycle of a single recalculation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecalculationStage {
    Requested,
    Fetching,
    Aggregating,
    Scoring,
    Persisting,
    Completed,
    Failed,
}

impl RecalculationStage {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

struct StageTracker<'a> {
    municipality_id: &'a MunicipalityId,
    trail: Vec<RecalculationStage>,
}

impl<'a> StageTracker<'a> {
    fn new(municipality_id: &'a MunicipalityId) -> Self {
        debug!(%municipality_id, stage = ?RecalculationStage::Requested, "recalculation stage");
        Self {
            municipality_id,
            trail: vec![RecalculationStage::Requested],
        }
    }

    fn current(&self) -> RecalculationStage {
        self.trail
            .last()
            .copied()
            .unwrap_or(RecalculationStage::Requested)
    }

    fn advance(&mut self, next: RecalculationStage) {
        debug_assert!(!self.current().is_terminal());
        debug!(
            municipality_id = %self.municipality_id,
            from = ?self.current(),
            stage = ?next,
            "recalculation stage"
        );
        self.trail.push(next);
    }

    fn fail(&mut self, err: &MiiError) {
        let failed_during = self.current();
        match err {
            MiiError::Computation { .. } => error!(
                municipality_id = %self.municipality_id,
                stage = ?failed_during,
                error = %err,
                "recalculation failed"
            ),
            _ => warn!(
                municipality_id = %self.municipality_id,
                stage = ?failed_during,
                error = %err,
                "recalculation failed"
            ),
        }
        self.trail.push(RecalculationStage::Failed);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecalculationOutcome {
    pub municipality_id: MunicipalityId,
    pub snapshot_id: SnapshotId,
    pub overall_score: f64,
    pub rank: Option<u32>,
    pub as_of: DateTime<Utc>,
    /// `false` when a retry found the snapshot for this as-of already committed.
    pub created: bool,
    pub stages: Vec<RecalculationStage>,
}

struct RecalculationInputs {
    municipality: Municipality,
    related: RelatedEntities,
    ranked_pool: Vec<Municipality>,
}

/// Scores, ranks, and persists Municipal Innovation Index snapshots.
pub struct MiiService<S, P> {
    store: Arc<S>,
    publisher: Arc<P>,
    policy: RetryPolicy,
    locks: LockRegistry,
}

impl<S, P> MiiService<S, P>
where
    S: EntityStore + 'static,
    P: RecalculationPublisher + 'static,
{
    pub fn new(store: Arc<S>, publisher: Arc<P>, policy: RetryPolicy) -> Self {
        Self {
            store,
            publisher,
            policy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Recalculate as of now.
    pub async fn recalculate(
        &self,
        municipality_id: &MunicipalityId,
    ) -> Result<RecalculationOutcome, MiiError> {
        self.recalculate_as_of(municipality_id, Utc::now()).await
    }

    /// Recalculate for an explicit as-of timestamp. Retrying with the same
    /// timestamp never creates a second snapshot.
    pub async fn recalculate_as_of(
        &self,
        municipality_id: &MunicipalityId,
        as_of: DateTime<Utc>,
    ) -> Result<RecalculationOutcome, MiiError> {
        let lease = self.lease_lock(municipality_id);
        let _serialized = lease.lock.lock().await;

        let mut tracker = StageTracker::new(municipality_id);
        match self.run_recalculation(municipality_id, as_of, &mut tracker).await {
            Ok(mut outcome) => {
                tracker.advance(RecalculationStage::Completed);
                outcome.stages = tracker.trail;
                info!(
                    %municipality_id,
                    overall_score = outcome.overall_score,
                    rank = ?outcome.rank,
                    snapshot_id = %outcome.snapshot_id,
                    created = outcome.created,
                    "municipal innovation index recalculated"
                );
                self.notify(&outcome);
                Ok(outcome)
            }
            Err(err) => {
                tracker.fail(&err);
                Err(err)
            }
        }
    }

    /// Recalculate every active municipality concurrently.
    pub async fn recalculate_all(
        self: &Arc<Self>,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<(MunicipalityId, Result<RecalculationOutcome, MiiError>)>, MiiError> {
        let filter = EntityFilter::active_municipalities();
        let store = &*self.store;
        let filter_ref = &filter;
        let municipalities = self
            .call_store("list_municipalities", move || {
                store.list_municipalities(filter_ref)
            })
            .await?;

        let handles: Vec<_> = municipalities
            .into_iter()
            .map(|municipality| {
                let service = Arc::clone(self);
                let id = municipality.id;
                let task_id = id.clone();
                let handle =
                    tokio::spawn(async move { service.recalculate_as_of(&task_id, as_of).await });
                (id, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_error) => Err(MiiError::Computation {
                    municipality_id: id.clone(),
                    reason: format!("recalculation task aborted: {join_error}"),
                }),
            };
            results.push((id, result));
        }
        Ok(results)
    }

    /// Drill-down view. Never waits on an in-flight recalculation.
    pub async fn view(&self, municipality_id: &MunicipalityId) -> Result<MiiView, MiiError> {
        let inputs = self.fetch_inputs(municipality_id).await?;

        let store = &*self.store;
        let history = self
            .call_store("score_history", move || store.score_history(municipality_id))
            .await?;

        let pool_ids: Vec<MunicipalityId> = inputs
            .ranked_pool
            .iter()
            .map(|municipality| municipality.id.clone())
            .collect();
        let pool_ids_ref = pool_ids.as_slice();
        let latest = self
            .call_store("latest_snapshots", move || {
                store.latest_snapshots(pool_ids_ref)
            })
            .await?;

        let dimensions = aggregate(&inputs.municipality, &inputs.related);
        let national = NationalStats::from_snapshots(&latest);
        let committed_scores = committed_scores(&inputs.ranked_pool);
        let rank = if inputs.municipality.is_rankable() {
            rank_of(&committed_scores, municipality_id)
        } else {
            None
        };

        let trend = self.trend_for(municipality_id, &history)?;
        let insights = derive_insights(&dimensions, national.as_ref());

        Ok(MiiView::assemble(
            &inputs.municipality,
            dimensions,
            rank,
            committed_scores.len(),
            national.as_ref(),
            trend,
            insights,
        ))
    }

    /// National ranking of active, scored municipalities; `region` narrows the
    /// listing but ranks stay national.
    pub async fn rankings(&self, region: Option<&str>) -> Result<Vec<RankingEntry>, MiiError> {
        let filter = EntityFilter::active_municipalities();
        let store = &*self.store;
        let filter_ref = &filter;
        let municipalities = self
            .call_store("list_municipalities", move || {
                store.list_municipalities(filter_ref)
            })
            .await?;

        let by_id: HashMap<&MunicipalityId, &Municipality> = municipalities
            .iter()
            .map(|municipality| (&municipality.id, municipality))
            .collect();

        let ranked = rank_municipalities(&committed_scores(&municipalities));
        Ok(ranked
            .into_iter()
            .filter_map(|entry| {
                by_id
                    .get(&entry.municipality_id)
                    .map(|municipality| RankingEntry::from_ranked(&entry, municipality))
            })
            .filter(|entry| region.map_or(true, |region| entry.region.eq_ignore_ascii_case(region)))
            .collect())
    }

    async fn run_recalculation(
        &self,
        municipality_id: &MunicipalityId,
        as_of: DateTime<Utc>,
        tracker: &mut StageTracker<'_>,
    ) -> Result<RecalculationOutcome, MiiError> {
        tracker.advance(RecalculationStage::Fetching);
        let inputs = self.fetch_inputs(municipality_id).await?;

        tracker.advance(RecalculationStage::Aggregating);
        let counts = EntityCounts::tally(municipality_id, &inputs.related);
        let dimensions = aggregate_counts(&counts);

        tracker.advance(RecalculationStage::Scoring);
        let dimensions = DimensionScores::from_entries(&dimensions.entries()).map_err(|err| {
            MiiError::Computation {
                municipality_id: municipality_id.clone(),
                reason: format!("{err} (counts: {counts:?})"),
            }
        })?;
        let overall_score = dimensions.overall();
        if !overall_score.is_finite() {
            return Err(MiiError::Computation {
                municipality_id: municipality_id.clone(),
                reason: format!("overall score is not finite (dimensions: {dimensions:?})"),
            });
        }

        tracker.advance(RecalculationStage::Persisting);
        let commit = SnapshotCommit {
            snapshot: ScoreSnapshot {
                id: SnapshotId::generate(),
                municipality_id: municipality_id.clone(),
                as_of,
                overall_score,
                dimensions,
                formula_version: FORMULA_VERSION,
            },
            active_pilots: saturating_u32(counts.active_pilots),
            completed_pilots: saturating_u32(counts.concluded_pilots),
        };
        let store = &*self.store;
        let commit_ref = &commit;
        let committed = self
            .call_store("commit_snapshot", move || {
                store.commit_snapshot(commit_ref.clone())
            })
            .await?;

        Ok(RecalculationOutcome {
            municipality_id: municipality_id.clone(),
            snapshot_id: committed.snapshot.id,
            overall_score: committed.snapshot.overall_score,
            rank: committed.rank,
            as_of: committed.snapshot.as_of,
            created: committed.created,
            stages: Vec::new(),
        })
    }

    async fn fetch_inputs(
        &self,
        municipality_id: &MunicipalityId,
    ) -> Result<RecalculationInputs, MiiError> {
        let store = &*self.store;
        let filter = EntityFilter::for_municipality(municipality_id);
        let pool_filter = EntityFilter::active_municipalities();
        let (filter, pool_filter) = (&filter, &pool_filter);

        let municipality = self
            .call_store("list_municipalities", move || {
                store.list_municipalities(filter)
            })
            .await?
            .into_iter()
            .find(|municipality| &municipality.id == municipality_id)
            .ok_or_else(|| MiiError::NotFound {
                municipality_id: municipality_id.clone(),
            })?;

        let (challenges, pilots, partnerships, ranked_pool) = tokio::try_join!(
            self.call_store("list_challenges", move || store.list_challenges(filter)),
            self.call_store("list_pilots", move || store.list_pilots(filter)),
            self.call_store("list_partnerships", move || store.list_partnerships(filter)),
            self.call_store("list_municipalities", move || {
                store.list_municipalities(pool_filter)
            }),
        )?;

        Ok(RecalculationInputs {
            municipality,
            related: RelatedEntities {
                challenges,
                pilots,
                partnerships,
            },
            ranked_pool: ranked_pool
                .into_iter()
                .filter(Municipality::is_rankable)
                .collect(),
        })
    }

    fn trend_for(
        &self,
        municipality_id: &MunicipalityId,
        history: &[ScoreSnapshot],
    ) -> Result<Option<TrendAnalysis>, MiiError> {
        if history.is_empty() {
            return Ok(None);
        }

        yearly_points(history)
            .and_then(analyze)
            .map(Some)
            .map_err(|source| {
                warn!(
                    %municipality_id,
                    snapshots = history.len(),
                    error = %source,
                    "data integrity: score history rejected"
                );
                MiiError::InvalidSeries {
                    municipality_id: municipality_id.clone(),
                    source,
                }
            })
    }

    /// Bounded retries with exponential backoff; every attempt is capped by the
    /// store timeout so a dropped call never half-completes.
    async fn call_store<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, MiiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut backoff = self.policy.initial_backoff;
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(self.policy.store_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(self.policy.store_timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(StoreError::NotFound(municipality_id)) => {
                    return Err(MiiError::NotFound { municipality_id });
                }
                Err(source) if source.is_transient() && attempt < max_attempts => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        ?backoff,
                        error = %source,
                        "entity store call failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.policy.max_backoff);
                    attempt += 1;
                }
                Err(source) => {
                    return Err(MiiError::Transient {
                        operation,
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }

    fn lease_lock(&self, municipality_id: &MunicipalityId) -> LockLease<'_> {
        let mut locks = self.locks.lock().expect("recalculation lock registry poisoned");
        let lock = Arc::clone(locks.entry(municipality_id.clone()).or_default());
        LockLease {
            registry: &self.locks,
            municipality_id: municipality_id.clone(),
            lock,
        }
    }

    #[cfg(test)]
    pub(crate) fn leased_locks(&self) -> usize {
        self.locks
            .lock()
            .expect("recalculation lock registry poisoned")
            .len()
    }

    fn notify(&self, outcome: &RecalculationOutcome) {
        let event = ScoreRecalculated {
            municipality_id: outcome.municipality_id.clone(),
            snapshot_id: outcome.snapshot_id,
            overall_score: outcome.overall_score,
            rank: outcome.rank,
            as_of: outcome.as_of,
            created: outcome.created,
        };
        if let Err(err) = self.publisher.publish(event) {
            warn!(
                municipality_id = %outcome.municipality_id,
                error = %err,
                "recalculation committed but event publication failed"
            );
        }
    }
}

type LockRegistry = Mutex<HashMap<MunicipalityId, Arc<tokio::sync::Mutex<()>>>>;

/// Holds a municipality's recalculation lock; the registry entry is dropped
/// with the last lease so the map only tracks municipalities in flight.
struct LockLease<'a> {
    registry: &'a LockRegistry,
    municipality_id: MunicipalityId,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        let mut locks = self
            .registry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let last_lease = Arc::strong_count(&self.lock) == 2
            && locks
                .get(&self.municipality_id)
                .is_some_and(|held| Arc::ptr_eq(held, &self.lock));
        if last_lease {
            locks.remove(&self.municipality_id);
        }
    }
}

fn saturating_u32(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}

fn committed_scores(municipalities: &[Municipality]) -> Vec<(MunicipalityId, f64)> {
    municipalities
        .iter()
        .filter(|municipality| municipality.is_rankable())
        .filter_map(|municipality| {
            municipality
                .mii_score
                .map(|score| (municipality.id.clone(), score))
        })
        .collect()
}

/// Error raised by the index service.
#[derive(Debug, thiserror::Error)]
pub enum MiiError {
    #[error("municipality {municipality_id} not found")]
    NotFound { municipality_id: MunicipalityId },
    #[error("score history for {municipality_id} is invalid: {source}")]
    InvalidSeries {
        municipality_id: MunicipalityId,
        #[source]
        source: InvalidSeriesError,
    },
    #[error("entity store `{operation}` failed after {attempts} attempt(s): {source}")]
    Transient {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: StoreError,
    },
    #[error("score computation failed for {municipality_id}: {reason}")]
    Computation {
        municipality_id: MunicipalityId,
        reason: String,
    },
}

impl MiiError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
