//! Mutex-backed [`EntityStore`] used by the service binary, demos, and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Deserialize;

use super::domain::{
    Challenge, EntityFilter, Municipality, MunicipalityId, Partnership, Pilot, ScoreSnapshot,
};
use super::repository::{CommittedSnapshot, EntityStore, SnapshotCommit, StoreError};
use super::scoring::rank_municipalities;

/// Seed document accepted by [`InMemoryEntityStore::from_seed`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedData {
    pub municipalities: Vec<Municipality>,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    #[serde(default)]
    pub pilots: Vec<Pilot>,
    #[serde(default)]
    pub partnerships: Vec<Partnership>,
    #[serde(default)]
    pub snapshots: Vec<ScoreSnapshot>,
}

#[derive(Debug, Default)]
struct StoreState {
    municipalities: BTreeMap<MunicipalityId, Municipality>,
    challenges: Vec<Challenge>,
    pilots: Vec<Pilot>,
    partnerships: Vec<Partnership>,
    snapshots: HashMap<MunicipalityId, Vec<ScoreSnapshot>>,
}

impl StoreState {
    /// Current score and snapshot pointer follow the latest snapshot; without
    /// history both are cleared.
    fn sync_current_fields(&mut self, municipality_id: &MunicipalityId) {
        let latest = self
            .snapshots
            .get(municipality_id)
            .and_then(|history| history.last())
            .map(|snapshot| (snapshot.overall_score, snapshot.id));
        if let Some(municipality) = self.municipalities.get_mut(municipality_id) {
            municipality.mii_score = latest.map(|(score, _)| score);
            municipality.latest_snapshot_id = latest.map(|(_, id)| id);
        }
    }

    /// Rewrites every stored rank from committed scores. Inactive, deleted, and
    /// unscored municipalities hold no rank.
    fn rerank(&mut self) {
        let scores: Vec<(MunicipalityId, f64)> = self
            .municipalities
            .values()
            .filter(|municipality| municipality.is_rankable())
            .filter_map(|municipality| {
                municipality
                    .mii_score
                    .map(|score| (municipality.id.clone(), score))
            })
            .collect();
        let ranks: HashMap<MunicipalityId, u32> = rank_municipalities(&scores)
            .into_iter()
            .map(|entry| (entry.municipality_id, entry.rank))
            .collect();
        for municipality in self.municipalities.values_mut() {
            municipality.mii_rank = ranks.get(&municipality.id).copied();
        }
    }

    fn rank_of(&self, municipality_id: &MunicipalityId) -> Option<u32> {
        self.municipalities
            .get(municipality_id)
            .and_then(|municipality| municipality.mii_rank)
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryEntityStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryEntityStore {
    /// Historical snapshots are sorted by `as_of`, each municipality's current
    /// score is aligned with its latest snapshot (or cleared when it has none),
    /// and ranks are recomputed from those scores.
    pub fn from_seed(seed: SeedData) -> Self {
        let mut state = StoreState {
            municipalities: seed
                .municipalities
                .into_iter()
                .map(|municipality| (municipality.id.clone(), municipality))
                .collect(),
            challenges: seed.challenges,
            pilots: seed.pilots,
            partnerships: seed.partnerships,
            snapshots: HashMap::new(),
        };

        for snapshot in seed.snapshots {
            state
                .snapshots
                .entry(snapshot.municipality_id.clone())
                .or_default()
                .push(snapshot);
        }

        for history in state.snapshots.values_mut() {
            history.sort_by_key(|snapshot| snapshot.as_of);
        }
        let ids: Vec<MunicipalityId> = state.municipalities.keys().cloned().collect();
        for id in &ids {
            state.sync_current_fields(id);
        }
        state.rerank();

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().expect("entity store mutex poisoned")
    }

    pub fn insert_municipality(&self, municipality: Municipality) {
        self.lock()
            .municipalities
            .insert(municipality.id.clone(), municipality);
    }

    pub fn insert_challenge(&self, challenge: Challenge) {
        self.lock().challenges.push(challenge);
    }

    pub fn insert_pilot(&self, pilot: Pilot) {
        self.lock().pilots.push(pilot);
    }

    pub fn insert_partnership(&self, partnership: Partnership) {
        self.lock().partnerships.push(partnership);
    }

    pub fn municipality(&self, id: &MunicipalityId) -> Option<Municipality> {
        self.lock().municipalities.get(id).cloned()
    }

    pub fn snapshots(&self, id: &MunicipalityId) -> Vec<ScoreSnapshot> {
        self.lock().snapshots.get(id).cloned().unwrap_or_default()
    }

    fn matching_municipalities(&self, filter: &EntityFilter) -> Vec<Municipality> {
        self.lock()
            .municipalities
            .values()
            .filter(|municipality| {
                filter
                    .municipality_id
                    .as_ref()
                    .map_or(true, |id| &municipality.id == id)
            })
            .filter(|municipality| !filter.active_only || municipality.is_active)
            .filter(|municipality| filter.include_deleted || !municipality.is_deleted)
            .cloned()
            .collect()
    }

    fn commit(&self, commit: SnapshotCommit) -> Result<CommittedSnapshot, StoreError> {
        let mut state = self.lock();
        let municipality_id = commit.snapshot.municipality_id.clone();
        if !state.municipalities.contains_key(&municipality_id) {
            return Err(StoreError::NotFound(municipality_id));
        }

        let history = state.snapshots.entry(municipality_id.clone()).or_default();
        if let Some(existing) = history
            .iter()
            .find(|snapshot| snapshot.as_of == commit.snapshot.as_of)
        {
            let snapshot = existing.clone();
            return Ok(CommittedSnapshot {
                snapshot,
                rank: state.rank_of(&municipality_id),
                created: false,
            });
        }

        let position = history.partition_point(|snapshot| snapshot.as_of < commit.snapshot.as_of);
        let is_latest = position == history.len();
        history.insert(position, commit.snapshot.clone());

        if is_latest {
            if let Some(municipality) = state.municipalities.get_mut(&municipality_id) {
                municipality.mii_score = Some(commit.snapshot.overall_score);
                municipality.latest_snapshot_id = Some(commit.snapshot.id);
                municipality.active_pilots = commit.active_pilots;
                municipality.completed_pilots = commit.completed_pilots;
            }
            state.rerank();
        }

        Ok(CommittedSnapshot {
            snapshot: commit.snapshot,
            rank: state.rank_of(&municipality_id),
            created: true,
        })
    }
}

fn matches_owner(filter: &EntityFilter, owner: &MunicipalityId, is_deleted: bool) -> bool {
    filter.municipality_id.as_ref().map_or(true, |id| id == owner)
        && (filter.include_deleted || !is_deleted)
}

impl EntityStore for InMemoryEntityStore {
    async fn list_municipalities(
        &self,
        filter: &EntityFilter,
    ) -> Result<Vec<Municipality>, StoreError> {
        Ok(self.matching_municipalities(filter))
    }

    async fn list_challenges(&self, filter: &EntityFilter) -> Result<Vec<Challenge>, StoreError> {
        Ok(self
            .lock()
            .challenges
            .iter()
            .filter(|challenge| {
                matches_owner(filter, &challenge.municipality_id, challenge.is_deleted)
            })
            .cloned()
            .collect())
    }

    async fn list_pilots(&self, filter: &EntityFilter) -> Result<Vec<Pilot>, StoreError> {
        Ok(self
            .lock()
            .pilots
            .iter()
            .filter(|pilot| matches_owner(filter, &pilot.municipality_id, pilot.is_deleted))
            .cloned()
            .collect())
    }

    async fn list_partnerships(
        &self,
        filter: &EntityFilter,
    ) -> Result<Vec<Partnership>, StoreError> {
        Ok(self
            .lock()
            .partnerships
            .iter()
            .filter(|partnership| {
                matches_owner(filter, &partnership.municipality_id, partnership.is_deleted)
            })
            .cloned()
            .collect())
    }

    async fn score_history(
        &self,
        municipality_id: &MunicipalityId,
    ) -> Result<Vec<ScoreSnapshot>, StoreError> {
        Ok(self.snapshots(municipality_id))
    }

    async fn latest_snapshots(
        &self,
        municipality_ids: &[MunicipalityId],
    ) -> Result<Vec<ScoreSnapshot>, StoreError> {
        let state = self.lock();
        Ok(municipality_ids
            .iter()
            .filter_map(|id| state.snapshots.get(id).and_then(|history| history.last()))
            .cloned()
            .collect())
    }

    async fn commit_snapshot(
        &self,
        commit: SnapshotCommit,
    ) -> Result<CommittedSnapshot, StoreError> {
        self.commit(commit)
    }
}
