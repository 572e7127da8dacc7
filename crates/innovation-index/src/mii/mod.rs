//! Municipal Innovation Index scoring and drill-down analytics.
//!
//! Entity records flow through the dimension aggregator into the score
//! calculator, then into the trend analyzer and benchmark insight deriver. The
//! service module is the only place with side effects: it fetches from the
//! entity store, commits snapshots, and publishes recalculation events.

pub mod aggregator;
pub mod domain;
pub mod insights;
pub mod memory;
pub mod repository;
pub mod router;
pub mod scoring;
pub mod service;
pub mod trend;
pub mod views;

#[cfg(test)]
mod tests;

pub use aggregator::{aggregate, EntityCounts, RelatedEntities, FORMULA_VERSION};
pub use domain::{
    Challenge, ChallengeStatus, CityType, Dimension, DisplayName, EntityFilter, Municipality,
    MunicipalityId, Partnership, PartnershipStatus, Pilot, PilotStage, ScoreSnapshot, SnapshotId,
    TrendPoint,
};
pub use insights::{derive_insights, BenchmarkInsights, Insight, InsightClassification};
pub use memory::{InMemoryEntityStore, SeedData};
pub use repository::{
    BroadcastPublisher, CommittedSnapshot, EntityStore, PublishError, RecalculationPublisher,
    ScoreRecalculated, SnapshotCommit, StoreError,
};
pub use router::index_router;
pub use scoring::{DimensionScore, DimensionScores, NationalStats, RankedMunicipality, ScoringError};
pub use service::{MiiError, MiiService, RecalculationOutcome, RecalculationStage, RetryPolicy};
pub use trend::{
    analyze, InvalidSeriesError, TrendAnalysis, TrendDirection, TrendSeries, YoyGrowth,
};
pub use views::{HistoryStatus, MiiView, RankingEntry, RecalculationView};
