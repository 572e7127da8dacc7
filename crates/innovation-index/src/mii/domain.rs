use super::scoring::DimensionScores;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MunicipalityId(pub String);

impl MunicipalityId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MunicipalityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub Uuid);

impl SnapshotId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The six fixed scoring axes of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Leadership,
    Strategy,
    Culture,
    Partnerships,
    Capabilities,
    Impact,
}

impl Dimension {
    pub const COUNT: usize = 6;

    pub const fn ordered() -> [Self; Self::COUNT] {
        [
            Self::Leadership,
            Self::Strategy,
            Self::Culture,
            Self::Partnerships,
            Self::Capabilities,
            Self::Impact,
        ]
    }

    pub const fn index(self) -> usize {
        match self {
            Self::Leadership => 0,
            Self::Strategy => 1,
            Self::Culture => 2,
            Self::Partnerships => 3,
            Self::Capabilities => 4,
            Self::Impact => 5,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Leadership => "Leadership",
            Self::Strategy => "Strategy",
            Self::Culture => "Culture",
            Self::Partnerships => "Partnerships",
            Self::Capabilities => "Capabilities",
            Self::Impact => "Impact",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CityType {
    Capital,
    MajorCity,
    City,
    Town,
}

impl CityType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Capital => "Capital",
            Self::MajorCity => "Major City",
            Self::City => "City",
            Self::Town => "Town",
        }
    }
}

/// Bilingual display name; both forms are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayName {
    pub en: String,
    pub ar: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Municipality {
    pub id: MunicipalityId,
    pub name: DisplayName,
    pub region: String,
    pub city_type: CityType,
    pub population: u64,
    #[serde(default)]
    pub mii_score: Option<f64>,
    #[serde(default)]
    pub mii_rank: Option<u32>,
    #[serde(default)]
    pub latest_snapshot_id: Option<SnapshotId>,
    #[serde(default)]
    pub active_pilots: u32,
    #[serde(default)]
    pub completed_pilots: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_deleted: bool,
}

impl Municipality {
    /// Eligible for ranking and national averages.
    pub fn is_rankable(&self) -> bool {
        self.is_active && !self.is_deleted
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Draft,
    Open,
    InProgress,
    Resolved,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    pub municipality_id: MunicipalityId,
    pub status: ChallengeStatus,
    #[serde(default)]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PilotStage {
    Planning,
    Active,
    Completed,
    Scaled,
    Terminated,
}

impl PilotStage {
    pub const fn is_concluded_successfully(self) -> bool {
        matches!(self, Self::Completed | Self::Scaled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pilot {
    pub id: String,
    pub municipality_id: MunicipalityId,
    pub stage: PilotStage,
    #[serde(default)]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnershipStatus {
    Proposed,
    Active,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partnership {
    pub id: String,
    pub municipality_id: MunicipalityId,
    pub status: PartnershipStatus,
    #[serde(default)]
    pub is_deleted: bool,
}

/// Equality/boolean predicates understood by the entity store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityFilter {
    pub municipality_id: Option<MunicipalityId>,
    pub active_only: bool,
    pub include_deleted: bool,
}

impl EntityFilter {
    pub fn for_municipality(id: &MunicipalityId) -> Self {
        Self {
            municipality_id: Some(id.clone()),
            ..Self::default()
        }
    }

    pub fn active_municipalities() -> Self {
        Self {
            active_only: true,
            ..Self::default()
        }
    }
}

/// Immutable record of a municipality's full score state at computation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub id: SnapshotId,
    pub municipality_id: MunicipalityId,
    pub as_of: DateTime<Utc>,
    pub overall_score: f64,
    pub dimensions: DimensionScores,
    pub formula_version: u16,
}

impl ScoreSnapshot {
    pub fn year(&self) -> i32 {
        self.as_of.year()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub year: i32,
    pub score: f64,
}
