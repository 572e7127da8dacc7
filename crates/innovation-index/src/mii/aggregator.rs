//! Maps raw entity counts into the six index dimensions.
//!
//! Formula version 1. Each dimension is a saturating ratio against a fixed
//! reference ceiling, or a share of a status distribution, so recomputation over
//! the same records always reproduces the same values.

use super::domain::{
    Challenge, ChallengeStatus, Dimension, Municipality, MunicipalityId, Partnership,
    PartnershipStatus, Pilot, PilotStage,
};
use super::scoring::{clamp_score, DimensionScores, MAX_SCORE};
use serde::Serialize;

pub const FORMULA_VERSION: u16 = 1;

pub const CHALLENGE_CEILING: f64 = 10.0;
pub const PILOT_CEILING: f64 = 10.0;
pub const ACTIVE_PILOT_CEILING: f64 = 5.0;
pub const COMPLETED_PILOT_CEILING: f64 = 5.0;
pub const PARTNERSHIP_CEILING: f64 = 5.0;

/// Share of the Strategy dimension driven by pilot volume; the remainder comes
/// from the challenge resolution rate.
pub const STRATEGY_PILOT_SHARE: f64 = 0.5;

/// Records related to one municipality, as returned by the entity store.
#[derive(Debug, Clone, Default)]
pub struct RelatedEntities {
    pub challenges: Vec<Challenge>,
    pub pilots: Vec<Pilot>,
    pub partnerships: Vec<Partnership>,
}

/// Status distribution the formula reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub challenges: usize,
    pub resolved_challenges: usize,
    pub pilots: usize,
    pub active_pilots: usize,
    pub concluded_pilots: usize,
    pub active_partnerships: usize,
}

impl EntityCounts {
    pub fn tally(municipality_id: &MunicipalityId, related: &RelatedEntities) -> Self {
        let mut counts = Self::default();

        for challenge in related.challenges.iter().filter(|challenge| {
            belongs(municipality_id, &challenge.municipality_id, challenge.is_deleted)
        }) {
            match challenge.status {
                ChallengeStatus::Archived => {}
                ChallengeStatus::Resolved => {
                    counts.challenges += 1;
                    counts.resolved_challenges += 1;
                }
                ChallengeStatus::Draft | ChallengeStatus::Open | ChallengeStatus::InProgress => {
                    counts.challenges += 1;
                }
            }
        }

        for pilot in related
            .pilots
            .iter()
            .filter(|pilot| belongs(municipality_id, &pilot.municipality_id, pilot.is_deleted))
        {
            counts.pilots += 1;
            if pilot.stage == PilotStage::Active {
                counts.active_pilots += 1;
            }
            if pilot.stage.is_concluded_successfully() {
                counts.concluded_pilots += 1;
            }
        }

        counts.active_partnerships = related
            .partnerships
            .iter()
            .filter(|partnership| {
                belongs(municipality_id, &partnership.municipality_id, partnership.is_deleted)
            })
            .filter(|partnership| partnership.status == PartnershipStatus::Active)
            .count();

        counts
    }
}

fn belongs(expected: &MunicipalityId, actual: &MunicipalityId, is_deleted: bool) -> bool {
    !is_deleted && expected == actual
}

fn saturate(count: usize, ceiling: f64) -> f64 {
    ((count as f64 / ceiling).min(1.0)) * MAX_SCORE
}

fn share(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64) * MAX_SCORE
    }
}

pub fn dimension_value(dimension: Dimension, counts: &EntityCounts) -> f64 {
    let value = match dimension {
        Dimension::Leadership => saturate(counts.challenges, CHALLENGE_CEILING),
        Dimension::Strategy => {
            STRATEGY_PILOT_SHARE * saturate(counts.pilots, PILOT_CEILING)
                + (1.0 - STRATEGY_PILOT_SHARE)
                    * share(counts.resolved_challenges, counts.challenges)
        }
        Dimension::Culture => saturate(counts.active_pilots, ACTIVE_PILOT_CEILING),
        Dimension::Partnerships => saturate(counts.active_partnerships, PARTNERSHIP_CEILING),
        Dimension::Capabilities => saturate(counts.concluded_pilots, COMPLETED_PILOT_CEILING),
        Dimension::Impact => share(counts.concluded_pilots, counts.pilots),
    };
    clamp_score(value)
}

pub fn aggregate_counts(counts: &EntityCounts) -> DimensionScores {
    DimensionScores::new(Dimension::ordered().map(|dimension| dimension_value(dimension, counts)))
}

/// Dimension values for a known municipality. Empty collections score zero.
pub fn aggregate(municipality: &Municipality, related: &RelatedEntities) -> DimensionScores {
    aggregate_counts(&EntityCounts::tally(&municipality.id, related))
}
