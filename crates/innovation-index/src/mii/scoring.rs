//! Overall index, national ranking, and national averages.
//!
//! Scores are kept as `f64` throughout; rounding for display happens in the
//! view layer only.

use super::domain::{Dimension, MunicipalityId, ScoreSnapshot};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

/// Weight of each dimension in the overall index, in `Dimension::ordered()` order.
pub const DIMENSION_WEIGHTS: [(Dimension, f64); Dimension::COUNT] = [
    (Dimension::Leadership, 0.15),
    (Dimension::Strategy, 0.15),
    (Dimension::Culture, 0.15),
    (Dimension::Partnerships, 0.15),
    (Dimension::Capabilities, 0.15),
    (Dimension::Impact, 0.25),
];

pub fn weight(dimension: Dimension) -> f64 {
    DIMENSION_WEIGHTS[dimension.index()].1
}

pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        MIN_SCORE
    } else {
        value.clamp(MIN_SCORE, MAX_SCORE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: Dimension,
    pub value: f64,
}

/// Exactly one clamped value per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionScores([f64; Dimension::COUNT]);

impl DimensionScores {
    pub fn new(values: [f64; Dimension::COUNT]) -> Self {
        Self(values.map(clamp_score))
    }

    /// Builds a complete set from loose entries. Anything other than one entry per
    /// dimension is rejected rather than padded.
    pub fn from_entries(entries: &[DimensionScore]) -> Result<Self, ScoringError> {
        if entries.len() != Dimension::COUNT {
            return Err(ScoringError::WrongDimensionCount {
                found: entries.len(),
            });
        }

        let mut values = [None; Dimension::COUNT];
        for entry in entries {
            if !entry.value.is_finite() {
                return Err(ScoringError::NonFiniteValue {
                    dimension: entry.dimension,
                });
            }
            let slot = &mut values[entry.dimension.index()];
            if slot.is_some() {
                return Err(ScoringError::DuplicateDimension {
                    dimension: entry.dimension,
                });
            }
            *slot = Some(entry.value);
        }

        let mut resolved = [MIN_SCORE; Dimension::COUNT];
        for (index, value) in values.into_iter().enumerate() {
            resolved[index] = value.ok_or(ScoringError::MissingDimension {
                dimension: Dimension::ordered()[index],
            })?;
        }

        Ok(Self::new(resolved))
    }

    pub fn get(&self, dimension: Dimension) -> f64 {
        self.0[dimension.index()]
    }

    pub fn entries(&self) -> [DimensionScore; Dimension::COUNT] {
        Dimension::ordered().map(|dimension| DimensionScore {
            dimension,
            value: self.get(dimension),
        })
    }

    /// Weighted combination of the six dimensions.
    pub fn overall(&self) -> f64 {
        let total = DIMENSION_WEIGHTS
            .iter()
            .map(|(dimension, weight)| self.get(*dimension) * weight)
            .sum::<f64>();
        clamp_score(total)
    }
}

/// Convenience for callers holding loose entries.
pub fn overall_score(entries: &[DimensionScore]) -> Result<f64, ScoringError> {
    DimensionScores::from_entries(entries).map(|scores| scores.overall())
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoringError {
    #[error("expected {} dimension scores, found {found}", Dimension::COUNT)]
    WrongDimensionCount { found: usize },
    #[error("dimension {dimension:?} supplied more than once")]
    DuplicateDimension { dimension: Dimension },
    #[error("dimension {dimension:?} missing")]
    MissingDimension { dimension: Dimension },
    #[error("dimension {dimension:?} is not a finite number")]
    NonFiniteValue { dimension: Dimension },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedMunicipality {
    pub municipality_id: MunicipalityId,
    pub rank: u32,
    pub overall_score: f64,
}

/// Descending by score, ascending by id on ties. Ranks are 1-based and gapless.
pub fn rank_municipalities(scores: &[(MunicipalityId, f64)]) -> Vec<RankedMunicipality> {
    let mut ordered: Vec<&(MunicipalityId, f64)> = scores.iter().collect();
    ordered.sort_by(|(left_id, left), (right_id, right)| {
        right
            .total_cmp(left)
            .then_with(|| left_id.cmp(right_id))
    });

    ordered
        .into_iter()
        .enumerate()
        .map(|(position, (municipality_id, overall_score))| RankedMunicipality {
            municipality_id: municipality_id.clone(),
            rank: position as u32 + 1,
            overall_score: *overall_score,
        })
        .collect()
}

pub fn rank_of(scores: &[(MunicipalityId, f64)], municipality_id: &MunicipalityId) -> Option<u32> {
    rank_municipalities(scores)
        .into_iter()
        .find(|entry| &entry.municipality_id == municipality_id)
        .map(|entry| entry.rank)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NationalStats {
    pub municipality_count: usize,
    pub average_overall: f64,
    pub dimension_averages: DimensionScores,
}

impl NationalStats {
    /// Means over the latest snapshot of each active municipality. `None` when
    /// nothing has been scored yet.
    pub fn from_snapshots(snapshots: &[ScoreSnapshot]) -> Option<Self> {
        if snapshots.is_empty() {
            return None;
        }

        let count = snapshots.len() as f64;
        let average_overall = snapshots
            .iter()
            .map(|snapshot| snapshot.overall_score)
            .sum::<f64>()
            / count;

        let mut sums = [0.0; Dimension::COUNT];
        for snapshot in snapshots {
            for dimension in Dimension::ordered() {
                sums[dimension.index()] += snapshot.dimensions.get(dimension);
            }
        }

        Some(Self {
            municipality_count: snapshots.len(),
            average_overall,
            dimension_averages: DimensionScores::new(sums.map(|sum| sum / count)),
        })
    }

    pub fn average_for(&self, dimension: Dimension) -> f64 {
        self.dimension_averages.get(dimension)
    }
}

pub(crate) fn compare_scores(left: f64, right: f64) -> Ordering {
    left.total_cmp(&right)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> MunicipalityId {
        MunicipalityId::new(value)
    }

    #[test]
    fn weights_sum_to_one() {
        let total: f64 = DIMENSION_WEIGHTS.iter().map(|(_, weight)| weight).sum();
        assert!((total - 1.0).abs() < 1e-12);
        for (index, (dimension, _)) in DIMENSION_WEIGHTS.iter().enumerate() {
            assert_eq!(dimension.index(), index);
        }
    }

    #[test]
    fn overall_is_weighted_sum() {
        let scores = DimensionScores::new([60.0, 40.0, 40.0, 40.0, 60.0, 80.0]);
        let expected = 0.15 * (60.0 + 40.0 + 40.0 + 40.0 + 60.0) + 0.25 * 80.0;
        assert!((scores.overall() - expected).abs() < 1e-9);
    }

    #[test]
    fn values_are_clamped_on_construction() {
        let scores = DimensionScores::new([-5.0, 140.0, f64::NAN, 50.0, 50.0, 50.0]);
        assert_eq!(scores.get(Dimension::Leadership), 0.0);
        assert_eq!(scores.get(Dimension::Strategy), 100.0);
        assert_eq!(scores.get(Dimension::Culture), 0.0);
    }

    #[test]
    fn from_entries_rejects_incomplete_sets() {
        let five: Vec<DimensionScore> = Dimension::ordered()
            .into_iter()
            .take(5)
            .map(|dimension| DimensionScore {
                dimension,
                value: 50.0,
            })
            .collect();
        assert_eq!(
            overall_score(&five),
            Err(ScoringError::WrongDimensionCount { found: 5 })
        );

        let mut duplicated = five.clone();
        duplicated.push(DimensionScore {
            dimension: Dimension::Leadership,
            value: 10.0,
        });
        assert_eq!(
            DimensionScores::from_entries(&duplicated),
            Err(ScoringError::DuplicateDimension {
                dimension: Dimension::Leadership
            })
        );
    }

    #[test]
    fn from_entries_accepts_any_order() {
        let mut entries = DimensionScores::new([10.0, 20.0, 30.0, 40.0, 50.0, 60.0])
            .entries()
            .to_vec();
        entries.reverse();
        let scores = DimensionScores::from_entries(&entries).expect("complete set");
        assert_eq!(scores.get(Dimension::Impact), 60.0);
        assert_eq!(scores.get(Dimension::Leadership), 10.0);
    }

    #[test]
    fn ties_are_broken_by_identifier() {
        let ranked = rank_municipalities(&[
            (id("riyadh"), 72.0),
            (id("abha"), 72.0),
            (id("jeddah"), 80.0),
        ]);
        let order: Vec<(&str, u32)> = ranked
            .iter()
            .map(|entry| (entry.municipality_id.as_str(), entry.rank))
            .collect();
        assert_eq!(order, vec![("jeddah", 1), ("abha", 2), ("riyadh", 3)]);
    }

    #[test]
    fn rank_of_unknown_is_none() {
        assert_eq!(rank_of(&[(id("abha"), 10.0)], &id("taif")), None);
    }

    #[test]
    fn national_stats_absent_without_snapshots() {
        assert!(NationalStats::from_snapshots(&[]).is_none());
    }
}
