use super::domain::{CityType, Dimension, DisplayName, Municipality, MunicipalityId, TrendPoint};
use super::insights::{BenchmarkInsights, Insight};
use super::scoring::{clamp_score, weight, DimensionScores, NationalStats, RankedMunicipality};
use super::service::RecalculationOutcome;
use super::trend::{TrendAnalysis, TrendDirection, YoyGrowth};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Scores are rounded only here, at presentation time.
pub fn display_score(score: f64) -> u8 {
    clamp_score(score).round() as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    /// No snapshot has been committed yet.
    None,
    /// One year of history; growth is undefined.
    Insufficient,
    Sufficient,
}

impl HistoryStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "No History",
            Self::Insufficient => "Insufficient History",
            Self::Sufficient => "Sufficient History",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DimensionEntry {
    pub dimension: Dimension,
    pub dimension_label: &'static str,
    pub value: f64,
    pub display_value: u8,
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub national_average: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MiiView {
    pub municipality_id: MunicipalityId,
    pub name: DisplayName,
    pub region: String,
    pub city_type: CityType,
    pub city_type_label: &'static str,
    pub population: u64,
    /// Last committed score; may lag the live dimensions until the next recalculation.
    pub overall_score: Option<f64>,
    pub display_score: Option<u8>,
    pub live_overall_score: f64,
    pub rank: Option<u32>,
    pub ranked_municipalities: usize,
    pub national_average: Option<f64>,
    pub dimensions: Vec<DimensionEntry>,
    pub trend: Vec<TrendPoint>,
    pub yoy_growth: YoyGrowth,
    pub trend_direction: TrendDirection,
    pub history: HistoryStatus,
    pub strengths: Vec<Insight>,
    pub improvement_areas: Vec<Insight>,
}

impl MiiView {
    pub(crate) fn assemble(
        municipality: &Municipality,
        dimensions: DimensionScores,
        rank: Option<u32>,
        ranked_municipalities: usize,
        national: Option<&NationalStats>,
        trend: Option<TrendAnalysis>,
        insights: BenchmarkInsights,
    ) -> Self {
        let dimension_entries = Dimension::ordered()
            .into_iter()
            .map(|dimension| {
                let value = dimensions.get(dimension);
                DimensionEntry {
                    dimension,
                    dimension_label: dimension.label(),
                    value,
                    display_value: display_score(value),
                    weight: weight(dimension),
                    national_average: national.map(|stats| stats.average_for(dimension)),
                }
            })
            .collect();

        let (points, yoy_growth, trend_direction, history) = match trend {
            Some(analysis) => {
                let history = if analysis.insufficient_history() {
                    HistoryStatus::Insufficient
                } else {
                    HistoryStatus::Sufficient
                };
                (
                    analysis.series.iter().collect(),
                    analysis.growth,
                    analysis.direction,
                    history,
                )
            }
            None => (
                Vec::new(),
                YoyGrowth::InsufficientHistory,
                TrendDirection::Flat,
                HistoryStatus::None,
            ),
        };

        Self {
            municipality_id: municipality.id.clone(),
            name: municipality.name.clone(),
            region: municipality.region.clone(),
            city_type: municipality.city_type,
            city_type_label: municipality.city_type.label(),
            population: municipality.population,
            overall_score: municipality.mii_score,
            display_score: municipality.mii_score.map(display_score),
            live_overall_score: dimensions.overall(),
            rank,
            ranked_municipalities,
            national_average: national.map(|stats| stats.average_overall),
            dimensions: dimension_entries,
            trend: points,
            yoy_growth,
            trend_direction,
            history,
            strengths: insights.strengths,
            improvement_areas: insights.improvement_areas,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RankingEntry {
    pub rank: u32,
    pub municipality_id: MunicipalityId,
    pub name: DisplayName,
    pub region: String,
    pub city_type: CityType,
    pub overall_score: f64,
    pub display_score: u8,
}

impl RankingEntry {
    pub(crate) fn from_ranked(entry: &RankedMunicipality, municipality: &Municipality) -> Self {
        Self {
            rank: entry.rank,
            municipality_id: entry.municipality_id.clone(),
            name: municipality.name.clone(),
            region: municipality.region.clone(),
            city_type: municipality.city_type,
            overall_score: entry.overall_score,
            display_score: display_score(entry.overall_score),
        }
    }
}

/// Response for the recalculation trigger.
#[derive(Debug, Clone, Serialize)]
pub struct RecalculationView {
    pub municipality_id: MunicipalityId,
    pub snapshot_id: String,
    pub overall_score: f64,
    pub display_score: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    pub as_of: DateTime<Utc>,
    pub created: bool,
}

impl From<&RecalculationOutcome> for RecalculationView {
    fn from(outcome: &RecalculationOutcome) -> Self {
        Self {
            municipality_id: outcome.municipality_id.clone(),
            snapshot_id: outcome.snapshot_id.to_string(),
            overall_score: outcome.overall_score,
            display_score: display_score(outcome.overall_score),
            rank: outcome.rank,
            as_of: outcome.as_of,
            created: outcome.created,
        }
    }
}
