use super::domain::Dimension;
use super::scoring::{compare_scores, DimensionScores, NationalStats};
use serde::Serialize;

/// Distance from the national dimension average, in index points, a dimension
/// must reach before it counts as a strength or an improvement area.
pub const INSIGHT_MARGIN: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightClassification {
    Strength,
    ImprovementArea,
}

impl InsightClassification {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Strength => "Strength",
            Self::ImprovementArea => "Improvement Area",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub dimension: Dimension,
    pub dimension_label: &'static str,
    pub classification: InsightClassification,
    pub value: f64,
    pub national_average: f64,
    pub delta: f64,
}

/// Strengths best-first, improvement areas worst-first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BenchmarkInsights {
    pub strengths: Vec<Insight>,
    pub improvement_areas: Vec<Insight>,
}

pub fn classify(delta: f64) -> Option<InsightClassification> {
    if delta >= INSIGHT_MARGIN {
        Some(InsightClassification::Strength)
    } else if delta <= -INSIGHT_MARGIN {
        Some(InsightClassification::ImprovementArea)
    } else {
        None
    }
}

pub fn derive_insights(
    dimensions: &DimensionScores,
    national: Option<&NationalStats>,
) -> BenchmarkInsights {
    let Some(national) = national else {
        return BenchmarkInsights::default();
    };

    let mut insights = BenchmarkInsights::default();
    for dimension in Dimension::ordered() {
        let value = dimensions.get(dimension);
        let national_average = national.average_for(dimension);
        let delta = value - national_average;

        let Some(classification) = classify(delta) else {
            continue;
        };

        let insight = Insight {
            dimension,
            dimension_label: dimension.label(),
            classification,
            value,
            national_average,
            delta,
        };

        match classification {
            InsightClassification::Strength => insights.strengths.push(insight),
            InsightClassification::ImprovementArea => insights.improvement_areas.push(insight),
        }
    }

    insights.strengths.sort_by(|left, right| {
        compare_scores(right.delta, left.delta).then_with(|| left.dimension.cmp(&right.dimension))
    });
    insights.improvement_areas.sort_by(|left, right| {
        compare_scores(left.delta, right.delta).then_with(|| left.dimension.cmp(&right.dimension))
    });

    insights
}
