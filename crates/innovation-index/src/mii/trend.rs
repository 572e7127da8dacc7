//! Historical trend, year-over-year growth, and direction.

use super::domain::{ScoreSnapshot, TrendPoint};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::iter::FusedIterator;

/// Changes smaller than this many index points are reported as flat.
pub const DIRECTION_EPSILON: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidSeriesError {
    #[error("trend series is empty")]
    Empty,
    #[error("year {year} appears more than once in the series")]
    DuplicateYear { year: i32 },
    #[error("year {year} follows {previous}; series must be ordered by year")]
    OutOfOrder { previous: i32, year: i32 },
    #[error("snapshot taken at {as_of} is not after the preceding snapshot at {previous}")]
    UnorderedSnapshots {
        previous: DateTime<Utc>,
        as_of: DateTime<Utc>,
    },
    #[error("score for year {year} is not a finite number")]
    NonFiniteScore { year: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Flat,
    Down,
}

impl TrendDirection {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Up => "Up",
            Self::Flat => "Flat",
            Self::Down => "Down",
        }
    }
}

pub fn classify_direction(delta: f64) -> TrendDirection {
    if delta > DIRECTION_EPSILON {
        TrendDirection::Up
    } else if delta < -DIRECTION_EPSILON {
        TrendDirection::Down
    } else {
        TrendDirection::Flat
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum YoyGrowth {
    Measured {
        previous_year: i32,
        latest_year: i32,
        delta: f64,
    },
    InsufficientHistory,
}

impl YoyGrowth {
    pub fn delta(&self) -> Option<f64> {
        match self {
            Self::Measured { delta, .. } => Some(*delta),
            Self::InsufficientHistory => None,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, Self::InsufficientHistory)
    }
}

/// Validated, year-ordered points. Iteration can be restarted any number of times.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TrendSeries {
    points: Vec<TrendPoint>,
}

impl TrendSeries {
    pub fn new(points: Vec<TrendPoint>) -> Result<Self, InvalidSeriesError> {
        if points.is_empty() {
            return Err(InvalidSeriesError::Empty);
        }

        for point in &points {
            if !point.score.is_finite() {
                return Err(InvalidSeriesError::NonFiniteScore { year: point.year });
            }
        }

        for pair in points.windows(2) {
            let (previous, current) = (pair[0].year, pair[1].year);
            if current == previous {
                return Err(InvalidSeriesError::DuplicateYear { year: current });
            }
            if current < previous {
                return Err(InvalidSeriesError::OutOfOrder {
                    previous,
                    year: current,
                });
            }
        }

        Ok(Self { points })
    }

    pub fn iter(&self) -> TrendPoints<'_> {
        TrendPoints {
            inner: self.points.iter(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<TrendPoint> {
        self.points.last().copied()
    }

    pub fn growth(&self) -> YoyGrowth {
        match self.points.as_slice() {
            [.., previous, latest] => YoyGrowth::Measured {
                previous_year: previous.year,
                latest_year: latest.year,
                delta: latest.score - previous.score,
            },
            _ => YoyGrowth::InsufficientHistory,
        }
    }
}

/// Borrowing cursor over a [`TrendSeries`]; clone it to replay from the current position.
#[derive(Debug, Clone)]
pub struct TrendPoints<'a> {
    inner: std::slice::Iter<'a, TrendPoint>,
}

impl Iterator for TrendPoints<'_> {
    type Item = TrendPoint;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().copied()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for TrendPoints<'_> {}

impl FusedIterator for TrendPoints<'_> {}

impl<'a> IntoIterator for &'a TrendSeries {
    type Item = TrendPoint;
    type IntoIter = TrendPoints<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendAnalysis {
    pub series: TrendSeries,
    pub growth: YoyGrowth,
    pub direction: TrendDirection,
}

impl TrendAnalysis {
    pub fn insufficient_history(&self) -> bool {
        self.growth.is_insufficient()
    }
}

/// Rejects unordered or duplicate-year input instead of sorting it.
pub fn analyze(points: Vec<TrendPoint>) -> Result<TrendAnalysis, InvalidSeriesError> {
    let series = TrendSeries::new(points)?;
    let growth = series.growth();
    let direction = growth
        .delta()
        .map(classify_direction)
        .unwrap_or(TrendDirection::Flat);

    Ok(TrendAnalysis {
        series,
        growth,
        direction,
    })
}

/// One point per calendar year, taken from the last snapshot in that year.
///
/// Snapshots must already be strictly ascending by `as_of`; history that is not is
/// reported as a data-integrity failure.
pub fn yearly_points(snapshots: &[ScoreSnapshot]) -> Result<Vec<TrendPoint>, InvalidSeriesError> {
    for pair in snapshots.windows(2) {
        if pair[1].as_of <= pair[0].as_of {
            return Err(InvalidSeriesError::UnorderedSnapshots {
                previous: pair[0].as_of,
                as_of: pair[1].as_of,
            });
        }
    }

    let mut points: Vec<TrendPoint> = Vec::new();
    for snapshot in snapshots {
        let point = TrendPoint {
            year: snapshot.year(),
            score: snapshot.overall_score,
        };
        match points.last_mut() {
            Some(last) if last.year == point.year => *last = point,
            _ => points.push(point),
        }
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(year: i32, score: f64) -> TrendPoint {
        TrendPoint { year, score }
    }

    #[test]
    fn single_point_reports_insufficient_history() {
        let analysis = analyze(vec![point(2024, 61.0)]).expect("valid series");
        assert_eq!(analysis.series.len(), 1);
        assert!(analysis.insufficient_history());
        assert_eq!(analysis.growth.delta(), None);
        assert_eq!(analysis.direction, TrendDirection::Flat);
    }

    #[test]
    fn rising_pair_is_up_with_exact_delta() {
        let analysis = analyze(vec![point(2023, 58.5), point(2024, 64.0)]).expect("valid series");
        assert_eq!(analysis.direction, TrendDirection::Up);
        assert_eq!(
            analysis.growth,
            YoyGrowth::Measured {
                previous_year: 2023,
                latest_year: 2024,
                delta: 64.0 - 58.5,
            }
        );
    }

    #[test]
    fn changes_inside_epsilon_are_flat() {
        assert_eq!(classify_direction(DIRECTION_EPSILON / 2.0), TrendDirection::Flat);
        assert_eq!(classify_direction(-DIRECTION_EPSILON / 2.0), TrendDirection::Flat);
        assert_eq!(classify_direction(0.0), TrendDirection::Flat);
        assert_eq!(classify_direction(-1.0), TrendDirection::Down);
    }

    #[test]
    fn unordered_and_duplicate_years_are_rejected() {
        assert_eq!(
            analyze(vec![point(2024, 60.0), point(2023, 55.0)]),
            Err(InvalidSeriesError::OutOfOrder {
                previous: 2024,
                year: 2023
            })
        );
        assert_eq!(
            analyze(vec![point(2024, 60.0), point(2024, 55.0)]),
            Err(InvalidSeriesError::DuplicateYear { year: 2024 })
        );
        assert_eq!(analyze(Vec::new()), Err(InvalidSeriesError::Empty));
    }

    #[test]
    fn iteration_restarts_from_the_beginning() {
        let series =
            TrendSeries::new(vec![point(2022, 40.0), point(2023, 45.0), point(2024, 47.0)])
                .expect("valid series");

        let cursor = series.iter();
        let first: Vec<i32> = cursor.clone().map(|p| p.year).collect();
        let second: Vec<i32> = cursor.map(|p| p.year).collect();
        let third: Vec<f64> = (&series).into_iter().map(|p| p.score).collect();

        assert_eq!(first, vec![2022, 2023, 2024]);
        assert_eq!(first, second);
        assert_eq!(third, vec![40.0, 45.0, 47.0]);
        assert_eq!(series.iter().len(), 3);
    }
}
