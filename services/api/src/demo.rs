use crate::cli::{RankingsArgs, RecalculateArgs, ViewArgs};
use crate::infra::{cli_service, parse_timestamp, IndexService, SeedArgs};
use chrono::{DateTime, TimeZone, Utc};
use clap::Args;
use innovation_index::error::AppError;
use innovation_index::mii::{
    Challenge, ChallengeStatus, CityType, DimensionScores, DisplayName, Insight, MiiError,
    MiiView, Municipality, MunicipalityId, Partnership, PartnershipStatus, Pilot, PilotStage,
    RankingEntry, RecalculationOutcome, ScoreSnapshot, SeedData, SnapshotId, YoyGrowth,
    FORMULA_VERSION,
};
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// As-of timestamp (RFC 3339) for the demo recalculation. Defaults to now.
    #[arg(long, value_parser = parse_timestamp)]
    pub(crate) as_of: Option<DateTime<Utc>>,
    /// Municipality to drill into. Defaults to the top-ranked municipality.
    #[arg(long)]
    pub(crate) municipality: Option<String>,
}

pub(crate) async fn run_recalculate(args: RecalculateArgs) -> Result<(), AppError> {
    let service = cli_service(&args.seed)?;
    let as_of = args.as_of.unwrap_or_else(Utc::now);
    println!("Data source: {}", args.seed.source_label());

    match args.municipality {
        Some(id) if !args.all => {
            let outcome = service
                .recalculate_as_of(&MunicipalityId::new(id), as_of)
                .await?;
            render_outcome(&outcome);
        }
        _ => recalculate_everything(&service, as_of).await?,
    }
    Ok(())
}

pub(crate) async fn run_view(args: ViewArgs) -> Result<(), AppError> {
    let service = cli_service(&args.seed)?;
    let view = service.view(&MunicipalityId::new(args.municipality)).await?;

    if args.json {
        match serde_json::to_string_pretty(&view) {
            Ok(json) => println!("{json}"),
            Err(err) => println!("View payload unavailable: {err}"),
        }
    } else {
        render_view(&view);
    }
    Ok(())
}

pub(crate) async fn run_rankings(args: RankingsArgs) -> Result<(), AppError> {
    let service = cli_service(&args.seed)?;
    if args.refresh {
        recalculate_everything(&service, Utc::now()).await?;
    }

    let rankings = service.rankings(args.region.as_deref()).await?;
    render_rankings(&rankings, args.region.as_deref());
    Ok(())
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        as_of,
        municipality,
    } = args;
    let as_of = as_of.unwrap_or_else(Utc::now);
    let service = cli_service(&SeedArgs::default())?;

    println!("Municipal Innovation Index demo");
    println!("\nCommitted ranking (from historical snapshots)");
    render_rankings(&service.rankings(None).await?, None);

    println!("\nRecalculating every active municipality as of {as_of}");
    recalculate_everything(&service, as_of).await?;

    println!("\nRanking after recalculation");
    let rankings = service.rankings(None).await?;
    render_rankings(&rankings, None);

    let target = match municipality {
        Some(id) => MunicipalityId::new(id),
        None => match rankings.first() {
            Some(entry) => entry.municipality_id.clone(),
            None => {
                println!("\nNo ranked municipalities to drill into");
                return Ok(());
            }
        },
    };

    println!();
    match service.view(&target).await {
        Ok(view) => render_view(&view),
        Err(MiiError::NotFound { municipality_id }) => {
            println!("Municipality {municipality_id} is not part of the sample dataset");
        }
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

async fn recalculate_everything(
    service: &Arc<IndexService>,
    as_of: DateTime<Utc>,
) -> Result<(), AppError> {
    let results = service.recalculate_all(as_of).await?;
    let failures = results.iter().filter(|(_, result)| result.is_err()).count();

    for (id, result) in &results {
        match result {
            Ok(outcome) => render_outcome(outcome),
            Err(err) => println!("- {id}: failed ({err})"),
        }
    }
    println!(
        "{} recalculated, {} failed",
        results.len() - failures,
        failures
    );
    Ok(())
}

fn render_outcome(outcome: &RecalculationOutcome) {
    let rank = outcome
        .rank
        .map(|rank| format!("rank {rank}"))
        .unwrap_or_else(|| "unranked".to_string());
    let note = if outcome.created {
        ""
    } else {
        " (already committed for this as-of)"
    };
    println!(
        "- {}: {:.2} | {} | snapshot {}{}",
        outcome.municipality_id, outcome.overall_score, rank, outcome.snapshot_id, note
    );
}

pub(crate) fn render_rankings(rankings: &[RankingEntry], region: Option<&str>) {
    if let Some(region) = region {
        println!("Region filter: {region} (ranks are national)");
    }
    if rankings.is_empty() {
        println!("No scored municipalities");
        return;
    }
    for entry in rankings {
        println!(
            "{:>3}. {} / {} ({}, {:?}) {}",
            entry.rank,
            entry.name.en,
            entry.name.ar,
            entry.region,
            entry.city_type,
            entry.display_score
        );
    }
}

pub(crate) fn render_view(view: &MiiView) {
    println!(
        "{} / {} | {} | {} | population {}",
        view.name.en, view.name.ar, view.region, view.city_type_label, view.population
    );

    match (view.display_score, view.rank) {
        (Some(score), Some(rank)) => println!(
            "Innovation index {score} | rank {rank} of {}",
            view.ranked_municipalities
        ),
        (Some(score), None) => println!("Innovation index {score} | not ranked"),
        _ => println!("Innovation index not yet calculated"),
    }
    println!("Live score from current records: {:.2}", view.live_overall_score);
    if let Some(average) = view.national_average {
        println!("National average: {average:.2}");
    }

    println!("\nDimensions");
    for entry in &view.dimensions {
        let benchmark = entry
            .national_average
            .map(|average| format!(" | national {average:.1}"))
            .unwrap_or_default();
        println!(
            "- {}: {} (weight {:.0}%){}",
            entry.dimension_label,
            entry.display_value,
            entry.weight * 100.0,
            benchmark
        );
    }

    println!("\nTrend ({})", view.history.label());
    for point in &view.trend {
        println!("- {}: {:.2}", point.year, point.score);
    }
    match view.yoy_growth {
        YoyGrowth::Measured {
            previous_year,
            latest_year,
            delta,
        } => println!(
            "Year over year {previous_year} -> {latest_year}: {delta:+.2} ({})",
            view.trend_direction.label()
        ),
        YoyGrowth::InsufficientHistory => println!("Year over year: insufficient history"),
    }

    render_insights("Strengths", &view.strengths);
    render_insights("Improvement areas", &view.improvement_areas);
}

fn render_insights(title: &str, insights: &[Insight]) {
    if insights.is_empty() {
        println!("\n{title}: none");
        return;
    }
    println!("\n{title}");
    for insight in insights {
        println!(
            "- {}: {:.1} vs national {:.1} ({:+.1})",
            insight.dimension_label, insight.value, insight.national_average, insight.delta
        );
    }
}

struct SampleMunicipality {
    id: &'static str,
    name_en: &'static str,
    name_ar: &'static str,
    region: &'static str,
    city_type: CityType,
    population: u64,
    is_active: bool,
    /// open, in progress, resolved, archived
    challenges: [usize; 4],
    /// planning, active, completed, scaled, terminated
    pilots: [usize; 5],
    /// active, ended
    partnerships: [usize; 2],
    history: &'static [(i32, [f64; 6])],
}

const SAMPLE_MUNICIPALITIES: &[SampleMunicipality] = &[
    SampleMunicipality {
        id: "riyadh",
        name_en: "Riyadh",
        name_ar: "الرياض",
        region: "Riyadh",
        city_type: CityType::Capital,
        population: 7_000_000,
        is_active: true,
        challenges: [6, 3, 4, 2],
        pilots: [2, 5, 4, 2, 1],
        partnerships: [5, 1],
        history: &[
            (2023, [80.0, 52.0, 60.0, 80.0, 60.0, 40.0]),
            (2024, [100.0, 61.0, 80.0, 100.0, 100.0, 48.0]),
        ],
    },
    SampleMunicipality {
        id: "jeddah",
        name_en: "Jeddah",
        name_ar: "جدة",
        region: "Makkah",
        city_type: CityType::MajorCity,
        population: 3_800_000,
        is_active: true,
        challenges: [5, 2, 3, 1],
        pilots: [1, 4, 3, 1, 1],
        partnerships: [4, 0],
        history: &[
            (2023, [70.0, 45.0, 60.0, 60.0, 40.0, 35.0]),
            (2024, [90.0, 55.0, 80.0, 80.0, 60.0, 42.0]),
        ],
    },
    SampleMunicipality {
        id: "makkah",
        name_en: "Makkah",
        name_ar: "مكة المكرمة",
        region: "Makkah",
        city_type: CityType::MajorCity,
        population: 2_400_000,
        is_active: true,
        challenges: [3, 2, 1, 0],
        pilots: [1, 2, 2, 0, 1],
        partnerships: [2, 1],
        history: &[
            (2023, [50.0, 40.0, 40.0, 40.0, 40.0, 50.0]),
            (2024, [60.0, 38.0, 40.0, 40.0, 40.0, 40.0]),
        ],
    },
    SampleMunicipality {
        id: "dammam",
        name_en: "Dammam",
        name_ar: "الدمام",
        region: "Eastern Province",
        city_type: CityType::MajorCity,
        population: 1_500_000,
        is_active: true,
        challenges: [4, 1, 2, 1],
        pilots: [0, 3, 2, 1, 0],
        partnerships: [3, 0],
        history: &[
            (2023, [60.0, 40.0, 40.0, 40.0, 40.0, 40.0]),
            (2024, [70.0, 44.0, 60.0, 60.0, 60.0, 50.0]),
        ],
    },
    SampleMunicipality {
        id: "abha",
        name_en: "Abha",
        name_ar: "أبها",
        region: "Asir",
        city_type: CityType::City,
        population: 400_000,
        is_active: true,
        challenges: [5, 0, 1, 0],
        pilots: [0, 2, 3, 0, 0],
        partnerships: [2, 0],
        history: &[
            (2023, [40.0, 25.0, 20.0, 20.0, 40.0, 50.0]),
            (2024, [50.0, 30.0, 40.0, 40.0, 40.0, 50.0]),
        ],
    },
    SampleMunicipality {
        id: "al-ula",
        name_en: "AlUla",
        name_ar: "العلا",
        region: "Madinah",
        city_type: CityType::Town,
        population: 45_000,
        is_active: true,
        challenges: [1, 1, 0, 0],
        pilots: [1, 1, 0, 0, 0],
        partnerships: [1, 0],
        history: &[(2024, [20.0, 10.0, 20.0, 20.0, 0.0, 0.0])],
    },
    SampleMunicipality {
        id: "al-qurayyat",
        name_en: "Al Qurayyat",
        name_ar: "القريات",
        region: "Al Jawf",
        city_type: CityType::Town,
        population: 150_000,
        is_active: false,
        challenges: [1, 0, 0, 0],
        pilots: [0, 0, 0, 0, 0],
        partnerships: [0, 0],
        history: &[],
    },
];

const CHALLENGE_STATUSES: [ChallengeStatus; 4] = [
    ChallengeStatus::Open,
    ChallengeStatus::InProgress,
    ChallengeStatus::Resolved,
    ChallengeStatus::Archived,
];

const PILOT_STAGES: [PilotStage; 5] = [
    PilotStage::Planning,
    PilotStage::Active,
    PilotStage::Completed,
    PilotStage::Scaled,
    PilotStage::Terminated,
];

const PARTNERSHIP_STATUSES: [PartnershipStatus; 2] =
    [PartnershipStatus::Active, PartnershipStatus::Ended];

/// Built-in dataset used when no seed file is supplied.
pub(crate) fn sample_seed() -> SeedData {
    let mut seed = SeedData::default();

    for sample in SAMPLE_MUNICIPALITIES {
        let municipality_id = MunicipalityId::new(sample.id);
        seed.municipalities.push(Municipality {
            id: municipality_id.clone(),
            name: DisplayName {
                en: sample.name_en.to_string(),
                ar: sample.name_ar.to_string(),
            },
            region: sample.region.to_string(),
            city_type: sample.city_type,
            population: sample.population,
            mii_score: None,
            mii_rank: None,
            latest_snapshot_id: None,
            active_pilots: 0,
            completed_pilots: 0,
            is_active: sample.is_active,
            is_deleted: false,
        });

        let challenge_statuses = expand(&CHALLENGE_STATUSES, &sample.challenges);
        for (index, status) in challenge_statuses.into_iter().enumerate() {
            seed.challenges.push(Challenge {
                id: format!("{}-challenge-{index}", sample.id),
                municipality_id: municipality_id.clone(),
                status,
                is_deleted: false,
            });
        }

        let pilot_stages = expand(&PILOT_STAGES, &sample.pilots);
        for (index, stage) in pilot_stages.into_iter().enumerate() {
            seed.pilots.push(Pilot {
                id: format!("{}-pilot-{index}", sample.id),
                municipality_id: municipality_id.clone(),
                stage,
                is_deleted: false,
            });
        }

        let partnership_statuses = expand(&PARTNERSHIP_STATUSES, &sample.partnerships);
        for (index, status) in partnership_statuses.into_iter().enumerate() {
            seed.partnerships.push(Partnership {
                id: format!("{}-partnership-{index}", sample.id),
                municipality_id: municipality_id.clone(),
                status,
                is_deleted: false,
            });
        }

        for (year, values) in sample.history {
            let Some(as_of) = Utc.with_ymd_and_hms(*year, 12, 31, 12, 0, 0).single() else {
                continue;
            };
            let dimensions = DimensionScores::new(*values);
            seed.snapshots.push(ScoreSnapshot {
                id: SnapshotId::generate(),
                municipality_id: municipality_id.clone(),
                as_of,
                overall_score: dimensions.overall(),
                dimensions,
                formula_version: FORMULA_VERSION,
            });
        }
    }

    seed
}

fn expand<T: Copy>(kinds: &[T], counts: &[usize]) -> Vec<T> {
    kinds
        .iter()
        .zip(counts)
        .flat_map(|(kind, count)| std::iter::repeat(*kind).take(*count))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::build_service;
    use innovation_index::mii::{
        BroadcastPublisher, HistoryStatus, InMemoryEntityStore, RetryPolicy,
    };
    use std::collections::HashSet;

    fn sample_service() -> Arc<IndexService> {
        build_service(
            InMemoryEntityStore::from_seed(sample_seed()),
            BroadcastPublisher::default(),
            RetryPolicy::default(),
        )
    }

    #[test]
    fn sample_records_reference_known_municipalities() {
        let seed = sample_seed();
        let known: HashSet<&MunicipalityId> =
            seed.municipalities.iter().map(|m| &m.id).collect();

        assert!(seed.challenges.iter().all(|c| known.contains(&c.municipality_id)));
        assert!(seed.pilots.iter().all(|p| known.contains(&p.municipality_id)));
        assert!(seed.partnerships.iter().all(|p| known.contains(&p.municipality_id)));
        assert!(seed.snapshots.iter().all(|s| known.contains(&s.municipality_id)));

        let pilot_ids: HashSet<&str> = seed.pilots.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(pilot_ids.len(), seed.pilots.len());
    }

    #[tokio::test]
    async fn seeded_history_produces_committed_ranking() {
        let service = sample_service();
        let rankings = service.rankings(None).await.expect("rankings");

        assert_eq!(rankings.len(), 6);
        assert_eq!(rankings[0].municipality_id, MunicipalityId::new("riyadh"));
        assert!(rankings
            .iter()
            .all(|entry| entry.municipality_id != MunicipalityId::new("al-qurayyat")));
    }

    #[tokio::test]
    async fn recalculation_extends_history_for_drill_down() {
        let service = sample_service();
        let as_of = Utc
            .with_ymd_and_hms(2025, 6, 30, 12, 0, 0)
            .single()
            .expect("valid timestamp");

        let results = service.recalculate_all(as_of).await.expect("recalculate");
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|(_, result)| result.is_ok()));

        let view = service
            .view(&MunicipalityId::new("abha"))
            .await
            .expect("view");
        assert_eq!(view.history, HistoryStatus::Sufficient);
        let years: Vec<i32> = view.trend.iter().map(|point| point.year).collect();
        assert_eq!(years, vec![2023, 2024, 2025]);
        assert_eq!(view.display_score, Some(50));

        let ranks: Vec<u32> = service
            .rankings(None)
            .await
            .expect("rankings")
            .iter()
            .map(|entry| entry.rank)
            .collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5, 6]);
    }
}
