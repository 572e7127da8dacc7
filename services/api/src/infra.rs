use chrono::{DateTime, Utc};
use clap::Args;
use innovation_index::config::AppConfig;
use innovation_index::error::AppError;
use innovation_index::mii::{
    BroadcastPublisher, InMemoryEntityStore, MiiService, RetryPolicy, SeedData,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

use crate::demo::sample_seed;

pub(crate) type IndexService = MiiService<InMemoryEntityStore, BroadcastPublisher>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Args, Debug, Default, Clone)]
pub(crate) struct SeedArgs {
    /// JSON seed file with municipalities, challenges, pilots, partnerships, and
    /// historical snapshots. The built-in sample dataset is used when omitted.
    #[arg(long, value_name = "FILE")]
    pub(crate) seed: Option<PathBuf>,
}

impl SeedArgs {
    pub(crate) fn load_store(&self) -> Result<InMemoryEntityStore, AppError> {
        let seed = match &self.seed {
            Some(path) => read_seed(path)?,
            None => sample_seed(),
        };
        info!(
            municipalities = seed.municipalities.len(),
            snapshots = seed.snapshots.len(),
            source = %self.source_label(),
            "entity store seeded"
        );
        Ok(InMemoryEntityStore::from_seed(seed))
    }

    pub(crate) fn source_label(&self) -> String {
        match &self.seed {
            Some(path) => path.display().to_string(),
            None => "built-in sample dataset".to_string(),
        }
    }
}

pub(crate) fn read_seed(path: &Path) -> Result<SeedData, AppError> {
    let raw = std::fs::read_to_string(path)?;
    let seed = serde_json::from_str(&raw)?;
    Ok(seed)
}

pub(crate) fn build_service(
    store: InMemoryEntityStore,
    publisher: BroadcastPublisher,
    policy: RetryPolicy,
) -> Arc<IndexService> {
    Arc::new(MiiService::new(Arc::new(store), Arc::new(publisher), policy))
}

/// Store wiring shared by the one-shot CLI commands.
pub(crate) fn cli_service(seed: &SeedArgs) -> Result<Arc<IndexService>, AppError> {
    let config = AppConfig::load()?;
    let store = seed.load_store()?;
    Ok(build_service(
        store,
        BroadcastPublisher::default(),
        config.engine.retry_policy(),
    ))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| format!("failed to parse '{raw}' as an RFC 3339 timestamp ({err})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timestamp_normalizes_offsets_to_utc() {
        let parsed = parse_timestamp("2025-03-01T12:00:00+03:00").expect("valid timestamp");
        assert_eq!(parsed.to_rfc3339(), "2025-03-01T09:00:00+00:00");
        assert!(parse_timestamp("March 1st").is_err());
    }

    #[test]
    fn read_seed_reports_malformed_json() {
        let path = std::env::temp_dir().join(format!(
            "innovation-index-seed-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, "{ \"municipalities\": [ { \"id\": 7 } ] }").expect("write seed");

        let result = read_seed(&path);
        let _ = std::fs::remove_file(&path);

        assert!(matches!(result, Err(AppError::Seed(_))));
    }

    #[test]
    fn missing_seed_file_is_an_io_error() {
        let result = read_seed(Path::new("/nonexistent/innovation-index/seed.json"));
        assert!(matches!(result, Err(AppError::Io(_))));
    }
}
