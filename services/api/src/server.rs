use crate::cli::ServeArgs;
use crate::infra::{build_service, AppState};
use crate::routes::with_index_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use innovation_index::config::AppConfig;
use innovation_index::error::AppError;
use innovation_index::mii::{BroadcastPublisher, ScoreRecalculated};
use innovation_index::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = args.seed.load_store()?;
    let publisher = BroadcastPublisher::default();
    tokio::spawn(log_recalculations(publisher.subscribe()));
    let service = build_service(store, publisher, config.engine.retry_policy());

    let app = with_index_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        store_timeout_ms = config.engine.store_timeout_ms,
        max_attempts = config.engine.max_attempts,
        "municipal innovation index service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

/// Downstream read-path hook: every committed recalculation is announced here.
async fn log_recalculations(mut events: Receiver<ScoreRecalculated>) {
    loop {
        match events.recv().await {
            Ok(event) => info!(
                municipality_id = %event.municipality_id,
                snapshot_id = %event.snapshot_id,
                overall_score = event.overall_score,
                rank = ?event.rank,
                created = event.created,
                "score recalculated"
            ),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "recalculation event listener lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
