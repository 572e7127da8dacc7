use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::domain::MunicipalityId;
use super::repository::{EntityStore, RecalculationPublisher};
use super::service::{MiiError, MiiService};
use super::views::RecalculationView;

#[derive(Debug, Default, Deserialize)]
pub struct RecalculateParams {
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RankingParams {
    #[serde(default)]
    pub region: Option<String>,
}

/// Router builder exposing the drill-down, ranking, and recalculation endpoints.
pub fn index_router<S, P>(service: Arc<MiiService<S, P>>) -> Router
where
    S: EntityStore + 'static,
    P: RecalculationPublisher + 'static,
{
    Router::new()
        .route("/api/v1/mii/rankings", get(rankings_handler::<S, P>))
        .route(
            "/api/v1/mii/municipalities/:municipality_id",
            get(view_handler::<S, P>),
        )
        .route(
            "/api/v1/mii/municipalities/:municipality_id/recalculate",
            post(recalculate_handler::<S, P>),
        )
        .with_state(service)
}

pub(crate) async fn recalculate_handler<S, P>(
    State(service): State<Arc<MiiService<S, P>>>,
    Path(municipality_id): Path<String>,
    Query(params): Query<RecalculateParams>,
) -> Response
where
    S: EntityStore + 'static,
    P: RecalculationPublisher + 'static,
{
    let id = MunicipalityId(municipality_id);
    let result = match params.as_of {
        Some(as_of) => service.recalculate_as_of(&id, as_of).await,
        None => service.recalculate(&id).await,
    };

    match result {
        Ok(outcome) => {
            let view = RecalculationView::from(&outcome);
            (StatusCode::OK, axum::Json(view)).into_response()
        }
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn view_handler<S, P>(
    State(service): State<Arc<MiiService<S, P>>>,
    Path(municipality_id): Path<String>,
) -> Response
where
    S: EntityStore + 'static,
    P: RecalculationPublisher + 'static,
{
    let id = MunicipalityId(municipality_id);
    match service.view(&id).await {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn rankings_handler<S, P>(
    State(service): State<Arc<MiiService<S, P>>>,
    Query(params): Query<RankingParams>,
) -> Response
where
    S: EntityStore + 'static,
    P: RecalculationPublisher + 'static,
{
    match service.rankings(params.region.as_deref()).await {
        Ok(rankings) => {
            let payload = json!({ "rankings": rankings });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(&err),
    }
}

/// Maps engine failures onto HTTP statuses. Internal details of computation
/// failures stay in the logs.
pub fn error_response(err: &MiiError) -> Response {
    let (status, payload) = match err {
        MiiError::NotFound { municipality_id } => (
            StatusCode::NOT_FOUND,
            json!({
                "error": "municipality not found",
                "municipality_id": municipality_id,
            }),
        ),
        MiiError::InvalidSeries {
            municipality_id,
            source,
        } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({
                "error": "score history failed integrity checks",
                "municipality_id": municipality_id,
                "detail": source.to_string(),
            }),
        ),
        MiiError::Transient { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "error": "entity store temporarily unavailable; try again later",
                "retryable": true,
            }),
        ),
        MiiError::Computation { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": "score computation failed" }),
        ),
    };
    (status, axum::Json(payload)).into_response()
}
