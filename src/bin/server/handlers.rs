//! HTTP Handlers for the Metric Store Server
//!
//! This module contains all HTTP endpoint handlers for the REST API.
//!
//! Request bodies are read as raw bytes and decoded here so that every
//! decoding failure, including `NaN` literals, produces the same
//! `MALFORMED_REQUEST` error body as the rest of the API.

use super::types::*;
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metric_store::archive::{ArchiveCycleReport, ArchiveStatsSnapshot};
use metric_store::clock::Clock;
use metric_store::engine::{ArchiveQueryResult, MetricStoreStats};
use metric_store::ingestion::{FlushReport, IngestionStats};
use metric_store::{
    AggregationRequest, Error, MetricDefinition, MetricStore, NewMetric, QueryResult,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, error};

// =============================================================================
// Application State
// =============================================================================

/// Shared application state
pub struct AppState {
    /// The metric store instance
    pub store: MetricStore,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Library error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidDefinition(_)
            | Error::MalformedRequest(_)
            | Error::EmptyBatch
            | Error::InvalidInterval(_)
            | Error::UnsupportedAggregation(_)
            | Error::InvalidQuery(_)
            | Error::Rejected(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlreadyExists(_) => StatusCode::CONFLICT,
            Error::Backpressure(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::Unavailable(_) | Error::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Configuration(_) | Error::Service(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self.0, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = %self.0, "Request rejected");
        }
        let body = ErrorResponse {
            error: self.0.to_string(),
            code: self.0.code(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<(StatusCode, Json<T>), ApiError>;

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> std::result::Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError(Error::MalformedRequest(format!("invalid JSON body: {}", e))))
}

// =============================================================================
// Health & Stats Handlers
// =============================================================================

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let services = state.store.service_status();
    if state.store.is_healthy() {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "UP",
                services,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "DOWN",
                services,
            }),
        )
    }
}

/// Combined store statistics
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Json<MetricStoreStats> {
    Json(state.store.stats())
}

// =============================================================================
// Catalog Handlers
// =============================================================================

/// Register a metric
pub async fn register_metric(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<MetricDefinition> {
    let request: NewMetric = parse_body(&body)?;
    let definition = state.store.register_metric(request)?;
    debug!(metric = %definition.name, id = %definition.id, "Metric registered");
    Ok((StatusCode::CREATED, Json(definition.as_ref().clone())))
}

/// List registered metrics
pub async fn list_metrics(State(state): State<Arc<AppState>>) -> Json<Vec<MetricDefinition>> {
    Json(
        state
            .store
            .list_metrics()
            .iter()
            .map(|def| def.as_ref().clone())
            .collect(),
    )
}

/// Fetch one metric definition
pub async fn get_metric(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<MetricDefinition> {
    let definition = state.store.metric(&name)?;
    Ok((StatusCode::OK, Json(definition.as_ref().clone())))
}

/// Deregister a metric and purge its data
pub async fn delete_metric(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    state.store.deregister_metric(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Ingestion Handlers
// =============================================================================

/// Admit a batch of samples
pub async fn ingest(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<IngestResponse> {
    let request: IngestRequest = parse_body(&body)?;
    let samples = request.into_samples(state.store.clock().now_millis())?;
    let ack = state.store.ingest(samples)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            status: "accepted",
            accepted: ack.accepted,
            buffered: ack.buffered,
        }),
    ))
}

/// Ingestion counters
pub async fn ingestion_stats(State(state): State<Arc<AppState>>) -> Json<IngestionStats> {
    Json(state.store.ingestion_stats())
}

/// Flush buffered samples now
pub async fn flush(State(state): State<Arc<AppState>>) -> ApiResult<FlushReport> {
    let report = state.store.flush().await?;
    Ok((StatusCode::OK, Json(report)))
}

// =============================================================================
// Query Handlers
// =============================================================================

/// Run an aggregation query
pub async fn query(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<QueryResult> {
    let request: QueryRequest = parse_body(&body)?;
    let request = AggregationRequest::try_from(request)?;
    let result = state.store.query(request).await?;
    Ok((StatusCode::OK, Json(result)))
}

// =============================================================================
// Archive Handlers
// =============================================================================

/// Archive counters
pub async fn archive_stats(State(state): State<Arc<AppState>>) -> ApiResult<ArchiveStatsSnapshot> {
    let stats = state.store.archive_stats()?;
    Ok((StatusCode::OK, Json(stats)))
}

/// Archived points of one metric
pub async fn archive_query(
    State(state): State<Arc<AppState>>,
    params: std::result::Result<Query<ArchiveQueryParams>, QueryRejection>,
) -> ApiResult<ArchiveQueryResult> {
    let Query(params) =
        params.map_err(|e| ApiError(Error::MalformedRequest(e.body_text())))?;
    let (start, end) = params.bounds()?;
    let result = state.store.archive_query(&params.metric_id, start, end)?;
    Ok((StatusCode::OK, Json(result)))
}

/// Run one archival cycle now
pub async fn archive_trigger(State(state): State<Arc<AppState>>) -> ApiResult<ArchiveCycleReport> {
    let report = state.store.trigger_archival().await?;
    Ok((StatusCode::OK, Json(report)))
}
