//! HTTP query API.
//!
//! Recent reads come from the primary store; range, stats, and export come
//! from the secondary store and answer 503 while it is unavailable.

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use gridpulse_store::{ExportFormat, StoreError, StoredRecord};

use crate::broker::BrokerEvent;
use crate::push;
use crate::state::AppContext;

const DEFAULT_RECENT_LIMIT: i64 = 50;
const MAX_RECENT_LIMIT: i64 = 1000;
const DEFAULT_STATS_HOURS: i64 = 24;
const DEFAULT_EXPORT_DAYS: i64 = 7;

pub fn router(context: AppContext) -> Router {
    Router::new()
        .route("/api/recent/:device_id", get(recent))
        .route("/api/range/:device_id", get(range))
        .route("/api/stats/:device_id", get(stats))
        .route("/api/export/:device_id", get(export))
        .route("/api/ingest", post(ingest))
        .route("/api/health", get(health))
        .route("/ws", get(push::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(context)
}

enum ApiError {
    Store(StoreError),
    SecondaryUnavailable,
    IngestUnavailable,
    BadRequest(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ExportFormat(format) => {
                ApiError::BadRequest(format!("unsupported export format '{}'", format))
            }
            other => ApiError::Store(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::SecondaryUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "secondary store unavailable".to_string(),
            ),
            ApiError::IngestUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "ingestion pipeline unavailable".to_string(),
            ),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Store(e) => {
                tracing::error!(error = %e, "Store query failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Deserialize)]
struct RecentQuery {
    limit: Option<i64>,
}

async fn recent(
    State(context): State<AppContext>,
    Path(device_id): Path<String>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<StoredRecord>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .clamp(1, MAX_RECENT_LIMIT);

    let rows = context.primary.recent_by_device(&device_id, limit).await?;
    Ok(Json(rows))
}

#[derive(Deserialize)]
struct RangeQuery {
    from: i64,
    to: i64,
}

async fn range(
    State(context): State<AppContext>,
    Path(device_id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<serde_json::Value>>, ApiError> {
    let secondary = context
        .secondary
        .get()
        .ok_or(ApiError::SecondaryUnavailable)?;

    let rows = secondary
        .range_by_device(&device_id, query.from, query.to)
        .await?;
    Ok(Json(rows))
}

#[derive(Deserialize)]
struct StatsQuery {
    hours: Option<i64>,
}

async fn stats(
    State(context): State<AppContext>,
    Path(device_id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Response, ApiError> {
    let hours = query.hours.unwrap_or(DEFAULT_STATS_HOURS);
    if hours <= 0 {
        return Err(ApiError::BadRequest("hours must be positive".to_string()));
    }

    let secondary = context
        .secondary
        .get()
        .ok_or(ApiError::SecondaryUnavailable)?;

    let stats = secondary.stats_by_device(&device_id, hours).await?;
    Ok(Json(stats).into_response())
}

#[derive(Deserialize)]
struct ExportQuery {
    days: Option<i64>,
    format: Option<String>,
}

async fn export(
    State(context): State<AppContext>,
    Path(device_id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let format: ExportFormat = query.format.as_deref().unwrap_or("csv").parse()?;

    let days = query.days.unwrap_or(DEFAULT_EXPORT_DAYS);
    if days <= 0 {
        return Err(ApiError::BadRequest("days must be positive".to_string()));
    }

    let secondary = context
        .secondary
        .get()
        .ok_or(ApiError::SecondaryUnavailable)?;

    let body = secondary.export_by_device(&device_id, days, format).await?;
    Ok(([(header::CONTENT_TYPE, format.content_type())], body).into_response())
}

#[derive(Deserialize)]
struct IngestRequest {
    topic: String,
    payload: serde_json::Value,
    device_id: Option<String>,
}

/// Inject a record through the same path broker traffic takes. Used for
/// testing deployments and backfilling.
async fn ingest(
    State(context): State<AppContext>,
    Json(request): Json<IngestRequest>,
) -> Result<StatusCode, ApiError> {
    if request.topic.is_empty() {
        return Err(ApiError::BadRequest("topic must not be empty".to_string()));
    }

    let mut payload = request.payload;
    if let (Some(device_id), Some(object)) = (request.device_id, payload.as_object_mut()) {
        object
            .entry("device_id")
            .or_insert(serde_json::Value::String(device_id));
    }

    let bytes = match &payload {
        serde_json::Value::String(s) => s.clone().into_bytes(),
        other => serde_json::to_vec(other).map_err(|e| ApiError::BadRequest(e.to_string()))?,
    };

    context
        .ingest_tx
        .send(BrokerEvent::Message {
            topic: request.topic,
            payload: bytes,
        })
        .await
        .map_err(|_| ApiError::IngestUnavailable)?;

    Ok(StatusCode::ACCEPTED)
}

async fn health(State(context): State<AppContext>) -> Json<serde_json::Value> {
    Json(json!({
        "brokerConnected": context.health.broker_connected(),
        "secondaryAvailable": context.secondary.available(),
        "listeners": context.hub.listener_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use gridpulse_common::normalize;
    use gridpulse_store::{PrimaryStore, TelemetryWriter};

    use crate::hub::FanoutHub;
    use crate::state::{Health, SecondarySlot};

    async fn test_context() -> (AppContext, mpsc::Receiver<BrokerEvent>) {
        let primary = PrimaryStore::open_in_memory().await.unwrap();
        let (ingest_tx, ingest_rx) = mpsc::channel(16);

        let context = AppContext {
            primary,
            secondary: SecondarySlot::new(None),
            hub: FanoutHub::new(),
            health: Arc::new(Health::new()),
            ingest_tx,
        };
        (context, ingest_rx)
    }

    async fn get_json(context: AppContext, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(context)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap();
        (status, value)
    }

    #[tokio::test]
    async fn test_recent_returns_newest_first() {
        let (context, _rx) = test_context().await;

        for (ts, voltage) in [(1000, 12.0), (2000, 12.5)] {
            let mut record = normalize(
                "energy/solar/1/telemetry",
                format!("{{\"voltage\":{}}}", voltage).as_bytes(),
            );
            record.ts = ts;
            context.primary.insert(&record).await.unwrap();
        }

        let (status, body) = get_json(context, "/api/recent/solar_1").await;
        assert_eq!(status, StatusCode::OK);

        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["ts"], 2000);
        assert_eq!(rows[0]["payload"]["voltage"], 12.5);
    }

    #[tokio::test]
    async fn test_recent_respects_limit_param() {
        let (context, _rx) = test_context().await;

        for ts in 0..5 {
            let mut record = normalize("energy/solar/1/telemetry", br#"{"voltage":12.0}"#);
            record.ts = ts;
            context.primary.insert(&record).await.unwrap();
        }

        let (status, body) = get_json(context, "/api/recent/solar_1?limit=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_recent_unknown_device_is_empty() {
        let (context, _rx) = test_context().await;

        let (status, body) = get_json(context, "/api/recent/nope").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_range_without_secondary_is_503() {
        let (context, _rx) = test_context().await;

        let (status, body) = get_json(context, "/api/range/solar_1?from=0&to=9999").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "secondary store unavailable");
    }

    #[tokio::test]
    async fn test_stats_without_secondary_is_503() {
        let (context, _rx) = test_context().await;

        let (status, _body) = get_json(context, "/api/stats/solar_1").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_export_bad_format_is_400() {
        let (context, _rx) = test_context().await;

        let (status, body) = get_json(context, "/api/export/solar_1?format=xml").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("xml"));
    }

    #[tokio::test]
    async fn test_stats_rejects_nonpositive_hours() {
        let (context, _rx) = test_context().await;

        let (status, _body) = get_json(context, "/api/stats/solar_1?hours=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_reports_broker_state() {
        let (context, _rx) = test_context().await;
        context.health.set_broker_connected(true);

        let (status, body) = get_json(context, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["brokerConnected"], true);
        assert_eq!(body["secondaryAvailable"], false);
    }

    #[tokio::test]
    async fn test_ingest_injects_broker_event() {
        let (context, mut rx) = test_context().await;

        let request = Request::builder()
            .method("POST")
            .uri("/api/ingest")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"topic":"energy/solar/1/telemetry","payload":{"voltage":12.4}}"#,
            ))
            .unwrap();

        let response = router(context).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        match rx.recv().await.unwrap() {
            BrokerEvent::Message { topic, payload } => {
                assert_eq!(topic, "energy/solar/1/telemetry");
                let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
                assert_eq!(value["voltage"], 12.4);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ingest_applies_explicit_device_id() {
        let (context, mut rx) = test_context().await;

        let request = Request::builder()
            .method("POST")
            .uri("/api/ingest")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                r#"{"topic":"battery/data","payload":{"voltage":48.1},"device_id":"battery_9"}"#,
            ))
            .unwrap();

        let response = router(context).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        match rx.recv().await.unwrap() {
            BrokerEvent::Message { payload, .. } => {
                let record = normalize("battery/data", &payload);
                assert_eq!(record.device_id, "battery_9");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ingest_rejects_empty_topic() {
        let (context, _rx) = test_context().await;

        let request = Request::builder()
            .method("POST")
            .uri("/api/ingest")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"topic":"","payload":{}}"#))
            .unwrap();

        let response = router(context).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
