//! API route definitions.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::state::AppState;
use crate::event::ledger::DEFAULT_RECENT_LIMIT;
use crate::event::Event;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/events", post(submit_event))
        .route("/incidents", get(list_incidents))
        .route("/ledger", get(ledger))
        .route("/alerts", post(manual_alert))
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": meta()
    }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let sentinel = &state.sentinel;
    Json(json!({
        "data": {
            "components": sentinel.status(),
            "active_incidents": sentinel.active_incidents().len(),
            "signatures": sentinel.signatures().signatures().len(),
            "baselines": sentinel.anomalies().baselines(),
            "rule_update_interval_secs": sentinel.config().detection.update_interval_secs,
            "monitoring": &sentinel.config().monitoring,
        },
        "meta": meta()
    }))
}

async fn submit_event(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let event = Event::from_json(body);
    let source = event.source.clone();
    state.sentinel.submit(event).await;
    (
        StatusCode::ACCEPTED,
        Json(json!({ "data": { "accepted": true, "source": source }, "meta": meta() })),
    )
}

async fn list_incidents(State(state): State<AppState>) -> Json<Value> {
    let incidents = state.sentinel.active_incidents();
    let total = incidents.len();
    Json(json!({ "data": incidents, "meta": { "total": total } }))
}

#[derive(Debug, Deserialize)]
struct LedgerQuery {
    limit: Option<usize>,
}

async fn ledger(State(state): State<AppState>, Query(query): Query<LedgerQuery>) -> Json<Value> {
    let entries = state
        .sentinel
        .recent(query.limit.unwrap_or(DEFAULT_RECENT_LIMIT));
    let total = entries.len();
    Json(json!({ "data": entries, "meta": { "total": total } }))
}

async fn manual_alert(
    State(state): State<AppState>,
    Json(alert): Json<Map<String, Value>>,
) -> (StatusCode, Json<Value>) {
    state.sentinel.handle_manual_alert(&alert).await;
    (
        StatusCode::ACCEPTED,
        Json(json!({ "data": { "accepted": true }, "meta": meta() })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SentinelConfig;
    use crate::Sentinel;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use std::sync::Arc;
    use tower::ServiceExt; // for `oneshot`

    fn app() -> (Router, Arc<Sentinel>) {
        let sentinel = Arc::new(Sentinel::new(SentinelConfig::default()).unwrap());
        sentinel.start();
        let app = crate::api::router(AppState {
            sentinel: sentinel.clone(),
        });
        (app, sentinel)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), 1_000_000)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _) = app();
        let request = Request::builder()
            .uri("/api/v1/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["data"]["status"], "ok");
        assert!(json["meta"]["version"].is_string());
    }

    #[tokio::test]
    async fn test_status_reports_components() {
        let (app, _) = app();
        let request = Request::builder()
            .uri("/api/v1/status")
            .body(Body::empty())
            .unwrap();

        let json = body_json(app.oneshot(request).await.unwrap()).await;
        assert_eq!(json["data"]["components"]["running"], true);
        assert_eq!(json["data"]["components"]["signature_engine"], "active");
        assert_eq!(json["data"]["signatures"], 3);
        assert_eq!(json["data"]["baselines"]["cpu_usage"], 50.0);
        assert_eq!(json["data"]["rule_update_interval_secs"], 300);
        assert_eq!(json["data"]["monitoring"]["metrics_interval_secs"], 60);
        assert_eq!(json["data"]["monitoring"]["data_source_timeout_secs"], 5);
        assert_eq!(json["data"]["monitoring"]["alert_channels"], json!(["console", "email"]));
    }

    #[tokio::test]
    async fn test_submitted_threat_opens_incident() {
        let (app, sentinel) = app();
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/v1/events",
                json!({ "source": "edge-1", "log": "malicious_pattern observed" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        sentinel.settle().await;

        let request = Request::builder()
            .uri("/api/v1/incidents")
            .body(Body::empty())
            .unwrap();
        let json = body_json(app.clone().oneshot(request).await.unwrap()).await;
        assert_eq!(json["meta"]["total"], 1);
        assert_eq!(json["data"][0]["rule"], "malware_signature");
        assert_eq!(json["data"][0]["status"], "mitigated");

        let request = Request::builder()
            .uri("/api/v1/ledger?limit=2")
            .body(Body::empty())
            .unwrap();
        let json = body_json(app.oneshot(request).await.unwrap()).await;
        assert_eq!(json["meta"]["total"], 2);
        assert_eq!(json["data"][1]["kind"], "response:completed");
    }

    #[tokio::test]
    async fn test_manual_alert_is_accepted() {
        let (app, _) = app();
        let response = app
            .oneshot(post_json("/api/v1/alerts", json!({ "title": "manual", "level": 3 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (app, _) = app();
        let request = Request::builder()
            .uri("/api/v2/nothing")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
