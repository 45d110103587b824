//! Route configuration for the collector.

use std::sync::Arc;

use axum::routing::{Router, get};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::{get_device, health_check, list_nodes};
use crate::session::ws_upgrade;
use crate::state::CollectorState;

/// Create the collector router.
///
/// The `/ws` route needs `ConnectInfo<SocketAddr>`, so serve the router with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_router(state: Arc<CollectorState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(list_nodes))
        .route("/get_device", get(get_device))
        .route("/health", get(health_check))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectorConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn make_test_state() -> Arc<CollectorState> {
        Arc::new(CollectorState::new(CollectorConfig::default()))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, json) = get_json(create_router(make_test_state()), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["nodes"], 0);
        assert_eq!(json["pending"], 0);
    }

    #[tokio::test]
    async fn test_list_empty() {
        let (status, json) = get_json(create_router(make_test_state()), "/").await;

        assert_eq!(status, StatusCode::OK);
        assert!(json.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_device_empty() {
        let (status, json) = get_json(create_router(make_test_state()), "/get_device").await;

        assert_eq!(status, StatusCode::OK);
        assert!(json.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_device_bad_size() {
        let (status, json) = get_json(
            create_router(make_test_state()),
            "/get_device?gpu_memory_total=lots",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_get_device_fractional_gpu_utilization() {
        use nodewatch_proto::{CpuInfo, GpuInfo, Report};

        let state = make_test_state();
        let gpu = |index| GpuInfo {
            index,
            fan_speed: None,
            temperature: 40,
            gpu_utilization: 20,
            memory_total: 24_000_000_000,
            memory_used: 4_000_000_000,
            memory_free: 20_000_000_000,
        };
        let report = Report::new(
            "gpu-box-1",
            CpuInfo {
                cpu_percent: 10.0,
                cpu_count: 8,
            },
            vec![gpu(0), gpu(1)],
        )
        .with_observed_ip("10.0.0.7");
        state.store().upsert(&report).unwrap();

        let (status, json) = get_json(
            create_router(Arc::clone(&state)),
            "/get_device?max_gpu_utilization=20.5",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);

        let (status, json) =
            get_json(create_router(state), "/get_device?max_gpu_utilization=19.5").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_device_malformed_query_is_json_error() {
        let (status, json) = get_json(
            create_router(make_test_state()),
            "/get_device?cpu_count=many",
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "invalid_request");
        assert!(!json["message"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_device_numeric_only_one() {
        let (status, json) = get_json(
            create_router(make_test_state()),
            "/get_device?only_one=1",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(json.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let app = create_router(make_test_state());
        let request = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
