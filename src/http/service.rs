//! Route handlers.

use axum::extract::{ConnectInfo, State};
use axum::http::{Extensions, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RateConfig;
use crate::error::RatekeeperError;
use crate::ratelimit::{self, Decision, RateLimiter, Snapshot, SwappableLimiter};

/// Header carrying the caller's identity.
pub const IDENTITY_HEADER: &str = "x-user";

/// Identity used when neither the header nor the peer address is known.
const ANONYMOUS: &str = "anonymous";

type SharedLimiter = Arc<SwappableLimiter>;

/// Build the application router around a swappable limiter.
pub fn router(limiter: SharedLimiter) -> Router {
    Router::new()
        .route("/limited", get(limited))
        .route("/unlimited", get(unlimited))
        .route("/stats", get(stats))
        .route("/admin/limiter", get(active_engine).put(replace_limiter))
        .route("/admin/revert", post(revert_limiter))
        .with_state(limiter)
}

#[derive(Debug, Serialize)]
struct LimitedResponse {
    status: u16,
    identity: String,
    decision: Decision,
    before: Snapshot,
    after: Snapshot,
}

#[derive(Debug, Serialize)]
struct EngineInfo {
    algorithm: &'static str,
    limit: u64,
    previous: Option<&'static str>,
}

impl EngineInfo {
    fn of(limiter: &SwappableLimiter) -> Self {
        Self {
            algorithm: limiter.name(),
            limit: limiter.limit(),
            previous: limiter.previous().map(|p| p.name()),
        }
    }
}

/// Failures surfaced by the admin routes.
#[derive(Debug)]
enum AdminError {
    /// The submitted configuration did not produce an engine
    Build(RatekeeperError),
    /// There is no previous engine to go back to
    NoHistory,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AdminError::Build(e @ RatekeeperError::Runtime(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AdminError::Build(e @ RatekeeperError::Io(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AdminError::Build(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            AdminError::NoHistory => (
                StatusCode::CONFLICT,
                "no previous limiter to revert to".to_string(),
            ),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Identity from the header, then the peer address.
fn identify(headers: &HeaderMap, extensions: &Extensions) -> String {
    let from_header = headers
        .get(IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(identity) = from_header {
        return identity.to_string();
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(peer)| peer.ip().to_string())
        .unwrap_or_else(|| ANONYMOUS.to_string())
}

async fn limited(
    State(limiter): State<SharedLimiter>,
    headers: HeaderMap,
    extensions: Extensions,
) -> (StatusCode, Json<LimitedResponse>) {
    let identity = identify(&headers, &extensions);

    // Pin one engine so a concurrent swap can't mix snapshots.
    let engine = limiter.current();
    let before = engine.snapshot();
    let decision = engine.decide(&identity);
    let after = engine.snapshot();

    let status = if decision.is_admit() {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };

    debug!(
        identity = %identity,
        engine = engine.name(),
        decision = ?decision,
        "Handled limited request"
    );

    (
        status,
        Json(LimitedResponse {
            status: status.as_u16(),
            identity,
            decision,
            before,
            after,
        }),
    )
}

async fn unlimited() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": StatusCode::OK.as_u16() }))
}

async fn stats(State(limiter): State<SharedLimiter>) -> Json<Snapshot> {
    Json(limiter.snapshot())
}

async fn active_engine(State(limiter): State<SharedLimiter>) -> Json<EngineInfo> {
    Json(EngineInfo::of(&limiter))
}

async fn replace_limiter(
    State(limiter): State<SharedLimiter>,
    Json(config): Json<RateConfig>,
) -> Result<Json<EngineInfo>, AdminError> {
    let next = ratelimit::from_config(&config).map_err(|e| {
        warn!(error = %e, "Rejected limiter configuration");
        AdminError::Build(e)
    })?;

    // In-flight requests may still hold the evicted engine. It is released
    // when the last handle drops, which also stops any pushers it owns.
    if let Some(evicted) = limiter.replace(next) {
        info!(engine = evicted.name(), "Evicted rate limiter from history");
    }
    Ok(Json(EngineInfo::of(&limiter)))
}

async fn revert_limiter(
    State(limiter): State<SharedLimiter>,
) -> Result<Json<EngineInfo>, AdminError> {
    let retired = limiter.revert().ok_or(AdminError::NoHistory)?;
    info!(engine = retired.name(), "Retired rate limiter");
    Ok(Json(EngineInfo::of(&limiter)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{FixedWindowConfig, FixedWindowLimiter, NoLimit};
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn window_slot(max_count: u64) -> SharedLimiter {
        let engine = FixedWindowLimiter::new(
            FixedWindowConfig::new(max_count, Duration::from_secs(60)).unwrap(),
        );
        Arc::new(SwappableLimiter::new(Arc::new(engine)))
    }

    fn get_as(uri: &str, identity: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(identity) = identity {
            builder = builder.header(IDENTITY_HEADER, identity);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn put_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_limited_admits_then_rejects() {
        let app = router(window_slot(2));

        let (status, body) = send(&app, get_as("/limited", Some("alice"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], 200);
        assert_eq!(body["identity"], "alice");
        assert_eq!(body["decision"], "admit");
        assert!(body["before"]["identities"]["alice"].is_null());
        assert_eq!(body["after"]["identities"]["alice"]["count"], 1);

        send(&app, get_as("/limited", Some("alice"))).await;
        let (status, body) = send(&app, get_as("/limited", Some("alice"))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["status"], 429);
        assert_eq!(body["decision"]["reject"], "window_full");
        assert_eq!(body["before"]["identities"]["alice"]["count"], 2);
        assert_eq!(body["after"]["identities"]["alice"]["count"], 2);
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let app = router(window_slot(1));

        assert_eq!(send(&app, get_as("/limited", Some("alice"))).await.0, StatusCode::OK);
        assert_eq!(
            send(&app, get_as("/limited", Some("alice"))).await.0,
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(send(&app, get_as("/limited", Some("bob"))).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_identity_falls_back_to_anonymous() {
        let app = router(window_slot(5));

        let (_, body) = send(&app, get_as("/limited", None)).await;
        assert_eq!(body["identity"], "anonymous");

        let (_, body) = send(&app, get_as("/limited", Some("   "))).await;
        assert_eq!(body["identity"], "anonymous");
    }

    #[tokio::test]
    async fn test_unlimited_ignores_limiter() {
        let app = router(window_slot(0));

        for _ in 0..5 {
            let (status, body) = send(&app, get_as("/unlimited", Some("alice"))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], 200);
        }
    }

    #[tokio::test]
    async fn test_stats_reports_active_engine() {
        let app = router(window_slot(3));
        send(&app, get_as("/limited", Some("alice"))).await;

        let (status, body) = send(&app, get_as("/stats", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["algorithm"], "fixed_window_counter");
        assert_eq!(body["limit"], 3);
        assert_eq!(body["identities"]["alice"]["kind"], "fixed_window");
        assert!(body["taken_at"].is_string());
    }

    #[tokio::test]
    async fn test_replace_then_revert() {
        let slot = window_slot(1);
        let app = router(Arc::clone(&slot));
        send(&app, get_as("/limited", Some("alice"))).await;

        let (status, body) = send(
            &app,
            put_json(
                "/admin/limiter",
                serde_json::json!({
                    "algo": "sliding_window_log",
                    "request_per_sec": 2,
                    "window_size": "10s",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["algorithm"], "sliding_window_log");
        assert_eq!(body["limit"], 20);
        assert_eq!(body["previous"], "fixed_window_counter");

        // Fresh engine, fresh state.
        assert_eq!(send(&app, get_as("/limited", Some("alice"))).await.0, StatusCode::OK);

        let (status, body) = send(&app, post("/admin/revert")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["algorithm"], "fixed_window_counter");
        assert!(body["previous"].is_null());

        // The restored engine still remembers alice.
        assert_eq!(
            send(&app, get_as("/limited", Some("alice"))).await.0,
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn test_evicted_engine_keeps_serving_pinned_requests() {
        let slot = window_slot(5);
        let app = router(Arc::clone(&slot));
        let original = slot.current();

        let no_limit = serde_json::json!({ "algo": "none" });
        send(&app, put_json("/admin/limiter", no_limit.clone())).await;
        send(&app, put_json("/admin/limiter", no_limit)).await;
        assert!(slot.previous().is_some_and(|p| p.name() == "no_limit"));

        // Nothing in the slot refers to it any more, but a request that
        // picked it up earlier still gets a real decision.
        assert!(original.decide("client").is_admit());
    }

    #[tokio::test]
    async fn test_revert_does_not_stop_pinned_engine() {
        let slot = window_slot(1);
        let app = router(Arc::clone(&slot));

        let (status, _) = send(
            &app,
            put_json(
                "/admin/limiter",
                serde_json::json!({
                    "algo": "fixed_window_counter",
                    "max_request_count": 100,
                    "window_size": "60s",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // A /limited request picks up the engine, then the revert lands.
        let pinned = slot.current();
        assert_eq!(pinned.limit(), 100);
        assert_eq!(send(&app, post("/admin/revert")).await.0, StatusCode::OK);

        assert_eq!(pinned.decide("alice"), Decision::Admit);
        assert_eq!(slot.limit(), 1);
    }

    #[tokio::test]
    async fn test_bad_configuration_is_rejected() {
        let slot = Arc::new(SwappableLimiter::new(Arc::new(NoLimit)));
        let app = router(Arc::clone(&slot));

        let (status, body) = send(
            &app,
            put_json(
                "/admin/limiter",
                serde_json::json!({ "algo": "token_bucket", "capacity": 5 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("refill_rate"));

        // The running engine is untouched.
        assert_eq!(slot.name(), "no_limit");
        assert!(slot.previous().is_none());
    }

    #[tokio::test]
    async fn test_revert_without_history_conflicts() {
        let app = router(window_slot(1));

        let (status, body) = send(&app, post("/admin/revert")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].is_string());

        let (_, body) = send(&app, get_as("/admin/limiter", None)).await;
        assert_eq!(body["algorithm"], "fixed_window_counter");
    }

    #[test]
    fn test_identify_prefers_header_over_peer() {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 4000))));

        let mut headers = HeaderMap::new();
        assert_eq!(identify(&headers, &extensions), "10.0.0.7");

        headers.insert(IDENTITY_HEADER, "carol".parse().unwrap());
        assert_eq!(identify(&headers, &extensions), "carol");
    }
}
