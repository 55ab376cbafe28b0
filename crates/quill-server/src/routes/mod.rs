//! HTTP surface.
//!
//! Layer order per request: client-IP limit, bearer auth, per-route user
//! limit, validated JSON, handler. `route_layer` wraps everything added
//! before it, so the last one added runs first.

pub mod demo;
pub mod notes;
pub mod summaries;

use axum::{
    extract::State,
    handler::Handler,
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::{
    middleware::{rate_limit, require_auth, KeyGenerator, RateLimit, RateLimitConfig},
    state::AppState,
};

pub fn build_router(state: AppState) -> Router {
    let store = state.rate_limits.clone();
    let client_ip = KeyGenerator::ClientIp(state.trusted_proxies.clone());
    let standard = RateLimit::new(
        RateLimitConfig::standard().with_key_generator(client_ip),
        store.clone(),
    );
    let ai = RateLimit::new(RateLimitConfig::ai(), store.clone());
    let demo_limit = RateLimit::new(RateLimitConfig::demo(), store);

    let journal = Router::new()
        .route("/notes", post(notes::create).get(notes::list))
        .route("/notes/{id}", put(notes::update).delete(notes::remove))
        .route(
            "/summaries",
            get(summaries::list).post(summaries::generate.layer(from_fn_with_state(ai, rate_limit))),
        )
        .route_layer(from_fn_with_state(state.authenticator.clone(), require_auth))
        .route_layer(from_fn_with_state(standard, rate_limit));

    let public = Router::new().route(
        "/rate-limit-demo",
        get(demo::demo).route_layer(from_fn_with_state(demo_limit, rate_limit)),
    );

    Router::new()
        .route("/health", get(health))
        .nest("/api", journal.merge(public))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "rate_limit_store": state.rate_limits.name(),
    }))
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, sync::Arc};

    use anyhow::anyhow;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        extract::ConnectInfo,
        http::{HeaderMap, Method, Request, StatusCode},
    };
    use quill_core::{
        auth::UserId,
        journal::{NoteStore, SummaryStore},
        summary::{Summarizer, Summary, SummaryRequest},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        error::ErrorBody,
        routes::notes::NoteView,
        middleware::TrustedProxies,
        state::testing::{harness, harness_with, ALICE, BOB},
    };

    struct Reply {
        status: StatusCode,
        headers: HeaderMap,
        body: Value,
    }

    async fn send(
        router: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        Reply {
            status,
            headers,
            body,
        }
    }

    #[tokio::test]
    async fn note_lifecycle_keeps_ciphertext_at_rest() {
        let h = harness();
        let router = build_router(h.state.clone());
        let alice = UserId::new("alice");

        let created = send(
            &router,
            Method::POST,
            "/api/notes",
            Some(ALICE),
            Some(json!({ "content": "Today was good" })),
        )
        .await;
        assert_eq!(created.status, StatusCode::CREATED);
        let note: NoteView = serde_json::from_value(created.body).expect("note view");
        assert_eq!(note.content, "Today was good");

        let stored = h.journal.get(&alice, note.id).await.expect("stored row");
        assert_ne!(stored.content, "Today was good");
        assert!(!stored.content.contains("Today"));

        let listed = send(&router, Method::GET, "/api/notes", Some(ALICE), None).await;
        assert_eq!(listed.status, StatusCode::OK);
        let notes: Vec<NoteView> = serde_json::from_value(listed.body).expect("list");
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].content, "Today was good");

        let uri = format!("/api/notes/{}", note.id);
        let updated = send(
            &router,
            Method::PUT,
            &uri,
            Some(ALICE),
            Some(json!({ "content": "Actually it was great" })),
        )
        .await;
        assert_eq!(updated.status, StatusCode::OK);
        let restored = h.journal.get(&alice, note.id).await.expect("stored row");
        assert_ne!(restored.content, stored.content);

        let deleted = send(&router, Method::DELETE, &uri, Some(ALICE), None).await;
        assert_eq!(deleted.status, StatusCode::NO_CONTENT);
        let listed = send(&router, Method::GET, "/api/notes", Some(ALICE), None).await;
        assert_eq!(listed.body, json!([]));
        assert!(h.reporter.reports().is_empty());
    }

    #[tokio::test]
    async fn notes_are_scoped_to_their_owner() {
        let h = harness();
        let router = build_router(h.state);

        let created = send(
            &router,
            Method::POST,
            "/api/notes",
            Some(ALICE),
            Some(json!({ "content": "private" })),
        )
        .await;
        let id = created.body["id"].as_str().expect("id").to_string();

        let listed = send(&router, Method::GET, "/api/notes", Some(BOB), None).await;
        assert_eq!(listed.body, json!([]));

        let uri = format!("/api/notes/{id}");
        let update = send(
            &router,
            Method::PUT,
            &uri,
            Some(BOB),
            Some(json!({ "content": "mine now" })),
        )
        .await;
        assert_eq!(update.status, StatusCode::NOT_FOUND);
        let delete = send(&router, Method::DELETE, &uri, Some(BOB), None).await;
        assert_eq!(delete.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rejects_bad_input_with_error_body() {
        let router = build_router(harness().state);

        let empty = send(
            &router,
            Method::POST,
            "/api/notes",
            Some(ALICE),
            Some(json!({ "content": "   " })),
        )
        .await;
        assert_eq!(empty.status, StatusCode::BAD_REQUEST);
        assert!(empty.body["error"].as_str().expect("error").contains("empty"));

        let range = send(
            &router,
            Method::GET,
            "/api/notes?from=2025-04-08T00:00:00Z&to=2025-04-07T00:00:00Z",
            Some(ALICE),
            None,
        )
        .await;
        assert_eq!(range.status, StatusCode::BAD_REQUEST);

        let bad_id = send(&router, Method::DELETE, "/api/notes/not-a-uuid", Some(ALICE), None).await;
        assert_eq!(bad_id.status, StatusCode::BAD_REQUEST);
        assert!(bad_id.body["error"].is_string());
    }

    #[tokio::test]
    async fn ip_limit_runs_before_authentication() {
        let router = build_router(harness().state);

        let anonymous = send(&router, Method::GET, "/api/notes", None, None).await;
        assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
        let body: ErrorBody = serde_json::from_value(anonymous.body).expect("error body");
        assert_eq!(body, ErrorBody::new("Unauthorized"));
        assert_eq!(
            anonymous.headers.get("x-ratelimit-limit").and_then(|v| v.to_str().ok()),
            Some("100")
        );
        assert_eq!(
            anonymous.headers.get("x-ratelimit-remaining").and_then(|v| v.to_str().ok()),
            Some("99")
        );
    }

    async fn anonymous_from(router: &Router, peer: [u8; 4], forwarded_for: &str) -> Reply {
        let request = Request::builder()
            .uri("/api/notes")
            .header("x-forwarded-for", forwarded_for)
            .extension(ConnectInfo(SocketAddr::from((peer, 5000))))
            .body(Body::empty())
            .expect("request");
        let response = router.clone().oneshot(request).await.expect("response");
        Reply {
            status: response.status(),
            headers: response.headers().clone(),
            body: Value::Null,
        }
    }

    fn remaining(reply: &Reply) -> Option<&str> {
        reply.headers.get("x-ratelimit-remaining").and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn spoofed_forwarded_for_shares_the_peer_quota() {
        let router = build_router(harness().state);

        for n in 0..100u32 {
            let spoofed = format!("203.0.113.{}", n % 250);
            let reply = anonymous_from(&router, [192, 0, 2, 50], &spoofed).await;
            assert_eq!(reply.status, StatusCode::UNAUTHORIZED, "request {n}");
        }
        let limited = anonymous_from(&router, [192, 0, 2, 50], "198.51.100.99").await;
        assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(remaining(&limited), Some("0"));

        let neighbour = anonymous_from(&router, [192, 0, 2, 51], "198.51.100.99").await;
        assert_eq!(neighbour.status, StatusCode::UNAUTHORIZED);
        assert_eq!(remaining(&neighbour), Some("99"));
    }

    #[tokio::test]
    async fn trusted_proxy_forwards_client_addresses() {
        let mut state = harness().state;
        state.trusted_proxies = TrustedProxies::new(["10.0.0.1".parse().expect("ip")]);
        let router = build_router(state);

        for client in ["203.0.113.7", "203.0.113.8"] {
            let reply = anonymous_from(&router, [10, 0, 0, 1], client).await;
            assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
            assert_eq!(remaining(&reply), Some("99"), "{client} has its own quota");
        }
        let again = anonymous_from(&router, [10, 0, 0, 1], "203.0.113.7").await;
        assert_eq!(remaining(&again), Some("98"));
    }

    #[tokio::test]
    async fn demo_quota_allows_three_per_minute() {
        let router = build_router(harness().state);

        for remaining in ["2", "1", "0"] {
            let ok = send(&router, Method::GET, "/api/rate-limit-demo", None, None).await;
            assert_eq!(ok.status, StatusCode::OK);
            assert_eq!(ok.body["message"], "Request allowed");
            assert_eq!(
                ok.headers.get("x-ratelimit-remaining").and_then(|v| v.to_str().ok()),
                Some(remaining)
            );
        }

        let limited = send(&router, Method::GET, "/api/rate-limit-demo", None, None).await;
        assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
        assert!(limited.body["error"].is_string());
        assert_eq!(
            limited.headers.get("x-ratelimit-limit").and_then(|v| v.to_str().ok()),
            Some("3")
        );
        assert_eq!(
            limited.headers.get("x-ratelimit-remaining").and_then(|v| v.to_str().ok()),
            Some("0")
        );
        assert!(limited.headers.contains_key("x-ratelimit-reset"));
        assert!(limited.headers.contains_key("retry-after"));
    }

    #[tokio::test]
    async fn summary_is_stored_encrypted_and_listed() {
        let h = harness();
        let router = build_router(h.state.clone());

        for text in ["Great walk in the garden", "Happy afternoon in the garden"] {
            let created = send(
                &router,
                Method::POST,
                "/api/notes",
                Some(ALICE),
                Some(json!({ "content": text })),
            )
            .await;
            assert_eq!(created.status, StatusCode::CREATED);
        }

        let generated = send(
            &router,
            Method::POST,
            "/api/summaries",
            Some(ALICE),
            Some(json!({ "kind": "daily" })),
        )
        .await;
        assert_eq!(generated.status, StatusCode::CREATED);
        assert!(generated.body["mood"].is_string());
        assert!(generated.body["themes"].is_array());

        let rows = h
            .journal
            .list_summaries(&UserId::new("alice"), None)
            .await
            .expect("rows");
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].content.contains("mood"));

        let listed = send(
            &router,
            Method::GET,
            "/api/summaries?kind=daily",
            Some(ALICE),
            None,
        )
        .await;
        assert_eq!(listed.status, StatusCode::OK);
        assert_eq!(listed.body[0]["mood"], generated.body["mood"]);

        let weekly = send(
            &router,
            Method::GET,
            "/api/summaries?kind=weekly",
            Some(ALICE),
            None,
        )
        .await;
        assert_eq!(weekly.body, json!([]));
    }

    #[tokio::test]
    async fn empty_period_is_a_bad_request() {
        let router = build_router(harness().state);
        let reply = send(
            &router,
            Method::POST,
            "/api/summaries",
            Some(BOB),
            Some(json!({ "kind": "weekly" })),
        )
        .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body["error"], "Invalid request: No entries for this period");
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn summarize(&self, _request: SummaryRequest) -> anyhow::Result<Summary> {
            Err(anyhow!("upstream returned 503"))
        }
    }

    #[tokio::test]
    async fn summarizer_failure_is_reported_not_leaked() {
        let h = harness_with(Arc::new(FailingSummarizer));
        let router = build_router(h.state.clone());

        send(
            &router,
            Method::POST,
            "/api/notes",
            Some(ALICE),
            Some(json!({ "content": "a quiet day" })),
        )
        .await;
        let reply = send(
            &router,
            Method::POST,
            "/api/summaries",
            Some(ALICE),
            Some(json!({ "kind": "daily" })),
        )
        .await;

        assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
        assert_eq!(reply.body["error"], "Failed to generate summary");
        let reports = h.reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0].context.tags.get("operation").map(String::as_str),
            Some("generate_summary")
        );
    }

    #[tokio::test]
    async fn ai_limit_is_per_user() {
        let router = build_router(harness().state);
        send(
            &router,
            Method::POST,
            "/api/notes",
            Some(ALICE),
            Some(json!({ "content": "steady" })),
        )
        .await;

        for _ in 0..10 {
            let ok = send(
                &router,
                Method::POST,
                "/api/summaries",
                Some(ALICE),
                Some(json!({ "kind": "daily" })),
            )
            .await;
            assert_eq!(ok.status, StatusCode::CREATED);
        }
        let limited = send(
            &router,
            Method::POST,
            "/api/summaries",
            Some(ALICE),
            Some(json!({ "kind": "daily" })),
        )
        .await;
        assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);

        // Same client address, separate per-user AI quota.
        let bob = send(
            &router,
            Method::POST,
            "/api/summaries",
            Some(BOB),
            Some(json!({ "kind": "daily" })),
        )
        .await;
        assert_eq!(bob.status, StatusCode::BAD_REQUEST);

        // Listing is not subject to the AI quota.
        let listed = send(&router, Method::GET, "/api/summaries", Some(ALICE), None).await;
        assert_eq!(listed.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn health_names_the_store() {
        let router = build_router(harness().state);
        let reply = send(&router, Method::GET, "/health", None, None).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body, json!({ "status": "ok", "rate_limit_store": "memory" }));
    }
}
