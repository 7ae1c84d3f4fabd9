//! SSE router: health, endpoint announcement, message routing by session.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use kgmem_host::{sse, GraphHost};
use serde_json::json;
use std::time::Duration;
use tower::util::ServiceExt;

fn post_message(session: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/messages/?session_id={}", session))
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn next_chunk(body: &mut Body) -> String {
    let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
        .await
        .expect("no sse event in time")
        .expect("stream ended")
        .unwrap();
    String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap()
}

#[tokio::test]
async fn health_reports_healthy() {
    let app = sse::router(sse::SseState::new(GraphHost::new(false)));
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    let j: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(j["status"], "healthy");
}

#[tokio::test]
async fn messages_need_a_known_session() {
    let app = sse::router(sse::SseState::new(GraphHost::new(false)));
    let ping = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}).to_string();
    let res = app.clone().oneshot(post_message("nope", ping)).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let req = Request::builder()
        .method("POST")
        .uri("/messages/")
        .body(Body::from("{}"))
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stream_announces_endpoint_then_carries_replies() {
    let state = sse::SseState::new(GraphHost::new(false));
    let app = sse::router(state.clone());

    let req = Request::builder().uri("/sse").body(Body::empty()).unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    let mut body = res.into_body();

    let first = next_chunk(&mut body).await;
    assert!(first.contains("event: endpoint"), "got {first:?}");
    let session = first
        .split("session_id=")
        .nth(1)
        .unwrap()
        .lines()
        .next()
        .unwrap()
        .trim()
        .to_string();
    assert_eq!(state.session_count(), 1);

    let res = app
        .clone()
        .oneshot(post_message(&session, "not json".to_string()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let ping = json!({"jsonrpc": "2.0", "id": 7, "method": "ping"}).to_string();
    let res = app.clone().oneshot(post_message(&session, ping)).await.unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);

    let reply = next_chunk(&mut body).await;
    assert!(reply.contains("event: message"), "got {reply:?}");
    assert!(reply.contains(r#""id":7"#));

    drop(body);
    assert_eq!(state.session_count(), 0);
}
