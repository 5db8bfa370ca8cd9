mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use common::{ADMIN_TOKEN, Harness, SOURCE, SizedEncoder};
use encode_sweep::app::create_app;

fn app(harness: &Harness) -> Router {
    create_app(harness.state.clone())
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn sweep_body(source_ref: &str) -> Value {
    json!({
        "source_ref": source_ref,
        "quantization": { "min": 25, "max": 26 },
        "rate_control": { "min": 17, "max": 18 }
    })
}

#[tokio::test]
async fn test_health() {
    let harness = Harness::new();
    let response = app(&harness).oneshot(get("/api/v1/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn test_submit_sweep_and_reject_duplicate() {
    let harness = Harness::new();

    let (status, body) = send(app(&harness), post_json("/api/v1/sweeps", sweep_body(SOURCE))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["job_ids"].as_array().unwrap().len(), 4);
    assert_eq!(harness.queue.len(), 4);

    let (status, body) = send(app(&harness), post_json("/api/v1/sweeps", sweep_body(SOURCE))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "error");
    assert_eq!(harness.queue.len(), 4);
}

#[tokio::test]
async fn test_submit_sweep_validation() {
    let harness = Harness::new();

    let inverted = json!({
        "source_ref": SOURCE,
        "quantization": { "min": 30, "max": 25 }
    });
    let (status, body) = send(app(&harness), post_json("/api/v1/sweeps", inverted)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("quantization"));

    let (status, _) = send(app(&harness), post_json("/api/v1/sweeps", sweep_body(""))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(harness.queue.is_empty());
}

#[tokio::test]
async fn test_oversized_sweep_is_rejected() {
    let harness = Harness::new();

    // 9 x 8 = 72 combinations against a limit of 64.
    let oversized = json!({
        "source_ref": SOURCE,
        "quantization": { "min": 20, "max": 28 },
        "rate_control": { "min": 10, "max": 17 }
    });
    let (status, body) = send(app(&harness), post_json("/api/v1/sweeps", oversized)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("72"));
    assert!(harness.queue.is_empty());

    let (_, body) = send(app(&harness), get("/api/v1/tasks")).await;
    assert!(body["data"]["tasks"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_sweep_uses_default_grid() {
    let harness = Harness::new();
    let (status, body) = send(
        app(&harness),
        post_json("/api/v1/sweeps", json!({ "source_ref": SOURCE })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["job_ids"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_list_tasks_pages_and_filters() {
    let harness = Harness::new();
    send(app(&harness), post_json("/api/v1/sweeps", sweep_body(SOURCE))).await;

    let (status, body) = send(app(&harness), get("/api/v1/tasks?limit=3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tasks"].as_array().unwrap().len(), 3);
    assert_eq!(body["data"]["has_more"], true);

    let (_, body) = send(app(&harness), get("/api/v1/tasks?skip=3&limit=3")).await;
    assert_eq!(body["data"]["tasks"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["has_more"], false);

    let (_, body) = send(app(&harness), get("/api/v1/tasks?limit=4")).await;
    assert_eq!(body["data"]["has_more"], false);

    let (_, body) = send(app(&harness), get("/api/v1/tasks?statuses=pending,processing")).await;
    assert_eq!(body["data"]["tasks"].as_array().unwrap().len(), 4);
    assert_eq!(body["data"]["tasks"][0]["status"], "pending");

    let (_, body) = send(app(&harness), get("/api/v1/tasks?statuses=completed")).await;
    assert!(body["data"]["tasks"].as_array().unwrap().is_empty());

    let (status, _) = send(app(&harness), get("/api/v1/tasks?statuses=archived")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_tasks_accepts_repeated_statuses() {
    let harness = Harness::new();
    send(app(&harness), post_json("/api/v1/sweeps", sweep_body(SOURCE))).await;

    let (status, body) = send(
        app(&harness),
        get("/api/v1/tasks?statuses=completed&statuses=pending"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["tasks"].as_array().unwrap().len(), 4);

    let (_, body) = send(
        app(&harness),
        get("/api/v1/tasks?statuses=completed&statuses=failed,processing"),
    )
    .await;
    assert!(body["data"]["tasks"].as_array().unwrap().is_empty());

    let (status, _) = send(
        app(&harness),
        get("/api/v1/tasks?statuses=pending&statuses=archived"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_task_detail() {
    let harness = Harness::new();
    harness.put_source(SOURCE, 1000).await;
    let (_, body) = send(app(&harness), post_json("/api/v1/sweeps", sweep_body(SOURCE))).await;
    let id = body["data"]["job_ids"][0].as_str().unwrap().to_string();

    let (status, body) = send(app(&harness), get(&format!("/api/v1/tasks/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "pending");
    assert!(body["data"]["download_url"].is_null());

    let worker = harness.worker(Arc::new(SizedEncoder::new(&[])));
    harness.drain(&worker).await;

    let (status, body) = send(app(&harness), get(&format!("/api/v1/tasks/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["metrics"]["output_size"], 500);
    assert!(
        body["data"]["download_url"]
            .as_str()
            .unwrap()
            .starts_with(&format!("memory://encoded/{id}.mp4"))
    );

    let (status, body) = send(app(&harness), get(&format!("/api/v1/tasks/{}", Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_cancel_requires_admin_token() {
    let harness = Harness::new();
    let (_, body) = send(app(&harness), post_json("/api/v1/sweeps", sweep_body(SOURCE))).await;
    let id = body["data"]["job_ids"][0].as_str().unwrap().to_string();
    let uri = format!("/api/v1/tasks/{id}/cancel");

    let (status, _) = send(app(&harness), post_json(&uri, json!({}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let cancel = |token: &str| {
        Request::builder()
            .method("POST")
            .uri(&uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(r#"{"reason":"wrong source"}"#))
            .unwrap()
    };

    let (status, _) = send(app(&harness), cancel("not-the-token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(app(&harness), cancel(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "failed");
    assert_eq!(body["data"]["error"], "wrong source");

    let (status, _) = send(app(&harness), cancel(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_summary_endpoint() {
    let harness = Harness::new();
    harness.put_source(SOURCE, 1000).await;
    let uri = format!("/api/v1/summaries?source_ref={SOURCE}");

    let (status, _) = send(app(&harness), get(&uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    send(app(&harness), post_json("/api/v1/sweeps", sweep_body(SOURCE))).await;
    let worker = harness.worker(Arc::new(SizedEncoder::new(&[
        ((25, 17), 400),
        ((25, 18), 420),
        ((26, 17), 440),
        ((26, 18), 460),
    ])));
    harness.drain(&worker).await;

    let (status, body) = send(app(&harness), get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["best_compression_ratio"], 2.5);
    assert_eq!(body["data"]["best_parameters"]["quantization"], 25);
    assert_eq!(body["data"]["results"].as_array().unwrap().len(), 4);
}

fn multipart(content_type: &str, file_name: &str, data: &[u8]) -> Request<Body> {
    let boundary = "encode-sweep-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"video\"; filename=\"{file_name}\"\r\n").as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/v1/tasks")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_upload_submits_default_grid() {
    let harness = Harness::new();

    let (status, body) = send(app(&harness), multipart("video/x-matroska", "clip.mkv", &[9u8; 2048])).await;
    assert_eq!(status, StatusCode::CREATED);

    let source_ref = body["data"]["source_ref"].as_str().unwrap();
    assert!(source_ref.starts_with("source/"));
    assert!(source_ref.ends_with(".mkv"));
    assert!(harness.storage.contains(source_ref).await);
    assert_eq!(body["data"]["job_ids"].as_array().unwrap().len(), 4);
    assert_eq!(harness.queue.len(), 4);
}

#[tokio::test]
async fn test_upload_rejects_non_video() {
    let harness = Harness::new();

    let (status, _) = send(app(&harness), multipart("text/plain", "notes.txt", b"hello")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(harness.queue.is_empty());
}
