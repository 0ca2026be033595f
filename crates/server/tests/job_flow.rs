// crates/server/tests/job_flow.rs
//! End-to-end flow: create a job over HTTP, drive a processing pass against
//! a mocked agent service, and observe the terminal snapshot plus the push
//! messages delivered to a subscribed channel.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use taskdeck_db::Database;
use taskdeck_jobs::AgentExecutor;
use taskdeck_server::{create_app, AppState};
use tokio::sync::mpsc;
use tower::ServiceExt;

async fn state_for(agent_url: &str) -> Arc<AppState> {
    let db = Database::new_in_memory().await.expect("in-memory DB");
    let research = AgentExecutor::new(agent_url).expect("executor");
    let agent = AgentExecutor::new(agent_url).expect("executor");
    AppState::new(db, research, agent)
}

fn create_request(user: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/jobs")
        .header("content-type", "application/json")
        .header("x-user-id", user)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(user: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-user-id", user)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn research_job_runs_to_completion() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/run")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"output":"three key findings"}"#)
        .create_async()
        .await;

    let state = state_for(&server.url()).await;
    let app = create_app(state.clone());

    // Create the job over HTTP
    let response = app
        .clone()
        .oneshot(create_request("7", r#"{"payload":"summarize my tasks"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["status"], "pending");
    let job_id = created["id"].as_i64().unwrap();

    // Subscribe a push channel for the owner
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.hub.add_client(7, tx);

    // One processing pass claims and executes the job
    let finished = state.research_jobs.process_pending_jobs().await.unwrap();
    assert_eq!(finished, 1);
    mock.assert_async().await;

    // Polling fallback sees the terminal snapshot
    let response = app
        .oneshot(get_request("7", &format!("/api/jobs/{job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot = body_json(response).await;
    assert_eq!(snapshot["status"], "completed");
    assert_eq!(snapshot["result"], "three key findings");
    assert!(snapshot.get("error").is_none());

    // Push channel saw the preamble, then monotonic status updates
    assert!(rx.recv().await.unwrap().contains("connected"));
    assert!(rx.recv().await.unwrap().contains("\"status\":\"processing\""));
    let terminal = rx.recv().await.unwrap();
    assert!(terminal.contains("\"status\":\"completed\""));
    assert!(terminal.contains("three key findings"));
}

#[tokio::test]
async fn failing_agent_marks_job_error_not_http_failure() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/run")
        .with_status(500)
        .with_body("agent exploded")
        .create_async()
        .await;

    let state = state_for(&server.url()).await;
    let app = create_app(state.clone());

    let response = app
        .clone()
        .oneshot(create_request("3", r#"{"payload":"doomed","kind":"agent"}"#))
        .await
        .unwrap();
    let job_id = body_json(response).await["id"].as_i64().unwrap();

    let finished = state.agent_jobs.process_pending_jobs().await.unwrap();
    assert_eq!(finished, 1);

    // The execution failure is visible only through the job's error field
    let response = app
        .oneshot(get_request("3", &format!("/api/jobs/{job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let snapshot = body_json(response).await;
    assert_eq!(snapshot["status"], "error");
    assert!(snapshot["error"].as_str().unwrap().contains("500"));
    assert!(snapshot.get("result").is_none());
}

#[tokio::test]
async fn repeated_passes_do_not_rerun_finished_jobs() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/run")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"output":"done"}"#)
        .expect(1)
        .create_async()
        .await;

    let state = state_for(&server.url()).await;
    let app = create_app(state.clone());

    app.oneshot(create_request("1", r#"{"payload":"once only"}"#))
        .await
        .unwrap();

    assert_eq!(state.research_jobs.process_pending_jobs().await.unwrap(), 1);
    // Idempotent: nothing left to claim
    assert_eq!(state.research_jobs.process_pending_jobs().await.unwrap(), 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn other_users_cannot_read_the_job() {
    let state = state_for("http://127.0.0.1:9").await;
    let app = create_app(state.clone());

    let response = app
        .clone()
        .oneshot(create_request("7", r#"{"payload":"private"}"#))
        .await
        .unwrap();
    let job_id = body_json(response).await["id"].as_i64().unwrap();

    let response = app
        .oneshot(get_request("8", &format!("/api/jobs/{job_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
