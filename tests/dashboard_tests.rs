use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

use matrix_broker::config::SchedulerConfig;
use matrix_broker::dashboard::{router, DashboardState};
use matrix_broker::gateway::{Event, Reactor};
use matrix_broker::protocol::{ClientMessage, Role, SubmitJobRequest, PROTOCOL_VERSION};
use matrix_broker::scheduler::JobOrchestrator;
use matrix_broker::stats::InMemoryStats;

/// Dashboard backed by a live reactor, plus a handle to feed it events.
struct TestDashboard {
    app: Router,
    events: mpsc::Sender<Event>,
    shutdown: CancellationToken,
}

impl TestDashboard {
    fn start() -> Self {
        let stats = Arc::new(InMemoryStats::new());
        let orchestrator = JobOrchestrator::new(SchedulerConfig::default(), stats.clone());
        let (events, events_rx) = mpsc::channel(64);
        let shutdown = CancellationToken::new();
        tokio::spawn(Reactor::new(orchestrator).run(events_rx, shutdown.clone()));

        let app = router(DashboardState {
            events: events.clone(),
            stats,
        });
        Self {
            app,
            events,
            shutdown,
        }
    }

    /// Open a connection and say hello; returns its id.
    async fn connect(&self, role: Role) -> Uuid {
        let id = Uuid::new_v4();
        // Frames to this connection are not inspected
        let (outbound, _) = mpsc::unbounded_channel();
        self.events
            .send(Event::Connected { id, outbound })
            .await
            .unwrap();
        self.send(
            id,
            ClientMessage::Hello {
                version: PROTOCOL_VERSION,
                role,
            },
        )
        .await;
        id
    }

    async fn send(&self, id: Uuid, message: ClientMessage) {
        self.events
            .send(Event::Message { id, message })
            .await
            .unwrap();
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let response = self
            .app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }
}

impl Drop for TestDashboard {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[tokio::test]
async fn test_status_endpoint_empty_broker() {
    let dashboard = TestDashboard::start();

    let (status, json) = dashboard.get("/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["activeWorkers"], 0);
    assert_eq!(json["pendingQueueLength"], 0);
    assert_eq!(json["completedJobCount"], 0);
}

#[tokio::test]
async fn test_workers_endpoint_lists_registered_workers() {
    let dashboard = TestDashboard::start();
    let worker = dashboard.connect(Role::Worker).await;
    dashboard.connect(Role::Client).await;

    let (status, json) = dashboard.get("/api/workers").await;
    assert_eq!(status, StatusCode::OK);
    let workers = json.as_array().unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0]["id"], worker.to_string());
    assert_eq!(workers[0]["status"], "idle");
    assert_eq!(workers[0]["tasksCompleted"], 0);

    let (_, json) = dashboard.get("/api/status").await;
    assert_eq!(json["activeWorkers"], 1);
}

#[tokio::test]
async fn test_jobs_endpoint_shows_progress() {
    let dashboard = TestDashboard::start();
    let worker = dashboard.connect(Role::Worker).await;
    let client = dashboard.connect(Role::Client).await;

    dashboard
        .send(
            client,
            ClientMessage::SubmitJob(SubmitJobRequest::new("watched", 3, 2, 2)),
        )
        .await;

    let (status, json) = dashboard.get("/api/jobs").await;
    assert_eq!(status, StatusCode::OK);
    let jobs = json.as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["jobId"], "watched");
    assert_eq!(jobs[0]["rowsA"], 3);
    assert_eq!(jobs[0]["chunksExpected"], 1);
    assert_eq!(jobs[0]["chunksReceived"], 0);

    let (_, json) = dashboard.get("/api/workers").await;
    assert_eq!(json[0]["id"], worker.to_string());
    assert_eq!(json[0]["status"], "busy");
    assert_eq!(json[0]["assignment"]["jobId"], "watched");
}

#[tokio::test]
async fn test_leaderboard_and_history_respect_limit() {
    let dashboard = TestDashboard::start();
    for _ in 0..3 {
        dashboard.connect(Role::Worker).await;
    }
    // Round-trip through the reactor so every hello has been applied
    dashboard.get("/api/status").await;

    let (status, json) = dashboard.get("/api/leaderboard").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 3);
    assert_eq!(json[0]["sessionsJoined"], 1);

    let (_, json) = dashboard.get("/api/leaderboard?limit=2").await;
    assert_eq!(json.as_array().unwrap().len(), 2);

    let (status, json) = dashboard.get("/api/history?limit=5").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_index_page_is_served() {
    let dashboard = TestDashboard::start();
    let response = dashboard
        .app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(String::from_utf8_lossy(&body).contains("matrix-broker"));
}

#[tokio::test]
async fn test_unavailable_when_reactor_is_gone() {
    let (events, events_rx) = mpsc::channel(1);
    drop(events_rx);
    let app = router(DashboardState {
        events,
        stats: Arc::new(InMemoryStats::new()),
    });

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
