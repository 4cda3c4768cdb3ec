//! HTTP remote client tests against an in-process axum sandbox server.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use parking_lot::Mutex;
use query_sandbox::config::{EngineConfig, RemoteConfig};
use query_sandbox::{
    Dataset, EngineLoader, HttpRemoteExecutor, RemoteError, RemoteExecutor, RemoteRequest,
    Sandbox, SandboxTarget, SqlValue,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

// ============================================================================
// Fake Sandbox Server
// ============================================================================

/// Keeps the set of sessions it has seen setup for, like the real server
/// keeps one database per session.
#[derive(Default)]
struct FakeServer {
    sessions: Mutex<HashSet<String>>,
    requests: Mutex<Vec<RemoteRequest>>,
    released: Mutex<Vec<String>>,
}

async fn execute(
    State(server): State<Arc<FakeServer>>,
    Json(request): Json<RemoteRequest>,
) -> (StatusCode, Json<Value>) {
    server.requests.lock().push(request.clone());
    let session = request.session_id.clone().unwrap_or_default();

    if request.carries_setup() {
        server.sessions.lock().insert(session.clone());
    } else if !server.sessions.lock().contains(&session) {
        return (
            StatusCode::GONE,
            Json(json!({"success": false, "error_message": "SESSION_EXPIRED"})),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "columns": ["query", "flag", "doc", "missing"],
            "rows": [[request.query, true, {"tags": ["a", "b"]}, null]],
            "row_count": 1,
            "execution_time_ms": 0.7,
            "session_id": session,
        })),
    )
}

async fn release(State(server): State<Arc<FakeServer>>, Path(id): Path<String>) -> StatusCode {
    server.released.lock().push(id.clone());
    if server.sessions.lock().remove(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/api")
}

async fn spawn_fake() -> (Arc<FakeServer>, String) {
    let server = Arc::new(FakeServer::default());
    let app = Router::new()
        .route("/api/sandbox/execute", post(execute))
        .route("/api/sandbox/sessions/:id", delete(release))
        .with_state(server.clone());
    (server, spawn(app).await)
}

fn client(base_url: &str) -> HttpRemoteExecutor {
    let config = RemoteConfig {
        base_url: base_url.to_string(),
        ..RemoteConfig::default()
    };
    HttpRemoteExecutor::new(&config).unwrap()
}

fn sandbox(base_url: &str) -> Sandbox {
    let config = RemoteConfig {
        base_url: base_url.to_string(),
        ..RemoteConfig::default()
    };
    Sandbox::new(
        "http",
        Arc::new(EngineLoader::bundled(EngineConfig::default())),
        Arc::new(client(base_url)),
        &config,
    )
}

// ============================================================================
// Client
// ============================================================================

#[tokio::test]
async fn test_execute_parses_result_and_normalizes_cells() {
    let (_server, url) = spawn_fake().await;
    let request = RemoteRequest::new(SandboxTarget::Mongodb, "db.c.find()")
        .with_session("s-1")
        .with_setup(&Dataset::new("", "db.c.insertOne({})"));

    let response = client(&url).execute(request).await.unwrap();

    assert!(response.result.success);
    assert_eq!(response.session_id.as_deref(), Some("s-1"));
    assert_eq!(
        response.result.rows[0],
        vec![
            SqlValue::from("db.c.find()"),
            SqlValue::Integer(1),
            SqlValue::from(r#"{"tags":["a","b"]}"#),
            SqlValue::Null,
        ]
    );
}

#[tokio::test]
async fn test_error_status_with_result_body_is_a_result() {
    let (_server, url) = spawn_fake().await;
    let request = RemoteRequest::new(SandboxTarget::Postgres, "SELECT 1").with_session("unknown");

    let response = client(&url).execute(request).await.unwrap();

    assert!(!response.result.success);
    assert_eq!(response.result.error_message.as_deref(), Some("SESSION_EXPIRED"));
}

#[tokio::test]
async fn test_error_status_with_other_body_is_status_error() {
    let app = Router::new().route(
        "/api/sandbox/execute",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "database pool exhausted") }),
    );
    let url = spawn(app).await;

    let err = client(&url)
        .execute(RemoteRequest::new(SandboxTarget::Mysql, "SELECT 1"))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RemoteError::Status {
            status: 500,
            body: "database pool exhausted".to_string()
        }
    );
}

#[tokio::test]
async fn test_success_with_garbage_body_is_decode_error() {
    let app = Router::new().route("/api/sandbox/execute", post(|| async { "<html>ok</html>" }));
    let url = spawn(app).await;

    let err = client(&url)
        .execute(RemoteRequest::new(SandboxTarget::Mysql, "SELECT 1"))
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::Decode(_)), "{err}");
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    // Bind then drop to get a port nothing listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{addr}/api"))
        .execute(RemoteRequest::new(SandboxTarget::Postgres, "SELECT 1"))
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::Transport(_)), "{err}");
}

#[tokio::test]
async fn test_release_treats_missing_session_as_released() {
    let (server, url) = spawn_fake().await;

    client(&url).release("never-created").await.unwrap();

    assert_eq!(*server.released.lock(), vec!["never-created".to_string()]);
}

#[tokio::test]
async fn test_release_server_error() {
    let app = Router::new().route(
        "/api/sandbox/sessions/:id",
        delete(|| async { (StatusCode::SERVICE_UNAVAILABLE, "draining") }),
    );
    let url = spawn(app).await;

    let err = client(&url).release("abc").await.unwrap_err();

    assert_eq!(
        err,
        RemoteError::Status {
            status: 503,
            body: "draining".to_string()
        }
    );
}

// ============================================================================
// Sandbox over HTTP
// ============================================================================

#[tokio::test]
async fn test_sandbox_recovers_from_server_restart() {
    let (server, url) = spawn_fake().await;
    let sb = sandbox(&url);
    sb.configure(
        SandboxTarget::Postgres,
        Dataset::new("CREATE TABLE t(x int);", "INSERT INTO t VALUES (1);"),
    )
    .await;

    assert!(sb.execute("SELECT 1").await.success);
    assert!(sb.execute("SELECT 2").await.success);
    assert_eq!(server.requests.lock().len(), 2);

    // Server forgets every session
    server.sessions.lock().clear();

    let result = sb.execute("SELECT 3").await;
    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.rows[0][0], SqlValue::from("SELECT 3"));

    let requests = server.requests.lock().clone();
    assert_eq!(requests.len(), 4);
    assert!(!requests[2].carries_setup());
    assert!(requests[3].carries_setup());
    assert_ne!(requests[2].session_id, requests[3].session_id);
}

#[tokio::test]
async fn test_sandbox_reset_deletes_server_session() {
    let (server, url) = spawn_fake().await;
    let sb = sandbox(&url);
    sb.configure(SandboxTarget::Redis, Dataset::new("", "SET greeting hello"))
        .await;
    sb.execute("GET greeting").await;
    let id = sb.session_id().await.unwrap();

    sb.reset().await.unwrap();

    assert_eq!(*server.released.lock(), vec![id.clone()]);
    assert!(!server.sessions.lock().contains(&id));
}
