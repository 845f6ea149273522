//! Integration tests for the HTTP transports and the recorder.
//!
//! Every test talks to an in-process axum server on a random local port.

use axum::Router;
use axum::extract::{Json, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use nodeql::{AppConfig, BlockingHttpTransport, HttpTransport, RecordingTransport};
use nodeql_core::{
    AsyncClient, AsyncTransport, Client, ClientConfig, ClientError, GetRequest, GraphQlRequest,
    NodeData, TransportError,
};
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r#"{
    "nodes": [{
        "kind": "InfraSite",
        "human_friendly_id": ["name__value"],
        "attributes": [
            {"name": "name", "unique": true},
            {"name": "metadata", "kind": "JSON", "optional": true}
        ]
    }]
}"#;

// =============================================================================
// MOCK SERVER
// =============================================================================

/// What the mock server saw for one request.
#[derive(Debug, Clone)]
struct Seen {
    branch: String,
    at: Option<String>,
    api_key: Option<String>,
    tracker: Option<String>,
    body: Value,
}

#[derive(Clone, Default)]
struct MockState {
    seen: Arc<Mutex<Vec<Seen>>>,
    replies: Arc<Mutex<VecDeque<(StatusCode, Value)>>>,
}

impl MockState {
    fn reply(&self, status: StatusCode, body: Value) -> &Self {
        self.replies.lock().expect("replies").push_back((status, body));
        self
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().expect("seen").clone()
    }
}

async fn graphql(
    State(state): State<MockState>,
    Path(branch): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    state.seen.lock().expect("seen").push(Seen {
        branch,
        at: params.get("at").cloned(),
        api_key: header("x-nodeql-key"),
        tracker: header("x-nodeql-tracker"),
        body,
    });
    let (status, reply) = state
        .replies
        .lock()
        .expect("replies")
        .pop_front()
        .unwrap_or((StatusCode::INTERNAL_SERVER_ERROR, json!({"detail": "no reply queued"})));
    (status, Json(reply))
}

/// Start the mock server; returns its base address.
async fn spawn_mock(state: MockState) -> String {
    let app = Router::new()
        .route("/graphql/{branch}", post(graphql))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let address = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{address}")
}

fn config(address: &str) -> AppConfig {
    AppConfig {
        address: address.to_string(),
        api_token: Some("test-token".into()),
        insert_tracker: true,
        timeout_secs: 5,
        ..AppConfig::default()
    }
}

fn site_page() -> Value {
    json!({"data": {"InfraSite": {
        "count": 1,
        "edges": [{"node": {
            "id": "s1",
            "__typename": "InfraSite",
            "display_label": "paris",
            "name": {"value": "paris"}
        }}]
    }}})
}

// =============================================================================
// ASYNC TRANSPORT
// =============================================================================

#[tokio::test]
async fn get_round_trip_sends_headers_and_branch() {
    let state = MockState::default();
    state.reply(StatusCode::OK, site_page());
    let address = spawn_mock(state.clone()).await;

    let transport = HttpTransport::new(&config(&address)).expect("transport");
    let client = AsyncClient::new(transport, ClientConfig::default());
    client.load_schema(None, SCHEMA).expect("schema");

    let site = client
        .get(&GetRequest::new("InfraSite").id("s1"))
        .await
        .expect("get")
        .expect("found");
    assert_eq!(site.id().as_deref(), Some("s1"));
    assert_eq!(site.attribute("name").expect("field").expect("loaded").value, json!("paris"));

    let seen = state.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].branch, "main");
    assert_eq!(seen[0].at, None);
    assert_eq!(seen[0].api_key.as_deref(), Some("test-token"));
    assert_eq!(seen[0].tracker.as_deref(), Some("query-infrasite-get"));
    let query = seen[0].body["query"].as_str().expect("query text");
    assert!(query.contains(r#"InfraSite(offset: 0, limit: 2, ids: ["s1"])"#));
}

#[tokio::test]
async fn tracker_header_is_omitted_unless_enabled() {
    let state = MockState::default();
    state.reply(StatusCode::OK, json!({"data": {"ok": true}}));
    let address = spawn_mock(state.clone()).await;

    let config = AppConfig {
        insert_tracker: false,
        api_token: None,
        ..config(&address)
    };
    let transport = HttpTransport::new(&config).expect("transport");
    let request = GraphQlRequest::new("query { ok }", "feature")
        .with_tracker("query-x")
        .with_at(Some("2026-01-01T00:00:00Z".into()));
    transport.execute(&request).await.expect("execute");

    let seen = state.seen();
    assert_eq!(seen[0].branch, "feature");
    assert_eq!(seen[0].at.as_deref(), Some("2026-01-01T00:00:00Z"));
    assert_eq!(seen[0].tracker, None);
    assert_eq!(seen[0].api_key, None);
}

#[tokio::test]
async fn graphql_errors_surface_as_transport_errors() {
    let state = MockState::default();
    state.reply(
        StatusCode::OK,
        json!({"data": null, "errors": [{"message": "Unknown field"}]}),
    );
    let address = spawn_mock(state.clone()).await;

    let client = AsyncClient::new(
        HttpTransport::new(&config(&address)).expect("transport"),
        ClientConfig::default(),
    );
    client.load_schema(None, SCHEMA).expect("schema");

    let err = client
        .get(&GetRequest::new("InfraSite").id("s1"))
        .await
        .expect_err("graphql error");
    assert!(matches!(
        err,
        ClientError::Transport(TransportError::GraphQl { ref messages }) if messages == &["Unknown field"]
    ));
}

#[tokio::test]
async fn status_codes_are_mapped() {
    let state = MockState::default();
    state
        .reply(StatusCode::UNAUTHORIZED, json!({"detail": "bad token"}))
        .reply(StatusCode::BAD_GATEWAY, json!({"detail": "upstream"}));
    let address = spawn_mock(state.clone()).await;
    let transport = HttpTransport::new(&config(&address)).expect("transport");
    let request = GraphQlRequest::new("query { ok }", "main");

    assert!(matches!(
        transport.execute(&request).await,
        Err(TransportError::Unauthorized(_))
    ));
    assert!(matches!(
        transport.execute(&request).await,
        Err(TransportError::Status { status: 502, .. })
    ));
    // One request per call: nothing is retried.
    assert_eq!(state.seen().len(), 2);
}

#[tokio::test]
async fn unreachable_server_is_a_connection_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let address = format!("http://{}", listener.local_addr().expect("addr"));
    drop(listener);

    let transport = HttpTransport::new(&config(&address)).expect("transport");
    let result = transport
        .execute(&GraphQlRequest::new("query { ok }", "main"))
        .await;
    assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
}

#[tokio::test]
async fn json_attributes_reach_the_server_as_variables() {
    let state = MockState::default();
    state.reply(
        StatusCode::OK,
        json!({"data": {"InfraSiteCreate": {"ok": true, "object": {
            "id": "s9",
            "__typename": "InfraSite",
            "display_label": "lyon",
            "name": {"value": "lyon"}
        }}}}),
    );
    let address = spawn_mock(state.clone()).await;
    let client = AsyncClient::new(
        HttpTransport::new(&config(&address)).expect("transport"),
        ClientConfig::default(),
    );
    client.load_schema(None, SCHEMA).expect("schema");

    let metadata = json!({"rack-count": 4, "x\"}": true});
    let site = client
        .create(
            "InfraSite",
            NodeData::new()
                .attribute("name", "lyon")
                .attribute("metadata", metadata.clone()),
            None,
        )
        .await
        .expect("create");
    assert_eq!(site.id().as_deref(), Some("s9"));

    let seen = state.seen();
    let query = seen[0].body["query"].as_str().expect("query text");
    assert!(query.starts_with("mutation($metadata: GenericScalar) {"));
    assert!(query.contains("metadata: {value: $metadata}"));
    assert!(!query.contains("rack-count"));
    assert_eq!(seen[0].body["variables"]["metadata"], metadata);
}

// =============================================================================
// BLOCKING TRANSPORT
// =============================================================================

#[test]
fn blocking_client_round_trip() {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let state = MockState::default();
    state.reply(StatusCode::OK, site_page());
    let address = runtime.block_on(spawn_mock(state.clone()));

    let transport = BlockingHttpTransport::new(&config(&address)).expect("transport");
    let client = Client::new(transport, ClientConfig::default());
    client.load_schema(None, SCHEMA).expect("schema");

    let site = client
        .get(&GetRequest::new("InfraSite").hfid(vec!["paris".into()]))
        .expect("get")
        .expect("found");
    assert_eq!(site.display_label().as_deref(), Some("paris"));
    assert_eq!(state.seen().len(), 1);
}

// =============================================================================
// RECORDER
// =============================================================================

#[tokio::test]
async fn recorder_writes_one_file_per_operation() {
    let state = MockState::default();
    state.reply(StatusCode::OK, site_page());
    let address = spawn_mock(state.clone()).await;
    let directory = tempfile::tempdir().expect("tempdir");

    let transport = RecordingTransport::new(
        HttpTransport::new(&config(&address)).expect("transport"),
        directory.path(),
    );
    let client = AsyncClient::new(transport, ClientConfig::default());
    client.load_schema(None, SCHEMA).expect("schema");
    client
        .get(&GetRequest::new("InfraSite").id("s1"))
        .await
        .expect("get");

    let recorded = directory.path().join("query-infrasite-get.json");
    let entry: Value =
        serde_json::from_str(&std::fs::read_to_string(&recorded).expect("recorded file"))
            .expect("json");
    assert_eq!(entry["branch"], "main");
    assert_eq!(entry["tracker"], "query-infrasite-get");
    assert!(entry["request"]["query"].as_str().expect("query").contains("InfraSite("));
    assert_eq!(entry["response"]["data"]["InfraSite"]["count"], 1);
}

#[tokio::test]
async fn recorder_failures_do_not_reach_the_caller() {
    let state = MockState::default();
    state.reply(StatusCode::OK, json!({"data": {"ok": true}}));
    let address = spawn_mock(state.clone()).await;

    // A regular file where the directory should be.
    let blocker = tempfile::NamedTempFile::new().expect("tempfile");
    let transport = RecordingTransport::new(
        HttpTransport::new(&config(&address)).expect("transport"),
        blocker.path(),
    );

    let data = transport
        .execute(&GraphQlRequest::new("query { ok }", "main").with_tracker("query-ok"))
        .await
        .expect("execute");
    assert_eq!(data, json!({"ok": true}));
}
