//! End-to-end acquisition against scripted local MCP servers.
//!
//! Each test spawns a small shell script that speaks line-framed JSON-RPC
//! on stdin/stdout with canned responses, then drives a full acquisition
//! through the engine.

#![cfg(unix)]

use std::io::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use capstan::auth::StaticTokenSource;
use capstan::descriptor::{LocalDescriptor, ServerDescriptor};
use capstan::engine::Engine;
use capstan::error::{ErrorKind, Phase};
use capstan::events::{EventLevel, EventSink};
use capstan::health::HealthStatus;
use capstan::provider::AcquireConfig;
use serde_json::{json, Value};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Sink that remembers every record for assertions.
#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<(EventLevel, Vec<(String, String)>)>>,
}

impl RecordingSink {
    fn errors(&self) -> Vec<Vec<(String, String)>> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, _)| *level == EventLevel::Error)
            .map(|(_, metadata)| metadata.clone())
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, level: EventLevel, _category: &str, _message: &str, metadata: &[(&str, &str)]) {
        self.records.lock().unwrap().push((
            level,
            metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ));
    }
}

/// Write a scripted MCP server: each `(pattern, response)` pair becomes a
/// case arm matched against incoming lines, first match wins.
fn script_server(arms: &[(&str, Value)]) -> tempfile::TempPath {
    let mut body = String::from("#!/bin/sh\nwhile IFS= read -r line; do\n  case \"$line\" in\n");
    for (pattern, response) in arms {
        body.push_str(&format!(
            "    *'{}'*) printf '%s\\n' '{}' ;;\n",
            pattern, response
        ));
    }
    body.push_str("  esac\ndone\n");

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(body.as_bytes()).unwrap();
    let path = file.into_temp_path();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn descriptor(name: &str, executable: &str) -> ServerDescriptor {
    ServerDescriptor::LocalProcess(LocalDescriptor {
        name: name.to_string(),
        executable: executable.to_string(),
        arguments: vec![],
        working_directory: None,
        project_env: Default::default(),
        server_env: Default::default(),
    })
}

fn engine_with(sink: Arc<RecordingSink>, request_timeout: Duration) -> Engine {
    let config = AcquireConfig {
        request_timeout,
        verbose_phases: false,
        ..AcquireConfig::default()
    };
    Engine::new(
        config,
        sink,
        Arc::new(StaticTokenSource::unauthorized()),
    )
}

fn init_result(capabilities: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {
            "protocolVersion": "2024-11-05",
            "capabilities": capabilities,
            "serverInfo": {"name": "scripted", "version": "0.1"},
            "instructions": "A scripted server"
        }
    })
}

#[tokio::test]
async fn full_acquisition_with_degraded_resources() {
    init_logging();
    let script = script_server(&[
        (
            "\"method\":\"initialize\"",
            init_result(json!({"tools": {}, "resources": {}, "prompts": {}})),
        ),
        (
            "\"method\":\"tools/list\"",
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "result": {"tools": [
                    {"name": "read_file", "description": "Read a file", "inputSchema": {"type": "object"}},
                    {"name": "write_file", "inputSchema": {"type": "object"}}
                ]}
            }),
        ),
        (
            "\"method\":\"resources/list\"",
            json!({
                "jsonrpc": "2.0",
                "id": 3,
                "error": {"code": -32601, "message": "Method not found"}
            }),
        ),
        (
            "\"method\":\"prompts/list\"",
            json!({
                "jsonrpc": "2.0",
                "id": 4,
                "result": {"prompts": [{"name": "summarize"}]}
            }),
        ),
    ]);

    let sink = Arc::new(RecordingSink::default());
    let engine = engine_with(Arc::clone(&sink), Duration::from_secs(5));
    let report = engine
        .refresh(&descriptor("scripted-ok", &script.to_string_lossy()))
        .await;

    let snapshot = report.outcome.unwrap();
    assert_eq!(snapshot.server_name.as_deref(), Some("scripted"));
    assert_eq!(
        snapshot.server_description.as_deref(),
        Some("A scripted server")
    );
    assert_eq!(snapshot.tools.len(), 2);
    assert_eq!(snapshot.tools[0].name, "read_file");

    // Advertised but unsupported degrades to empty, not absent.
    assert_eq!(snapshot.resources, Some(vec![]));
    assert_eq!(snapshot.prompts.as_ref().map(Vec::len), Some(1));

    assert_eq!(report.health.status, HealthStatus::Healthy);
    assert!(engine.cached("scripted-ok").is_some());
    assert!(sink.errors().is_empty());
}

#[tokio::test]
async fn unadvertised_categories_stay_absent() {
    let script = script_server(&[
        (
            "\"method\":\"initialize\"",
            init_result(json!({"tools": {}})),
        ),
        (
            "\"method\":\"tools/list\"",
            json!({"jsonrpc": "2.0", "id": 2, "result": {"tools": []}}),
        ),
    ]);

    let sink = Arc::new(RecordingSink::default());
    let engine = engine_with(sink, Duration::from_secs(5));
    let report = engine
        .refresh(&descriptor("tools-only", &script.to_string_lossy()))
        .await;

    let snapshot = report.outcome.unwrap();
    assert!(snapshot.tools.is_empty());
    assert!(snapshot.resources.is_none());
    assert!(snapshot.prompts.is_none());
}

#[tokio::test]
async fn listing_follows_pagination_cursors() {
    let tool = |name: &str| json!({"name": name, "inputSchema": {"type": "object"}});
    let script = script_server(&[
        (
            "\"method\":\"initialize\"",
            init_result(json!({"tools": {}})),
        ),
        // The cursor arm must come first; the plain arm also matches
        // cursor-carrying requests.
        (
            "\"cursor\":\"p2\"",
            json!({"jsonrpc": "2.0", "id": 3, "result": {"tools": [tool("b")]}}),
        ),
        (
            "\"method\":\"tools/list\"",
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "result": {"tools": [tool("a")], "nextCursor": "p2"}
            }),
        ),
    ]);

    let sink = Arc::new(RecordingSink::default());
    let engine = engine_with(sink, Duration::from_secs(5));
    let report = engine
        .refresh(&descriptor("paged", &script.to_string_lossy()))
        .await;

    let snapshot = report.outcome.unwrap();
    let names: Vec<&str> = snapshot.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[tokio::test]
async fn unresponsive_server_times_out_at_initialize() {
    init_logging();
    // cat echoes requests back; echoes are not response-shaped, so the
    // round trip runs into the deadline.
    let sink = Arc::new(RecordingSink::default());
    let engine = engine_with(Arc::clone(&sink), Duration::from_millis(200));
    let report = engine.refresh(&descriptor("silent", "/bin/cat")).await;

    let err = report.outcome.unwrap_err();
    assert_eq!(err.phase, Phase::Initialize);
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(report.health.status, HealthStatus::Unhealthy);

    // Exactly one failure record, labeled with phase and kind.
    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains(&("phase".to_string(), "initialize".to_string())));
    assert!(errors[0].contains(&("kind".to_string(), "timeout".to_string())));
}

#[tokio::test]
async fn missing_executable_fails_before_spawning() {
    let mut local = LocalDescriptor {
        name: "ghost".to_string(),
        executable: "capstan-integration-no-such-binary".to_string(),
        arguments: vec![],
        working_directory: None,
        project_env: Default::default(),
        server_env: Default::default(),
    };
    local
        .server_env
        .insert("PATH".to_string(), "/nonexistent-dir".to_string());

    let sink = Arc::new(RecordingSink::default());
    let engine = engine_with(sink, Duration::from_secs(5));
    let report = engine
        .refresh(&ServerDescriptor::LocalProcess(local))
        .await;

    let err = report.outcome.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ExecutionFailed);
    assert_eq!(err.phase.as_str(), "spawn|connect");
}

#[tokio::test]
async fn crashing_server_diagnostics_reach_the_failure_record() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"#!/bin/sh\necho 'fatal: missing API key' >&2\nexit 7\n")
        .unwrap();
    let script = file.into_temp_path();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let sink = Arc::new(RecordingSink::default());
    let engine = engine_with(Arc::clone(&sink), Duration::from_secs(5));
    let report = engine
        .refresh(&descriptor("crashy", &script.to_string_lossy()))
        .await;

    let err = report.outcome.unwrap_err();
    assert_eq!(err.phase, Phase::Initialize);
    assert_eq!(err.kind, ErrorKind::ExecutionFailed);

    let errors = sink.errors();
    assert_eq!(errors.len(), 1);
    let stderr = errors[0]
        .iter()
        .find(|(k, _)| k == "stderr")
        .map(|(_, v)| v.as_str())
        .expect("failure record should carry captured stderr");
    assert!(stderr.contains("missing API key"));
}
