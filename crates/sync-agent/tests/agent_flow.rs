//! The engine on a real vault directory, talking HTTP to a mock daemon.

use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sync_agent::{HttpDaemonClient, NativeFs};
use sync_core::{
    BridgeConfig, FileSyncStatus, FolderStatus, ReconcileTimings, SyncEngine, SyncOutcome,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    _dir: TempDir,
    vault: PathBuf,
    server: MockServer,
    engine: SyncEngine<HttpDaemonClient, NativeFs>,
}

/// Vault at `<tmp>/Vault`, shared folder rooted at `<tmp>`.
async fn setup() -> Harness {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let vault = root.join("Vault");
    std::fs::create_dir_all(&vault).unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "folders": [{
                "id": "notes",
                "label": "Notes",
                "path": root.to_string_lossy(),
                "type": "sendreceive",
                "paused": false
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/db/status"))
        .and(query_param("folder", "notes"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"state": "idle", "needBytes": 0, "needItems": 0})),
        )
        .mount(&server)
        .await;

    let config = BridgeConfig {
        api_key: "test-key".into(),
        folder_id: "notes".into(),
        ..BridgeConfig::default()
    };
    let api = Arc::new(HttpDaemonClient::with_base_url(server.uri(), "test-key").unwrap());
    let fs = Arc::new(NativeFs::new(vault.clone()));
    let engine = SyncEngine::with_timings(
        config,
        vault.to_string_lossy(),
        api,
        fs,
        ReconcileTimings {
            settle: Duration::from_millis(10),
            attempts: 2,
            retry_delay: Duration::from_millis(10),
        },
    )
    .await;

    Harness {
        _dir: dir,
        vault,
        server,
        engine,
    }
}

#[tokio::test]
async fn test_local_edit_confirmed_and_persisted() {
    let h = setup().await;
    Mock::given(method("POST"))
        .and(path("/rest/db/scan"))
        .and(query_param("sub", "Vault/Daily/today.md"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/db/file"))
        .and(query_param("file", "Vault/Daily/today.md"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "local": {"version": ["ME:2"]},
            "global": {"version": ["ME:2"]}
        })))
        .mount(&h.server)
        .await;

    assert_eq!(h.engine.check_connection().await, FolderStatus::Converged);
    assert_eq!(h.engine.refresh_binding().await.unwrap().prefix, "Vault/");

    assert!(h.engine.on_local_edit("Daily/today.md"));
    let outcome = h.engine.sync_file("Daily/today.md").await.unwrap();
    assert_eq!(outcome, SyncOutcome::Converged);
    assert_eq!(
        h.engine.store().get_state("Daily/today.md").unwrap().status,
        FileSyncStatus::Synced
    );

    h.engine.store().flush().await;
    let saved = std::fs::read_to_string(h.vault.join(".sync-agent/sync-state.json")).unwrap();
    assert!(saved.contains("Daily/today.md"));
}

#[tokio::test]
async fn test_ensure_ignores_writes_prefixed_rules() {
    let h = setup().await;
    Mock::given(method("GET"))
        .and(path("/rest/db/ignores"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ignore": ["*.tmp"]})))
        .mount(&h.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/db/ignores"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.server)
        .await;

    h.engine.refresh_binding().await.unwrap();
    assert!(h.engine.ensure_ignores().await.unwrap());

    let requests = h.server.received_requests().await.unwrap();
    let post = requests
        .iter()
        .find(|r| r.method.as_str() == "POST")
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&post.body).unwrap();
    let rules: Vec<&str> = body["ignore"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r.as_str())
        .collect();

    assert_eq!(rules[0], "*.tmp");
    assert!(rules.contains(&"Vault/.sync-agent/sync-state.json"));
}

#[tokio::test]
async fn test_accept_conflict_on_disk() {
    let h = setup().await;
    std::fs::create_dir_all(h.vault.join("Notes")).unwrap();
    std::fs::write(h.vault.join("Notes/plan.md"), "mine").unwrap();
    std::fs::write(
        h.vault
            .join("Notes/plan.sync-conflict-20240102-030405-ABCDEFG.md"),
        "theirs",
    )
    .unwrap();

    let conflicts = h.engine.conflicts().await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].original_path, "Notes/plan.md");
    assert_eq!(conflicts[0].timestamp_label(), "20240102-030405");

    h.engine.resolve_accept_conflict(&conflicts[0]).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(h.vault.join("Notes/plan.md")).unwrap(),
        "theirs"
    );
    assert_eq!(
        std::fs::read_to_string(h.vault.join(".trash/Notes/plan.md")).unwrap(),
        "mine"
    );
    assert!(h.engine.conflicts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_keep_original_on_disk() {
    let h = setup().await;
    std::fs::write(h.vault.join("plan.md"), "mine").unwrap();
    std::fs::write(h.vault.join("plan.sync-conflict-20240102-030405-ABCDEFG.md"), "theirs")
        .unwrap();

    let conflicts = h.engine.conflicts().await.unwrap();
    h.engine.resolve_keep_original(&conflicts[0]).await.unwrap();

    assert_eq!(std::fs::read_to_string(h.vault.join("plan.md")).unwrap(), "mine");
    assert!(
        h.vault
            .join(".trash/plan.sync-conflict-20240102-030405-ABCDEFG.md")
            .exists()
    );
}
