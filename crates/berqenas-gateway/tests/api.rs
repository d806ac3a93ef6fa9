//! HTTP API tests against an in-process router.

use axum::http::StatusCode;
use axum_test::TestServer;
use berqenas_core::{DryRunExecutor, EngineConfig, MigrationEngine};
use berqenas_gateway::{create_router, AppState, GatewayConfig};
use serde_json::{json, Value};
use std::sync::Arc;

fn server() -> TestServer {
    let engine = MigrationEngine::open(EngineConfig::temporary(), Arc::new(DryRunExecutor)).unwrap();
    let state = AppState::new(engine, GatewayConfig::default());
    TestServer::new(create_router(state)).unwrap()
}

fn migration(id: &str, version: &str, body: &str, deps: &[&str]) -> Value {
    json!({
        "id": id,
        "version": version,
        "targetDatabase": "production",
        "body": body,
        "description": format!("migration {id}"),
        "dependencies": deps,
    })
}

#[tokio::test]
async fn test_health() {
    let server = server();
    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_register_and_get() {
    let server = server();

    let response = server
        .post("/migrations")
        .json(&migration("v001", "001", "CREATE TABLE users ();", &[]))
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["data"]["result"], "created");

    // Same body again is unchanged.
    let response = server
        .post("/migrations")
        .json(&migration("v001", "001", "CREATE TABLE users ();", &[]))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["result"], "unchanged");

    let response = server.get("/migrations/v001").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["definition"]["targetDatabase"], "production");
    assert_eq!(body["data"]["record"]["status"], "pending");

    let response = server.get("/migrations/nope").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], "NotFound");
    assert_eq!(body["migrationId"], "nope");
}

#[tokio::test]
async fn test_run_batch_and_history() {
    let server = server();
    server
        .post("/migrations")
        .json(&migration("v001", "001", "CREATE TABLE users ();", &[]))
        .await;
    server
        .post("/migrations")
        .json(&migration(
            "v002",
            "002",
            "ALTER TABLE users ADD COLUMN role TEXT;",
            &["v001"],
        ))
        .await;

    let response = server.post("/databases/production/migrations/run").await;
    response.assert_status_ok();
    let body: Value = response.json();
    let outcomes = body["data"]["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0]["migrationId"], "v001");
    assert_eq!(outcomes[1]["migrationId"], "v002");
    assert!(outcomes.iter().all(|o| o["status"] == "completed"));

    let response = server.get("/migrations/v002/history").await;
    response.assert_status_ok();
    let body: Value = response.json();
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["attempt"]["outcome"], "success");
    assert_eq!(entries[0]["attempt"]["action"], "up");

    let response = server
        .get("/history")
        .add_query_param("database", "production")
        .add_query_param("outcome", "success")
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let response = server
        .get("/migrations/stats")
        .add_query_param("database", "production")
        .await;
    let body: Value = response.json();
    assert_eq!(body["data"]["completed"], 2);
}

#[tokio::test]
async fn test_drift_is_conflict() {
    let server = server();
    server
        .post("/migrations")
        .json(&migration("v001", "001", "CREATE TABLE users ();", &[]))
        .await;
    server.post("/migrations/v001/run").await.assert_status_ok();

    let response = server
        .post("/migrations")
        .json(&migration("v001", "001", "CREATE TABLE users (id INT);", &[]))
        .await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["code"], "ChecksumDrift");
    assert_eq!(body["migrationId"], "v001");
}

#[tokio::test]
async fn test_reregister_with_new_dependency() {
    let server = server();
    server
        .post("/migrations")
        .json(&migration("v001", "001", "CREATE TABLE users ();", &[]))
        .await;
    server
        .post("/migrations")
        .json(&migration("v002", "002", "CREATE TABLE roles ();", &[]))
        .await;

    let response = server
        .post("/migrations")
        .json(&migration("v002", "002", "CREATE TABLE roles ();", &["v001"]))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["result"], "updated");
    assert_eq!(body["data"]["fields"][0], "dependencies");

    let response = server.get("/migrations/v002").await;
    let body: Value = response.json();
    assert_eq!(body["data"]["definition"]["dependencies"][0], "v001");

    server.post("/migrations/v001/run").await.assert_status_ok();
    let response = server
        .post("/migrations")
        .json(&migration("v001", "001", "CREATE TABLE users ();", &["v002"]))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "InvalidDefinition");
}

#[tokio::test]
async fn test_rollback_guard_over_http() {
    let server = server();
    for (id, version, deps) in [("a", "001", vec![]), ("b", "002", vec!["a"])] {
        server
            .post("/migrations")
            .json(&migration(id, version, "SELECT 1;", &deps))
            .await;
        server
            .post("/migrations")
            .json(&json!({
                "id": format!("{id}.down"),
                "version": version,
                "direction": "down",
                "targetDatabase": "production",
                "body": "SELECT -1;",
            }))
            .await
            .assert_status(StatusCode::CREATED);
    }
    server
        .post("/databases/production/migrations/run")
        .await
        .assert_status_ok();

    let response = server.post("/migrations/a/rollback").await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["code"], "DependentsStillApplied");

    server.post("/migrations/b/rollback").await.assert_status_ok();
    let response = server.post("/migrations/a/rollback").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["status"], "rolled_back");

    let response = server.post("/migrations/a/requeue").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"]["status"], "pending");
}

#[tokio::test]
async fn test_list_filters_and_delete() {
    let server = server();
    server
        .post("/migrations")
        .json(&migration("v001", "001", "CREATE TABLE users ();", &[]))
        .await;
    server
        .post("/migrations")
        .json(&migration("v002", "002", "CREATE TABLE orders ();", &[]))
        .await;

    let response = server
        .get("/migrations")
        .add_query_param("search", "V002")
        .await;
    let body: Value = response.json();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let response = server
        .get("/migrations")
        .add_query_param("sort", "version")
        .add_query_param("order", "asc")
        .await;
    let body: Value = response.json();
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["definition"]["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["v001", "v002"]);

    server
        .get("/migrations")
        .add_query_param("status", "bogus")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    server.delete("/migrations/v002").await.assert_status_ok();
    let response = server
        .get("/migrations")
        .add_query_param("status", "obsolete")
        .await;
    let body: Value = response.json();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancel_and_recover_when_idle() {
    let server = server();
    let response = server.post("/databases/production/migrations/cancel").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["signalled"], false);

    let response = server.post("/databases/production/migrations/recover").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert!(body["data"].as_array().unwrap().is_empty());
}
