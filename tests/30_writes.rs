mod common;

use anyhow::Result;
use axum::http::StatusCode;
use corp_tenancy::database::{FaultPoint, MemoryDatabase};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn save_promotes_and_commits_on_success() -> Result<()> {
    let app = common::TestApp::new(MemoryDatabase::new());
    let tenant = Uuid::new_v4();

    let (status, body) = app
        .post("/api/notes", Some(&common::token_for(tenant)), json!({ "payload": "hello" }))
        .await?;

    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["data"]["saved"], 1);

    let rows = app.db.committed_rows("notes");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].tenant_id, tenant);
    assert_eq!(rows[0].payload, "hello");

    // Promoted straight to a write transaction; never marked read-only
    assert_eq!(app.db.begin_count(), 1);
    assert_eq!(app.db.commit_count(), 1);
    assert!(!app
        .db
        .executed()
        .iter()
        .any(|sql| sql == "SET TRANSACTION READ ONLY"));
    Ok(())
}

#[tokio::test]
async fn server_errors_roll_the_write_back() -> Result<()> {
    let app = common::TestApp::new(MemoryDatabase::new());

    let (status, body) = app
        .post(
            "/api/notes/fail",
            Some(&common::token_for(Uuid::new_v4())),
            json!({ "payload": "lost" }),
        )
        .await?;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "downstream failure after write");
    assert!(app.db.committed_rows("notes").is_empty());
    assert_eq!(app.db.commit_count(), 0);
    assert_eq!(app.db.rollback_count(), 1);
    assert!(!app.db.has_open_transaction());
    Ok(())
}

#[tokio::test]
async fn commit_failure_surfaces_as_server_error() -> Result<()> {
    let app = common::TestApp::new(MemoryDatabase::new());
    app.db.fail_next(FaultPoint::Commit);

    let (status, _) = app
        .post(
            "/api/notes",
            Some(&common::token_for(Uuid::new_v4())),
            json!({ "payload": "doomed" }),
        )
        .await?;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(app.db.committed_rows("notes").is_empty());
    assert!(!app.db.has_open_transaction());
    Ok(())
}

#[tokio::test]
async fn requests_do_not_share_transactions() -> Result<()> {
    let app = common::TestApp::new(MemoryDatabase::new());
    let tenant = Uuid::new_v4();
    let token = common::token_for(tenant);

    for payload in ["one", "two", "three"] {
        let (status, _) = app.post("/api/notes", Some(&token), json!({ "payload": payload })).await?;
        assert_eq!(status, StatusCode::CREATED);
    }

    assert_eq!(app.db.begin_count(), 3);
    assert_eq!(app.db.commit_count(), 3);
    assert_eq!(app.db.committed_rows("notes").len(), 3);
    Ok(())
}
