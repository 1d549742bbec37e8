mod common;

use anyhow::Result;
use axum::http::StatusCode;
use corp_tenancy::database::MemoryDatabase;
use serde_json::json;
use uuid::Uuid;

fn seeded() -> (MemoryDatabase, Uuid, Uuid) {
    let db = MemoryDatabase::new().with_row_level_security();
    let (acme, beta) = (Uuid::new_v4(), Uuid::new_v4());
    db.seed("notes", acme, None, "acme-roadmap");
    db.seed("notes", acme, None, "acme-budget");
    db.seed("notes", beta, None, "beta-payroll");
    (db, acme, beta)
}

#[tokio::test]
async fn each_tenant_reads_only_its_own_rows() -> Result<()> {
    let (db, acme, beta) = seeded();
    let app = common::TestApp::new(db);

    let (status, body) = app.get("/api/notes", Some(&common::token_for(acme))).await?;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let payloads: Vec<&str> = body["data"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|row| row["payload"].as_str())
        .collect();
    assert_eq!(payloads, vec!["acme-roadmap", "acme-budget"]);

    let (status, body) = app.get("/api/notes", Some(&common::token_for(beta))).await?;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().cloned().unwrap_or_default();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["payload"], "beta-payroll");
    Ok(())
}

#[tokio::test]
async fn tenant_settings_do_not_outlive_the_request() -> Result<()> {
    let (db, acme, _) = seeded();
    let app = common::TestApp::new(db);

    let (status, _) = app.get("/api/notes", Some(&common::token_for(acme))).await?;
    assert_eq!(status, StatusCode::OK);

    // A session outside any guard sees nothing: the tenant setting was transaction-local
    let outsider = app
        .db
        .session(std::sync::Arc::new(corp_tenancy::interceptor::InterceptorPipeline::new()));
    let rows = corp_tenancy::database::DbSession::fetch_json(
        &outsider,
        &corp_tenancy::database::Statement::new("select * from notes"),
    )
    .await?;
    assert!(rows.is_empty());
    Ok(())
}

#[tokio::test]
async fn writes_for_another_tenant_are_refused_and_rolled_back() -> Result<()> {
    let (db, acme, beta) = seeded();
    let app = common::TestApp::new(db);

    let (status, _) = app
        .post(
            "/api/notes",
            Some(&common::token_for(acme)),
            json!({ "payload": "planted", "tenant_id": beta.to_string() }),
        )
        .await?;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.db.committed_rows("notes").len(), 3);
    assert!(!app
        .db
        .committed_rows("notes")
        .iter()
        .any(|row| row.payload == "planted"));
    assert!(!app.db.has_open_transaction());
    Ok(())
}
