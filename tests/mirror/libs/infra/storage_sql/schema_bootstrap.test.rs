use quotaforge_storage_sql::schema::apply_quota_schema;
use quotaforge_storage_sql::TursoClient;

#[tokio::test]
async fn schema_applies_idempotently() {
    let client = TursoClient::connect(":memory:", None).await.unwrap();
    let conn = client.get_connection().unwrap();

    // connect() already ran the bootstrap once; a second pass must be a no-op.
    let result = apply_quota_schema(&conn).await;
    assert!(result.is_ok(), "schema bootstrap is not idempotent");

    for table in ["entitlements", "quota_usage", "consumption_records", "refund_records"] {
        let check = conn.query(&format!("SELECT * FROM {table} LIMIT 0"), ()).await;
        assert!(check.is_ok(), "table {table} missing after bootstrap");
    }
}

#[tokio::test]
async fn subscription_start_backfill_column_is_present() {
    let client = TursoClient::connect(":memory:", None).await.unwrap();
    let conn = client.get_connection().unwrap();

    let check = conn
        .query("SELECT user_id, subscription_start FROM entitlements LIMIT 0", ())
        .await;
    assert!(check.is_ok(), "subscription_start column missing from entitlements");
}
