use metrics_exporter_prometheus::PrometheusBuilder;

#[test]
fn call_named_records_latency_and_errors() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    let rt = tokio::runtime::Runtime::new().unwrap();
    metrics::with_local_recorder(&recorder, || {
        rt.block_on(async {
            let db = common::db::AsyncDb::open_memory().await.unwrap();

            let v: i64 = db
                .call_named("test.ok", |conn| {
                    Ok(conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?)
                })
                .await
                .unwrap();
            assert_eq!(v, 0);

            let err: anyhow::Result<()> = db
                .call_named("test.err", |conn| {
                    conn.execute("SELECT * FROM definitely_missing_table", [])?;
                    Ok(())
                })
                .await;
            assert!(err.is_err());
        });
    });

    let rendered = handle.render();
    assert!(
        rendered.contains("walletgraph_store_query_latency_ms"),
        "expected walletgraph_store_query_latency_ms in rendered metrics, got:\n{rendered}"
    );
    assert!(
        rendered.contains("walletgraph_store_query_errors_total"),
        "expected walletgraph_store_query_errors_total in rendered metrics, got:\n{rendered}"
    );
}
