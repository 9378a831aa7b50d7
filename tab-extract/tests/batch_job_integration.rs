use chrono::NaiveDate;
use serde_json::json;
use tab_extract::export::MetricWindow;
use tab_extract::extract::{ExtractStore, ParquetExtract, SqliteExtract};
use tab_extract::jobs::{MetricBatch, MetricBatchJob, QueuedScheduler};
use tab_extract::service::{InMemoryDataService, MetricSeries};
use tab_extract::value::Value;

fn metrics() -> Vec<String> {
    vec!["AverageTemperature".to_string(), "AverageLumens".to_string()]
}

fn service(bulbs: usize) -> InMemoryDataService {
    let start = NaiveDate::from_ymd_opt(2012, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let ids: Vec<String> = (0..bulbs).map(|i| format!("SMBLB{i}")).collect();
    let mut service = InMemoryDataService::new().with_entities(
        "SmartBulb",
        ids.iter().map(|id| json!({"id": id})).collect(),
    );
    for (i, id) in ids.iter().enumerate() {
        let temps: Vec<f64> = (0..9).map(|d| 20.0 + i as f64 + d as f64).collect();
        service = service
            .with_series(id.as_str(), "AverageTemperature", MetricSeries::new(start, temps))
            .with_series(id.as_str(), "AverageLumens", MetricSeries::new(start, vec![800.0; 9]));
    }
    service
}

fn job(path: &std::path::Path) -> MetricBatchJob {
    MetricBatchJob::new(
        "SmartBulb",
        "Metric",
        metrics(),
        MetricWindow::daily("2012-01-01", "2012-01-10"),
        path,
    )
    .expect("Failed to build job")
    .with_page_size(2)
}

#[tokio::test]
async fn test_start_schedules_one_batch_per_entity() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("metric_result.db");
    std::fs::write(&path, b"stale").unwrap();
    let service = service(5);
    let scheduler = QueuedScheduler::new();
    let store = SqliteExtract::new();
    let job = job(&path);

    let scheduled = job
        .do_start(&service, &store, &scheduler)
        .await
        .expect("Start failed");

    assert_eq!(scheduled, 5);
    assert_eq!(scheduler.pending().await[0], MetricBatch::new("SMBLB0"));
    assert!(store.read(&path, job.definition()).unwrap().is_empty());
    // Pages of two: offsets 0, 2, 4.
    assert_eq!(service.fetch_requests().await.len(), 3);
}

#[tokio::test]
async fn test_batches_fill_extract() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("metric_result.db");
    let service = service(3);
    let scheduler = QueuedScheduler::new();
    let store = SqliteExtract::new();
    let job = job(&path);

    job.do_start(&service, &store, &scheduler).await.unwrap();
    let rows = scheduler.run_all(&job, &service, &store).await.unwrap();

    assert_eq!(rows, 27);
    assert!(scheduler.is_empty().await);

    let stored = store.read(&path, job.definition()).unwrap();
    assert_eq!(stored.len(), 27);
    assert_eq!(
        stored[0],
        vec![
            Value::Text("SMBLB0".into()),
            Value::Text("2012-01-01 00:00:00".into()),
            Value::Double(20.0),
            Value::Double(800.0),
        ]
    );
    assert_eq!(stored[26][1], Value::Text("2012-01-09 00:00:00".into()));

    let evals = service.eval_requests().await;
    assert_eq!(evals.len(), 3);
    assert!(evals.iter().all(|(_, spec)| spec.ids.len() == 1));
}

#[tokio::test]
async fn test_batch_without_series_inserts_nothing() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("metric_result.parquet");
    let service = service(1);
    let store = ParquetExtract::new();
    let job = job(&path);

    job.do_start(&service, &store, &QueuedScheduler::new())
        .await
        .unwrap();
    let inserted = job
        .process_batch(&MetricBatch::new("unknown"), &service, &store)
        .await
        .unwrap();

    assert_eq!(inserted, 0);
    assert!(store.read(&path, job.definition()).unwrap().is_empty());
}
