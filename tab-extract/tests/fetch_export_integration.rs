use serde_json::json;
use tab_extract::export::FetchTableExport;
use tab_extract::extract::{CreateMode, ExtractStore, ParquetExtract, SqliteExtract};
use tab_extract::schema::{FetchLayout, FieldDataType, FieldSpec};
use tab_extract::service::InMemoryDataService;
use tab_extract::value::Value;
use tab_extract::ExportError;

fn bulb_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("id", FieldDataType::String, false),
        FieldSpec::new("installed", FieldDataType::Datetime, true),
        FieldSpec::new("on", FieldDataType::Boolean, true),
        FieldSpec::new("fixture.wattage", FieldDataType::Double, true),
    ]
}

fn bulbs(n: usize) -> Vec<serde_json::Value> {
    (0..n)
        .map(|i| {
            json!({
                "id": format!("bulb-{i}"),
                "installed": format!("2019-03-{:02}T05:06:07.000Z", i % 28 + 1),
                "on": i % 2 == 0,
                "fixture": {"id": format!("fx-{i}"), "wattage": 60.0}
            })
        })
        .collect()
}

#[tokio::test]
async fn test_rows_match_entities_across_pages() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("bulbs.db");
    let service = InMemoryDataService::new().with_entities("SmartBulb", bulbs(23));
    let store = SqliteExtract::new();

    let summary = FetchTableExport::new("SmartBulb", bulb_fields(), &path)
        .limit(5)
        .num_sources(23)
        .run(&service, &store)
        .await
        .expect("Export failed");

    assert_eq!(summary.pages, 5);
    assert_eq!(summary.entities, 23);
    assert_eq!(summary.rows_written, 23);

    let layout = FetchLayout::derive("SmartBulb", bulb_fields()).unwrap();
    let rows = store.read(&path, &layout.definition).expect("Failed to read");
    assert_eq!(rows.len(), 23);
    assert_eq!(rows[0][0], Value::Text("bulb-0".into()));
    assert_eq!(rows[22][0], Value::Text("bulb-22".into()));
}

#[tokio::test]
async fn test_datetime_rendering_and_nested_path() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("bulbs.db");
    let service = InMemoryDataService::new().with_entities(
        "SmartBulb",
        vec![json!({
            "id": "b1",
            "installed": "2019-03-04T05:06:07.000Z",
            "on": true,
            "fixture": {"wattage": 75}
        })],
    );
    let store = SqliteExtract::new();

    FetchTableExport::new("SmartBulb", bulb_fields(), &path)
        .run(&service, &store)
        .await
        .expect("Export failed");

    let layout = FetchLayout::derive("SmartBulb", bulb_fields()).unwrap();
    let rows = store.read(&path, &layout.definition).unwrap();
    assert_eq!(
        rows,
        vec![vec![
            Value::Text("b1".into()),
            Value::Text("2019-03-04 05:06:07".into()),
            Value::Bool(true),
            Value::Double(75.0),
        ]]
    );
}

#[tokio::test]
async fn test_deep_path_fails_before_file_is_created() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("bulbs.db");
    let service = InMemoryDataService::new().with_entities("SmartBulb", bulbs(1));

    let fields = vec![FieldSpec::new("fixture.room.name", FieldDataType::String, true)];
    let err = FetchTableExport::new("SmartBulb", fields, &path)
        .run(&service, &SqliteExtract::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ExportError::FieldResolution { .. }));
    assert!(!path.exists());
    assert!(service.fetch_requests().await.is_empty());
}

#[tokio::test]
async fn test_zero_bounds_leave_existing_file_untouched() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("bulbs.db");
    std::fs::write(&path, b"previous run").unwrap();
    let service = InMemoryDataService::new().with_entities("SmartBulb", bulbs(3));

    for (limit, num_sources) in [(0, 10), (10, 0)] {
        let err = FetchTableExport::new("SmartBulb", bulb_fields(), &path)
            .limit(limit)
            .num_sources(num_sources)
            .run(&service, &SqliteExtract::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::InvalidArgument(_)));
    }

    assert_eq!(std::fs::read(&path).unwrap(), b"previous run");
    assert!(service.fetch_requests().await.is_empty());
}

#[tokio::test]
async fn test_rerun_replaces_previous_rows() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("bulbs.db");
    let store = SqliteExtract::new();
    let layout = FetchLayout::derive("SmartBulb", bulb_fields()).unwrap();

    let first = InMemoryDataService::new().with_entities("SmartBulb", bulbs(8));
    FetchTableExport::new("SmartBulb", bulb_fields(), &path)
        .create_mode(CreateMode::CreateAndReplace)
        .run(&first, &store)
        .await
        .unwrap();
    assert_eq!(store.read(&path, &layout.definition).unwrap().len(), 8);

    let second = InMemoryDataService::new().with_entities(
        "SmartBulb",
        vec![json!({"id": "only", "installed": null, "on": false, "fixture": null})],
    );
    FetchTableExport::new("SmartBulb", bulb_fields(), &path)
        .create_mode(CreateMode::CreateAndReplace)
        .run(&second, &store)
        .await
        .unwrap();

    let rows = store.read(&path, &layout.definition).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0],
        vec![
            Value::Text("only".into()),
            Value::Null,
            Value::Bool(false),
            Value::Null
        ]
    );
}

#[tokio::test]
async fn test_missing_required_attribute_is_null_violation() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("bulbs.db");
    let service =
        InMemoryDataService::new().with_entities("SmartBulb", vec![json!({"on": true})]);

    let err = FetchTableExport::new("SmartBulb", bulb_fields(), &path)
        .run(&service, &SqliteExtract::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExportError::NullViolation { ref column } if column == "id"));
}

#[tokio::test]
async fn test_parquet_store_receives_same_rows() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("bulbs.parquet");
    let service = InMemoryDataService::new().with_entities("SmartBulb", bulbs(12));
    let store = ParquetExtract::new();

    let summary = FetchTableExport::new("SmartBulb", bulb_fields(), &path)
        .limit(5)
        .num_sources(10)
        .run(&service, &store)
        .await
        .expect("Export failed");
    assert_eq!(summary.rows_written, 10);

    let layout = FetchLayout::derive("SmartBulb", bulb_fields()).unwrap();
    let rows = store.read(&path, &layout.definition).unwrap();
    assert_eq!(rows.len(), 10);
    assert_eq!(rows[3][1], Value::Text("2019-03-04 05:06:07".into()));
}

#[tokio::test]
async fn test_string_field_keeps_timestamp_text() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("labels.db");
    let fields = vec![
        FieldSpec::new("id", FieldDataType::String, false),
        FieldSpec::new("label", FieldDataType::String, true),
    ];
    let service = InMemoryDataService::new().with_entities(
        "SmartBulb",
        vec![json!({"id": "a", "label": "2020-01-01T10:00:00.750+02:00"})],
    );
    let store = SqliteExtract::new();

    FetchTableExport::new("SmartBulb", fields.clone(), &path)
        .run(&service, &store)
        .await
        .expect("Export failed");

    let layout = FetchLayout::derive("SmartBulb", fields).unwrap();
    let rows = store.read(&path, &layout.definition).expect("Failed to read");
    let expected: Vec<Vec<Value>> = vec![vec![
        Value::Text("a".into()),
        Value::Text("2020-01-01T10:00:00.750+02:00".into()),
    ]];
    assert_eq!(rows, expected);
}
