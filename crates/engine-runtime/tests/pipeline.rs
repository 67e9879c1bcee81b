use connectors::{
    memory::{MemoryInput, MemoryOutput},
    processor::{filter::FilterProcessor, mapping::MappingProcessor},
};
use engine_core::{
    checkpoint::{CheckpointConfig, CheckpointManager},
    plugin::{Plugin, ProcessorPlugin},
};
use engine_runtime::pipeline::{ConcurrentPipeline, PipelineConfig, PipelineError, SyncPipeline};
use model::{
    core::{data_type::DataType, value::Value},
    records::{record::Record, schema::Column, schema::Schema},
};
use serde_json::{json, Map};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn people_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", DataType::Int),
        Column::new("name", DataType::String),
        Column::new("age", DataType::Int),
        Column::new("city", DataType::String),
    ])
}

fn person(id: i64, name: &str, age: i64, city: &str) -> Record {
    Record::new(vec![
        Value::Int(id),
        Value::String(name.into()),
        Value::Int(age),
        Value::String(city.into()),
    ])
}

fn people() -> Vec<Record> {
    vec![
        person(1, "Alice", 25, "NYC"),
        person(2, "Bob", 17, "LA"),
        person(3, "Charlie", 30, "SF"),
        person(4, "Diana", 16, "Boston"),
        person(5, "Eve", 22, "Seattle"),
    ]
}

fn filter(condition: &str) -> Box<dyn ProcessorPlugin> {
    let mut config = Map::new();
    config.insert("condition".into(), json!(condition));
    config.insert("mode".into(), json!("include"));
    let mut processor = FilterProcessor::new();
    processor.initialize(&config).expect("initialize filter");
    Box::new(processor)
}

fn rename(mappings: serde_json::Value) -> Box<dyn ProcessorPlugin> {
    let mut config = Map::new();
    config.insert("field_mappings".into(), mappings);
    let mut processor = MappingProcessor::new();
    processor.initialize(&config).expect("initialize mapping");
    Box::new(processor)
}

fn small_batches(config: &mut PipelineConfig, batch_size: usize) {
    config.batch_size = batch_size;
}

#[tokio::test]
async fn filter_and_rename_preserve_order_and_schema() {
    let input = MemoryInput::new(people_schema(), people());
    let (output, sink) = MemoryOutput::new();

    let mut pipeline = ConcurrentPipeline::new(
        Box::new(input),
        vec![
            filter("age > 18"),
            rename(json!({"name": "full_name", "city": "location"})),
        ],
        Box::new(output),
        PipelineConfig::default(),
    );

    pipeline
        .execute(CancellationToken::new())
        .await
        .expect("pipeline succeeds");

    let schema = sink.last_schema().expect("schema delivered");
    assert_eq!(
        schema.column_names(),
        vec!["id", "full_name", "age", "location"]
    );

    let records = sink.records();
    let ids: Vec<i64> = records
        .iter()
        .map(|r| r.values[0].as_i64().expect("int id"))
        .collect();
    assert_eq!(ids, vec![1, 3, 5]);
    assert_eq!(records[0].values[1], Value::String("Alice".into()));
    assert_eq!(records[2].values[3], Value::String("Seattle".into()));

    let stats = pipeline.stats();
    assert_eq!(stats.records_read, 5);
    assert_eq!(stats.records_written, 3);
    assert_eq!(sink.flush_count(), 1);
}

#[tokio::test]
async fn fully_filtered_stream_still_flushes_and_succeeds() {
    let records: Vec<Record> = (0..100)
        .map(|i| person(i, "Nobody", 10, "Nowhere"))
        .collect();
    let input = MemoryInput::new(people_schema(), records);
    let (output, sink) = MemoryOutput::new();

    let mut config = PipelineConfig::default();
    small_batches(&mut config, 10);

    let mut pipeline = ConcurrentPipeline::new(
        Box::new(input),
        vec![filter("age > 1000")],
        Box::new(output),
        config,
    );

    pipeline
        .execute(CancellationToken::new())
        .await
        .expect("all-filtered run succeeds");

    assert_eq!(sink.record_count(), 0);
    assert_eq!(sink.flush_count(), 1);
    assert_eq!(pipeline.stats().records_written, 0);
    assert_eq!(pipeline.stats().records_read, 100);
}

#[tokio::test]
async fn cancellation_mid_run_leaves_resumable_output_checkpoint() {
    let dir = tempfile::tempdir().expect("tempdir");
    let records: Vec<Record> = (0..10_000).map(|i| person(i, "Row", 30, "X")).collect();
    let input = MemoryInput::new(people_schema(), records);
    let (output, sink) = MemoryOutput::new();
    let output = output.with_write_delay(Duration::from_millis(2));

    let checkpoint_config = CheckpointConfig {
        enabled: true,
        base_dir: dir.path().to_path_buf(),
    };
    let config = PipelineConfig {
        batch_size: 10,
        job_id: Some("cancel-job".into()),
        checkpoints: Some(checkpoint_config.clone()),
        ..PipelineConfig::default()
    };

    let mut pipeline =
        ConcurrentPipeline::new(Box::new(input), vec![], Box::new(output), config);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let err = pipeline
        .execute(cancel)
        .await
        .expect_err("cancelled run must fail");
    assert!(matches!(err, PipelineError::Cancelled));
    canceller.await.expect("canceller");

    assert!(sink.record_count() > 0, "some batches were written");
    assert!(
        sink.record_count() < 10_000,
        "cancellation interrupted the stream"
    );

    // A fresh manager sees the durable output position.
    let manager =
        CheckpointManager::from_config("cancel-job", &checkpoint_config).expect("manager");
    let checkpoint = manager.load("output").expect("output checkpoint saved");
    let offset = checkpoint.position.as_u64().expect("offset position");
    assert!(offset >= 10, "at least one batch was acknowledged");
}

#[tokio::test]
async fn empty_processor_chain_passes_batches_through() {
    let input = MemoryInput::new(people_schema(), people());
    let (output, sink) = MemoryOutput::new();

    let mut pipeline = ConcurrentPipeline::new(
        Box::new(input),
        vec![],
        Box::new(output),
        PipelineConfig::default(),
    );

    pipeline
        .execute(CancellationToken::new())
        .await
        .expect("pass-through succeeds");

    assert_eq!(sink.record_count(), 5);
    assert_eq!(sink.records()[1].values[1], Value::String("Bob".into()));
}

#[tokio::test]
async fn batch_size_one_delivers_every_record() {
    let input = MemoryInput::new(people_schema(), people());
    let (output, sink) = MemoryOutput::new();

    let mut config = PipelineConfig::default();
    small_batches(&mut config, 1);

    let mut pipeline =
        ConcurrentPipeline::new(Box::new(input), vec![], Box::new(output), config);

    pipeline
        .execute(CancellationToken::new())
        .await
        .expect("run succeeds");

    let stats = pipeline.stats();
    assert_eq!(stats.total_batches, 5, "one batch per record");
    assert_eq!(sink.record_count(), 5);
}

#[tokio::test]
async fn immediate_end_of_input_exits_cleanly() {
    let input = MemoryInput::new(people_schema(), vec![]);
    let (output, sink) = MemoryOutput::new();

    let mut pipeline = ConcurrentPipeline::new(
        Box::new(input),
        vec![],
        Box::new(output),
        PipelineConfig::default(),
    );

    pipeline
        .execute(CancellationToken::new())
        .await
        .expect("empty input succeeds");

    assert_eq!(pipeline.stats().total_batches, 0);
    assert_eq!(sink.record_count(), 0);
    assert_eq!(sink.flush_count(), 1);
}

#[tokio::test]
async fn output_failure_surfaces_as_stage_error() {
    let input = MemoryInput::new(people_schema(), people());
    let (output, sink) = MemoryOutput::new();
    let output = output.failing_after(0);

    let mut pipeline = ConcurrentPipeline::new(
        Box::new(input),
        vec![],
        Box::new(output),
        PipelineConfig::default(),
    );

    let err = pipeline
        .execute(CancellationToken::new())
        .await
        .expect_err("write failure is fatal");
    match err {
        PipelineError::Stage { stage, .. } => assert_eq!(stage, "output"),
        other => panic!("expected stage failure, got {other:?}"),
    }
    assert_eq!(sink.flush_count(), 0, "no flush on abnormal termination");
}

#[tokio::test]
async fn input_failure_names_the_input_stage() {
    let input = MemoryInput::new(people_schema(), people()).failing_after(0);
    let (output, _sink) = MemoryOutput::new();

    let mut pipeline = ConcurrentPipeline::new(
        Box::new(input),
        vec![],
        Box::new(output),
        PipelineConfig::default(),
    );

    let err = pipeline
        .execute(CancellationToken::new())
        .await
        .expect_err("read failure is fatal");
    match err {
        PipelineError::Stage { stage, .. } => assert_eq!(stage, "input"),
        other => panic!("expected stage failure, got {other:?}"),
    }
}

#[tokio::test]
async fn sync_pipeline_matches_concurrent_semantics() {
    let input = MemoryInput::new(people_schema(), people());
    let (output, sink) = MemoryOutput::new();

    let mut pipeline = SyncPipeline::new(
        Box::new(input),
        vec![
            filter("age > 18"),
            rename(json!({"name": "full_name", "city": "location"})),
        ],
        Box::new(output),
        2,
    );

    pipeline
        .execute(CancellationToken::new())
        .await
        .expect("sync run succeeds");

    assert_eq!(sink.record_count(), 3);
    let schema = sink.last_schema().expect("schema delivered");
    assert_eq!(schema.column_names()[1], "full_name");
    assert_eq!(sink.flush_count(), 1);
    assert_eq!(pipeline.stats().records_written, 3);
}

#[tokio::test]
async fn invalid_runtime_config_is_rejected() {
    let input = MemoryInput::new(people_schema(), people());
    let (output, _sink) = MemoryOutput::new();

    let config = PipelineConfig {
        backpressure_threshold: 1.5,
        ..PipelineConfig::default()
    };
    let mut pipeline =
        ConcurrentPipeline::new(Box::new(input), vec![], Box::new(output), config);

    let err = pipeline
        .execute(CancellationToken::new())
        .await
        .expect_err("threshold out of range");
    assert!(matches!(err, PipelineError::InvalidConfig(_)));
}
