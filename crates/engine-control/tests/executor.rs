use engine_control::{executor::PipelineJobExecutor, jobs::JobManager, scheduler::JobExecutor};
use engine_core::{plugin::registry::default_registry, store::memory::MemoryMetadataStore};
use engine_core::store::MetadataStore;
use model::execution::{execution::ExecutionStatus, job::Job, job::JobStatus};
use std::{fs, sync::Arc};
use tokio_util::sync::CancellationToken;

const INPUT_CSV: &str = "\
id,name,age
1,Alice,25
2,Bob,17
3,Charlie,30
";

fn job_document(input: &str, output: &str) -> String {
    format!(
        r#"
input:
  type: csv
  config:
    path: {input}
processors:
  - type: filter
    config:
      condition: "age > 18"
output:
  type: csv
  config:
    path: {output}
"#
    )
}

fn executor_fixture() -> (Arc<JobManager>, Arc<dyn MetadataStore>, PipelineJobExecutor) {
    // Connectors may already be bound when several tests share the process.
    let _ = connectors::register_defaults(default_registry());

    let store: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataStore::new());
    let manager = Arc::new(JobManager::new(store.clone()));
    let executor = PipelineJobExecutor::new(
        manager.clone(),
        store.clone(),
        default_registry(),
        "worker-test",
    );
    (manager, store, executor)
}

async fn ready_job(manager: &JobManager, config: String) -> Job {
    let job = manager
        .create(Job::new("csv-sync", config))
        .await
        .expect("create");
    let mut job = job;
    job.status = JobStatus::Ready;
    manager.update(job).await.expect("to ready")
}

#[tokio::test]
async fn executes_a_job_and_records_the_execution() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input_path = dir.path().join("in.csv");
    let output_path = dir.path().join("out.csv");
    fs::write(&input_path, INPUT_CSV).expect("write input");

    let (manager, store, executor) = executor_fixture();
    let job = ready_job(
        &manager,
        job_document(
            input_path.to_str().expect("utf-8"),
            output_path.to_str().expect("utf-8"),
        ),
    )
    .await;

    executor
        .execute(CancellationToken::new(), &job.id)
        .await
        .expect("execution succeeds");

    let job = manager.get(&job.id).await.expect("get");
    assert_eq!(job.status, JobStatus::Completed);

    let executions = store.list_executions(&job.id).await.expect("list");
    assert_eq!(executions.len(), 1);
    let execution = &executions[0];
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.records_read, 3);
    assert_eq!(execution.records_written, 2);
    assert!(execution.end_time.is_some());
    assert_eq!(execution.worker_id, "worker-test");

    let written = fs::read_to_string(&output_path).expect("read output");
    assert_eq!(written.lines().count(), 3); // header + Alice + Charlie
}

#[tokio::test]
async fn failed_pipeline_marks_job_and_execution_failed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output_path = dir.path().join("out.csv");

    let (manager, store, executor) = executor_fixture();
    let job = ready_job(
        &manager,
        job_document(
            "/nonexistent/input.csv",
            output_path.to_str().expect("utf-8"),
        ),
    )
    .await;

    let result = executor.execute(CancellationToken::new(), &job.id).await;
    assert!(result.is_err());

    let job = manager.get(&job.id).await.expect("get");
    assert_eq!(job.status, JobStatus::Failed);

    let executions = store.list_executions(&job.id).await.expect("list");
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Failed);
    assert!(executions[0].error_message.is_some());

    // A failed job can be re-armed and retried.
    let mut job = job;
    job.status = JobStatus::Ready;
    manager.update(job).await.expect("failed -> ready");
}
