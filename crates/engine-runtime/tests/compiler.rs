use engine_core::plugin::registry::Registry;
use engine_runtime::config::{PipelineCompiler, PipelineSpec, SpecError};
use std::fs;
use tokio_util::sync::CancellationToken;

fn registry() -> Registry {
    let registry = Registry::new();
    connectors::register_defaults(&registry).expect("register connectors");
    registry
}

const INPUT_CSV: &str = "\
id,name,age,city
1,Alice,25,NYC
2,Bob,17,LA
3,Charlie,30,SF
4,Diana,16,Boston
5,Eve,22,Seattle
";

fn document(input: &str, output: &str, mode: &str) -> String {
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
      mode: include
  - type: mapping
    config:
      field_mappings:
        name: full_name
        city: location
output:
  type: csv
  config:
    path: {output}
settings:
  batch_size: 2
  mode: {mode}
"#
    )
}

#[tokio::test]
async fn compiles_and_runs_a_csv_document_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input_path = dir.path().join("input.csv");
    let output_path = dir.path().join("output.csv");
    fs::write(&input_path, INPUT_CSV).expect("write input");

    let document = document(
        input_path.to_str().expect("utf-8 path"),
        output_path.to_str().expect("utf-8 path"),
        "async",
    );
    let spec = PipelineSpec::parse(&document).expect("parse");

    let registry = registry();
    let mut pipeline = PipelineCompiler::new(&registry)
        .compile(&spec)
        .expect("compile");
    pipeline
        .execute(CancellationToken::new())
        .await
        .expect("run");

    let written = fs::read_to_string(&output_path).expect("read output");
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines[0], "id,full_name,age,location");
    assert_eq!(
        &lines[1..],
        ["1,Alice,25,NYC", "3,Charlie,30,SF", "5,Eve,22,Seattle"]
    );
    assert_eq!(pipeline.stats().records_written, 3);
}

#[tokio::test]
async fn sync_mode_produces_the_same_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input_path = dir.path().join("input.csv");
    let output_path = dir.path().join("output.csv");
    fs::write(&input_path, INPUT_CSV).expect("write input");

    let document = document(
        input_path.to_str().expect("utf-8 path"),
        output_path.to_str().expect("utf-8 path"),
        "sync",
    );
    let spec = PipelineSpec::parse(&document).expect("parse");
    assert!(matches!(
        spec.settings.mode,
        engine_runtime::config::PipelineMode::Sync
    ));

    let registry = registry();
    let mut pipeline = PipelineCompiler::new(&registry)
        .compile(&spec)
        .expect("compile");
    pipeline
        .execute(CancellationToken::new())
        .await
        .expect("run");

    let written = fs::read_to_string(&output_path).expect("read output");
    assert_eq!(written.lines().count(), 4);
}

#[tokio::test]
async fn unknown_plugin_names_are_rejected_before_instantiation() {
    let registry = registry();
    let compiler = PipelineCompiler::new(&registry);

    let spec =
        PipelineSpec::parse("input:\n  type: kafka\noutput:\n  type: csv\n").expect("parse");
    assert!(matches!(
        compiler.validate(&spec),
        Err(SpecError::UnknownPlugin(_))
    ));

    let spec = PipelineSpec::parse(
        "input:\n  type: csv\nprocessors:\n  - type: nonexistent\noutput:\n  type: csv\n",
    )
    .expect("parse");
    assert!(matches!(
        compiler.validate(&spec),
        Err(SpecError::UnknownPlugin(_))
    ));
}

#[tokio::test]
async fn plugin_config_rejection_surfaces_as_initialize_error() {
    let registry = registry();
    let compiler = PipelineCompiler::new(&registry);

    // csv input without its required path
    let spec = PipelineSpec::parse("input:\n  type: csv\noutput:\n  type: csv\n").expect("parse");
    let err = compiler.compile(&spec).expect_err("must reject");
    assert!(matches!(err, SpecError::Initialize { kind: "input", .. }));
}
