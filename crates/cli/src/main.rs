use crate::{commands::Commands, error::CliError, shutdown::ShutdownCoordinator};
use clap::Parser;
use engine_control::{
    executor::{ExecutorError, PipelineJobExecutor},
    jobs::JobManager,
};
use engine_core::{
    checkpoint::{CheckpointConfig, CheckpointManager},
    plugin::registry::default_registry,
    store::{sled_store::SledMetadataStore, MetadataStore},
};
use engine_runtime::{
    config::{PipelineCompiler, PipelineSpec},
    pipeline::PipelineError,
};
use model::execution::job::{Job, JobStatus};
use std::{path::PathBuf, process, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

mod commands;
mod error;
mod shutdown;

#[derive(Parser)]
#[command(name = "flowsync", version = "0.1.0", about = "Data synchronization engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let exit_code = match run_cli().await {
        Ok(()) => 0,
        Err(CliError::ShutdownRequested) => {
            info!("Shut down gracefully, progress has been saved");
            130
        }
        Err(err) => {
            tracing::error!("{err}");
            1
        }
    };

    process::exit(exit_code);
}

async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();
    default_registry_with_builtins()?;

    match cli.command {
        Commands::Run {
            config,
            name,
            state_dir,
            checkpoint_dir,
            no_checkpoints,
        } => {
            run_pipeline(config, name, state_dir, checkpoint_dir, no_checkpoints).await
        }
        Commands::Validate { config } => {
            let document = tokio::fs::read_to_string(&config).await?;
            let spec = PipelineSpec::parse(&document)?;
            PipelineCompiler::new(default_registry()).validate(&spec)?;
            println!("{config}: OK");
            Ok(())
        }
        Commands::Plugins { json } => {
            let metadata = default_registry().list_metadata();
            if json {
                println!("{}", serde_json::to_string_pretty(&metadata)?);
            } else {
                println!("{:<12} {:<10} {:<8} DESCRIPTION", "NAME", "TYPE", "VERSION");
                for plugin in metadata {
                    println!(
                        "{:<12} {:<10} {:<8} {}",
                        plugin.name, plugin.plugin_type, plugin.version, plugin.description
                    );
                }
            }
            Ok(())
        }
        Commands::Checkpoints {
            job_id,
            checkpoint_dir,
            clear,
        } => show_checkpoints(job_id, checkpoint_dir, clear),
    }
}

async fn run_pipeline(
    config: String,
    name: Option<String>,
    state_dir: Option<PathBuf>,
    checkpoint_dir: Option<PathBuf>,
    no_checkpoints: bool,
) -> Result<(), CliError> {
    let cancel = CancellationToken::new();
    ShutdownCoordinator::new(cancel.clone()).register_handlers();

    let document = tokio::fs::read_to_string(&config).await?;
    // Surface document problems before touching any state.
    PipelineSpec::parse(&document)?;

    let store = open_metadata_store(state_dir)?;
    let manager = Arc::new(JobManager::new(store.clone()));

    let job_name = name.unwrap_or_else(|| {
        PathBuf::from(&config)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "pipeline".to_owned())
    });

    let job = manager.create(Job::new(job_name, document)).await?;
    let mut ready = job.clone();
    ready.status = JobStatus::Ready;
    let job = manager.update(ready).await?;

    let executor = PipelineJobExecutor::new(
        manager.clone(),
        store,
        default_registry(),
        "local",
    )
    .with_checkpoints(CheckpointConfig {
        enabled: !no_checkpoints,
        base_dir: checkpoint_dir.unwrap_or(data_dir()?.join("checkpoints")),
    });

    info!(job_id = %job.id, "Running pipeline job");
    match executor.run(cancel, &job.id).await {
        Ok(()) => {
            info!(job_id = %job.id, "Pipeline completed successfully");
            Ok(())
        }
        Err(ExecutorError::Pipeline(PipelineError::Cancelled)) => Err(CliError::ShutdownRequested),
        Err(err) => Err(err.into()),
    }
}

fn show_checkpoints(
    job_id: String,
    checkpoint_dir: Option<PathBuf>,
    clear: bool,
) -> Result<(), CliError> {
    let config = CheckpointConfig {
        enabled: true,
        base_dir: checkpoint_dir.unwrap_or(data_dir()?.join("checkpoints")),
    };
    let manager = CheckpointManager::from_config(&job_id, &config)?;

    if clear {
        manager.clear()?;
        println!("Cleared checkpoints for job {job_id}");
        return Ok(());
    }

    let checkpoints = manager.list();
    if checkpoints.is_empty() {
        println!("No checkpoints for job {job_id}");
        return Ok(());
    }

    println!("{:<12} {:<28} POSITION", "STAGE", "TIMESTAMP");
    let mut stages: Vec<_> = checkpoints.into_iter().collect();
    stages.sort_by(|a, b| a.0.cmp(&b.0));
    for (stage, checkpoint) in stages {
        println!(
            "{:<12} {:<28} {}",
            stage,
            checkpoint.timestamp.to_rfc3339(),
            checkpoint.position
        );
    }
    Ok(())
}

fn default_registry_with_builtins() -> Result<(), CliError> {
    connectors::register_defaults(default_registry())?;
    Ok(())
}

fn open_metadata_store(state_dir: Option<PathBuf>) -> Result<Arc<dyn MetadataStore>, CliError> {
    let path = state_dir.unwrap_or(data_dir()?.join("meta"));
    let store = SledMetadataStore::open(&path).map_err(|err| {
        CliError::Unexpected(format!(
            "Failed to open metadata store at {}: {err}",
            path.display()
        ))
    })?;
    Ok(Arc::new(store))
}

fn data_dir() -> Result<PathBuf, CliError> {
    let home = dirs::home_dir()
        .ok_or_else(|| CliError::Unexpected("Could not determine home directory".into()))?;
    Ok(home.join(".flowsync"))
}
