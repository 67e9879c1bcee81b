use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline document as a one-off job
    Run {
        #[arg(long, help = "Pipeline document path (YAML)")]
        config: String,

        #[arg(long, help = "Job name; defaults to the document file stem")]
        name: Option<String>,

        #[arg(long, help = "Metadata store directory (default: ~/.flowsync/meta)")]
        state_dir: Option<PathBuf>,

        #[arg(
            long,
            help = "Checkpoint directory (default: ~/.flowsync/checkpoints)"
        )]
        checkpoint_dir: Option<PathBuf>,

        #[arg(long, help = "Disable checkpointing for this run")]
        no_checkpoints: bool,
    },
    /// Parse and validate a pipeline document without running it
    Validate {
        #[arg(long, help = "Pipeline document path (YAML)")]
        config: String,
    },
    /// List the registered plugins
    Plugins {
        #[arg(long, help = "Print plugin metadata as JSON")]
        json: bool,
    },
    /// Inspect or clear a job's saved checkpoints
    Checkpoints {
        #[arg(long, help = "Job id whose checkpoints to inspect")]
        job_id: String,

        #[arg(
            long,
            help = "Checkpoint directory (default: ~/.flowsync/checkpoints)"
        )]
        checkpoint_dir: Option<PathBuf>,

        #[arg(long, help = "Delete every checkpoint for the job")]
        clear: bool,
    },
}
