use crate::{
    config::{PipelineMode, PipelineSpec, SpecError},
    pipeline::{ConcurrentPipeline, PipelineConfig, PipelineError, PipelineStats, SyncPipeline},
};
use engine_core::plugin::registry::{Registry, RegistryError};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A pipeline instantiated from a declarative spec, in the mode the spec
/// selected.
pub enum CompiledPipeline {
    Sync(SyncPipeline),
    Concurrent(ConcurrentPipeline),
}

impl std::fmt::Debug for CompiledPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompiledPipeline::Sync(_) => write!(f, "CompiledPipeline::Sync(..)"),
            CompiledPipeline::Concurrent(_) => write!(f, "CompiledPipeline::Concurrent(..)"),
        }
    }
}

impl CompiledPipeline {
    pub async fn execute(&mut self, cancel: CancellationToken) -> Result<(), PipelineError> {
        match self {
            CompiledPipeline::Sync(pipeline) => pipeline.execute(cancel).await,
            CompiledPipeline::Concurrent(pipeline) => pipeline.execute(cancel).await,
        }
    }

    pub fn stats(&self) -> PipelineStats {
        match self {
            CompiledPipeline::Sync(pipeline) => pipeline.stats(),
            CompiledPipeline::Concurrent(pipeline) => pipeline.stats(),
        }
    }
}

/// Turns validated pipeline specs into initialized pipelines, resolving
/// stage names against a plugin registry.
pub struct PipelineCompiler<'r> {
    registry: &'r Registry,
}

impl<'r> PipelineCompiler<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    /// Checks that every stage names a registered plugin. Runs before any
    /// plugin is instantiated, so rejection has no side effects.
    pub fn validate(&self, spec: &PipelineSpec) -> Result<(), SpecError> {
        if !self.registry.contains_input(&spec.input.plugin_type) {
            return Err(RegistryError::NotFound {
                kind: "input",
                name: spec.input.plugin_type.clone(),
            }
            .into());
        }
        if !self.registry.contains_output(&spec.output.plugin_type) {
            return Err(RegistryError::NotFound {
                kind: "output",
                name: spec.output.plugin_type.clone(),
            }
            .into());
        }
        for processor in &spec.processors {
            if !self.registry.contains_processor(&processor.plugin_type) {
                return Err(RegistryError::NotFound {
                    kind: "processor",
                    name: processor.plugin_type.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Instantiates and initializes every stage in order (input, processors,
    /// output) and assembles the pipeline selected by `settings.mode`.
    /// Cleanup of partially initialized plugins is left to the pipeline's
    /// ordinary shutdown path once it is handed to the caller.
    pub fn compile(&self, spec: &PipelineSpec) -> Result<CompiledPipeline, SpecError> {
        self.compile_with(spec, PipelineConfig::default())
    }

    pub fn compile_with(
        &self,
        spec: &PipelineSpec,
        mut config: PipelineConfig,
    ) -> Result<CompiledPipeline, SpecError> {
        self.validate(spec)?;

        let mut input = self.registry.get_input(&spec.input.plugin_type)?;
        input
            .initialize(&spec.input.config)
            .and_then(|_| input.validate())
            .map_err(|source| SpecError::Initialize {
                kind: "input",
                name: spec.input.plugin_type.clone(),
                source,
            })?;

        let mut processors = Vec::with_capacity(spec.processors.len());
        for stage in &spec.processors {
            let mut processor = self.registry.get_processor(&stage.plugin_type)?;
            processor
                .initialize(&stage.config)
                .and_then(|_| processor.validate())
                .map_err(|source| SpecError::Initialize {
                    kind: "processor",
                    name: stage.plugin_type.clone(),
                    source,
                })?;
            processors.push(processor);
        }

        let mut output = self.registry.get_output(&spec.output.plugin_type)?;
        output
            .initialize(&spec.output.config)
            .and_then(|_| output.validate())
            .map_err(|source| SpecError::Initialize {
                kind: "output",
                name: spec.output.plugin_type.clone(),
                source,
            })?;

        config.batch_size = spec.settings.batch_size;

        info!(
            input = %spec.input.plugin_type,
            processors = spec.processors.len(),
            output = %spec.output.plugin_type,
            mode = ?spec.settings.mode,
            "Compiled pipeline"
        );

        Ok(match spec.settings.mode {
            PipelineMode::Sync => CompiledPipeline::Sync(SyncPipeline::new(
                input,
                processors,
                output,
                config.batch_size,
            )),
            PipelineMode::Async => CompiledPipeline::Concurrent(ConcurrentPipeline::new(
                input, processors, output, config,
            )),
        })
    }
}
