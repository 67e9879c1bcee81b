pub mod compiler;

pub use compiler::{CompiledPipeline, PipelineCompiler};

use engine_core::plugin::{PluginConfig, PluginError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to parse pipeline document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{section} type is required")]
    MissingType { section: &'static str },

    #[error(transparent)]
    UnknownPlugin(#[from] engine_core::plugin::registry::RegistryError),

    #[error("failed to initialize {kind} plugin '{name}': {source}")]
    Initialize {
        kind: &'static str,
        name: String,
        #[source]
        source: PluginError,
    },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

/// One `{type, config}` stage entry in a pipeline document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    #[serde(rename = "type")]
    pub plugin_type: String,
    #[serde(default)]
    pub config: PluginConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    Sync,
    #[default]
    Async,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsSpec {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub mode: PipelineMode,
}

fn default_batch_size() -> usize {
    1000
}

impl Default for SettingsSpec {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            mode: PipelineMode::default(),
        }
    }
}

/// Declarative pipeline document: input, ordered processors, output,
/// plus runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub input: StageSpec,
    #[serde(default)]
    pub processors: Vec<StageSpec>,
    pub output: StageSpec,
    #[serde(default)]
    pub settings: SettingsSpec,
}

impl PipelineSpec {
    pub fn parse(document: &str) -> Result<Self, SpecError> {
        let spec: PipelineSpec = serde_yaml::from_str(document)?;
        spec.check_shape()?;
        Ok(spec)
    }

    fn check_shape(&self) -> Result<(), SpecError> {
        if self.input.plugin_type.is_empty() {
            return Err(SpecError::MissingType { section: "input" });
        }
        if self.output.plugin_type.is_empty() {
            return Err(SpecError::MissingType { section: "output" });
        }
        for processor in &self.processors {
            if processor.plugin_type.is_empty() {
                return Err(SpecError::MissingType {
                    section: "processor",
                });
            }
        }
        if self.settings.batch_size == 0 {
            return Err(SpecError::InvalidSettings(
                "batch_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
input:
  type: csv
  config:
    path: /data/input.csv
processors:
  - type: filter
    config:
      condition: "age > 18"
      mode: include
output:
  type: csv
  config:
    path: /data/output.csv
settings:
  batch_size: 500
  mode: sync
"#;

    #[test]
    fn parses_full_document() {
        let spec = PipelineSpec::parse(DOCUMENT).expect("parse");
        assert_eq!(spec.input.plugin_type, "csv");
        assert_eq!(spec.processors.len(), 1);
        assert_eq!(spec.settings.batch_size, 500);
        assert_eq!(spec.settings.mode, PipelineMode::Sync);
    }

    #[test]
    fn settings_default_to_async_thousand() {
        let spec = PipelineSpec::parse(
            "input:\n  type: a\noutput:\n  type: b\n",
        )
        .expect("parse");
        assert_eq!(spec.settings.batch_size, 1000);
        assert_eq!(spec.settings.mode, PipelineMode::Async);
        assert!(spec.processors.is_empty());
    }

    #[test]
    fn empty_type_is_rejected() {
        let err = PipelineSpec::parse("input:\n  type: \"\"\noutput:\n  type: b\n")
            .expect_err("must reject");
        assert!(matches!(err, SpecError::MissingType { section: "input" }));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = PipelineSpec::parse(
            "input:\n  type: a\noutput:\n  type: b\nsettings:\n  batch_size: 0\n",
        )
        .expect_err("must reject");
        assert!(matches!(err, SpecError::InvalidSettings(_)));
    }
}
