use crate::plugin::{InputPlugin, OutputPlugin, PluginMetadata, ProcessorPlugin};
use std::{
    collections::HashMap,
    sync::{Arc, OnceLock, RwLock},
};
use thiserror::Error;

type InputCtor = Arc<dyn Fn() -> Box<dyn InputPlugin> + Send + Sync>;
type ProcessorCtor = Arc<dyn Fn() -> Box<dyn ProcessorPlugin> + Send + Sync>;
type OutputCtor = Arc<dyn Fn() -> Box<dyn OutputPlugin> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{kind} plugin already registered: {name}")]
    AlreadyRegistered { kind: &'static str, name: String },

    #[error("{kind} plugin not found: {name}")]
    NotFound { kind: &'static str, name: String },
}

/// Name → constructor tables, one per plugin kind.
///
/// Plugins are stateful and initialized per pipeline, so the registry binds
/// names to constructors; `get_*` hands back a fresh, uninitialized
/// instance. Lookups never conflate kinds. Writes happen at process startup,
/// reads afterwards, under a multi-reader/single-writer discipline.
#[derive(Default)]
pub struct Registry {
    inputs: RwLock<HashMap<String, InputCtor>>,
    processors: RwLock<HashMap<String, ProcessorCtor>>,
    outputs: RwLock<HashMap<String, OutputCtor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_input<F>(&self, name: &str, ctor: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn InputPlugin> + Send + Sync + 'static,
    {
        let mut inputs = self.inputs.write().expect("registry lock poisoned");
        if inputs.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered {
                kind: "input",
                name: name.to_owned(),
            });
        }
        inputs.insert(name.to_owned(), Arc::new(ctor));
        Ok(())
    }

    pub fn register_processor<F>(&self, name: &str, ctor: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn ProcessorPlugin> + Send + Sync + 'static,
    {
        let mut processors = self.processors.write().expect("registry lock poisoned");
        if processors.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered {
                kind: "processor",
                name: name.to_owned(),
            });
        }
        processors.insert(name.to_owned(), Arc::new(ctor));
        Ok(())
    }

    pub fn register_output<F>(&self, name: &str, ctor: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn OutputPlugin> + Send + Sync + 'static,
    {
        let mut outputs = self.outputs.write().expect("registry lock poisoned");
        if outputs.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered {
                kind: "output",
                name: name.to_owned(),
            });
        }
        outputs.insert(name.to_owned(), Arc::new(ctor));
        Ok(())
    }

    /// Builds a fresh, uninitialized input plugin instance.
    pub fn get_input(&self, name: &str) -> Result<Box<dyn InputPlugin>, RegistryError> {
        let inputs = self.inputs.read().expect("registry lock poisoned");
        inputs
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| RegistryError::NotFound {
                kind: "input",
                name: name.to_owned(),
            })
    }

    pub fn get_processor(&self, name: &str) -> Result<Box<dyn ProcessorPlugin>, RegistryError> {
        let processors = self.processors.read().expect("registry lock poisoned");
        processors
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| RegistryError::NotFound {
                kind: "processor",
                name: name.to_owned(),
            })
    }

    pub fn get_output(&self, name: &str) -> Result<Box<dyn OutputPlugin>, RegistryError> {
        let outputs = self.outputs.read().expect("registry lock poisoned");
        outputs
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| RegistryError::NotFound {
                kind: "output",
                name: name.to_owned(),
            })
    }

    pub fn contains_input(&self, name: &str) -> bool {
        self.inputs
            .read()
            .expect("registry lock poisoned")
            .contains_key(name)
    }

    pub fn contains_processor(&self, name: &str) -> bool {
        self.processors
            .read()
            .expect("registry lock poisoned")
            .contains_key(name)
    }

    pub fn contains_output(&self, name: &str) -> bool {
        self.outputs
            .read()
            .expect("registry lock poisoned")
            .contains_key(name)
    }

    pub fn list_inputs(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .inputs
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn list_processors(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .processors
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn list_outputs(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .outputs
            .read()
            .expect("registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Metadata of every registered plugin, inputs then processors then
    /// outputs, each group in name order.
    pub fn list_metadata(&self) -> Vec<PluginMetadata> {
        let mut metadata = Vec::new();

        for name in self.list_inputs() {
            if let Ok(plugin) = self.get_input(&name) {
                metadata.push(plugin.metadata());
            }
        }
        for name in self.list_processors() {
            if let Ok(plugin) = self.get_processor(&name) {
                metadata.push(plugin.metadata());
            }
        }
        for name in self.list_outputs() {
            if let Ok(plugin) = self.get_output(&name) {
                metadata.push(plugin.metadata());
            }
        }

        metadata
    }
}

/// Process-wide registry. Plugin crates bind their names into this at
/// startup, before any job is compiled.
pub fn default_registry() -> &'static Registry {
    static DEFAULT: OnceLock<Registry> = OnceLock::new();
    DEFAULT.get_or_init(Registry::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{Plugin, PluginConfig, PluginError, PluginType, ProcessorPlugin};
    use async_trait::async_trait;
    use model::{progress::ProcessStats, records::batch::DataBatch};

    #[derive(Default)]
    struct NoopProcessor;

    #[async_trait]
    impl Plugin for NoopProcessor {
        fn name(&self) -> &str {
            "noop"
        }

        fn plugin_type(&self) -> PluginType {
            PluginType::Processor
        }

        fn initialize(&mut self, _config: &PluginConfig) -> Result<(), PluginError> {
            Ok(())
        }

        fn validate(&self) -> Result<(), PluginError> {
            Ok(())
        }

        fn metadata(&self) -> PluginMetadata {
            PluginMetadata {
                name: "noop".into(),
                plugin_type: PluginType::Processor,
                version: "1.0.0".into(),
                description: "passes batches through untouched".into(),
                config_schema: serde_json::Value::Null,
            }
        }
    }

    #[async_trait]
    impl ProcessorPlugin for NoopProcessor {
        async fn process(&mut self, batch: &DataBatch) -> Result<DataBatch, PluginError> {
            Ok(batch.clone())
        }

        fn stats(&self) -> ProcessStats {
            ProcessStats::default()
        }
    }

    #[test]
    fn duplicate_names_are_rejected_per_kind() {
        let registry = Registry::new();
        registry
            .register_processor("noop", || Box::new(NoopProcessor))
            .expect("first registration");

        let err = registry
            .register_processor("noop", || Box::new(NoopProcessor))
            .expect_err("second registration must fail");
        assert!(matches!(err, RegistryError::AlreadyRegistered { .. }));
    }

    #[test]
    fn lookup_returns_fresh_instances_and_not_found() {
        let registry = Registry::new();
        registry
            .register_processor("noop", || Box::new(NoopProcessor))
            .expect("register");

        assert!(registry.get_processor("noop").is_ok());
        assert!(matches!(
            registry.get_processor("missing"),
            Err(RegistryError::NotFound { .. })
        ));
        // An input with the same name is a different table entirely.
        assert!(registry.get_input("noop").is_err());
    }

    #[test]
    fn metadata_listing_covers_registered_plugins() {
        let registry = Registry::new();
        registry
            .register_processor("noop", || Box::new(NoopProcessor))
            .expect("register");

        let metadata = registry.list_metadata();
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0].name, "noop");
        assert_eq!(metadata[0].plugin_type, PluginType::Processor);
    }
}
