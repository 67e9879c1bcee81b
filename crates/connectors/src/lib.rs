pub mod file;
pub mod memory;
pub mod processor;

use engine_core::plugin::registry::{Registry, RegistryError};

/// Binds the built-in connectors into `registry`. Applications call this
/// once at startup, before compiling any pipeline that names them.
pub fn register_defaults(registry: &Registry) -> Result<(), RegistryError> {
    registry.register_input("csv", || Box::new(file::csv::CsvInput::new()))?;
    registry.register_output("csv", || Box::new(file::csv::CsvOutput::new()))?;
    registry.register_processor("filter", || Box::new(processor::filter::FilterProcessor::new()))?;
    registry.register_processor("mapping", || {
        Box::new(processor::mapping::MappingProcessor::new())
    })?;
    Ok(())
}
