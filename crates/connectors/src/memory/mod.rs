mod input;
mod output;

pub use input::MemoryInput;
pub use output::{CollectedOutput, MemoryOutput};
