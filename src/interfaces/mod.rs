//! Interfaces between `smith` and its users: the command line and YAML run configurations.

use std::path::Path;

use anyhow;

pub mod cli;
pub mod input;

/// Trait for handling an input specification.
pub trait InputHandle {
    /// Handles the input specification, runs the generation it describes, and writes the
    /// generated source text to `output`, or to standard output if `output` is `None`.
    fn handle(&self, output: Option<&Path>) -> Result<(), anyhow::Error>;
}
