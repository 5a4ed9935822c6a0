use std::path::Path;

use anyhow::{self, format_err};
use serde::{Deserialize, Serialize};

use crate::drivers::caspt2::{Caspt2Driver, Caspt2Params};
use crate::drivers::SmithDriver;
use crate::interfaces::InputHandle;
use crate::io::format::smith_output;
use crate::io::write_listing;


/// A structure containing `smith` input parameters which can be serialised into and deserialised
/// from a YAML input file.
///
/// Every field may be omitted; the defaults reproduce the full CASPT2 generation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Input {
    /// Parameters for the CASPT2 generation: `theory`, `equations`, `emit_tensor_units`,
    /// `merge_label`, and `spin_resolved_density`.
    #[serde(flatten)]
    pub caspt2: Caspt2Params,
}

impl InputHandle for Input {
    fn handle(&self, output: Option<&Path>) -> Result<(), anyhow::Error> {
        let mut driver = Caspt2Driver::builder()
            .parameters(&self.caspt2)
            .build()
            .map_err(|err| format_err!(err))?;
        driver.run()?;

        let result = driver.result()?;
        write_listing(result.text(), output)?;
        if let Some(path) = output {
            smith_output!("Generated source written to `{}`.", path.display());
        }
        Ok(())
    }
}
