//! Reading run configurations and writing generated listings.

use std::fs::File;
use std::io::{self as stdio, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{self, format_err, Context};
use serde::{de::DeserializeOwned, Serialize};
use serde_yaml;

pub(crate) mod format;

/// Reads a `smith` configuration YAML file and deserialises it into an appropriate structure.
///
/// # Arguments
///
/// * `name` - The name of the file to be read in (with its `.yml` or `.yaml` extension).
///
/// # Returns
///
/// A `Result` containing the structure deserialised from the read-in file.
pub fn read_smith_yaml<T, P: AsRef<Path>>(name: P) -> Result<T, anyhow::Error>
where
    T: DeserializeOwned,
{
    let path = name.as_ref();
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("Unable to open `{}`.", path.display()))?,
    );
    serde_yaml::from_reader(&mut reader).map_err(|err| format_err!(err))
}

/// Serialises a structure and writes into a `smith` configuration YAML file.
///
/// # Arguments
///
/// * `name` - The name of the YAML file to be written (without extensions). The resulting file
/// will have the `.yml` extension.
pub fn write_smith_yaml<T, P: AsRef<Path>>(name: P, value: &T) -> Result<(), anyhow::Error>
where
    T: Serialize,
{
    let mut path = name.as_ref().to_path_buf();
    path.set_extension("yml");
    let mut writer = BufWriter::new(File::create(path)?);
    serde_yaml::to_writer(&mut writer, value).map_err(|err| format_err!(err))
}

/// Writes generated source text to a file, or to standard output if no file is given.
pub fn write_listing<P: AsRef<Path>>(text: &str, name: Option<P>) -> Result<(), anyhow::Error> {
    match name {
        Some(name) => {
            let path = name.as_ref();
            let mut writer = BufWriter::new(
                File::create(path)
                    .with_context(|| format!("Unable to create `{}`.", path.display()))?,
            );
            writer.write_all(text.as_bytes())?;
            writer.flush()?;
        }
        None => {
            let stdout = stdio::stdout();
            let mut handle = stdout.lock();
            handle.write_all(text.as_bytes())?;
            handle.flush()?;
        }
    }
    Ok(())
}
