//! Utility functions for dctn

pub mod logging;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Save object to JSON file
pub fn save_json<T: Serialize + ?Sized>(obj: &T, path: impl AsRef<Path>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, obj)?;
    writer.flush()?;
    Ok(())
}

/// Load object from JSON file
pub fn load_json<T: for<'de> Deserialize<'de>>(path: impl AsRef<Path>) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
