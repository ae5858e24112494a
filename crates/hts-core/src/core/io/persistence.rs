//! Whole-object snapshots of plates and runs.
//!
//! The blob layout is whatever `bincode` produces for the serde representation of the
//! value. It is meant for reloading in the same build of the library, not as an
//! exchange format.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Snapshot encoding error for '{path}': {source}")]
    Encoding {
        path: String,
        source: bincode::Error,
    },
}

pub fn write_blob<T: Serialize>(value: &T, path: &Path) -> Result<(), PersistenceError> {
    let io_error = |e| PersistenceError::Io {
        path: path.to_string_lossy().to_string(),
        source: e,
    };
    let file = File::create(path).map_err(io_error)?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, value).map_err(|e| PersistenceError::Encoding {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;
    writer.flush().map_err(io_error)
}

pub fn read_blob<T: DeserializeOwned>(path: &Path) -> Result<T, PersistenceError> {
    let file = File::open(path).map_err(|e| PersistenceError::Io {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;
    bincode::deserialize_from(BufReader::new(file)).map_err(|e| PersistenceError::Encoding {
        path: path.to_string_lossy().to_string(),
        source: e,
    })
}
