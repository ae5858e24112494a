use crate::core::models::coordinate::CoordinateError;
use crate::core::models::layer::{DataLayer, DataType, LayerError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Recognized keys vary by reader; readers reject keys they do not know.
pub type LayerConfig = BTreeMap<String, String>;

/// Where one layer of one plate comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LayerSpec {
    pub path: PathBuf,
    pub config: LayerConfig,
}

impl LayerSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: LayerConfig::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV parsing error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("Invalid well label in '{path}': {source}")]
    Coordinate {
        path: String,
        source: CoordinateError,
    },
    #[error("Could not assemble layer from '{path}': {source}")]
    Layer { path: String, source: LayerError },
    #[error("Table '{group}' written to '{path}' has different columns than the first table")]
    ColumnMismatch { path: String, group: String },
    #[error("'{path}' has no 'well' column")]
    MissingWellColumn { path: String },
    #[error("'{path}' contains no wells")]
    EmptyTable { path: String },
    #[error("Wells in '{path}' exceed every supported plate format")]
    UnsupportedPlateSize { path: String },
    #[error("Unknown layer format: {0}")]
    UnknownFormat(String),
    #[error("Unknown layer configuration key '{0}'")]
    UnknownConfigKey(String),
    #[error("Invalid value '{value}' for layer configuration key '{key}'")]
    InvalidConfig { key: String, value: String },
}

/// Produces a data layer of the requested kind from a file.
///
/// Implementors handle one concrete on-disk format; [`super::well_table::LayerReaders`]
/// dispatches between them using the `format` configuration key.
pub trait LayerSource {
    /// Reads the layer stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not follow the format, or
    /// `config` carries keys the reader does not recognize.
    fn read_layer(
        &self,
        data_type: DataType,
        path: &Path,
        config: &LayerConfig,
    ) -> Result<DataLayer, SourceError>;
}
