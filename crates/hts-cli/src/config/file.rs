use crate::error::{CliError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A run config as written on disk. Keys not named here are collected into `extra` and
/// must be scalars.
#[derive(Deserialize, Debug, Default)]
pub struct FileRunConfig {
    pub name: Option<String>,
    pub experimenter: Option<String>,
    pub experimenter_mail: Option<String>,
    #[serde(default)]
    pub send_mail_upon_qc: bool,
    pub protocol: Option<FileProtocolRef>,
    #[serde(default)]
    pub meta: BTreeMap<String, toml::Value>,
    #[serde(default)]
    pub qc: BTreeMap<String, toml::Value>,

    pub meta_data: Option<FileLayerConfig>,
    pub plate_layout: Option<FileLayerConfig>,
    pub qc_data: Option<FileLayerConfig>,
    pub readout: Option<FileLayerConfig>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileProtocolRef {
    pub path: PathBuf,
}

/// Source files of one data type.
///
/// Plate wise layers list one file per plate, either as `filenames` or as a
/// `filename` template whose `{}` is replaced by each `filenumber`. Run wise layers
/// name a single file with `path` (optionally joined with `filename`).
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct FileLayerConfig {
    pub is_defined_plate_wise: bool,
    pub path: PathBuf,
    pub filenames: Option<Vec<String>>,
    pub filename: Option<String>,
    pub filenumber: Option<Vec<toml::Value>>,
    #[serde(default)]
    pub config: BTreeMap<String, toml::Value>,
}

impl FileRunConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Reading run config from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }
}

pub fn stringify(value: &toml::Value) -> String {
    match value {
        toml::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_layers_and_collects_extra_keys() {
        let config: FileRunConfig = toml::from_str(
            r#"
            name = "expA"
            experimenter = "J. Doe"
            instrument = "EnVision"

            [protocol]
            path = "fret.toml"

            [readout]
            is_defined_plate_wise = true
            path = "raw"
            filename = "expA_plate{}.csv"
            filenumber = [1, 2]

            [readout.config]
            format = "well_table"
            "#,
        )
        .unwrap();

        assert_eq!(config.name.as_deref(), Some("expA"));
        assert_eq!(config.protocol.unwrap().path, PathBuf::from("fret.toml"));
        let readout = config.readout.unwrap();
        assert!(readout.is_defined_plate_wise);
        assert_eq!(readout.filenumber.unwrap().len(), 2);
        assert_eq!(stringify(&readout.config["format"]), "well_table");
        assert_eq!(stringify(&config.extra["instrument"]), "EnVision");
        assert!(config.plate_layout.is_none());
    }

    #[test]
    fn unknown_layer_keys_are_rejected() {
        let result: std::result::Result<FileRunConfig, _> = toml::from_str(
            r#"
            [readout]
            is_defined_plate_wise = true
            path = "raw"
            filenames = ["a1.csv"]
            instrument = "EnVision"
            "#,
        );
        assert!(result.is_err());
    }
}
