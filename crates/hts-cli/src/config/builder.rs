use super::file::{FileLayerConfig, FileRunConfig, stringify};
use crate::error::{CliError, Result};
use htskit::core::io::traits::{LayerConfig, LayerSpec};
use htskit::core::models::layer::DataType;
use htskit::core::models::plate::PlateSpec;
use htskit::core::protocol::Protocol;
use htskit::engine::error::EngineError;
use htskit::engine::run::{RunConfig, RunMetadata};
use htskit::workflows::assemble::{RunOrigin, readout_files};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const FILENUMBER_PLACEHOLDER: &str = "{}";

/// Everything [`htskit::workflows::assemble::assemble_run`] needs.
#[derive(Debug)]
pub struct RunSetup {
    pub origin: RunOrigin,
    pub path: PathBuf,
    pub config: RunConfig,
}

pub fn from_config_file(path: &Path) -> Result<RunSetup> {
    let file = FileRunConfig::from_file(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));

    let mut plate_wise: Vec<(DataType, Vec<PathBuf>, LayerConfig)> = Vec::new();
    let mut shared_layers = Vec::new();
    for (data_type, layer) in [
        (DataType::MetaData, &file.meta_data),
        (DataType::PlateLayout, &file.plate_layout),
        (DataType::QcData, &file.qc_data),
        (DataType::Readout, &file.readout),
    ] {
        let Some(layer) = layer else { continue };
        let config = layer_config(&layer.config);
        if layer.is_defined_plate_wise {
            let files = plate_files(data_type, layer, base)?;
            debug!("{} is defined plate wise with {} files", data_type, files.len());
            plate_wise.push((data_type, files, config));
        } else {
            let mut shared = resolve(base, &layer.path);
            if let Some(filename) = &layer.filename {
                shared = shared.join(filename);
            }
            shared_layers.push((data_type, LayerSpec { path: shared, config }));
        }
    }

    if plate_wise.is_empty() {
        return Err(CliError::Config(
            "No plate wise information was defined in the run config.".to_string(),
        ));
    }
    let counts: BTreeMap<DataType, usize> = plate_wise
        .iter()
        .map(|(data_type, files, _)| (*data_type, files.len()))
        .collect();
    let mut distinct: Vec<usize> = counts.values().copied().collect();
    distinct.dedup();
    if distinct.len() != 1 {
        return Err(CliError::Config(format!(
            "The run configuration defines different numbers of plates for different data types: {}",
            counts
                .iter()
                .map(|(data_type, count)| format!("{}: {}", data_type, count))
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    let plates = (0..distinct[0])
        .map(|i| {
            let mut spec = PlateSpec::default();
            for (data_type, files, config) in &plate_wise {
                spec.set(
                    *data_type,
                    LayerSpec {
                        path: files[i].clone(),
                        config: config.clone(),
                    },
                );
            }
            spec
        })
        .collect();

    let protocol = match &file.protocol {
        Some(reference) => {
            let protocol_path = resolve(base, &reference.path);
            info!("Loading protocol from {}", protocol_path.display());
            Some(Protocol::load(&protocol_path).map_err(EngineError::from)?)
        }
        None => None,
    };

    let mut extra = BTreeMap::new();
    for (key, value) in &file.extra {
        if value.is_table() || value.is_array() {
            return Err(CliError::Config(format!(
                "Unknown section '{}' in run config '{}'",
                key,
                path.display()
            )));
        }
        extra.insert(key.clone(), stringify(value));
    }

    Ok(RunSetup {
        origin: RunOrigin::Config {
            plates,
            shared_layers,
        },
        path: path.to_path_buf(),
        config: RunConfig {
            name: file.name.clone(),
            protocol,
            metadata: RunMetadata {
                experimenter: file.experimenter.clone(),
                experimenter_mail: file.experimenter_mail.clone(),
                send_mail_upon_qc: file.send_mail_upon_qc,
                qc: stringify_map(&file.qc),
                meta: stringify_map(&file.meta),
                extra,
            },
        },
    })
}

/// One plate per regular file in `dir`, read with the given layer `format`.
pub fn from_readout_dir(dir: &Path, format: Option<&str>) -> Result<RunSetup> {
    let files = readout_files(dir)?;
    if files.is_empty() {
        return Err(CliError::Config(format!(
            "Readout directory '{}' contains no files.",
            dir.display()
        )));
    }
    let mut config = LayerConfig::new();
    if let Some(format) = format {
        config.insert("format".to_string(), format.to_string());
    }
    Ok(RunSetup {
        origin: RunOrigin::Readouts { files, config },
        path: dir.to_path_buf(),
        config: RunConfig::default(),
    })
}

pub fn from_snapshot(path: &Path) -> RunSetup {
    RunSetup {
        origin: RunOrigin::Snapshot,
        path: path.to_path_buf(),
        config: RunConfig::default(),
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn stringify_map(values: &BTreeMap<String, toml::Value>) -> BTreeMap<String, String> {
    values
        .iter()
        .map(|(key, value)| (key.clone(), stringify(value)))
        .collect()
}

fn layer_config(values: &BTreeMap<String, toml::Value>) -> LayerConfig {
    stringify_map(values)
}

fn plate_files(data_type: DataType, layer: &FileLayerConfig, base: &Path) -> Result<Vec<PathBuf>> {
    let dir = resolve(base, &layer.path);
    if let Some(filenames) = &layer.filenames {
        return Ok(filenames.iter().map(|name| dir.join(name)).collect());
    }
    match (&layer.filename, &layer.filenumber) {
        (Some(template), Some(numbers)) => {
            if !template.contains(FILENUMBER_PLACEHOLDER) {
                return Err(CliError::Config(format!(
                    "Filename template '{}' of {} has no '{}' placeholder.",
                    template, data_type, FILENUMBER_PLACEHOLDER
                )));
            }
            Ok(numbers
                .iter()
                .map(|number| dir.join(template.replace(FILENUMBER_PLACEHOLDER, &stringify(number))))
                .collect())
        }
        _ => Err(CliError::Config(format!(
            "{} is defined plate wise but lists neither 'filenames' nor 'filename' with 'filenumber'.",
            data_type
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const RUN_CONFIG: &str = r#"
        name = "expA"
        experimenter = "J. Doe"
        experimenter_mail = "jdoe@example.org"
        send_mail_upon_qc = true
        instrument = "EnVision"

        [protocol]
        path = "fret.toml"

        [meta]
        screen = "kinase"

        [qc]
        replicates = 2

        [readout]
        is_defined_plate_wise = true
        path = "raw"
        filename = "expA_plate{}.csv"
        filenumber = [1, 2, 3]

        [readout.config]
        format = "well_table"

        [qc_data]
        is_defined_plate_wise = true
        path = "qc"
        filenames = ["qc1.csv", "qc2.csv", "qc3.csv"]

        [plate_layout]
        is_defined_plate_wise = false
        path = "layout.csv"
    "#;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("fret.toml"), "name = \"FRET\"\n").unwrap();
        let path = dir.path().join("run.toml");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn config_file_expands_plate_wise_and_shared_layers() {
        let (dir, path) = write_config(RUN_CONFIG);
        let setup = from_config_file(&path).unwrap();

        let RunOrigin::Config {
            plates,
            shared_layers,
        } = &setup.origin
        else {
            panic!("expected a config origin");
        };
        assert_eq!(plates.len(), 3);
        let second = &plates[1];
        assert_eq!(
            second.readout.as_ref().unwrap().path,
            dir.path().join("raw").join("expA_plate2.csv")
        );
        assert_eq!(
            second.readout.as_ref().unwrap().config.get("format").unwrap(),
            "well_table"
        );
        assert_eq!(
            second.qc_data.as_ref().unwrap().path,
            dir.path().join("qc").join("qc2.csv")
        );
        assert_eq!(
            shared_layers,
            &vec![(
                DataType::PlateLayout,
                LayerSpec::new(dir.path().join("layout.csv"))
            )]
        );

        let metadata = &setup.config.metadata;
        assert_eq!(setup.config.name.as_deref(), Some("expA"));
        assert_eq!(setup.config.protocol.as_ref().unwrap().name, "FRET");
        assert!(metadata.send_mail_upon_qc);
        assert_eq!(metadata.qc.get("replicates").unwrap(), "2");
        assert_eq!(metadata.meta.get("screen").unwrap(), "kinase");
        assert_eq!(metadata.extra.get("instrument").unwrap(), "EnVision");
    }

    #[test]
    fn differing_plate_counts_are_rejected() {
        let (_dir, path) = write_config(&RUN_CONFIG.replace(
            r#"filenames = ["qc1.csv", "qc2.csv", "qc3.csv"]"#,
            r#"filenames = ["qc1.csv", "qc2.csv"]"#,
        ));
        let result = from_config_file(&path);
        assert!(matches!(result, Err(CliError::Config(message)) if message.contains("qc_data: 2")));
    }

    #[test]
    fn config_without_plate_wise_layers_is_rejected() {
        let (_dir, path) = write_config(
            r#"
            [plate_layout]
            is_defined_plate_wise = false
            path = "layout.csv"
            "#,
        );
        assert!(matches!(from_config_file(&path), Err(CliError::Config(_))));
    }

    #[test]
    fn template_without_placeholder_is_rejected() {
        let (_dir, path) = write_config(
            r#"
            [readout]
            is_defined_plate_wise = true
            path = "raw"
            filename = "plate.csv"
            filenumber = [1, 2]
            "#,
        );
        assert!(matches!(from_config_file(&path), Err(CliError::Config(_))));
    }

    #[test]
    fn unknown_sections_are_rejected() {
        let (_dir, path) = write_config(&format!("{}\n[reporting]\nformat = \"pdf\"\n", RUN_CONFIG));
        assert!(matches!(from_config_file(&path), Err(CliError::Config(_))));
    }

    #[test]
    fn readout_dir_lists_files_and_sets_format() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("p1.csv"), "well,signal\nA1,1\n").unwrap();
        fs::write(dir.path().join("p2.csv"), "well,signal\nA1,2\n").unwrap();

        let setup = from_readout_dir(dir.path(), Some("well_table")).unwrap();
        let RunOrigin::Readouts { files, config } = setup.origin else {
            panic!("expected a readouts origin");
        };
        assert_eq!(files.len(), 2);
        assert_eq!(config.get("format").unwrap(), "well_table");

        let empty = tempdir().unwrap();
        assert!(from_readout_dir(empty.path(), None).is_err());
    }
}
