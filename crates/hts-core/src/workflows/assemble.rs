use crate::core::io::traits::{LayerConfig, LayerSource, LayerSpec, SourceError};
use crate::core::models::layer::DataType;
use crate::core::models::plate::{Plate, PlateSpec};
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::run::{Run, RunConfig};
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Where the plates of a run come from.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOrigin {
    /// Layer files per plate, plus layers read once and attached to every plate.
    Config {
        plates: Vec<PlateSpec>,
        shared_layers: Vec<(DataType, LayerSpec)>,
    },
    /// One plate per readout file, all read with the same layer configuration.
    Readouts {
        files: Vec<PathBuf>,
        config: LayerConfig,
    },
    /// A run previously written with [`Run::save`].
    Snapshot,
}

/// Builds a run from `origin`.
///
/// `path` is the run config file for [`RunOrigin::Config`], the export directory for
/// [`RunOrigin::Readouts`] and the snapshot file for [`RunOrigin::Snapshot`]. The
/// run config does not apply to snapshots, which carry their own.
#[instrument(skip_all, name = "assemble_workflow", fields(path = %path.display()))]
pub fn assemble_run(
    origin: RunOrigin,
    path: &Path,
    run_config: RunConfig,
    source: &dyn LayerSource,
    reporter: &ProgressReporter,
) -> Result<Run, EngineError> {
    let plates = match origin {
        RunOrigin::Snapshot => {
            if run_config != RunConfig::default() {
                warn!("Ignoring run configuration for snapshot '{}'", path.display());
            }
            reporter.report(Progress::PhaseStart {
                name: "Loading snapshot",
            });
            let run = Run::load(path)?;
            reporter.report(Progress::PhaseFinish);
            info!("Loaded run '{}' with {} plates.", run.name(), run.plates().len());
            return Ok(run);
        }
        RunOrigin::Config {
            plates,
            shared_layers,
        } => load_configured_plates(&plates, &shared_layers, source, reporter)?,
        RunOrigin::Readouts { files, config } => {
            let specs: Vec<PlateSpec> = files
                .into_iter()
                .map(|file| PlateSpec {
                    readout: Some(LayerSpec {
                        path: file,
                        config: config.clone(),
                    }),
                    ..Default::default()
                })
                .collect();
            load_configured_plates(&specs, &[], source, reporter)?
        }
    };

    reporter.report(Progress::PhaseStart {
        name: "Run construction",
    });
    let run = Run::new(plates, Some(path.to_path_buf()), run_config)?;
    reporter.report(Progress::PhaseFinish);
    Ok(run)
}

fn load_configured_plates(
    specs: &[PlateSpec],
    shared_layers: &[(DataType, LayerSpec)],
    source: &dyn LayerSource,
    reporter: &ProgressReporter,
) -> Result<Vec<Plate>, EngineError> {
    if specs.is_empty() {
        return Err(EngineError::Config(
            "no plate wise information was defined".to_string(),
        ));
    }
    if let Some((data_type, _)) = shared_layers
        .iter()
        .find(|(data_type, _)| specs.iter().any(|spec| spec.get(*data_type).is_some()))
    {
        return Err(EngineError::Config(format!(
            "{} is defined both plate wise and for the whole run",
            data_type
        )));
    }

    reporter.report(Progress::PhaseStart {
        name: "Loading plates",
    });
    reporter.report(Progress::PlatesStart {
        total: specs.len() as u64,
    });
    let mut plates = Vec::with_capacity(specs.len());
    for spec in specs {
        let plate = Plate::create(spec, source)?;
        reporter.report(Progress::PlateLoaded {
            name: plate.name().to_string(),
        });
        plates.push(plate);
    }
    reporter.report(Progress::PlatesFinish);

    for (data_type, spec) in shared_layers {
        info!(
            "Attaching shared {} layer from {} to {} plates",
            data_type,
            spec.path.display(),
            plates.len()
        );
        let layer = source.read_layer(*data_type, &spec.path, &spec.config)?;
        for plate in &mut plates {
            plate.set_data(*data_type, layer.clone())?;
        }
    }
    reporter.report(Progress::PhaseFinish);
    Ok(plates)
}

/// Regular, non-hidden files directly inside `dir`, sorted by name.
pub fn readout_files(dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
    let io_error = |e| SourceError::Io {
        path: dir.to_string_lossy().to_string(),
        source: e,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.file_type().map_err(io_error)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::well_table::LayerReaders;
    use crate::core::models::layer::WellValue;
    use crate::core::models::preprocess::NET_FRET_STEP;
    use crate::core::protocol::{PreprocessingStep, Protocol, StepParams};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::{TempDir, tempdir};

    const LAYOUT: &str = "\
well,layout
A1,fluorophore_donor
A2,fluorophore_acceptor
A3,buffer
A4,sample
";

    fn readout_table(sample: f64) -> String {
        format!(
            "well,donor,acceptor\nA1,100,20\nA2,10,200\nA3,5,8\nA4,{},{}\n",
            sample,
            sample * 2.0
        )
    }

    fn write_inputs(dir: &TempDir) -> Vec<PathBuf> {
        fs::write(dir.path().join("layout.csv"), LAYOUT).unwrap();
        (1..=3)
            .map(|i| {
                let path = dir.path().join(format!("screen2024_plate{}.csv", i));
                fs::write(&path, readout_table(i as f64 * 10.0)).unwrap();
                path
            })
            .collect()
    }

    fn net_fret_config() -> RunConfig {
        RunConfig {
            protocol: Some(Protocol {
                name: "net fret".to_string(),
                preprocessing: vec![PreprocessingStep {
                    name: NET_FRET_STEP.to_string(),
                    params: StepParams::from([
                        ("donor_channel".to_string(), "donor".to_string()),
                        ("acceptor_channel".to_string(), "acceptor".to_string()),
                    ]),
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn config_origin_attaches_shared_layout_and_preprocesses() {
        let dir = tempdir().unwrap();
        let files = write_inputs(&dir);
        let origin = RunOrigin::Config {
            plates: files
                .iter()
                .map(|file| PlateSpec {
                    readout: Some(LayerSpec::new(file.clone())),
                    ..Default::default()
                })
                .collect(),
            shared_layers: vec![(
                DataType::PlateLayout,
                LayerSpec::new(dir.path().join("layout.csv")),
            )],
        };
        let events = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|event| {
            events.lock().unwrap().push(format!("{:?}", event));
        }));

        let run = assemble_run(
            origin,
            &dir.path().join("run.toml"),
            net_fret_config(),
            &LayerReaders::default(),
            &reporter,
        )
        .unwrap();
        drop(reporter);

        assert_eq!(run.plates().len(), 3);
        let plate = run.plate("2").unwrap();
        assert_eq!(plate.name(), "screen2024_plate2");
        assert!(plate.plate_layout().is_some());
        assert!(plate.get_readout("net_fret").is_ok());

        let events = events.into_inner().unwrap();
        assert_eq!(
            events.iter().filter(|e| e.starts_with("PlateLoaded")).count(),
            3
        );
        assert!(events.contains(&"PlatesStart { total: 3 }".to_string()));
    }

    #[test]
    fn readouts_origin_builds_one_plate_per_file() {
        let dir = tempdir().unwrap();
        write_inputs(&dir);
        fs::write(dir.path().join(".hidden"), "ignored").unwrap();
        let files: Vec<PathBuf> = readout_files(dir.path())
            .unwrap()
            .into_iter()
            .filter(|file| file.file_name().unwrap() != "layout.csv")
            .collect();
        assert_eq!(files.len(), 3);

        let run = assemble_run(
            RunOrigin::Readouts {
                files,
                config: LayerConfig::new(),
            },
            dir.path(),
            RunConfig::default(),
            &LayerReaders::default(),
            &ProgressReporter::new(),
        )
        .unwrap();
        let keys: Vec<&str> = run.plates().keys().map(|i| i.as_str()).collect();
        assert_eq!(keys, vec!["1", "2", "3"]);
        let sample = run.plate("3").unwrap().get_readout("donor").unwrap()[(0, 3)].clone();
        assert_eq!(sample, WellValue::Number(30.0));
    }

    #[test]
    fn shared_layers_must_not_repeat_plate_wise_types() {
        let dir = tempdir().unwrap();
        let files = write_inputs(&dir);
        let origin = RunOrigin::Config {
            plates: vec![PlateSpec {
                readout: Some(LayerSpec::new(files[0].clone())),
                ..Default::default()
            }],
            shared_layers: vec![(DataType::Readout, LayerSpec::new(files[1].clone()))],
        };
        let result = assemble_run(
            origin,
            dir.path(),
            RunConfig::default(),
            &LayerReaders::default(),
            &ProgressReporter::new(),
        );
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn unreadable_layer_file_fails_assembly() {
        let dir = tempdir().unwrap();
        let result = assemble_run(
            RunOrigin::Readouts {
                files: vec![dir.path().join("missing_plate1.csv")],
                config: LayerConfig::new(),
            },
            dir.path(),
            RunConfig::default(),
            &LayerReaders::default(),
            &ProgressReporter::new(),
        );
        assert!(matches!(result, Err(EngineError::Plate { .. })));
    }

    #[test]
    fn snapshot_origin_restores_saved_run() {
        let dir = tempdir().unwrap();
        let files = write_inputs(&dir);
        let run = assemble_run(
            RunOrigin::Readouts {
                files,
                config: LayerConfig::new(),
            },
            dir.path(),
            RunConfig::default(),
            &LayerReaders::default(),
            &ProgressReporter::new(),
        )
        .unwrap();
        let snapshot = dir.path().join("run.bin");
        run.save(&snapshot).unwrap();

        let restored = assemble_run(
            RunOrigin::Snapshot,
            &snapshot,
            RunConfig::default(),
            &LayerReaders::default(),
            &ProgressReporter::new(),
        )
        .unwrap();
        assert_eq!(restored.plates(), run.plates());
    }
}
