pub mod export;
pub mod filter;
pub mod inspect;
pub mod snapshot;

use crate::cli::RunSource;
use crate::config::{self, RunSetup};
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use htskit::core::io::well_table::LayerReaders;
use htskit::engine::progress::ProgressReporter;
use htskit::engine::run::Run;
use htskit::workflows::assemble::assemble_run;
use tracing::info;

fn run_setup(source: &RunSource, format: Option<&str>) -> Result<RunSetup> {
    match (&source.config, &source.readouts, &source.from_snapshot) {
        (Some(path), _, _) => config::from_config_file(path),
        (_, Some(dir), _) => config::from_readout_dir(dir, format),
        (_, _, Some(path)) => Ok(config::from_snapshot(path)),
        _ => Err(CliError::Config(
            "One of --config, --readouts or --from-snapshot is required.".to_string(),
        )),
    }
}

/// Builds the run described by `source`, drawing progress on stderr.
pub fn load_run(source: &RunSource, format: Option<&str>) -> Result<Run> {
    let setup = run_setup(source, format)?;
    info!("Assembling run from {}", setup.path.display());

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());
    let readers = LayerReaders::default();

    let run = assemble_run(setup.origin, &setup.path, setup.config, &readers, &reporter)?;
    info!(
        "Run '{}' assembled with {} plates of {}x{} wells.",
        run.name(),
        run.plates().len(),
        run.height(),
        run.width()
    );
    Ok(run)
}
