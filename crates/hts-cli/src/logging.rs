use crate::error::{CliError, Result};
use std::fs::File;
use std::path::PathBuf;
use tracing_subscriber::{
    EnvFilter,
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

/// Overrides the log filter with `tracing` directives such as `htskit::engine=debug`
/// when neither `-v` nor `-q` is given.
pub const LOG_ENV: &str = "HTS_LOG";

fn level_filter(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::ERROR;
    }
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

fn env_filter(verbosity: u8, quiet: bool, env_directives: Option<String>) -> EnvFilter {
    let level = level_filter(verbosity, quiet);
    match env_directives {
        Some(directives) if verbosity == 0 && !quiet => {
            EnvFilter::builder().parse_lossy(format!("{},{}", level, directives))
        }
        _ => EnvFilter::default().add_directive(level.into()),
    }
}

/// Installs the global subscriber: compact records on stderr and, with `log_file`,
/// full records including span closings for run construction, QC and analysis.
pub fn setup_logging(verbosity: u8, quiet: bool, log_file: Option<PathBuf>) -> Result<()> {
    let filter = env_filter(verbosity, quiet, std::env::var(LOG_ENV).ok());
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let file_layer = log_file
        .map(|path| {
            File::create(&path).map(|file| {
                fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_span_events(FmtSpan::CLOSE)
            })
        })
        .transpose()
        .map_err(CliError::Io)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| CliError::Other(anyhow::anyhow!("Failed to install logger: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::Once;
    use tracing::{debug, error, info, info_span, trace, warn};

    static INIT: Once = Once::new();

    fn ensure_global_logger_is_set() {
        INIT.call_once(|| {
            setup_logging(3, false, None).expect("Failed to set up global logger for tests");
        });
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_filter(0, false), LevelFilter::WARN);
        assert_eq!(level_filter(2, false), LevelFilter::DEBUG);
        assert_eq!(level_filter(7, false), LevelFilter::TRACE);
        assert_eq!(level_filter(0, true), LevelFilter::ERROR);
    }

    #[test]
    fn environment_directives_apply_only_without_flags() {
        let from_env = env_filter(0, false, Some("htskit::engine=debug".to_string()));
        assert!(from_env.to_string().contains("htskit::engine=debug"));
        assert!(from_env.to_string().contains("warn"));

        let verbose = env_filter(1, false, Some("htskit::engine=debug".to_string()));
        assert!(!verbose.to_string().contains("htskit::engine"));
        assert_eq!(verbose.to_string(), "info");

        assert_eq!(env_filter(0, true, None).to_string(), "error");
    }

    #[test]
    #[serial]
    fn initialization_and_macros_work() {
        ensure_global_logger_is_set();

        error!("This is an error");
        warn!("This is a warning");
        info!("This is info");
        debug!("This is debug");
        trace!("This is trace");
    }

    #[test]
    #[serial]
    fn file_layer_records_events_and_closed_spans() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log_path = temp_dir.path().join("hts.log");

        let file = File::create(&log_path).unwrap();
        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE);
        let subscriber = tracing_subscriber::registry()
            .with(env_filter(2, false, None))
            .with(file_layer);

        tracing::subscriber::with_default(subscriber, || {
            let _span = info_span!("run_construction").entered();
            debug!("Loaded plate 'expA_plate1'.");
        });

        let content = std::fs::read_to_string(log_path).unwrap();
        assert!(content.contains("Loaded plate 'expA_plate1'."));
        assert!(content.contains("DEBUG"));
        assert!(content.contains("run_construction"));
        assert!(content.contains("close"));
    }

    #[test]
    #[serial]
    fn invalid_log_file_path_propagates_error() {
        let invalid_path = PathBuf::from("/");

        if cfg!(unix) && invalid_path.is_dir() {
            let result = setup_logging(0, false, Some(invalid_path));
            assert!(matches!(result, Err(CliError::Io(_))));
        }
    }
}
