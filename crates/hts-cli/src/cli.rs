use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "HTS Screening Developers",
    version,
    about = "hts - assemble, inspect and export high-throughput screening runs.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a run and print a summary of it and its plates.
    Inspect(InspectArgs),
    /// Select readouts across the run and print them as well tables.
    Filter(FilterArgs),
    /// Write every readout of every plate as one CSV table.
    Export(ExportArgs),
    /// Build a run and save it as a binary snapshot.
    Snapshot(SnapshotArgs),
}

/// Where the run is read from. Exactly one source must be given.
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct RunSource {
    /// Run config file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory of readout files, one plate per file.
    #[arg(short, long, value_name = "DIR")]
    pub readouts: Option<PathBuf>,

    /// Snapshot written by `hts snapshot`.
    #[arg(long, value_name = "PATH")]
    pub from_snapshot: Option<PathBuf>,
}

/// Arguments for the `inspect` subcommand.
#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(flatten)]
    pub source: RunSource,

    /// Layer format of the readout files (with --readouts).
    #[arg(long, value_name = "NAME")]
    pub format: Option<String>,
}

/// Arguments for the `filter` subcommand.
#[derive(Args, Debug)]
pub struct FilterArgs {
    #[command(flatten)]
    pub source: RunSource,

    /// Layer format of the readout files (with --readouts).
    #[arg(long, value_name = "NAME")]
    pub format: Option<String>,

    /// Filter scope: run_wise or plate_wise.
    #[arg(short, long, default_value = "run_wise", value_name = "SCOPE")]
    pub scope: String,

    /// Readout tag (run_wise) or plate index (plate_wise). Empty selects all.
    #[arg(short, long, default_value = "", value_name = "TAG")]
    pub tag: String,

    /// Comma-separated plate indices (run_wise) or readout tags (plate_wise) to keep.
    #[arg(long, value_delimiter = ',', value_name = "LIST")]
    pub subset: Option<Vec<String>>,

    /// Write the tables to a file instead of standard output.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

/// Arguments for the `export` subcommand.
#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(flatten)]
    pub source: RunSource,

    /// Layer format of the readout files (with --readouts).
    #[arg(long, value_name = "NAME")]
    pub format: Option<String>,

    /// Write the table to a file instead of standard output.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

/// Arguments for the `snapshot` subcommand.
#[derive(Args, Debug)]
pub struct SnapshotArgs {
    #[command(flatten)]
    pub source: RunSource,

    /// Layer format of the readout files (with --readouts).
    #[arg(long, value_name = "NAME")]
    pub format: Option<String>,

    /// Path of the snapshot file to write.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_arguments_parse_subset_list() {
        let cli = Cli::try_parse_from([
            "hts", "-vv", "filter", "--readouts", "raw", "--scope", "plate_wise", "--tag", "2",
            "--subset", "donor,net_fret",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Filter(args) = cli.command else {
            panic!("expected the filter command");
        };
        assert_eq!(args.source.readouts, Some(PathBuf::from("raw")));
        assert_eq!(args.scope, "plate_wise");
        assert_eq!(
            args.subset,
            Some(vec!["donor".to_string(), "net_fret".to_string()])
        );
    }

    #[test]
    fn exactly_one_run_source_is_required() {
        assert!(Cli::try_parse_from(["hts", "inspect"]).is_err());
        assert!(
            Cli::try_parse_from(["hts", "inspect", "--config", "run.toml", "--readouts", "raw"])
                .is_err()
        );
        assert!(Cli::try_parse_from(["hts", "inspect", "-c", "run.toml"]).is_ok());
    }

    #[test]
    fn export_output_is_optional() {
        let cli = Cli::try_parse_from(["hts", "export", "--from-snapshot", "run.bin"]).unwrap();
        let Commands::Export(args) = cli.command else {
            panic!("expected the export command");
        };
        assert_eq!(args.source.from_snapshot, Some(PathBuf::from("run.bin")));
        assert!(args.output.is_none());
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["hts", "-q", "-v", "inspect", "-c", "run.toml"]).is_err());
    }
}
