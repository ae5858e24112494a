use super::load_run;
use crate::cli::ExportArgs;
use crate::error::Result;
use htskit::engine::run::Run;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use tracing::info;

pub fn run(args: ExportArgs) -> Result<()> {
    let run = load_run(&args.source, args.format.as_deref())?;
    match &args.output {
        Some(path) => {
            let file = File::create(path)?;
            export(&run, BufWriter::new(file), &path.to_string_lossy())?;
            println!("Exported run '{}' to {}", run.name(), path.display());
        }
        None => export(&run, io::stdout().lock(), "<stdout>")?,
    }
    Ok(())
}

fn export(run: &Run, mut writer: impl Write, origin: &str) -> Result<()> {
    run.export_csv(&mut writer, origin)?;
    writer.flush()?;
    info!("Exported {} plates of run '{}'", run.plates().len(), run.name());
    Ok(())
}
