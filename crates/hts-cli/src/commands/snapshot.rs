use super::load_run;
use crate::cli::SnapshotArgs;
use crate::error::Result;
use tracing::info;

pub fn run(args: SnapshotArgs) -> Result<()> {
    let run = load_run(&args.source, args.format.as_deref())?;
    run.save(&args.output)?;
    info!(
        "Snapshot of run '{}' written to {}",
        run.name(),
        args.output.display()
    );
    println!("Saved run '{}' to {}", run.name(), args.output.display());
    Ok(())
}
