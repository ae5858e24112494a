use super::load_run;
use crate::cli::InspectArgs;
use crate::error::Result;
use htskit::engine::run::Run;
use std::fmt;
use tracing::info;

pub fn run(args: InspectArgs) -> Result<()> {
    let run = load_run(&args.source, args.format.as_deref())?;
    println!("{}", RunSummary(&run));
    info!("Inspected run '{}'.", run.name());
    Ok(())
}

/// Run summary followed by the protocol, the report meta data and every plate.
struct RunSummary<'a>(&'a Run);

impl fmt::Display for RunSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let run = self.0;
        writeln!(f, "{}", run)?;
        if let Some(protocol) = run.protocol() {
            writeln!(f, "  protocol: {}", protocol.name)?;
        }
        for (key, value) in run.report_meta_data() {
            writeln!(f, "  {}: {}", key, value)?;
        }
        for plate in run.plates().values() {
            write!(f, "\n{}", plate)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use htskit::core::models::layer::{DataLayer, DataType, Grid, WellValue};
    use htskit::core::models::plate::{Plate, PlateLayers};
    use htskit::engine::run::RunConfig;

    fn plate(name: &str) -> Plate {
        let layer = DataLayer::new(DataType::Readout, name, 2, 1)
            .with_data("donor", Grid::from_element(1, 2, WellValue::Number(1.0)))
            .unwrap();
        Plate::from_layers(PlateLayers {
            readout: Some(layer),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn description_lists_every_plate() {
        let run = Run::new(
            vec![plate("expA_plate1"), plate("expA_plate2")],
            None,
            RunConfig::default(),
        )
        .unwrap();
        let text = RunSummary(&run).to_string();
        assert!(text.contains("number of plates: 2"));
        assert!(text.contains("Plate 'expA_plate1'"));
        assert!(text.contains("Plate 'expA_plate2'"));
        assert!(text.contains("  run_config: \n"));
    }
}
