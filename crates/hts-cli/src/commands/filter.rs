use super::load_run;
use crate::cli::FilterArgs;
use crate::error::Result;
use htskit::core::io::well_table::write_table;
use htskit::core::models::layer::Grid;
use htskit::engine::error::EngineError;
use htskit::engine::run::{RunFilter, Selection};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use tracing::info;

pub fn run(args: FilterArgs) -> Result<()> {
    let run = load_run(&args.source, args.format.as_deref())?;
    let filtered = run.filter(&args.scope, &args.tag, args.subset.as_deref())?;

    match &args.output {
        Some(path) => {
            let file = File::create(path)?;
            render(&filtered, BufWriter::new(file), &path.to_string_lossy())?;
            info!("Filtered readouts written to {}", path.display());
        }
        None => render(&filtered, io::stdout().lock(), "<stdout>")?,
    }
    Ok(())
}

/// Writes a selection as one well table, or one table per group preceded by a
/// `# <key>` comment line.
fn render(filtered: &RunFilter<'_>, mut writer: impl Write, origin: &str) -> Result<()> {
    match filtered {
        RunFilter::Single(selection) => write_selection(selection, &mut writer, origin)?,
        RunFilter::Grouped(groups) => {
            for (key, selection) in groups {
                writeln!(writer, "# {}", key)?;
                write_selection(selection, &mut writer, origin)?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

fn write_selection(selection: &Selection<'_>, writer: &mut impl Write, origin: &str) -> Result<()> {
    let columns: Vec<(String, &Grid)> = selection
        .entries()
        .iter()
        .map(|(key, grid)| (key.to_string(), *grid))
        .collect();
    write_table(writer, &columns, origin).map_err(EngineError::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use htskit::core::models::layer::{DataLayer, DataType, WellValue};
    use htskit::core::models::plate::{Plate, PlateLayers};
    use htskit::engine::run::{Run, RunConfig};

    fn plate(name: &str, donor: f64) -> Plate {
        let grid = |value: f64| Grid::from_element(1, 2, WellValue::Number(value));
        let layer = DataLayer::new(DataType::Readout, name, 2, 1)
            .with_data("donor", grid(donor))
            .unwrap()
            .with_data("acceptor", grid(donor * 2.0))
            .unwrap();
        Plate::from_layers(PlateLayers {
            readout: Some(layer),
            ..Default::default()
        })
        .unwrap()
    }

    fn run() -> Run {
        Run::new(
            vec![plate("expA_plate1", 1.0), plate("expA_plate2", 5.0)],
            None,
            RunConfig::default(),
        )
        .unwrap()
    }

    fn rendered(filtered: &RunFilter<'_>) -> String {
        let mut buffer = Vec::new();
        render(filtered, &mut buffer, "buffer").unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn run_wise_selection_writes_one_column_per_plate() {
        let run = run();
        let filtered = run.filter("run_wise", "donor", None).unwrap();
        assert_eq!(rendered(&filtered), "well,1,2\nA1,1,5\nA2,1,5\n");
    }

    #[test]
    fn grouped_selection_writes_a_table_per_key() {
        let run = run();
        let filtered = run
            .filter("plate_wise", "", Some(&["donor".to_string()][..]))
            .unwrap();
        assert_eq!(
            rendered(&filtered),
            "# 1\nwell,donor\nA1,1\nA2,1\n# 2\nwell,donor\nA1,5\nA2,5\n"
        );
    }
}
