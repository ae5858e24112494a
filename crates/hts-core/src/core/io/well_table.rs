//! Long-format well tables: one CSV row per well, one column per tag.
//!
//! ```text
//! well,donor,acceptor
//! A01,100,20
//! A02,100,20
//! ```
//!
//! Readout and QC tables are parsed as numbers where possible; layout and meta data
//! tables keep every cell as text.

use super::traits::{LayerConfig, LayerSource, SourceError};
use crate::core::models::coordinate::{Coordinate, row_major, to_coordinate, to_label};
use crate::core::models::layer::{DataLayer, DataType, Grid, LayerError, Tag, WellValue};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

pub const WELL_TABLE_FORMAT: &str = "well_table";

const WELL_COLUMN: &str = "well";
const KNOWN_KEYS: [&str; 4] = ["format", "name", "width", "height"];
/// (height, width) of 96-, 384- and 1536-well plates.
const PLATE_FORMATS: [(usize, usize); 3] = [(8, 12), (16, 24), (32, 48)];

#[derive(Debug, Clone, Copy, Default)]
pub struct WellTableReader;

impl WellTableReader {
    pub fn new() -> Self {
        Self
    }

    /// Parses a well table from `reader`. Dimensions not given are taken from the
    /// smallest standard plate format that holds every listed well.
    pub fn read_from(
        &self,
        reader: impl Read,
        data_type: DataType,
        name: &str,
        height: Option<usize>,
        width: Option<usize>,
        origin: &str,
    ) -> Result<DataLayer, SourceError> {
        let csv_error = |e| SourceError::Csv {
            path: origin.to_string(),
            source: e,
        };
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_reader(reader);

        let headers = csv_reader.headers().map_err(csv_error)?.clone();
        if !headers
            .get(0)
            .is_some_and(|header| header.eq_ignore_ascii_case(WELL_COLUMN))
        {
            return Err(SourceError::MissingWellColumn {
                path: origin.to_string(),
            });
        }
        let tags: Vec<Tag> = headers.iter().skip(1).map(Tag::from_config_str).collect();

        let mut rows: Vec<(Coordinate, Vec<String>)> = Vec::new();
        for record in csv_reader.records() {
            let record = record.map_err(csv_error)?;
            let label = record.get(0).unwrap_or_default();
            let well = to_coordinate(label).map_err(|e| SourceError::Coordinate {
                path: origin.to_string(),
                source: e,
            })?;
            rows.push((well, record.iter().skip(1).map(str::to_string).collect()));
        }
        if rows.is_empty() {
            return Err(SourceError::EmptyTable {
                path: origin.to_string(),
            });
        }

        let (height, width) = resolve_dimensions(&rows, height, width, origin)?;
        let numeric = matches!(data_type, DataType::Readout | DataType::QcData);
        let mut grids = vec![Grid::from_element(height, width, WellValue::Empty); tags.len()];
        for (well, cells) in &rows {
            if well.row >= height || well.column >= width {
                return Err(SourceError::Layer {
                    path: origin.to_string(),
                    source: LayerError::WellOutOfBounds {
                        layer: name.to_string(),
                        coordinate: *well,
                    },
                });
            }
            for (grid, cell) in grids.iter_mut().zip(cells) {
                grid[(well.row, well.column)] = if numeric {
                    WellValue::parse(cell)
                } else if cell.is_empty() {
                    WellValue::Empty
                } else {
                    WellValue::Text(cell.clone())
                };
            }
        }

        let mut layer = DataLayer::new(data_type, name, width, height);
        layer.set_metadata("format", WELL_TABLE_FORMAT);
        layer.set_metadata("source", origin);
        for (tag, grid) in tags.into_iter().zip(grids) {
            layer.add_data(tag, grid).map_err(|e| SourceError::Layer {
                path: origin.to_string(),
                source: e,
            })?;
        }
        Ok(layer)
    }
}

fn resolve_dimensions(
    rows: &[(Coordinate, Vec<String>)],
    height: Option<usize>,
    width: Option<usize>,
    origin: &str,
) -> Result<(usize, usize), SourceError> {
    if let (Some(height), Some(width)) = (height, width) {
        return Ok((height, width));
    }
    let max_row = rows.iter().map(|(well, _)| well.row).max().unwrap_or(0);
    let max_column = rows.iter().map(|(well, _)| well.column).max().unwrap_or(0);
    PLATE_FORMATS
        .iter()
        .find(|(h, w)| {
            max_row < *h
                && max_column < *w
                && height.is_none_or(|given| given == *h)
                && width.is_none_or(|given| given == *w)
        })
        .copied()
        .ok_or_else(|| SourceError::UnsupportedPlateSize {
            path: origin.to_string(),
        })
}

fn parse_dimension(config: &LayerConfig, key: &str) -> Result<Option<usize>, SourceError> {
    config
        .get(key)
        .map(|value| {
            value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|parsed| *parsed > 0)
                .ok_or_else(|| SourceError::InvalidConfig {
                    key: key.to_string(),
                    value: value.clone(),
                })
        })
        .transpose()
}

impl LayerSource for WellTableReader {
    fn read_layer(
        &self,
        data_type: DataType,
        path: &Path,
        config: &LayerConfig,
    ) -> Result<DataLayer, SourceError> {
        if let Some(unknown) = config.keys().find(|key| !KNOWN_KEYS.contains(&key.as_str())) {
            return Err(SourceError::UnknownConfigKey(unknown.clone()));
        }
        let origin = path.to_string_lossy().to_string();
        let name = config
            .get("name")
            .cloned()
            .or_else(|| {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
            })
            .unwrap_or_else(|| origin.clone());
        let height = parse_dimension(config, "height")?;
        let width = parse_dimension(config, "width")?;

        let file = File::open(path).map_err(|e| SourceError::Io {
            path: origin.clone(),
            source: e,
        })?;
        self.read_from(file, data_type, &name, height, width, &origin)
    }
}

/// Dispatches to a registered reader by the `format` configuration key, defaulting to
/// well tables.
pub struct LayerReaders {
    readers: HashMap<String, Box<dyn LayerSource>>,
}

impl LayerReaders {
    pub fn empty() -> Self {
        Self {
            readers: HashMap::new(),
        }
    }

    pub fn register(&mut self, format: impl Into<String>, reader: Box<dyn LayerSource>) {
        self.readers.insert(format.into(), reader);
    }

    pub fn formats(&self) -> impl Iterator<Item = &str> {
        self.readers.keys().map(String::as_str)
    }
}

impl Default for LayerReaders {
    fn default() -> Self {
        let mut readers = Self::empty();
        readers.register(WELL_TABLE_FORMAT, Box::new(WellTableReader::new()));
        readers
    }
}

impl LayerSource for LayerReaders {
    fn read_layer(
        &self,
        data_type: DataType,
        path: &Path,
        config: &LayerConfig,
    ) -> Result<DataLayer, SourceError> {
        let format = config
            .get("format")
            .map(String::as_str)
            .unwrap_or(WELL_TABLE_FORMAT);
        let reader = self
            .readers
            .get(format)
            .ok_or_else(|| SourceError::UnknownFormat(format.to_string()))?;
        reader.read_layer(data_type, path, config)
    }
}

/// Writes equally sized grids as one well table, one column per `(header, grid)` pair.
pub fn write_table(
    writer: impl Write,
    columns: &[(String, &Grid)],
    origin: &str,
) -> Result<(), SourceError> {
    let Some((height, width)) = shared_dimensions(columns.iter(), origin)? else {
        return Ok(());
    };
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut header = vec![WELL_COLUMN.to_string()];
    header.extend(columns.iter().map(|(name, _)| name.clone()));
    write_record(&mut csv_writer, &header, origin)?;
    write_rows(&mut csv_writer, None, columns, (height, width), origin)?;
    flush(csv_writer, origin)
}

/// Writes several groups of identically named columns as one table. Each row starts
/// with the key of its group under `key_column`, followed by the well label.
///
/// ```text
/// plate,well,acceptor,donor
/// 1,A1,20,100
/// 2,A1,21,101
/// ```
pub fn write_stacked_table(
    writer: impl Write,
    key_column: &str,
    groups: &[(String, Vec<(String, &Grid)>)],
    origin: &str,
) -> Result<(), SourceError> {
    let Some(dimensions) =
        shared_dimensions(groups.iter().flat_map(|(_, columns)| columns), origin)?
    else {
        return Ok(());
    };
    let names: Vec<&String> = groups
        .first()
        .map(|(_, columns)| columns.iter().map(|(name, _)| name).collect())
        .unwrap_or_default();
    if let Some((group, _)) = groups.iter().find(|(_, columns)| {
        columns.len() != names.len()
            || columns.iter().zip(&names).any(|((name, _), first)| name != *first)
    }) {
        return Err(SourceError::ColumnMismatch {
            path: origin.to_string(),
            group: group.clone(),
        });
    }

    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut header = vec![key_column.to_string(), WELL_COLUMN.to_string()];
    header.extend(names.into_iter().cloned());
    write_record(&mut csv_writer, &header, origin)?;
    for (key, columns) in groups {
        write_rows(&mut csv_writer, Some(key.as_str()), columns, dimensions, origin)?;
    }
    flush(csv_writer, origin)
}

/// (height, width) shared by every grid, or `None` without grids.
fn shared_dimensions<'c, 'g: 'c>(
    mut columns: impl Iterator<Item = &'c (String, &'g Grid)>,
    origin: &str,
) -> Result<Option<(usize, usize)>, SourceError> {
    let Some((_, first)) = columns.next() else {
        return Ok(None);
    };
    let (height, width) = (first.nrows(), first.ncols());
    if let Some((header, grid)) =
        columns.find(|(_, grid)| grid.nrows() != height || grid.ncols() != width)
    {
        return Err(SourceError::Layer {
            path: origin.to_string(),
            source: LayerError::DimensionMismatch {
                layer: header.clone(),
                expected_height: height,
                expected_width: width,
                actual_height: grid.nrows(),
                actual_width: grid.ncols(),
            },
        });
    }
    Ok(Some((height, width)))
}

fn write_rows<W: Write>(
    csv_writer: &mut csv::Writer<W>,
    key: Option<&str>,
    columns: &[(String, &Grid)],
    (height, width): (usize, usize),
    origin: &str,
) -> Result<(), SourceError> {
    for well in row_major(height, width) {
        let label = to_label(well).map_err(|e| SourceError::Coordinate {
            path: origin.to_string(),
            source: e,
        })?;
        let mut record: Vec<String> = key.map(str::to_string).into_iter().collect();
        record.push(label.to_string());
        record.extend(
            columns
                .iter()
                .map(|(_, grid)| grid[(well.row, well.column)].to_string()),
        );
        write_record(csv_writer, &record, origin)?;
    }
    Ok(())
}

fn write_record<W: Write>(
    csv_writer: &mut csv::Writer<W>,
    record: &[String],
    origin: &str,
) -> Result<(), SourceError> {
    csv_writer
        .write_record(record)
        .map_err(|e| SourceError::Csv {
            path: origin.to_string(),
            source: e,
        })
}

fn flush<W: Write>(mut csv_writer: csv::Writer<W>, origin: &str) -> Result<(), SourceError> {
    csv_writer.flush().map_err(|e| SourceError::Io {
        path: origin.to_string(),
        source: e,
    })
}
