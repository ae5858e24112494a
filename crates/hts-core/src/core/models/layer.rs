use super::coordinate::{Coordinate, row_major};
use nalgebra::DMatrix;
use phf::{Map, phf_map};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Per-well values of one tag, indexed `(row, column)`.
pub type Grid = DMatrix<WellValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataType {
    PlateLayout,
    Readout,
    QcData,
    MetaData,
}

static DATA_TYPE_NAMES: Map<&'static str, DataType> = phf_map! {
    "plate_layout" => DataType::PlateLayout,
    "layout" => DataType::PlateLayout,
    "readout" => DataType::Readout,
    "qc_data" => DataType::QcData,
    "meta_data" => DataType::MetaData,
};

impl DataType {
    /// All known data types, in the order plates load them from their sources.
    pub const ALL: [DataType; 4] = [
        DataType::MetaData,
        DataType::PlateLayout,
        DataType::QcData,
        DataType::Readout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::PlateLayout => "plate_layout",
            DataType::Readout => "readout",
            DataType::QcData => "qc_data",
            DataType::MetaData => "meta_data",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown data type '{0}'. Expected one of plate_layout, readout, qc_data, meta_data")]
pub struct ParseDataTypeError(pub String);

impl FromStr for DataType {
    type Err = ParseDataTypeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DATA_TYPE_NAMES
            .get(s.trim())
            .copied()
            .ok_or_else(|| ParseDataTypeError(s.to_string()))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of one grid inside a layer. Instrument exports often identify a channel by
/// several parts (e.g. label and wavelength); those become `Composite` tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tag {
    Simple(String),
    Composite(Vec<String>),
}

impl Tag {
    pub fn simple(name: impl Into<String>) -> Self {
        Tag::Simple(name.into())
    }

    pub fn composite<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Tag::Composite(parts.into_iter().map(Into::into).collect())
    }

    /// Parses tuple-like text such as `('Em', '615')` or `[a, b]`.
    pub fn parse_composite(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        let inner = trimmed
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .or_else(|| {
                trimmed
                    .strip_prefix('[')
                    .and_then(|rest| rest.strip_suffix(']'))
            })?;
        let parts: Vec<String> = inner
            .split(',')
            .map(|part| part.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
            .filter(|part| !part.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(Tag::Composite(parts))
        }
    }

    /// Decides the tag kind for text coming from configuration files.
    pub fn from_config_str(text: &str) -> Self {
        Self::parse_composite(text).unwrap_or_else(|| Tag::Simple(text.trim().to_string()))
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Tag::Simple(value.to_string())
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Tag::Simple(value)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Simple(name) => f.write_str(name),
            Tag::Composite(parts) => write!(f, "({})", parts.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum WellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
}

impl WellValue {
    /// Reads raw cell text: numbers become `Number`, blanks `Empty`, anything else `Text`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return WellValue::Empty;
        }
        match trimmed.parse::<f64>() {
            Ok(number) => WellValue::Number(number),
            Err(_) => WellValue::Text(trimmed.to_string()),
        }
    }

    /// Numeric view of the value; anything that is not a number is NaN.
    pub fn as_f64(&self) -> f64 {
        match self {
            WellValue::Number(number) => *number,
            _ => f64::NAN,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            WellValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<f64> for WellValue {
    fn from(value: f64) -> Self {
        WellValue::Number(value)
    }
}

impl From<&str> for WellValue {
    fn from(value: &str) -> Self {
        WellValue::Text(value.to_string())
    }
}

impl fmt::Display for WellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WellValue::Empty => Ok(()),
            WellValue::Number(number) => write!(f, "{}", number),
            WellValue::Text(text) => f.write_str(text),
        }
    }
}

pub fn numeric_grid(grid: &Grid) -> DMatrix<f64> {
    grid.map(|value| value.as_f64())
}

pub fn grid_from_numbers(numbers: &DMatrix<f64>) -> Grid {
    numbers.map(WellValue::Number)
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LayerError {
    #[error("Tag '{tag}' is already present in layer '{layer}'")]
    DuplicateTag { layer: String, tag: Tag },
    #[error("Tag '{tag}' is not present in layer '{layer}'")]
    TagNotFound { layer: String, tag: Tag },
    #[error(
        "Grid of {actual_height}x{actual_width} does not fit layer '{layer}' of {expected_height}x{expected_width}"
    )]
    DimensionMismatch {
        layer: String,
        expected_height: usize,
        expected_width: usize,
        actual_height: usize,
        actual_width: usize,
    },
    #[error("Well {coordinate:?} lies outside layer '{layer}'")]
    WellOutOfBounds { layer: String, coordinate: Coordinate },
}

/// One kind of per-well data for a plate: a set of equally sized grids keyed by tag,
/// plus free-text parameters describing how the data was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataLayer {
    kind: DataType,
    name: String,
    width: usize,
    height: usize,
    data: BTreeMap<Tag, Grid>,
    metadata: BTreeMap<String, String>,
}

impl DataLayer {
    pub fn new(kind: DataType, name: impl Into<String>, width: usize, height: usize) -> Self {
        Self {
            kind,
            name: name.into(),
            width,
            height,
            data: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, tag: impl Into<Tag>, grid: Grid) -> Result<Self, LayerError> {
        self.add_data(tag, grid)?;
        Ok(self)
    }

    pub fn kind(&self) -> DataType {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &BTreeMap<Tag, Grid> {
        &self.data
    }

    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.data.keys()
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.data.contains_key(tag)
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn get_data(&self, tag: &Tag) -> Result<&Grid, LayerError> {
        self.data.get(tag).ok_or_else(|| LayerError::TagNotFound {
            layer: self.name.clone(),
            tag: tag.clone(),
        })
    }

    pub fn add_data(&mut self, tag: impl Into<Tag>, grid: Grid) -> Result<(), LayerError> {
        let tag = tag.into();
        if self.data.contains_key(&tag) {
            return Err(LayerError::DuplicateTag {
                layer: self.name.clone(),
                tag,
            });
        }
        if grid.nrows() != self.height || grid.ncols() != self.width {
            return Err(LayerError::DimensionMismatch {
                layer: self.name.clone(),
                expected_height: self.height,
                expected_width: self.width,
                actual_height: grid.nrows(),
                actual_width: grid.ncols(),
            });
        }
        self.data.insert(tag, grid);
        Ok(())
    }

    /// Wells of grid `tag` whose value satisfies `condition`, in row-major order.
    pub fn get_wells<F>(&self, tag: &Tag, condition: F) -> Result<Vec<Coordinate>, LayerError>
    where
        F: Fn(&WellValue) -> bool,
    {
        let grid = self.get_data(tag)?;
        Ok(row_major(grid.nrows(), grid.ncols())
            .filter(|well| condition(&grid[(well.row, well.column)]))
            .collect())
    }

    pub fn get_values(
        &self,
        wells: &[Coordinate],
        tag: &Tag,
    ) -> Result<Vec<&WellValue>, LayerError> {
        let grid = self.get_data(tag)?;
        wells
            .iter()
            .map(|well| {
                grid.get((well.row, well.column))
                    .ok_or_else(|| LayerError::WellOutOfBounds {
                        layer: self.name.clone(),
                        coordinate: *well,
                    })
            })
            .collect()
    }
}
