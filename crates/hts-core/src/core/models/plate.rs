use super::layer::{
    DataLayer, DataType, Grid, LayerError, Tag, WellValue, grid_from_numbers, numeric_grid,
};
use super::preprocess::{PreprocessError, PreprocessRegistry};
use crate::core::io::persistence::{self, PersistenceError};
use crate::core::io::traits::{LayerSource, LayerSpec, SourceError};
use crate::core::protocol::StepParams;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Tag of the grid inside a plate layout layer that names each well's content.
pub const LAYOUT_TAG: &str = "layout";

#[derive(Debug, Error)]
pub enum PlateError {
    #[error("Cannot store a {actual} layer as {expected}")]
    TypeMismatch {
        expected: DataType,
        actual: DataType,
    },
    #[error("{what} not found on plate '{plate}'")]
    NotFound { plate: String, what: String },
    #[error(
        "Layer '{layer}' is {actual_height}x{actual_width} but plate '{plate}' is {expected_height}x{expected_width}"
    )]
    DimensionMismatch {
        plate: String,
        layer: String,
        expected_height: usize,
        expected_width: usize,
        actual_height: usize,
        actual_width: usize,
    },
    #[error(
        "Calculation of {quantity} resulted in {value}. Check whether the plate layout is correctly assigned."
    )]
    InvalidCalibration { quantity: &'static str, value: f64 },
    #[error("A plate needs at least one data layer")]
    NoLayers,
    #[error(transparent)]
    Layer(#[from] LayerError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Position of a plate within a run, taken from a number embedded in its name.
///
/// The source text is kept (`"03"` stays `"03"`); ordering is numeric first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlateIndex(String);

impl PlateIndex {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<u128> {
        self.0.parse().ok()
    }

    /// True when `text` names this index, either verbatim or as the same number.
    /// Run lookups try verbatim matches across all indices first.
    pub fn matches(&self, text: &str) -> bool {
        let text = text.trim();
        self.0 == text
            || match (self.numeric(), text.parse::<u128>().ok()) {
                (Some(own), Some(other)) => own == other,
                _ => false,
            }
    }
}

impl Ord for PlateIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for PlateIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PlateIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The layers a plate may be assembled from, one slot per known data type.
#[derive(Debug, Clone, Default)]
pub struct PlateLayers {
    pub meta_data: Option<DataLayer>,
    pub plate_layout: Option<DataLayer>,
    pub qc_data: Option<DataLayer>,
    pub readout: Option<DataLayer>,
}

impl PlateLayers {
    pub fn set(&mut self, data_type: DataType, layer: DataLayer) {
        *self.slot(data_type) = Some(layer);
    }

    fn slot(&mut self, data_type: DataType) -> &mut Option<DataLayer> {
        match data_type {
            DataType::MetaData => &mut self.meta_data,
            DataType::PlateLayout => &mut self.plate_layout,
            DataType::QcData => &mut self.qc_data,
            DataType::Readout => &mut self.readout,
        }
    }

    fn into_ordered(mut self) -> Vec<(DataType, DataLayer)> {
        DataType::ALL
            .into_iter()
            .filter_map(|data_type| self.slot(data_type).take().map(|layer| (data_type, layer)))
            .collect()
    }
}

/// Source files for the layers of one plate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlateSpec {
    pub meta_data: Option<LayerSpec>,
    pub plate_layout: Option<LayerSpec>,
    pub qc_data: Option<LayerSpec>,
    pub readout: Option<LayerSpec>,
}

impl PlateSpec {
    pub fn get(&self, data_type: DataType) -> Option<&LayerSpec> {
        match data_type {
            DataType::MetaData => self.meta_data.as_ref(),
            DataType::PlateLayout => self.plate_layout.as_ref(),
            DataType::QcData => self.qc_data.as_ref(),
            DataType::Readout => self.readout.as_ref(),
        }
    }

    pub fn set(&mut self, data_type: DataType, spec: LayerSpec) {
        let slot = match data_type {
            DataType::MetaData => &mut self.meta_data,
            DataType::PlateLayout => &mut self.plate_layout,
            DataType::QcData => &mut self.qc_data,
            DataType::Readout => &mut self.readout,
        };
        *slot = Some(spec);
    }
}

/// Parameters of the net FRET calculation. Group names refer to entries of the
/// plate layout; channels and the output key refer to readout tags.
#[derive(Debug, Clone, PartialEq)]
pub struct NetFretParams {
    pub donor_channel: Tag,
    pub acceptor_channel: Tag,
    pub fluorophore_donor: String,
    pub fluorophore_acceptor: String,
    pub buffer: String,
    pub net_fret_key: Tag,
}

impl NetFretParams {
    pub fn new(donor_channel: impl Into<Tag>, acceptor_channel: impl Into<Tag>) -> Self {
        Self {
            donor_channel: donor_channel.into(),
            acceptor_channel: acceptor_channel.into(),
            fluorophore_donor: "fluorophore_donor".to_string(),
            fluorophore_acceptor: "fluorophore_acceptor".to_string(),
            buffer: "buffer".to_string(),
            net_fret_key: Tag::simple("net_fret"),
        }
    }
}

/// All data of one physical plate: its layout, readouts, QC and meta data layers.
///
/// Every attached layer has the plate's width and height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plate {
    name: String,
    index: Option<PlateIndex>,
    width: usize,
    height: usize,
    layers: BTreeMap<DataType, DataLayer>,
}

impl Plate {
    pub fn new(name: impl Into<String>, width: usize, height: usize) -> Self {
        Self {
            name: name.into(),
            index: None,
            width,
            height,
            layers: BTreeMap::new(),
        }
    }

    /// Builds a plate whose name and dimensions are those of the first present layer,
    /// taken in the order meta data, plate layout, QC data, readout.
    pub fn from_layers(layers: PlateLayers) -> Result<Self, PlateError> {
        let mut ordered = layers.into_ordered().into_iter();
        let (first_type, first_layer) = ordered.next().ok_or(PlateError::NoLayers)?;

        let mut plate = Plate::new(
            first_layer.name(),
            first_layer.width(),
            first_layer.height(),
        );
        plate.set_data(first_type, first_layer)?;
        for (data_type, layer) in ordered {
            plate.set_data(data_type, layer)?;
        }
        Ok(plate)
    }

    pub fn create(spec: &PlateSpec, source: &dyn LayerSource) -> Result<Self, PlateError> {
        let mut layers = PlateLayers::default();
        for data_type in DataType::ALL {
            if let Some(layer_spec) = spec.get(data_type) {
                debug!(
                    "Reading {} layer from {}",
                    data_type,
                    layer_spec.path.display()
                );
                let layer = source.read_layer(data_type, &layer_spec.path, &layer_spec.config)?;
                layers.set(data_type, layer);
            }
        }
        Self::from_layers(layers)
    }

    pub fn read_from_path(path: &Path) -> Result<Self, PlateError> {
        Ok(persistence::read_blob(path)?)
    }

    pub fn write_to_path(&self, path: &Path) -> Result<(), PlateError> {
        Ok(persistence::write_blob(self, path)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> Option<&PlateIndex> {
        self.index.as_ref()
    }

    pub(crate) fn set_index(&mut self, index: PlateIndex) {
        self.index = Some(index);
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn layer(&self, data_type: DataType) -> Option<&DataLayer> {
        self.layers.get(&data_type)
    }

    pub fn plate_layout(&self) -> Option<&DataLayer> {
        self.layer(DataType::PlateLayout)
    }

    pub fn readout(&self) -> Option<&DataLayer> {
        self.layer(DataType::Readout)
    }

    pub fn readout_tags(&self) -> Vec<&Tag> {
        self.readout()
            .map(|layer| layer.tags().collect())
            .unwrap_or_default()
    }

    fn require_layer(&self, data_type: DataType) -> Result<&DataLayer, PlateError> {
        self.layer(data_type).ok_or_else(|| PlateError::NotFound {
            plate: self.name.clone(),
            what: format!("{} layer", data_type),
        })
    }

    /// Attaches `layer` as the plate's `data_type` layer, replacing any previous one.
    pub fn set_data(&mut self, data_type: DataType, layer: DataLayer) -> Result<(), PlateError> {
        if layer.kind() != data_type {
            return Err(PlateError::TypeMismatch {
                expected: data_type,
                actual: layer.kind(),
            });
        }
        if layer.width() != self.width || layer.height() != self.height {
            return Err(PlateError::DimensionMismatch {
                plate: self.name.clone(),
                layer: layer.name().to_string(),
                expected_height: self.height,
                expected_width: self.width,
                actual_height: layer.height(),
                actual_width: layer.width(),
            });
        }
        if self.layers.insert(data_type, layer).is_some() {
            debug!("Replaced {} layer of plate '{}'", data_type, self.name);
        }
        Ok(())
    }

    /// Looks up a readout by its exact tag text, then by the tag parsed as a
    /// multi-part channel key.
    pub fn get_readout(&self, tag: &str) -> Result<&Grid, PlateError> {
        let readout = self.require_layer(DataType::Readout)?;
        if let Some(grid) = readout.data().get(&Tag::simple(tag)) {
            return Ok(grid);
        }
        Tag::parse_composite(tag)
            .and_then(|parsed| readout.data().get(&parsed))
            .ok_or_else(|| PlateError::NotFound {
                plate: self.name.clone(),
                what: format!(
                    "Readout '{}' (available: {})",
                    tag,
                    readout
                        .tags()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            })
    }

    pub fn readout_grid(&self, tag: &Tag) -> Result<&Grid, PlateError> {
        Ok(self.require_layer(DataType::Readout)?.get_data(tag)?)
    }

    /// Values of `value_type`/`value_tag` at every well where `condition` holds for
    /// `condition_type`/`condition_tag`, in row-major well order.
    pub fn filter<F>(
        &self,
        condition_type: DataType,
        condition_tag: &Tag,
        condition: F,
        value_type: DataType,
        value_tag: &Tag,
    ) -> Result<Vec<&WellValue>, PlateError>
    where
        F: Fn(&WellValue) -> bool,
    {
        let condition_layer = self.require_layer(condition_type)?;
        let value_layer = self.require_layer(value_type)?;
        if condition_layer.width() != value_layer.width()
            || condition_layer.height() != value_layer.height()
        {
            return Err(PlateError::DimensionMismatch {
                plate: self.name.clone(),
                layer: value_layer.name().to_string(),
                expected_height: condition_layer.height(),
                expected_width: condition_layer.width(),
                actual_height: value_layer.height(),
                actual_width: value_layer.width(),
            });
        }

        let wells = condition_layer.get_wells(condition_tag, condition)?;
        Ok(value_layer.get_values(&wells, value_tag)?)
    }

    fn layout_group_mean(&self, group: &str, channel: &Tag) -> Result<f64, PlateError> {
        let values = self.filter(
            DataType::PlateLayout,
            &Tag::simple(LAYOUT_TAG),
            |value| value.as_text() == Some(group),
            DataType::Readout,
            channel,
        )?;
        if values.is_empty() {
            return Ok(f64::NAN);
        }
        let sum: f64 = values.iter().map(|value| value.as_f64()).sum();
        Ok(sum / values.len() as f64)
    }

    /// Adds the donor bleed-through corrected FRET signal as a new readout.
    ///
    /// With `p = (D_a - B_a) / (D_d - B_d)`, where `X_c` is the mean of layout group `X`
    /// (donor, acceptor, buffer) in channel `c`, every well gets
    /// `acceptor - A_a - p * (donor - B_d)`.
    pub fn calculate_net_fret(&mut self, params: &NetFretParams) -> Result<(), PlateError> {
        let readout = self.require_layer(DataType::Readout)?;
        if readout.contains(&params.net_fret_key) {
            return Err(LayerError::DuplicateTag {
                layer: readout.name().to_string(),
                tag: params.net_fret_key.clone(),
            }
            .into());
        }

        let donor = &params.fluorophore_donor;
        let acceptor = &params.fluorophore_acceptor;
        let buffer = &params.buffer;
        let donor_donor_channel = self.layout_group_mean(donor, &params.donor_channel)?;
        let acceptor_donor_channel = self.layout_group_mean(acceptor, &params.donor_channel)?;
        let buffer_donor_channel = self.layout_group_mean(buffer, &params.donor_channel)?;
        let donor_acceptor_channel = self.layout_group_mean(donor, &params.acceptor_channel)?;
        let acceptor_acceptor_channel =
            self.layout_group_mean(acceptor, &params.acceptor_channel)?;
        let buffer_acceptor_channel = self.layout_group_mean(buffer, &params.acceptor_channel)?;

        for (quantity, value) in [
            ("mean_donor_donor_channel", donor_donor_channel),
            ("mean_acceptor_donor_channel", acceptor_donor_channel),
            ("mean_buffer_donor_channel", buffer_donor_channel),
            ("mean_donor_acceptor_channel", donor_acceptor_channel),
            ("mean_acceptor_acceptor_channel", acceptor_acceptor_channel),
            ("mean_buffer_acceptor_channel", buffer_acceptor_channel),
        ] {
            if value.is_nan() {
                return Err(PlateError::InvalidCalibration { quantity, value });
            }
        }

        let p = (donor_acceptor_channel - buffer_acceptor_channel)
            / (donor_donor_channel - buffer_donor_channel);

        let donor_signal = numeric_grid(readout.get_data(&params.donor_channel)?);
        let acceptor_signal = numeric_grid(readout.get_data(&params.acceptor_channel)?);
        let net_fret = acceptor_signal.zip_map(&donor_signal, |acceptor_value, donor_value| {
            acceptor_value - acceptor_acceptor_channel - p * (donor_value - buffer_donor_channel)
        });
        debug!(
            "Net FRET for plate '{}': proportionality factor p = {}",
            self.name, p
        );

        let plate_name = self.name.clone();
        self.layers
            .get_mut(&DataType::Readout)
            .ok_or_else(|| PlateError::NotFound {
                plate: plate_name,
                what: "readout layer".to_string(),
            })?
            .add_data(params.net_fret_key.clone(), grid_from_numbers(&net_fret))?;
        Ok(())
    }

    /// Runs the registered preprocessing step `step` on this plate.
    pub fn preprocess(&mut self, step: &str, params: &StepParams) -> Result<(), PreprocessError> {
        PreprocessRegistry::global().apply(step, self, params)
    }
}

impl fmt::Display for Plate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags = self.readout_tags();
        writeln!(f, "Plate '{}'", self.name)?;
        if let Some(index) = &self.index {
            writeln!(f, "  index: {}", index)?;
        }
        writeln!(
            f,
            "  readouts: {}",
            tags.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        )?;
        writeln!(f, "  number of readouts: {}", tags.len())?;
        writeln!(f, "  width: {}", self.width)?;
        write!(f, "  height: {}", self.height)
    }
}
