//! # Core Models Module
//!
//! Representation of plate data.
//!
//! - [`coordinate`] - Conversion between well labels (`A1`, `AF48`) and zero-based positions
//! - [`layer`] - Tagged grids of per-well values for one data type
//! - [`plate`] - A physical plate with its layout, readout, QC and meta data layers
//! - [`preprocess`] - Registry of named preprocessing steps protocols can refer to
//!
//! ```ignore
//! use htskit::core::models::plate::{NetFretParams, Plate, PlateLayers};
//!
//! let mut plate = Plate::from_layers(PlateLayers {
//!     plate_layout: Some(layout),
//!     readout: Some(readout),
//!     ..Default::default()
//! })?;
//! plate.calculate_net_fret(&NetFretParams::new("donor", "acceptor"))?;
//! ```

pub mod coordinate;
pub mod layer;
pub mod plate;
pub mod preprocess;
