//! Reading layers from instrument exports and persisting plates and runs.
//!
//! Readers implement [`traits::LayerSource`]; the well table format is built in and
//! others can be registered on a [`well_table::LayerReaders`] dispatcher.

pub mod persistence;
pub mod traits;
pub mod well_table;
