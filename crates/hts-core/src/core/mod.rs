//! # Core Module
//!
//! Stateless building blocks shared by every run.
//!
//! - **Plate Data** ([`models`]) - Well coordinates, data layers, plates and the
//!   preprocessing steps that derive new readouts
//! - **Protocols** ([`protocol`]) - Declarative preprocessing, QC and analysis settings
//! - **File I/O** ([`io`]) - Layer readers, well table writer and binary snapshots

pub mod io;
pub mod models;
pub mod protocol;
