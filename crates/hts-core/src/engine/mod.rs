//! # Engine Module
//!
//! The run-level logic: several plates processed under one protocol.
//!
//! - **Indexing** ([`indexing`]) - Inference of plate positions from file names
//! - **Runs** ([`run`]) - Run assembly, cross-plate filters, QC and analysis
//! - **Reporting Services** ([`report`]) - Seams for QC rendering, analysis back ends
//!   and notification
//! - **Progress Monitoring** ([`progress`]) - Callbacks for long-running assembly
//! - **Error Handling** ([`error`]) - The error type of run-level operations

pub mod error;
pub mod indexing;
pub mod progress;
pub mod report;
pub mod run;
