//! # htskit
//!
//! Data model and processing pipeline for high-throughput screening (HTS) experiments
//! run on microtiter plates.
//!
//! ## Architecture
//!
//! The library is split into three layers that depend strictly downwards.
//!
//! - **[`core`]: The Foundation.** Well coordinates, per-well data layers, plates and
//!   the protocol description, plus file readers and snapshot persistence.
//!
//! - **[`engine`]: The Run.** Indexing of plates inside a run, cross-plate filtering,
//!   and the memoized QC report and analysis results backed by pluggable services.
//!
//! - **[`workflows`]: The Public API.** Turns a set of input files and a run
//!   configuration into a fully preprocessed [`engine::run::Run`].

pub mod core;
pub mod engine;
pub mod workflows;
