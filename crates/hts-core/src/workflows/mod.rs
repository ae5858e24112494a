//! # Workflows Module
//!
//! Entry points that take a run from its input files to a preprocessed [`Run`].
//!
//! - **Assembly** ([`assemble`]) - Builds plates from configured layer files, plain
//!   readout files or a previously saved snapshot, then constructs the run
//!
//! [`Run`]: crate::engine::run::Run

pub mod assemble;
