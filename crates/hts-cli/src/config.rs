mod builder;
mod file;

pub use builder::{RunSetup, from_config_file, from_readout_dir, from_snapshot};
