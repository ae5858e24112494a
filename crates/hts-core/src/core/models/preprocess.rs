use super::layer::Tag;
use super::plate::{NetFretParams, Plate, PlateError};
use crate::core::protocol::StepParams;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use thiserror::Error;

pub const NET_FRET_STEP: &str = "calculate_net_fret";

static GLOBAL_REGISTRY: Lazy<PreprocessRegistry> = Lazy::new(PreprocessRegistry::with_builtin_steps);

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Unknown preprocessing step '{0}'")]
    UnknownPreprocessingStep(String),
    #[error("Preprocessing step '{step}' is missing parameter '{parameter}'")]
    MissingParameter {
        step: &'static str,
        parameter: &'static str,
    },
    #[error("Preprocessing step '{step}' does not accept parameter '{parameter}'")]
    UnknownParameter { step: &'static str, parameter: String },
    #[error("Preprocessing step '{step}' failed on plate '{plate}': {source}")]
    Plate {
        step: String,
        plate: String,
        source: PlateError,
    },
}

pub type PreprocessFn = fn(&mut Plate, &StepParams) -> Result<(), PreprocessError>;

/// Named plate preprocessing routines, looked up by the step names protocols declare.
#[derive(Debug, Clone, Default)]
pub struct PreprocessRegistry {
    steps: HashMap<&'static str, PreprocessFn>,
}

impl PreprocessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin_steps() -> Self {
        let mut registry = Self::new();
        registry.register(NET_FRET_STEP, net_fret_step);
        registry
    }

    pub fn global() -> &'static Self {
        &GLOBAL_REGISTRY
    }

    pub fn register(&mut self, name: &'static str, step: PreprocessFn) {
        self.steps.insert(name, step);
    }

    pub fn get(&self, name: &str) -> Option<PreprocessFn> {
        self.steps.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.steps.keys().copied()
    }

    pub fn apply(
        &self,
        name: &str,
        plate: &mut Plate,
        params: &StepParams,
    ) -> Result<(), PreprocessError> {
        let step = self
            .get(name)
            .ok_or_else(|| PreprocessError::UnknownPreprocessingStep(name.to_string()))?;
        step(plate, params)
    }
}

impl NetFretParams {
    const KEYS: [&'static str; 6] = [
        "donor_channel",
        "acceptor_channel",
        "fluorophore_donor",
        "fluorophore_acceptor",
        "buffer",
        "net_fret_key",
    ];

    pub fn from_step_params(params: &StepParams) -> Result<Self, PreprocessError> {
        if let Some(unknown) = params.keys().find(|key| !Self::KEYS.contains(&key.as_str())) {
            return Err(PreprocessError::UnknownParameter {
                step: NET_FRET_STEP,
                parameter: unknown.clone(),
            });
        }
        let required = |parameter: &'static str| {
            params
                .get(parameter)
                .map(|value| Tag::from_config_str(value))
                .ok_or(PreprocessError::MissingParameter {
                    step: NET_FRET_STEP,
                    parameter,
                })
        };

        let mut net_fret = NetFretParams::new(
            required("donor_channel")?,
            required("acceptor_channel")?,
        );
        if let Some(value) = params.get("fluorophore_donor") {
            net_fret.fluorophore_donor = value.clone();
        }
        if let Some(value) = params.get("fluorophore_acceptor") {
            net_fret.fluorophore_acceptor = value.clone();
        }
        if let Some(value) = params.get("buffer") {
            net_fret.buffer = value.clone();
        }
        if let Some(value) = params.get("net_fret_key") {
            net_fret.net_fret_key = Tag::from_config_str(value);
        }
        Ok(net_fret)
    }
}

fn net_fret_step(plate: &mut Plate, params: &StepParams) -> Result<(), PreprocessError> {
    let net_fret = NetFretParams::from_step_params(params)?;
    plate
        .calculate_net_fret(&net_fret)
        .map_err(|source| PreprocessError::Plate {
            step: NET_FRET_STEP.to_string(),
            plate: plate.name().to_string(),
            source,
        })
}
