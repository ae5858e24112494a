use thiserror::Error;

use super::indexing::IndexingError;
use super::report::{QcBackend, ReportError};
use crate::core::io::persistence::PersistenceError;
use crate::core::io::traits::SourceError;
use crate::core::models::plate::PlateError;
use crate::core::models::preprocess::PreprocessError;
use crate::core::protocol::ProtocolLoadError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Plate operation failed: {source}")]
    Plate {
        #[from]
        source: PlateError,
    },

    #[error("Preprocessing failed: {source}")]
    Preprocess {
        #[from]
        source: PreprocessError,
    },

    #[error(transparent)]
    Indexing(#[from] IndexingError),

    #[error("Protocol could not be loaded: {source}")]
    Protocol {
        #[from]
        source: ProtocolLoadError,
    },

    #[error("Layer could not be read: {source}")]
    Source {
        #[from]
        source: SourceError,
    },

    #[error("Run snapshot failed: {source}")]
    Persistence {
        #[from]
        source: PersistenceError,
    },

    #[error("Report generation failed: {source}")]
    Report {
        #[from]
        source: ReportError,
    },

    #[error("Unknown filter scope '{0}'. Expected run_wise or plate_wise")]
    UnknownScope(String),

    #[error("Unknown QC report type '{0}'. Expected knitr or matplotlib")]
    UnknownFormat(String),

    #[error("QC parameters do not name a report type")]
    MissingQcType,

    #[error("A run needs at least one plate")]
    EmptyRun,

    #[error(
        "Plate '{plate}' is {actual_height}x{actual_width} but the run is {expected_height}x{expected_width}"
    )]
    DimensionMismatch {
        plate: String,
        expected_height: usize,
        expected_width: usize,
        actual_height: usize,
        actual_width: usize,
    },

    #[error("No plate with index '{0}' in run")]
    PlateNotFound(String),

    #[error("Plate index '{query}' matches several plates numerically: {}", .candidates.join(", "))]
    AmbiguousPlateIndex {
        query: String,
        candidates: Vec<String>,
    },

    #[error("{0} requires a protocol, but the run has none")]
    MissingProtocol(&'static str),

    #[error("No QC renderer registered for report type '{0}'")]
    BackendUnavailable(QcBackend),

    #[error("No analysis engine registered")]
    AnalysisUnavailable,

    #[error("Run meta data lacks '{0}'")]
    MissingMetadata(&'static str),

    #[error("Invalid run configuration: {0}")]
    Config(String),
}
