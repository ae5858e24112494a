//! Contracts of the services a run hands its data to: QC report renderers, the
//! analysis engine and the notification transport.
//!
//! The crate ships no implementations. Callers register theirs on a
//! [`ReportServices`] and pass it to [`Run::qc`](super::run::Run::qc) and
//! [`Run::analysis`](super::run::Run::analysis).

use super::run::{Run, Selection, SelectionKey};
use crate::core::models::layer::DataLayer;
use crate::core::protocol::StepParams;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const QC_NOTIFICATION_SUBJECT: &str = "QC report finished";

/// The QC report back ends a protocol may select with its `type` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QcBackend {
    Knitr,
    Matplotlib,
}

impl QcBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            QcBackend::Knitr => "knitr",
            QcBackend::Matplotlib => "matplotlib",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown QC report type '{0}'")]
pub struct ParseQcBackendError(pub String);

impl FromStr for QcBackend {
    type Err = ParseQcBackendError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "knitr" => Ok(QcBackend::Knitr),
            "matplotlib" => Ok(QcBackend::Matplotlib),
            other => Err(ParseQcBackendError(other.to_string())),
        }
    }
}

impl fmt::Display for QcBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a rendered QC report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcReport {
    pub backend: QcBackend,
    pub location: Option<PathBuf>,
    pub summary: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub methods: Vec<String>,
    pub values: BTreeMap<String, f64>,
}

/// Result of one protocol analysis entry. Filters with an empty tag select one group
/// per readout or plate, and each group is analysed on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Single(AnalysisResult),
    Grouped(Vec<(SelectionKey, AnalysisResult)>),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Rendering of the {backend} QC report failed: {message}")]
    Rendering { backend: QcBackend, message: String },
    #[error("Analysis failed: {0}")]
    Analysis(String),
    #[error("Notification could not be delivered: {0}")]
    Notification(String),
}

pub trait QcRenderer {
    /// Renders the QC report of `run`.
    ///
    /// `meta_data` is [`Run::report_meta_data`] and `params` the merged QC parameters
    /// with the `type` key removed.
    fn render_qc(
        &self,
        run: &Run,
        meta_data: &[(String, String)],
        params: &StepParams,
    ) -> Result<QcReport, ReportError>;
}

pub trait AnalysisEngine {
    fn perform_analysis(
        &self,
        methods: &[String],
        data: &Selection<'_>,
        plate_layout: Option<&DataLayer>,
        meta: &BTreeMap<String, String>,
    ) -> Result<AnalysisResult, ReportError>;
}

pub trait Notifier {
    fn notify(&self, recipients: &[String], subject: &str, body: &str) -> Result<(), ReportError>;
}

/// The services available to one QC or analysis request.
#[derive(Default)]
pub struct ReportServices<'a> {
    qc_renderers: HashMap<QcBackend, &'a dyn QcRenderer>,
    analysis_engine: Option<&'a dyn AnalysisEngine>,
    notifier: Option<&'a dyn Notifier>,
}

impl<'a> ReportServices<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_qc_renderer(mut self, backend: QcBackend, renderer: &'a dyn QcRenderer) -> Self {
        self.qc_renderers.insert(backend, renderer);
        self
    }

    pub fn with_analysis_engine(mut self, engine: &'a dyn AnalysisEngine) -> Self {
        self.analysis_engine = Some(engine);
        self
    }

    pub fn with_notifier(mut self, notifier: &'a dyn Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn qc_renderer(&self, backend: QcBackend) -> Option<&'a dyn QcRenderer> {
        self.qc_renderers.get(&backend).copied()
    }

    pub fn analysis_engine(&self) -> Option<&'a dyn AnalysisEngine> {
        self.analysis_engine
    }

    pub fn notifier(&self) -> Option<&'a dyn Notifier> {
        self.notifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullRenderer;

    impl QcRenderer for NullRenderer {
        fn render_qc(
            &self,
            _run: &Run,
            _meta_data: &[(String, String)],
            _params: &StepParams,
        ) -> Result<QcReport, ReportError> {
            Ok(QcReport {
                backend: QcBackend::Matplotlib,
                location: None,
                summary: BTreeMap::new(),
            })
        }
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!("knitr".parse::<QcBackend>(), Ok(QcBackend::Knitr));
        assert_eq!(" matplotlib ".parse::<QcBackend>(), Ok(QcBackend::Matplotlib));
        assert_eq!(
            "latex".parse::<QcBackend>(),
            Err(ParseQcBackendError("latex".to_string()))
        );
        assert_eq!(QcBackend::Knitr.to_string(), "knitr");
    }

    #[test]
    fn services_look_up_renderers_per_backend() {
        let renderer = NullRenderer;
        let services = ReportServices::new().with_qc_renderer(QcBackend::Matplotlib, &renderer);
        assert!(services.qc_renderer(QcBackend::Matplotlib).is_some());
        assert!(services.qc_renderer(QcBackend::Knitr).is_none());
        assert!(services.analysis_engine().is_none());
        assert!(services.notifier().is_none());
    }
}
