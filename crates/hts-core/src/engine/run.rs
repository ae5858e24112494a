use super::error::EngineError;
use super::indexing::infer_plate_indices;
use super::report::{
    AnalysisOutcome, ParseQcBackendError, QC_NOTIFICATION_SUBJECT, QcBackend, QcReport,
    ReportError, ReportServices,
};
use crate::core::io::persistence;
use crate::core::io::well_table::write_stacked_table;
use crate::core::models::layer::{DataLayer, Grid, Tag};
use crate::core::models::plate::{Plate, PlateError, PlateIndex};
use crate::core::protocol::{Protocol, StepParams};
use once_cell::unsync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

const QC_TYPE_KEY: &str = "type";
const PLATE_COLUMN: &str = "plate";

/// Run-level settings that accompany the plates, replacing free-form keyword data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunMetadata {
    pub experimenter: Option<String>,
    pub experimenter_mail: Option<String>,
    pub send_mail_upon_qc: bool,
    /// QC parameters that override those of the protocol.
    pub qc: StepParams,
    /// Parameters handed to every analysis.
    pub meta: BTreeMap<String, String>,
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunConfig {
    pub name: Option<String>,
    pub protocol: Option<Protocol>,
    pub metadata: RunMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterScope {
    /// One readout across all plates.
    RunWise,
    /// All readouts of one plate.
    PlateWise,
}

impl FromStr for FilterScope {
    type Err = EngineError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "run_wise" => Ok(FilterScope::RunWise),
            "plate_wise" => Ok(FilterScope::PlateWise),
            other => Err(EngineError::UnknownScope(other.to_string())),
        }
    }
}

impl fmt::Display for FilterScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FilterScope::RunWise => "run_wise",
            FilterScope::PlateWise => "plate_wise",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SelectionKey {
    Plate(PlateIndex),
    Readout(Tag),
}

impl fmt::Display for SelectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionKey::Plate(index) => write!(f, "{}", index),
            SelectionKey::Readout(tag) => write!(f, "{}", tag),
        }
    }
}

/// Readout grids picked by a filter, keyed by plate index or by readout tag.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selection<'a> {
    entries: Vec<(SelectionKey, &'a Grid)>,
}

impl<'a> Selection<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: SelectionKey, grid: &'a Grid) {
        self.entries.push((key, grid));
    }

    pub fn entries(&self) -> &[(SelectionKey, &'a Grid)] {
        &self.entries
    }

    pub fn keys(&self) -> impl Iterator<Item = &SelectionKey> {
        self.entries.iter().map(|(key, _)| key)
    }

    pub fn get(&self, key: &SelectionKey) -> Option<&'a Grid> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, grid)| *grid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Output of [`Run::filter`]. A filter with an empty tag yields one selection per
/// readout (run-wise) or per plate (plate-wise).
#[derive(Debug, Clone, PartialEq)]
pub enum RunFilter<'a> {
    Single(Selection<'a>),
    Grouped(Vec<(SelectionKey, Selection<'a>)>),
}

fn in_subset_tag(tag: &Tag, subset: Option<&[String]>) -> bool {
    subset.is_none_or(|members| {
        members
            .iter()
            .any(|member| member.trim() == tag.to_string() || Tag::from_config_str(member) == *tag)
    })
}

/// All plates of one screening experiment, keyed by the index inferred from their
/// names.
///
/// QC reports and analysis results are computed on first request and kept for the
/// lifetime of the value. Snapshots do not include them.
#[derive(Debug, Serialize, Deserialize)]
pub struct Run {
    name: String,
    path: Option<PathBuf>,
    plates: BTreeMap<PlateIndex, Plate>,
    width: usize,
    height: usize,
    protocol: Option<Protocol>,
    metadata: RunMetadata,
    #[serde(skip)]
    qc: OnceCell<QcReport>,
    #[serde(skip)]
    analysis: OnceCell<BTreeMap<String, AnalysisOutcome>>,
}

impl Run {
    /// Indexes `plates` and, when `config` carries a protocol, applies its
    /// preprocessing steps to every plate.
    ///
    /// # Errors
    ///
    /// Fails when `plates` is empty, when plate dimensions differ, when no digit run
    /// in the plate names identifies every plate, or when a preprocessing step fails.
    #[instrument(skip_all, name = "run_construction", fields(plates = plates.len()))]
    pub fn new(
        plates: Vec<Plate>,
        path: Option<PathBuf>,
        config: RunConfig,
    ) -> Result<Self, EngineError> {
        let first = plates.first().ok_or(EngineError::EmptyRun)?;
        let (width, height) = (first.width(), first.height());
        if let Some(plate) = plates
            .iter()
            .find(|plate| plate.width() != width || plate.height() != height)
        {
            return Err(EngineError::DimensionMismatch {
                plate: plate.name().to_string(),
                expected_height: height,
                expected_width: width,
                actual_height: plate.height(),
                actual_width: plate.width(),
            });
        }

        let names: Vec<&str> = plates.iter().map(Plate::name).collect();
        let indices = infer_plate_indices(&names)?;
        let plates: BTreeMap<PlateIndex, Plate> = plates
            .into_iter()
            .zip(indices)
            .map(|(mut plate, index)| {
                plate.set_index(index.clone());
                (index, plate)
            })
            .collect();

        let name = config
            .name
            .or_else(|| {
                path.as_deref()
                    .and_then(Path::file_stem)
                    .map(|stem| stem.to_string_lossy().to_string())
            })
            .unwrap_or_else(|| "run".to_string());

        let mut run = Self {
            name,
            path,
            plates,
            width,
            height,
            protocol: config.protocol,
            metadata: config.metadata,
            qc: OnceCell::new(),
            analysis: OnceCell::new(),
        };
        info!(
            "Run '{}' holds {} plates of {}x{} wells.",
            run.name,
            run.plates.len(),
            run.height,
            run.width
        );
        if run.protocol.is_some() {
            run.preprocess()?;
        }
        Ok(run)
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        Ok(persistence::read_blob(path)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        Ok(persistence::write_blob(self, path)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn plates(&self) -> &BTreeMap<PlateIndex, Plate> {
        &self.plates
    }

    /// The plate whose index is `index`. See [`Run::resolve_index`] for how the text is
    /// matched; an ambiguous index yields `None`.
    pub fn plate(&self, index: &str) -> Option<&Plate> {
        self.resolve_index(index)
            .ok()
            .flatten()
            .and_then(|index| self.plates.get(index))
    }

    /// Finds the plate index named by `text`. An index with the same text wins;
    /// otherwise the one index with the same numeric value is taken.
    ///
    /// # Errors
    ///
    /// Fails with [`EngineError::AmbiguousPlateIndex`] when no index has the exact text
    /// and several share its numeric value, e.g. `"001"` against `"1"` and `"01"`.
    pub fn resolve_index(&self, text: &str) -> Result<Option<&PlateIndex>, EngineError> {
        let text = text.trim();
        if let Some(exact) = self.plates.keys().find(|index| index.as_str() == text) {
            return Ok(Some(exact));
        }
        let numeric: Vec<&PlateIndex> = self
            .plates
            .keys()
            .filter(|index| index.matches(text))
            .collect();
        match numeric.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(*only)),
            _ => Err(EngineError::AmbiguousPlateIndex {
                query: text.to_string(),
                candidates: numeric.iter().map(ToString::to_string).collect(),
            }),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn protocol(&self) -> Option<&Protocol> {
        self.protocol.as_ref()
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    #[instrument(skip_all, name = "run_preprocessing")]
    fn preprocess(&mut self) -> Result<(), EngineError> {
        let Some(protocol) = &self.protocol else {
            return Ok(());
        };
        if protocol.preprocessing.is_empty() {
            info!("No preprocessing defined in protocol '{}'.", protocol.name);
            return Ok(());
        }
        for step in &protocol.preprocessing {
            debug!("Applying '{}' to {} plates", step.name, self.plates.len());
            for plate in self.plates.values_mut() {
                plate.preprocess(&step.name, &step.params)?;
            }
        }
        Ok(())
    }

    /// Selects readout grids across the run.
    ///
    /// `run_wise` picks readout `tag` of every plate; `plate_wise` picks every readout
    /// of the plate with index `tag`. An empty `tag` groups the selection by readout
    /// tag (tags of the first plate) or by plate. `subset` limits plate indices for
    /// `run_wise` and readout tags for `plate_wise`.
    pub fn filter(
        &self,
        scope: &str,
        tag: &str,
        subset: Option<&[String]>,
    ) -> Result<RunFilter<'_>, EngineError> {
        let tag = tag.trim();
        match scope.parse::<FilterScope>()? {
            FilterScope::RunWise if !tag.is_empty() => {
                let selected = self.selected_indices(subset)?;
                let mut selection = Selection::new();
                for (index, plate) in self.plates_in(selected.as_ref()) {
                    selection.push(SelectionKey::Plate(index.clone()), plate.get_readout(tag)?);
                }
                Ok(RunFilter::Single(selection))
            }
            FilterScope::RunWise => {
                let tags: Vec<Tag> = self
                    .plates
                    .values()
                    .next()
                    .map(|plate| plate.readout_tags().into_iter().cloned().collect())
                    .unwrap_or_default();
                let selected = self.selected_indices(subset)?;
                let mut groups = Vec::with_capacity(tags.len());
                for readout_tag in tags {
                    let mut selection = Selection::new();
                    for (index, plate) in self.plates_in(selected.as_ref()) {
                        selection
                            .push(SelectionKey::Plate(index.clone()), plate.readout_grid(&readout_tag)?);
                    }
                    groups.push((SelectionKey::Readout(readout_tag), selection));
                }
                Ok(RunFilter::Grouped(groups))
            }
            FilterScope::PlateWise if !tag.is_empty() => {
                let plate = self
                    .resolve_index(tag)?
                    .and_then(|index| self.plates.get(index))
                    .ok_or_else(|| EngineError::PlateNotFound(tag.to_string()))?;
                Ok(RunFilter::Single(Self::readouts_of(plate, subset)))
            }
            FilterScope::PlateWise => Ok(RunFilter::Grouped(
                self.plates
                    .iter()
                    .map(|(index, plate)| {
                        (
                            SelectionKey::Plate(index.clone()),
                            Self::readouts_of(plate, subset),
                        )
                    })
                    .collect(),
            )),
        }
    }

    /// Plate indices named by `subset`, resolved one member at a time. Members that
    /// name no plate select nothing.
    fn selected_indices(
        &self,
        subset: Option<&[String]>,
    ) -> Result<Option<BTreeSet<&PlateIndex>>, EngineError> {
        let Some(members) = subset else {
            return Ok(None);
        };
        let mut selected = BTreeSet::new();
        for member in members {
            match self.resolve_index(member)? {
                Some(index) => {
                    selected.insert(index);
                }
                None => debug!("Subset member '{}' names no plate", member),
            }
        }
        Ok(Some(selected))
    }

    fn plates_in<'s>(
        &'s self,
        selected: Option<&BTreeSet<&PlateIndex>>,
    ) -> impl Iterator<Item = (&'s PlateIndex, &'s Plate)> {
        self.plates
            .iter()
            .filter(move |(index, _)| selected.is_none_or(|selected| selected.contains(index)))
    }

    fn readouts_of<'p>(plate: &'p Plate, subset: Option<&[String]>) -> Selection<'p> {
        let mut selection = Selection::new();
        if let Some(readout) = plate.readout() {
            for (tag, grid) in readout.data() {
                if in_subset_tag(tag, subset) {
                    selection.push(SelectionKey::Readout(tag.clone()), grid);
                }
            }
        }
        selection
    }

    /// Writes every readout of every plate as one CSV table for downstream statistics:
    /// a `plate` column with the plate index, the well label, then one column per
    /// readout tag of the first plate. Plates are written in index order.
    ///
    /// # Errors
    ///
    /// Fails when a plate lacks one of the first plate's readout tags or when writing
    /// fails.
    pub fn export_csv(&self, writer: impl Write, origin: &str) -> Result<(), EngineError> {
        let tags: Vec<&Tag> = self
            .plates
            .values()
            .next()
            .map(Plate::readout_tags)
            .unwrap_or_default();
        let mut groups = Vec::with_capacity(self.plates.len());
        for (index, plate) in &self.plates {
            let columns = tags
                .iter()
                .map(|tag| Ok((tag.to_string(), plate.readout_grid(tag)?)))
                .collect::<Result<Vec<_>, PlateError>>()?;
            groups.push((index.to_string(), columns));
        }
        debug!(
            "Exporting {} readouts of {} plates to {}",
            tags.len(),
            groups.len(),
            origin
        );
        write_stacked_table(writer, PLATE_COLUMN, &groups, origin)?;
        Ok(())
    }

    /// QC parameters of the protocol overlaid with those of the run. Keys defined in
    /// both places take the run's value.
    pub fn qc_config(&self) -> StepParams {
        let mut merged = self
            .protocol
            .as_ref()
            .map(|protocol| protocol.qc.clone())
            .unwrap_or_default();
        let collisions: Vec<&str> = self
            .metadata
            .qc
            .keys()
            .filter(|key| merged.contains_key(*key))
            .map(String::as_str)
            .collect();
        if !collisions.is_empty() {
            warn!(
                "QC keys defined both in the protocol and the run config: {}. Using the run config values.",
                collisions.join(", ")
            );
        }
        merged.extend(
            self.metadata
                .qc
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        merged
    }

    /// Renders the QC report once with the back end named by the `type` parameter and
    /// returns the cached report on later calls.
    ///
    /// With `send_mail_upon_qc` set, the experimenter is notified after a fresh render.
    /// The report is cached only after the notification succeeded.
    #[instrument(skip_all, name = "run_qc", fields(run = %self.name))]
    pub fn qc(&self, services: &ReportServices<'_>) -> Result<&QcReport, EngineError> {
        if let Some(report) = self.qc.get() {
            debug!("Returning cached QC report");
            return Ok(report);
        }

        let recipient = if self.metadata.send_mail_upon_qc {
            Some(
                self.metadata
                    .experimenter_mail
                    .clone()
                    .ok_or(EngineError::MissingMetadata("experimenter_mail"))?,
            )
        } else {
            None
        };
        let mut params = self.qc_config();
        let backend: QcBackend = params
            .remove(QC_TYPE_KEY)
            .ok_or(EngineError::MissingQcType)?
            .parse::<QcBackend>()
            .map_err(|e: ParseQcBackendError| EngineError::UnknownFormat(e.0))?;
        let renderer = services
            .qc_renderer(backend)
            .ok_or(EngineError::BackendUnavailable(backend))?;

        info!("Rendering {} QC report", backend);
        let rendered = renderer.render_qc(self, &self.report_meta_data(), &params)?;
        if let Some(recipient) = recipient {
            self.notify_qc(services, recipient)?;
        }
        Ok(self.qc.get_or_init(|| rendered))
    }

    fn notify_qc(&self, services: &ReportServices<'_>, recipient: String) -> Result<(), EngineError> {
        let Some(notifier) = services.notifier() else {
            warn!("QC notification requested but no notifier is registered.");
            return Ok(());
        };
        let body = format!(
            "QC report for Run config '{}' is prepared.",
            self.path_text()
        );
        info!("Sending QC notification to {}", recipient);
        notifier.notify(&[recipient], QC_NOTIFICATION_SUBJECT, &body)?;
        Ok(())
    }

    /// Runs every analysis declared by the protocol on its filtered data, once.
    #[instrument(skip_all, name = "run_analysis", fields(run = %self.name))]
    pub fn analysis(
        &self,
        services: &ReportServices<'_>,
    ) -> Result<&BTreeMap<String, AnalysisOutcome>, EngineError> {
        if let Some(results) = self.analysis.get() {
            debug!("Returning cached analysis results");
            return Ok(results);
        }

        let protocol = self
            .protocol
            .as_ref()
            .ok_or(EngineError::MissingProtocol("Analysis"))?;
        let engine = services
            .analysis_engine()
            .ok_or(EngineError::AnalysisUnavailable)?;
        let plate_layout = self.plate_layout();
        let meta = &self.metadata.meta;

        let mut results = BTreeMap::new();
        for entry in &protocol.analysis {
            info!(
                "Analysis '{}': {} {} with methods {:?}",
                entry.name, entry.filter.scope, entry.filter.tag, entry.methods
            );
            let filtered = self.filter(
                &entry.filter.scope,
                &entry.filter.tag,
                entry.filter.subset.as_deref(),
            )?;
            let outcome = match filtered {
                RunFilter::Single(selection) => AnalysisOutcome::Single(
                    engine.perform_analysis(&entry.methods, &selection, plate_layout, meta)?,
                ),
                RunFilter::Grouped(groups) => AnalysisOutcome::Grouped(
                    groups
                        .into_iter()
                        .map(|(key, selection)| {
                            engine
                                .perform_analysis(&entry.methods, &selection, plate_layout, meta)
                                .map(|result| (key, result))
                        })
                        .collect::<Result<Vec<_>, ReportError>>()?,
                ),
            };
            results.insert(entry.name.clone(), outcome);
        }
        Ok(self.analysis.get_or_init(|| results))
    }

    fn path_text(&self) -> String {
        self.path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default()
    }

    /// Meta data for report headers: protocol name and file, experimenter, mail and
    /// run config first, then `meta_<key>` entries and the extra fields.
    pub fn report_meta_data(&self) -> Vec<(String, String)> {
        let protocol_name = self
            .protocol
            .as_ref()
            .map(|protocol| protocol.name.clone())
            .unwrap_or_default();
        let protocol_config = self
            .protocol
            .as_ref()
            .and_then(|protocol| protocol.path.as_ref())
            .map(|path| path.display().to_string())
            .unwrap_or_default();

        let mut ordered = vec![
            ("protocol_name".to_string(), protocol_name),
            ("protocol_config".to_string(), protocol_config),
            (
                "experimenter".to_string(),
                self.metadata.experimenter.clone().unwrap_or_default(),
            ),
            (
                "experimenter_mail".to_string(),
                self.metadata.experimenter_mail.clone().unwrap_or_default(),
            ),
            ("run_config".to_string(), self.path_text()),
        ];
        let remaining = self
            .metadata
            .meta
            .iter()
            .map(|(key, value)| (format!("meta_{}", key), value.clone()))
            .chain(
                self.metadata
                    .extra
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone())),
            )
            .collect::<Vec<_>>();
        for (key, value) in remaining {
            if !ordered.iter().any(|(existing, _)| *existing == key) {
                ordered.push((key, value));
            }
        }
        ordered
    }

    /// Layout of the first plate. Differing layouts across plates are logged.
    pub fn plate_layout(&self) -> Option<&DataLayer> {
        let mut layouts = self.plates.values().map(Plate::plate_layout);
        let first = layouts.next().flatten();
        if layouts.any(|layout| layout != first) {
            warn!("The plates of run '{}' may have different plate layouts", self.name);
        }
        first
    }

    pub fn qc_report(&self) -> Option<&QcReport> {
        self.qc.get()
    }

    pub fn analysis_results(&self) -> Option<&BTreeMap<String, AnalysisOutcome>> {
        self.analysis.get()
    }
}

impl fmt::Display for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run '{}'", self.name)?;
        writeln!(f, "  path to run config file: {}", self.path_text())?;
        writeln!(f, "  number of plates: {}", self.plates.len())?;
        writeln!(f, "  width: {}", self.width)?;
        write!(f, "  height: {}", self.height)
    }
}
