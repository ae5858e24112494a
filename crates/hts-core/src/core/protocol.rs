use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Stringified parameters of one declared step.
pub type StepParams = BTreeMap<String, String>;

/// Declarative description of what happens to a run: preprocessing applied to every
/// plate, QC report parameters, and named analyses.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Protocol {
    pub name: String,
    pub path: Option<PathBuf>,
    pub preprocessing: Vec<PreprocessingStep>,
    pub qc: StepParams,
    pub analysis: Vec<AnalysisEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingStep {
    pub name: String,
    pub params: StepParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisEntry {
    pub name: String,
    pub filter: FilterSpec,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterSpec {
    pub scope: String,
    pub tag: String,
    pub subset: Option<Vec<String>>,
}

#[derive(Debug, Error)]
pub enum ProtocolLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileProtocol {
    name: String,
    #[serde(default)]
    preprocessing: Vec<FileStep>,
    #[serde(default)]
    qc: BTreeMap<String, toml::Value>,
    #[serde(default)]
    analysis: Vec<FileAnalysis>,
}

#[derive(Debug, Deserialize)]
struct FileStep {
    step: String,
    #[serde(flatten)]
    params: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileAnalysis {
    name: String,
    filter: FileFilter,
    #[serde(default)]
    methods: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileFilter {
    scope: String,
    #[serde(default)]
    tag: String,
    subset: Option<Vec<toml::Value>>,
}

fn stringify(value: &toml::Value) -> String {
    match value {
        toml::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn stringify_params(params: &BTreeMap<String, toml::Value>) -> StepParams {
    params
        .iter()
        .map(|(key, value)| (key.clone(), stringify(value)))
        .collect()
}

impl Protocol {
    pub fn load(path: &Path) -> Result<Self, ProtocolLoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| ProtocolLoadError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        let mut protocol = Self::from_toml_str(&content).map_err(|e| ProtocolLoadError::Toml {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        protocol.path = Some(path.to_path_buf());
        Ok(protocol)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let file: FileProtocol = toml::from_str(content)?;
        Ok(Self {
            name: file.name,
            path: None,
            preprocessing: file
                .preprocessing
                .iter()
                .map(|step| PreprocessingStep {
                    name: step.step.clone(),
                    params: stringify_params(&step.params),
                })
                .collect(),
            qc: stringify_params(&file.qc),
            analysis: file
                .analysis
                .into_iter()
                .map(|entry| AnalysisEntry {
                    name: entry.name,
                    filter: FilterSpec {
                        scope: entry.filter.scope,
                        tag: entry.filter.tag,
                        subset: entry
                            .filter
                            .subset
                            .map(|values| values.iter().map(stringify).collect()),
                    },
                    methods: entry.methods,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FRET_PROTOCOL: &str = r#"
        name = "FRET kinase screen"

        [[preprocessing]]
        step = "calculate_net_fret"
        donor_channel = "donor"
        acceptor_channel = "acceptor"
        buffer = "buffer"

        [qc]
        type = "knitr"
        negative_control = "neg"
        replicates = 2

        [[analysis]]
        name = "hits"
        methods = ["z_score", "ssmd"]

        [analysis.filter]
        scope = "run_wise"
        tag = "net_fret"
        subset = [1, "2"]

        [[analysis]]
        name = "per_plate"

        [analysis.filter]
        scope = "plate_wise"
    "#;

    #[test]
    fn protocol_parses_all_sections() {
        let protocol = Protocol::from_toml_str(FRET_PROTOCOL).unwrap();
        assert_eq!(protocol.name, "FRET kinase screen");
        assert_eq!(protocol.preprocessing.len(), 1);
        let step = &protocol.preprocessing[0];
        assert_eq!(step.name, "calculate_net_fret");
        assert_eq!(step.params.get("donor_channel").unwrap(), "donor");
        assert!(!step.params.contains_key("step"));

        assert_eq!(protocol.qc.get("type").unwrap(), "knitr");
        assert_eq!(protocol.qc.get("replicates").unwrap(), "2");

        assert_eq!(protocol.analysis.len(), 2);
        let hits = &protocol.analysis[0];
        assert_eq!(hits.methods, vec!["z_score", "ssmd"]);
        assert_eq!(hits.filter.scope, "run_wise");
        assert_eq!(
            hits.filter.subset,
            Some(vec!["1".to_string(), "2".to_string()])
        );
        assert_eq!(protocol.analysis[1].filter.tag, "");
        assert!(protocol.analysis[1].filter.subset.is_none());
    }

    #[test]
    fn preprocessing_steps_keep_declaration_order() {
        let protocol = Protocol::from_toml_str(
            r#"
            name = "two steps"
            [[preprocessing]]
            step = "second"
            [[preprocessing]]
            step = "first"
            "#,
        )
        .unwrap();
        let names: Vec<_> = protocol.preprocessing.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[test]
    fn load_records_source_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("protocol.toml");
        std::fs::write(&path, FRET_PROTOCOL).unwrap();
        let protocol = Protocol::load(&path).unwrap();
        assert_eq!(protocol.path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn load_fails_for_missing_file() {
        let dir = tempdir().unwrap();
        let result = Protocol::load(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ProtocolLoadError::Io { .. })));
    }

    #[test]
    fn load_fails_for_unknown_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("protocol.toml");
        std::fs::write(&path, "name = \"x\"\n[reporting]\nfoo = 1\n").unwrap();
        let result = Protocol::load(&path);
        assert!(matches!(result, Err(ProtocolLoadError::Toml { .. })));
    }
}
