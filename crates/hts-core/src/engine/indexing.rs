use crate::core::models::plate::PlateIndex;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid digit pattern"));

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexingError {
    #[error(
        "No plate numbering is informative for plates {names:?} (candidates per position: {candidates:?}). Rename the files so that one number identifies each plate"
    )]
    AmbiguousPlateNumbering {
        names: Vec<String>,
        candidates: Vec<Vec<String>>,
    },
}

/// Every maximal run of ASCII digits in `name`, in order of appearance.
pub fn digit_runs(name: &str) -> Vec<String> {
    DIGIT_RUN
        .find_iter(name)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Derives one index per plate name.
///
/// Candidate position `k` holds the `k`-th digit run of every name and is only
/// considered while all names have one. The first position whose values are pairwise
/// distinct becomes the index; the result is aligned with `names`.
pub fn infer_plate_indices<S: AsRef<str>>(names: &[S]) -> Result<Vec<PlateIndex>, IndexingError> {
    let runs: Vec<Vec<String>> = names.iter().map(|name| digit_runs(name.as_ref())).collect();
    let positions = runs.iter().map(Vec::len).min().unwrap_or(0);
    let candidates: Vec<Vec<String>> = (0..positions)
        .map(|k| runs.iter().map(|run| run[k].clone()).collect())
        .collect();

    let chosen = candidates.iter().position(|column| {
        let distinct: HashSet<&String> = column.iter().collect();
        distinct.len() == names.len()
    });

    match chosen {
        Some(k) if !names.is_empty() => {
            debug!("Using digit run {} of each plate name as plate index", k);
            Ok(candidates[k].iter().map(PlateIndex::new).collect())
        }
        _ => Err(IndexingError::AmbiguousPlateNumbering {
            names: names.iter().map(|name| name.as_ref().to_string()).collect(),
            candidates,
        }),
    }
}
