//! The CvJson etype: per-label frame predictions stored as `scores.json`
//!
//! ```json
//! {"labels": {"tank": {"frames": [0, 4], "scores": [0.91, 0.2]}}}
//! ```

use mtriage_core::{ElementError, Etype, LocalElement};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const ETYPE_NAME: &str = "CvJson";
pub const SCORES_FILE: &str = "scores.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelPredictions {
    pub frames: Vec<u64>,
    pub scores: Vec<f64>,
}

impl LabelPredictions {
    /// Frames scoring strictly above `threshold`
    pub fn count_above(&self, threshold: f64) -> usize {
        self.scores.iter().filter(|s| **s > threshold).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub labels: BTreeMap<String, LabelPredictions>,
}

impl Predictions {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// `scores.json` if present, else the only `.json` file, else nothing
fn filter_cvjson(paths: &[PathBuf]) -> Vec<PathBuf> {
    if let Some(scores) = paths
        .iter()
        .find(|p| p.file_name().is_some_and(|n| n == SCORES_FILE))
    {
        return vec![scores.clone()];
    }
    let jsons: Vec<PathBuf> = paths.iter().filter(|p| is_json(p)).cloned().collect();
    if jsons.len() == 1 {
        jsons
    } else {
        Vec::new()
    }
}

pub fn cvjson_etype() -> Etype {
    Etype::custom(ETYPE_NAME, filter_cvjson)
}

/// Run `get_preds` over every image in `element` and write `scores.json`
///
/// The frame number of an image is its numeric file stem, or its position
/// among the element's images when the stem is not a number.
pub fn from_preds<F>(
    element: &LocalElement,
    mut get_preds: F,
    out_dir: &Path,
) -> Result<LocalElement, ElementError>
where
    F: FnMut(&Path) -> Result<Vec<(String, f64)>, ElementError>,
{
    let images = Etype::Image.filter(&element.paths);
    if images.is_empty() {
        return Err(ElementError::skip("no images to predict on"));
    }

    let mut predictions = Predictions::default();
    for (position, image) in images.iter().enumerate() {
        let frame = image
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(position as u64);
        for (label, score) in get_preds(image)? {
            let entry = predictions.labels.entry(label).or_default();
            entry.frames.push(frame);
            entry.scores.push(score);
        }
    }

    fs::create_dir_all(out_dir)?;
    let out = out_dir.join(SCORES_FILE);
    let json = serde_json::to_vec(&predictions).map_err(|e| ElementError::Other(e.into()))?;
    fs::write(&out, json)?;
    Ok(LocalElement::new(&element.id, vec![out], cvjson_etype()))
}

/// label -> element ids, most frames above `threshold` first
///
/// Ties keep element id order.
pub fn rank(elements: &[(String, Predictions)], threshold: f64) -> BTreeMap<String, Vec<String>> {
    let mut counts: BTreeMap<String, Vec<(String, usize)>> = BTreeMap::new();
    for (id, predictions) in elements {
        for (label, preds) in &predictions.labels {
            counts
                .entry(label.clone())
                .or_default()
                .push((id.clone(), preds.count_above(threshold)));
        }
    }

    counts
        .into_iter()
        .map(|(label, mut by_element)| {
            by_element.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            (label, by_element.into_iter().map(|(id, _)| id).collect())
        })
        .collect()
}

/// One positive frame in a flattened prediction list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatFrame {
    pub element: String,
    pub frame: u64,
    pub score: f64,
    pub label: String,
}

pub fn flatten(elements: &[(String, Predictions)]) -> Vec<FlatFrame> {
    let mut frames = Vec::new();
    for (id, predictions) in elements {
        for (label, preds) in &predictions.labels {
            for (frame, score) in preds.frames.iter().zip(&preds.scores) {
                frames.push(FlatFrame {
                    element: id.clone(),
                    frame: *frame,
                    score: *score,
                    label: label.clone(),
                });
            }
        }
    }
    frames
}
