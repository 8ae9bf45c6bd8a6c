//! Top-K selection over per-label probabilities

use std::fmt;

use crate::error::{Result, TaggerError};
use crate::labels::LabelCatalog;

/// One ranked tag
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Model output index
    pub index: usize,
    /// Catalog label at `index`
    pub label: String,
    /// Sigmoid output in `[0, 1]`
    pub probability: f32,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:.4}", self.label, self.probability)
    }
}

/// Ranked tags for one clip, highest probability first
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PredictionResult {
    /// Ranked entries, best first
    pub entries: Vec<Prediction>,
}

impl PredictionResult {
    /// Number of ranked entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was ranked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest-ranked tag
    pub fn top(&self) -> Option<&Prediction> {
        self.entries.first()
    }

    /// Entries in rank order
    pub fn iter(&self) -> impl Iterator<Item = &Prediction> {
        self.entries.iter()
    }
}

impl fmt::Display for PredictionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}

/// Select the `k` most probable labels
///
/// Descending by probability; equal probabilities keep ascending index order.
pub fn rank(probabilities: &[f32], catalog: &LabelCatalog, k: usize) -> Result<PredictionResult> {
    let n = catalog.len();
    if probabilities.len() != n {
        return Err(TaggerError::LabelMismatch {
            labels: n,
            scores: probabilities.len(),
        });
    }
    if k == 0 || k > n {
        return Err(TaggerError::InvalidTopK { k, labels: n });
    }

    let mut order: Vec<usize> = (0..n).collect();
    // Stable sort, so ties stay in index order
    order.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));

    let entries = order
        .into_iter()
        .take(k)
        .map(|index| Prediction {
            index,
            label: catalog.get(index).unwrap_or_default().to_string(),
            probability: probabilities[index],
        })
        .collect();

    Ok(PredictionResult { entries })
}
