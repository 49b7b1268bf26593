//! Cumulative precision/recall curves.

use crate::error::TrainError;
use crate::eval::matching::SampleResult;
use serde::{Deserialize, Serialize};

/// Added to the precision denominator so empty prefixes never divide by zero.
pub const PRECISION_EPSILON: f64 = 1e-16;

/// Cumulative precision and recall along the sample order.
///
/// Samples must already be in descending-confidence order for the curve to be
/// a true precision/recall curve; no reordering happens here.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PrecisionRecallCurve {
    pub recall: Vec<f64>,
    pub precision: Vec<f64>,
}

impl PrecisionRecallCurve {
    /// Build from parallel per-sample TP/FP counts and the total positive count.
    pub fn build(tp: &[usize], fp: &[usize], npos: usize) -> Result<Self, TrainError> {
        if tp.len() != fp.len() {
            return Err(TrainError::invalid_input(format!(
                "tp has {} entries but fp has {}",
                tp.len(),
                fp.len()
            )));
        }

        Ok(Self::cumulate(tp.iter().copied().zip(fp.iter().copied()), npos))
    }

    /// Build from per-sample results; `npos` is summed over all samples.
    pub fn from_results(results: &[SampleResult]) -> Self {
        let npos = results.iter().map(|r| r.npos).sum();
        Self::cumulate(results.iter().map(|r| (r.tp, r.fp)), npos)
    }

    fn cumulate(counts: impl ExactSizeIterator<Item = (usize, usize)>, npos: usize) -> Self {
        let mut recall = Vec::with_capacity(counts.len());
        let mut precision = Vec::with_capacity(counts.len());
        let (mut cum_tp, mut cum_fp) = (0usize, 0usize);
        for (t, f) in counts {
            cum_tp += t;
            cum_fp += f;
            let ctp = cum_tp as f64;
            recall.push(if npos == 0 { 0.0 } else { ctp / npos as f64 });
            precision.push(ctp / (ctp + cum_fp as f64 + PRECISION_EPSILON));
        }
        Self { recall, precision }
    }

    pub fn len(&self) -> usize {
        self.recall.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recall.is_empty()
    }

    /// `(recall, precision)` pairs in sample order.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.recall.iter().copied().zip(self.precision.iter().copied())
    }
}
