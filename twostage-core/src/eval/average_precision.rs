//! Reductions of a precision/recall curve to a single score.

use crate::eval::curve::PrecisionRecallCurve;
use serde::{Deserialize, Serialize};

/// Which reduction to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApMode {
    /// Interpolated precision at recall 0.0, 0.1, ..., 1.0, keeping only
    /// thresholds that reach perfect precision.
    ElevenPoint,
    /// Area under the monotone precision envelope (PASCAL VOC).
    Voc,
}

/// Average-precision computations. Both are pure functions of the curve.
pub struct AveragePrecision;

impl AveragePrecision {
    pub fn compute(mode: ApMode, curve: &PrecisionRecallCurve) -> f64 {
        match mode {
            ApMode::ElevenPoint => Self::eleven_point(curve),
            ApMode::Voc => Self::voc(curve),
        }
    }

    /// 11-point interpolated AP.
    ///
    /// An interpolated precision below 1 is zeroed before averaging, so a curve
    /// that never reaches perfect precision scores 0.
    pub fn eleven_point(curve: &PrecisionRecallCurve) -> f64 {
        let total: f64 = (0..=10)
            .map(|step| {
                let threshold = f64::from(step) / 10.0;
                let p = curve
                    .points()
                    .filter(|&(r, _)| r >= threshold)
                    .map(|(_, p)| p)
                    .fold(0.0_f64, f64::max);
                if p < 1.0 { 0.0 } else { p }
            })
            .sum();
        total / 11.0
    }

    /// VOC AP: area under the right-to-left running maximum of precision,
    /// with sentinels `(0, 0)` in front and `(1, 0)` behind.
    pub fn voc(curve: &PrecisionRecallCurve) -> f64 {
        let mut mrec = Vec::with_capacity(curve.len() + 2);
        mrec.push(0.0);
        mrec.extend_from_slice(&curve.recall);
        mrec.push(1.0);

        let mut mpre = Vec::with_capacity(curve.len() + 2);
        mpre.push(0.0);
        mpre.extend_from_slice(&curve.precision);
        mpre.push(0.0);

        for i in (0..mpre.len() - 1).rev() {
            mpre[i] = mpre[i].max(mpre[i + 1]);
        }

        mrec.windows(2)
            .zip(&mpre[1..])
            .filter(|(r, _)| r[1] != r[0])
            .map(|(r, &p)| (r[1] - r[0]) * p)
            .sum()
    }
}
