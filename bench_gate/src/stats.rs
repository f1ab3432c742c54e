use std::fmt::Display;

use average::Mean;

use readable::num::*;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeanSummary {
    pub mean: f64,
    pub len: usize,
}

impl Display for MeanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "μ: {} n: {}",
            Float::from(self.mean),
            Unsigned::from(self.len),
        )
    }
}

/// Mean of the values together with the number of values it was taken over.
/// Returns `None` when there are no values.
pub fn mean_of(values: impl Iterator<Item = f64>) -> Option<MeanSummary> {
    let m: Mean = values.collect();
    if m.is_empty() {
        None
    } else {
        Some(MeanSummary {
            mean: m.mean(),
            len: m.len() as usize,
        })
    }
}

/// Absolute relative deviation `|current / reference - 1| * 100`.
/// `None` for a zero reference or a non-finite result.
pub fn relative_deviation_percent(current: f64, reference: f64) -> Option<f64> {
    if reference == 0.0 {
        return None;
    }
    let deviation = ((current / reference) - 1.0).abs() * 100.0;
    deviation.is_finite().then_some(deviation)
}

/// Signed change `(current - reference) / reference * 100`.
/// `None` for a zero reference or a non-finite result.
pub fn signed_change_percent(current: f64, reference: f64) -> Option<f64> {
    if reference == 0.0 {
        return None;
    }
    let change = (current - reference) / reference * 100.0;
    change.is_finite().then_some(change)
}
