/// Error and skill metrics on aligned observed/modeled pairs.
///
/// Every pair goes through the same cleaning pass before scoring; the
/// metric functions themselves assume clean, equal-length inputs.

use crate::model::{AlignedPair, SiteMetrics};

/// Floor applied to flows so percentage errors and ratios stay finite.
pub const FLOW_EPSILON: f64 = 0.01;

// ---------------------------------------------------------------------------
// Cleaning
// ---------------------------------------------------------------------------

/// Rows that survived cleaning, column by column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanedPairs {
    pub observed: Vec<f64>,
    pub modeled: Vec<f64>,
    /// `observed - modeled`
    pub errors: Vec<f64>,
    /// `|error / observed| * 100`
    pub percent_errors: Vec<f64>,
}

impl CleanedPairs {
    pub fn len(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    /// Appends another cleaned set, for pooled scoring.
    pub fn extend(&mut self, other: CleanedPairs) {
        self.observed.extend(other.observed);
        self.modeled.extend(other.modeled);
        self.errors.extend(other.errors);
        self.percent_errors.extend(other.percent_errors);
    }
}

/// Drops rows with a missing (negative or non-finite) value on either side,
/// floors the rest at [`FLOW_EPSILON`], and drops any row whose percentage
/// error is not finite.
pub fn clean(pairs: impl IntoIterator<Item = (f64, f64)>) -> CleanedPairs {
    let mut cleaned = CleanedPairs::default();
    for (observed, modeled) in pairs {
        if !(observed >= 0.0 && modeled >= 0.0) || !observed.is_finite() || !modeled.is_finite() {
            continue;
        }
        let observed = observed.max(FLOW_EPSILON);
        let modeled = modeled.max(FLOW_EPSILON);
        let error = observed - modeled;
        let percent_error = (error / observed).abs() * 100.0;
        if !percent_error.is_finite() {
            continue;
        }
        cleaned.observed.push(observed);
        cleaned.modeled.push(modeled);
        cleaned.errors.push(error);
        cleaned.percent_errors.push(percent_error);
    }
    cleaned
}

pub fn clean_pair(pair: &AlignedPair) -> CleanedPairs {
    clean(pair.points.iter().map(|p| (p.observed, p.modeled)))
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Scores one site. No surviving rows gives the insufficient-data sentinel.
pub fn site_metrics(pair: &AlignedPair) -> SiteMetrics {
    score(&clean_pair(pair))
}

/// Scores a group on the concatenation of every site's cleaned rows, so
/// long records weigh more than short ones.
pub fn aggregate_metrics(pairs: &[AlignedPair]) -> SiteMetrics {
    let mut pooled = CleanedPairs::default();
    for pair in pairs {
        pooled.extend(clean_pair(pair));
    }
    score(&pooled)
}

pub fn score(cleaned: &CleanedPairs) -> SiteMetrics {
    if cleaned.is_empty() {
        return SiteMetrics::INSUFFICIENT;
    }
    SiteMetrics {
        rmse: rmse(&cleaned.observed, &cleaned.modeled).round_ties_even(),
        max_error: max_error(&cleaned.observed, &cleaned.modeled).round_ties_even(),
        mape: mean(&cleaned.percent_errors),
        kge: kge(&cleaned.observed, &cleaned.modeled),
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Root Mean Square Error. Range: [0, inf), 0 = perfect.
pub fn rmse(observed: &[f64], simulated: &[f64]) -> f64 {
    let n = observed.len() as f64;
    let mse: f64 = observed
        .iter()
        .zip(simulated)
        .map(|(o, s)| (o - s).powi(2))
        .sum::<f64>()
        / n;
    mse.sqrt()
}

/// Largest absolute error.
pub fn max_error(observed: &[f64], simulated: &[f64]) -> f64 {
    observed
        .iter()
        .zip(simulated)
        .map(|(o, s)| (o - s).abs())
        .fold(0.0, f64::max)
}

/// Mean absolute percentage error, in percent.
pub fn mape(observed: &[f64], simulated: &[f64]) -> f64 {
    let errors: Vec<f64> = observed
        .iter()
        .zip(simulated)
        .map(|(o, s)| ((o - s) / o).abs() * 100.0)
        .collect();
    mean(&errors)
}

/// Kling-Gupta Efficiency. Range: (-inf, 1], 1 = perfect.
///
/// Population standard deviations. When only one side is flat the
/// correlation is undefined and taken as 0; two identical flat series score 1.
pub fn kge(observed: &[f64], simulated: &[f64]) -> f64 {
    let n = observed.len() as f64;
    let mean_o = observed.iter().sum::<f64>() / n;
    let mean_s = simulated.iter().sum::<f64>() / n;
    let std_o = (observed.iter().map(|o| (o - mean_o).powi(2)).sum::<f64>() / n).sqrt();
    let std_s = (simulated.iter().map(|s| (s - mean_s).powi(2)).sum::<f64>() / n).sqrt();

    let (r, alpha) = match (std_o == 0.0, std_s == 0.0) {
        (true, true) => (1.0, 1.0),
        (true, false) => (0.0, 0.0),
        (false, true) => (0.0, 0.0),
        (false, false) => {
            let cov = observed
                .iter()
                .zip(simulated)
                .map(|(o, s)| (o - mean_o) * (s - mean_s))
                .sum::<f64>();
            (cov / (n * std_o * std_s), std_s / std_o)
        }
    };
    let beta = if mean_o == 0.0 { 0.0 } else { mean_s / mean_o };

    1.0 - ((r - 1.0).powi(2) + (alpha - 1.0).powi(2) + (beta - 1.0).powi(2)).sqrt()
}
