/// Alignment of observed and modeled series onto one date index.

use crate::analysis::resample::{resample, to_cumulative_within_year};
use crate::model::{AlignedPair, Frequency, MISSING_SENTINEL, PairedPoint, TimeSeries};

/// Joins daily observed and modeled series on date.
///
/// The observed span bounds the result: modeled days outside it are
/// dropped. Inside the span every modeled day is kept, and a day the
/// observed record skips is carried as missing, so a coarser period that
/// covers an observation gap is flagged missing as a whole.
pub fn align(observation_id: &str, model_reach_id: u64, observed: &TimeSeries, modeled: &TimeSeries) -> AlignedPair {
    let points = match (observed.first_date(), observed.last_date()) {
        (Some(first), Some(last)) => modeled
            .window(first, last)
            .points()
            .iter()
            .map(|&(date, modeled)| PairedPoint {
                date,
                observed: observed.value_at(date).unwrap_or(MISSING_SENTINEL),
                modeled,
            })
            .collect(),
        _ => Vec::new(),
    };

    AlignedPair {
        observation_id: observation_id.to_string(),
        model_reach_id,
        frequency: Frequency::Daily,
        points,
    }
}

/// Resamples both sides of a daily pair, then optionally accumulates them
/// within each year. Both sides end up on the same period labels.
pub fn resample_pair(pair: &AlignedPair, frequency: Frequency, cumulative_supply: bool) -> AlignedPair {
    let side = |pick: fn(&PairedPoint) -> f64| {
        let series = TimeSeries::from_points(pair.points.iter().map(|p| (p.date, pick(p))));
        let resampled = resample(&series, frequency);
        if cumulative_supply {
            to_cumulative_within_year(&resampled)
        } else {
            resampled
        }
    };
    let observed = side(|p| p.observed);
    let modeled = side(|p| p.modeled);

    let points = observed
        .points()
        .iter()
        .zip(modeled.points())
        .map(|(&(date, observed), &(_, modeled))| PairedPoint { date, observed, modeled })
        .collect();

    AlignedPair {
        observation_id: pair.observation_id.clone(),
        model_reach_id: pair.model_reach_id,
        frequency,
        points,
    }
}
