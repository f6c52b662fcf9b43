/// Temporal resampling of daily flow series.
///
/// Daily series pass through in cfs. Coarser frequencies become volumes:
/// each daily value is converted from cfs-days to acre-feet and summed over
/// the period, labelled with the period's last calendar day.

use chrono::{Datelike, NaiveDate};

use crate::model::{CFS_DAY_TO_ACRE_FEET, Frequency, MISSING_SENTINEL, TimeSeries};

/// Resamples a daily series to `frequency`.
///
/// A period holding any missing (negative) day is itself missing, so partial
/// volumes never reach the metrics. Periods with no days at all are not
/// emitted.
pub fn resample(series: &TimeSeries, frequency: Frequency) -> TimeSeries {
    if frequency == Frequency::Daily {
        return series.clone();
    }

    let mut periods: Vec<(NaiveDate, f64, bool)> = Vec::new();
    for &(date, value) in series.points() {
        let label = period_end(date, frequency);
        let missing = value < 0.0 || !value.is_finite();
        match periods.last_mut() {
            Some((current, total, any_missing)) if *current == label => {
                *total += value * CFS_DAY_TO_ACRE_FEET;
                *any_missing |= missing;
            }
            _ => periods.push((label, value * CFS_DAY_TO_ACRE_FEET, missing)),
        }
    }

    TimeSeries::from_points(
        periods
            .into_iter()
            .map(|(label, total, missing)| (label, if missing { MISSING_SENTINEL } else { total })),
    )
}

/// Running total within each calendar year, restarting on January 1st.
///
/// Once a missing value is met, the rest of that year is missing: a running
/// total with a hole in it is not a supply figure.
pub fn to_cumulative_within_year(series: &TimeSeries) -> TimeSeries {
    let mut year = None;
    let mut running = 0.0;
    let mut broken = false;

    TimeSeries::from_points(series.points().iter().map(|&(date, value)| {
        if year != Some(date.year()) {
            year = Some(date.year());
            running = 0.0;
            broken = false;
        }
        if value < 0.0 || !value.is_finite() {
            broken = true;
        }
        if broken {
            (date, MISSING_SENTINEL)
        } else {
            running += value;
            (date, running)
        }
    }))
}

/// Last calendar day of the period containing `date`.
pub fn period_end(date: NaiveDate, frequency: Frequency) -> NaiveDate {
    let last_month = match frequency {
        Frequency::Daily => return date,
        Frequency::Monthly => date.month(),
        Frequency::Quarterly => ((date.month() - 1) / 3 + 1) * 3,
        Frequency::Annual => 12,
    };
    last_day_of_month(date.year(), last_month).unwrap_or(date)
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}
