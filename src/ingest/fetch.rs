/// Series fetching for the active comparison set.
///
/// A `SeriesSource` hands back raw dated rows for one side of a site's
/// comparison; the `SeriesFetcher` turns them into windowed `TimeSeries`
/// and sweeps failed sites out of the active set.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::ingest::flow_csv::parse_flow_csv;
use crate::ingest::store::{ObjectStore, modeled_key, observed_key};
use crate::logging::{self, DataSource};
use crate::model::{EvalError, MISSING_SENTINEL, SeriesKind, Site, SiteFailure, TimeSeries};

// ============================================================================
// Sources
// ============================================================================

/// Raw dated discharge rows for one side of a site's comparison.
///
/// Rows may be unordered, repeated, or sub-daily; the window is a hint that
/// sources able to filter server-side may use.
pub trait SeriesSource {
    fn rows(
        &self,
        site: &Site,
        kind: SeriesKind,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>, EvalError>;
}

/// Reads both sides from per-site CSV blobs in an object store.
pub struct StoreSeriesSource<S> {
    store: S,
    model: String,
    observed_flow_column: String,
}

impl<S: ObjectStore> StoreSeriesSource<S> {
    pub fn new(store: S, model: &str, observed_flow_column: &str) -> Self {
        Self {
            store,
            model: model.to_string(),
            observed_flow_column: observed_flow_column.to_string(),
        }
    }
}

impl<S: ObjectStore> SeriesSource for StoreSeriesSource<S> {
    fn rows(
        &self,
        site: &Site,
        kind: SeriesKind,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>, EvalError> {
        match kind {
            SeriesKind::Observed => {
                let body = self.store.get(&observed_key(&site.region_code, &site.observation_id))?;
                parse_flow_csv(&body, Some(&self.observed_flow_column))
            }
            SeriesKind::Modeled => {
                let key = modeled_key(&self.model, &site.region_code, site.model_reach_id);
                let body = self.store.get(&key)?;
                parse_flow_csv(&body, None)
            }
        }
    }
}

// ============================================================================
// Fetcher
// ============================================================================

/// Both series for one site that survived fetching.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteSeries {
    pub site: Site,
    pub observed: TimeSeries,
    pub modeled: TimeSeries,
}

/// Result of sweeping the active set: survivors in input order plus the
/// sites that were dropped.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub fetched: Vec<SiteSeries>,
    pub failures: Vec<SiteFailure>,
}

pub struct SeriesFetcher<'a> {
    observed: &'a dyn SeriesSource,
    modeled: &'a dyn SeriesSource,
    /// Multiplier bringing modeled values to cfs.
    model_factor: f64,
}

impl<'a> SeriesFetcher<'a> {
    pub fn new(observed: &'a dyn SeriesSource, modeled: &'a dyn SeriesSource) -> Self {
        Self {
            observed,
            modeled,
            model_factor: 1.0,
        }
    }

    /// One source serving both sides.
    pub fn single(source: &'a dyn SeriesSource) -> Self {
        Self::new(source, source)
    }

    pub fn with_model_factor(mut self, factor: f64) -> Self {
        self.model_factor = factor;
        self
    }

    /// Daily observed discharge within `[start, end]`. Repeated dates keep
    /// their first row.
    pub fn fetch_observed(&self, site: &Site, start: NaiveDate, end: NaiveDate) -> Result<TimeSeries, EvalError> {
        let rows = self
            .observed
            .rows(site, SeriesKind::Observed, start, end)
            .map_err(|e| EvalError::unavailable(&site.observation_id, SeriesKind::Observed, &e))?;
        Ok(TimeSeries::from_points(rows).window(start, end))
    }

    /// Modeled discharge within `[start, end]`, in cfs. Sub-daily rows are
    /// averaged into one value per day.
    pub fn fetch_modeled(&self, site: &Site, start: NaiveDate, end: NaiveDate) -> Result<TimeSeries, EvalError> {
        let rows = self
            .modeled
            .rows(site, SeriesKind::Modeled, start, end)
            .map_err(|e| EvalError::unavailable(&site.observation_id, SeriesKind::Modeled, &e))?;
        Ok(daily_mean(rows).window(start, end).scaled(self.model_factor))
    }

    /// Fetches both series for every site. A failure on either side drops
    /// the site for this run; survivors keep input order.
    pub fn fetch_all(&self, sites: Vec<Site>, start: NaiveDate, end: NaiveDate) -> FetchOutcome {
        let total = sites.len();

        let results: Vec<(Site, Result<(TimeSeries, TimeSeries), EvalError>)> = sites
            .into_iter()
            .map(|site| {
                let result = self
                    .fetch_observed(&site, start, end)
                    .and_then(|obs| self.fetch_modeled(&site, start, end).map(|model| (obs, model)));
                (site, result)
            })
            .collect();

        // partition in one pass after every fetch has finished
        let mut outcome = FetchOutcome::default();
        for (site, result) in results {
            match result {
                Ok((observed, modeled)) => {
                    logging::debug(
                        DataSource::Observed,
                        Some(&site.observation_id),
                        &format!("{} observed / {} modeled days", observed.len(), modeled.len()),
                    );
                    outcome.fetched.push(SiteSeries { site, observed, modeled });
                }
                Err(error) => {
                    let source = match &error {
                        EvalError::SourceUnavailable { kind: SeriesKind::Modeled, .. } => DataSource::Model,
                        _ => DataSource::Observed,
                    };
                    logging::log_site_failure(source, &site.observation_id, "Series fetch", &error);
                    outcome.failures.push(SiteFailure {
                        observation_id: site.observation_id,
                        error,
                    });
                }
            }
        }

        logging::log_run_summary(DataSource::System, "Series fetch", total, outcome.fetched.len(), outcome.failures.len());
        outcome
    }
}

/// Collapses rows to one value per date: the mean of the non-missing values,
/// or the missing sentinel when a date has none.
fn daily_mean(rows: Vec<(NaiveDate, f64)>) -> TimeSeries {
    let mut days: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for (date, value) in rows {
        let entry = days.entry(date).or_insert((0.0, 0));
        if value >= 0.0 {
            entry.0 += value;
            entry.1 += 1;
        }
    }
    TimeSeries::from_points(days.into_iter().map(|(date, (sum, count))| {
        let value = if count == 0 { MISSING_SENTINEL } else { sum / count as f64 };
        (date, value)
    }))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::store::InMemoryStore;
    use crate::model::SiteAttributes;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn site(id: &str, reach: u64) -> Site {
        Site {
            observation_id: id.to_string(),
            name: format!("Gauge {}", id),
            latitude: 32.0,
            longitude: -86.0,
            model_reach_id: reach,
            region_code: "al".to_string(),
            attributes: SiteAttributes::default(),
        }
    }

    fn store() -> InMemoryStore {
        InMemoryStore::new()
            .with(
                observed_key("al", "02339495"),
                "Datetime,USGS_flow\n2019-01-02,20\n2019-01-01,10\n2019-01-02,99\n2019-01-03,30\n2019-02-01,5\n",
            )
            .with(
                modeled_key("NWM_v2.1", "al", 111),
                "Unnamed: 0,Datetime,NWM_flow\n0,2019-01-01 00:00:00,1\n1,2019-01-01 12:00:00,3\n2,2019-01-02,4\n",
            )
            .with(observed_key("al", "02342500"), "Datetime,USGS_flow\n2019-01-01,7\n")
    }

    #[test]
    fn test_fetch_observed_dedupes_first_and_windows() {
        let source = StoreSeriesSource::new(store(), "NWM_v2.1", "USGS_flow");
        let fetcher = SeriesFetcher::single(&source);
        let series = fetcher
            .fetch_observed(&site("02339495", 111), d(2019, 1, 1), d(2019, 1, 31))
            .expect("observed series should load");
        assert_eq!(series.values().collect::<Vec<_>>(), vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_fetch_modeled_averages_sub_daily_rows() {
        let source = StoreSeriesSource::new(store(), "NWM_v2.1", "USGS_flow");
        let fetcher = SeriesFetcher::single(&source);
        let series = fetcher
            .fetch_modeled(&site("02339495", 111), d(2019, 1, 1), d(2019, 1, 31))
            .unwrap();
        assert_eq!(series.value_at(d(2019, 1, 1)), Some(2.0));
        assert_eq!(series.value_at(d(2019, 1, 2)), Some(4.0));
    }

    #[test]
    fn test_model_factor_converts_units() {
        let source = StoreSeriesSource::new(store(), "NWM_v2.1", "USGS_flow");
        let fetcher = SeriesFetcher::single(&source).with_model_factor(10.0);
        let series = fetcher
            .fetch_modeled(&site("02339495", 111), d(2019, 1, 2), d(2019, 1, 2))
            .unwrap();
        assert_eq!(series.values().collect::<Vec<_>>(), vec![40.0]);
    }

    #[test]
    fn test_missing_blob_is_source_unavailable() {
        let source = StoreSeriesSource::new(store(), "NWM_v2.1", "USGS_flow");
        let fetcher = SeriesFetcher::single(&source);
        let err = fetcher
            .fetch_modeled(&site("02342500", 222), d(2019, 1, 1), d(2019, 1, 31))
            .unwrap_err();
        assert!(matches!(err, EvalError::SourceUnavailable { kind: SeriesKind::Modeled, .. }));
    }

    #[test]
    fn test_fetch_all_drops_failed_sites_and_keeps_order() {
        let source = StoreSeriesSource::new(store(), "NWM_v2.1", "USGS_flow");
        let fetcher = SeriesFetcher::single(&source);
        let sites = vec![site("02342500", 222), site("02339495", 111), site("09999999", 333)];

        let outcome = fetcher.fetch_all(sites.clone(), d(2019, 1, 1), d(2019, 1, 31));
        assert_eq!(outcome.fetched.len(), 1);
        assert_eq!(outcome.fetched[0].site.observation_id, "02339495");
        let failed: Vec<&str> = outcome.failures.iter().map(|f| f.observation_id.as_str()).collect();
        assert_eq!(failed, vec!["02342500", "09999999"]);

        let again = fetcher.fetch_all(sites, d(2019, 1, 1), d(2019, 1, 31));
        assert_eq!(again.fetched, outcome.fetched, "identical inputs must give identical survivors");
    }

    #[test]
    fn test_daily_mean_marks_all_missing_days() {
        let series = daily_mean(vec![(d(2019, 1, 1), -100.0), (d(2019, 1, 1), -100.0), (d(2019, 1, 2), 6.0)]);
        assert_eq!(series.value_at(d(2019, 1, 1)), Some(MISSING_SENTINEL));
        assert_eq!(series.value_at(d(2019, 1, 2)), Some(6.0));
    }
}
