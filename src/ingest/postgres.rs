/// Observed discharge from the flood-monitor Postgres database.
///
/// For deployments where gauge readings are already curated in
/// `usgs_raw.gauge_readings`, daily means of discharge (parameter 00060) are
/// read directly instead of from the public bucket. Only observations live
/// there; model series always come from the object store.

use std::sync::Mutex;

use chrono::{NaiveDate, NaiveTime};
use postgres::{Client, NoTls};

use crate::ingest::fetch::SeriesSource;
use crate::model::{EvalError, PARAM_DISCHARGE, SeriesKind, Site};

const DAILY_MEAN_QUERY: &str = "
    SELECT (reading_time AT TIME ZONE 'UTC')::date AS day,
           AVG(value)::DOUBLE PRECISION AS mean_flow
    FROM usgs_raw.gauge_readings
    WHERE site_code = $1
      AND parameter_code = $2
      AND reading_time >= $3
      AND reading_time < $4
    GROUP BY day
    ORDER BY day
";

pub struct PostgresObservedSource {
    client: Mutex<Client>,
}

impl PostgresObservedSource {
    pub fn connect(database_url: &str) -> Result<Self, EvalError> {
        let client = Client::connect(database_url, NoTls)
            .map_err(|e| EvalError::Database(format!("connection failed: {}", e)))?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client: Mutex::new(client),
        }
    }

    /// Daily mean discharge for one gauge over `[start, end]`.
    pub fn daily_means(
        &self,
        site_code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>, EvalError> {
        let (from, until) = query_bounds(start, end);
        let mut client = self
            .client
            .lock()
            .map_err(|_| EvalError::Database("connection lock poisoned".into()))?;

        let rows = client
            .query(DAILY_MEAN_QUERY, &[&site_code, &PARAM_DISCHARGE, &from, &until])
            .map_err(|e| EvalError::Database(e.to_string()))?;

        let mut readings = Vec::with_capacity(rows.len());
        for row in rows {
            let day: NaiveDate = row.try_get(0).map_err(|e| EvalError::Database(e.to_string()))?;
            let mean: Option<f64> = row.try_get(1).map_err(|e| EvalError::Database(e.to_string()))?;
            readings.push((day, mean.unwrap_or(crate::model::MISSING_SENTINEL)));
        }
        Ok(readings)
    }
}

impl SeriesSource for PostgresObservedSource {
    fn rows(
        &self,
        site: &Site,
        kind: SeriesKind,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>, EvalError> {
        match kind {
            SeriesKind::Observed => self.daily_means(&site.observation_id, start, end),
            SeriesKind::Modeled => Err(EvalError::NotFound(format!(
                "model series for reach {} are not stored in the database",
                site.model_reach_id
            ))),
        }
    }
}

/// Half-open UTC timestamp range covering whole days `start..=end`.
fn query_bounds(start: NaiveDate, end: NaiveDate) -> (chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>) {
    let from = start.and_time(NaiveTime::MIN).and_utc();
    let until = end
        .succ_opt()
        .unwrap_or(end)
        .and_time(NaiveTime::MIN)
        .and_utc();
    (from, until)
}
