/// USGS station to model reach crosswalk.
///
/// The crosswalk CSV lists `usgs_site_code,nwm_feature_id` pairs. A feature id
/// of 0 (or a blank cell) means the gauge has no modeled reach.

use std::collections::HashMap;

use crate::ingest::store::ObjectStore;
use crate::model::EvalError;
use crate::stations::normalize_station_id;

/// Maps a gauge to the model reach it is compared against.
pub trait ReachCrosswalk {
    /// `Ok(None)` when the station is known to have no reach or is absent.
    fn reach_for(&self, station_id: &str) -> Result<Option<u64>, EvalError>;
}

#[derive(Debug, Clone, Default)]
pub struct CrosswalkTable {
    reaches: HashMap<String, u64>,
}

impl CrosswalkTable {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: AsRef<str>,
    {
        let mut reaches = HashMap::new();
        for (station, reach) in pairs {
            if reach != 0 {
                reaches.entry(normalize_station_id(station.as_ref())).or_insert(reach);
            }
        }
        Self { reaches }
    }

    pub fn parse(body: &str) -> Result<Self, EvalError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(body.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| EvalError::ParseError(format!("unreadable crosswalk header: {}", e)))?
            .clone();
        let find = |names: &[&str]| {
            headers
                .iter()
                .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
        };
        let site_idx = find(&["usgs_site_code", "site_no", "gage"])
            .ok_or_else(|| EvalError::ParseError("crosswalk has no station column".into()))?;
        let reach_idx = find(&["nwm_feature_id", "feature_id", "comid"])
            .ok_or_else(|| EvalError::ParseError("crosswalk has no reach column".into()))?;

        let mut pairs = Vec::new();
        for (line, row) in reader.records().enumerate() {
            let row = row.map_err(|e| EvalError::ParseError(format!("crosswalk row {}: {}", line + 1, e)))?;
            let station = row.get(site_idx).unwrap_or("");
            let raw_reach = row.get(reach_idx).unwrap_or("");
            if station.is_empty() || raw_reach.is_empty() {
                continue;
            }
            let reach = parse_reach(raw_reach).ok_or_else(|| {
                EvalError::ParseError(format!("crosswalk row {}: bad feature id '{}'", line + 1, raw_reach))
            })?;
            pairs.push((station.to_string(), reach));
        }

        Ok(Self::from_pairs(pairs))
    }

    pub fn load(store: &impl ObjectStore, key: &str) -> Result<Self, EvalError> {
        Self::parse(&store.get(key)?)
    }

    pub fn len(&self) -> usize {
        self.reaches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reaches.is_empty()
    }
}

impl ReachCrosswalk for CrosswalkTable {
    fn reach_for(&self, station_id: &str) -> Result<Option<u64>, EvalError> {
        Ok(self.reaches.get(&normalize_station_id(station_id)).copied())
    }
}

// pandas writes integer columns holding NaN as floats: "18524227.0"
fn parse_reach(raw: &str) -> Option<u64> {
    raw.parse::<u64>()
        .ok()
        .or_else(|| raw.strip_suffix(".0").and_then(|r| r.parse::<u64>().ok()))
}
