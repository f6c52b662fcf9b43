/// Statewide watershed characteristics table.
///
/// One row per gauge with location, state, basin characteristics (drainage
/// area, elevation, land cover, precipitation) and long-term annual flow
/// statistics. The table's station ids lost their leading zeros somewhere
/// upstream, so every id is re-padded on load.

use std::collections::HashMap;

use crate::ingest::store::ObjectStore;
use crate::model::{Attribute, EvalError, SiteAttributes};
use crate::stations::normalize_station_id;

const COL_SITE_ID: &str = "NWIS_site_id";
const COL_SITE_NAME: &str = "NWIS_sitename";
const COL_LATITUDE: &str = "dec_lat_va";
const COL_LONGITUDE: &str = "dec_long_va";
const COL_STATE: &str = "state_id";

// ============================================================================
// Records
// ============================================================================

/// Characteristics of one gauged watershed.
#[derive(Debug, Clone, PartialEq)]
pub struct WatershedRecord {
    pub station_id: String,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Lower-case state code, e.g. "al".
    pub region_code: Option<String>,
    /// Numeric attributes keyed by table column name.
    values: HashMap<String, f64>,
}

impl WatershedRecord {
    pub fn new(station_id: &str, name: &str) -> Self {
        Self {
            station_id: normalize_station_id(station_id),
            name: name.to_string(),
            latitude: None,
            longitude: None,
            region_code: None,
            values: HashMap::new(),
        }
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64, region_code: &str) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self.region_code = Some(region_code.to_ascii_lowercase());
        self
    }

    pub fn with_value(mut self, attribute: Attribute, value: f64) -> Self {
        self.values.insert(attribute.column_name().to_string(), value);
        self
    }

    /// Looks up an attribute by column name or characteristic code
    /// (`DRNAREA`, `ELEV`, ...). Unknown keys and missing values are `None`.
    pub fn lookup_attribute(&self, key: &str) -> Option<f64> {
        if let Some(value) = self.values.get(key) {
            return Some(*value);
        }
        key.parse::<Attribute>().ok().and_then(|a| self.attribute(a))
    }

    pub fn attribute(&self, attribute: Attribute) -> Option<f64> {
        self.values.get(attribute.column_name()).copied()
    }

    pub fn site_attributes(&self) -> SiteAttributes {
        SiteAttributes::from_lookup(|a| self.attribute(a))
    }
}

// ============================================================================
// Characteristics source
// ============================================================================

/// Anything that can describe a station's watershed.
///
/// Remote services signal throttling with `EvalError::RateLimited`; callers
/// wrap lookups in `stations::with_cooldown_retry`.
pub trait CharacteristicsSource {
    fn lookup(&self, station_id: &str) -> Result<Option<WatershedRecord>, EvalError>;
}

/// The characteristics table, indexed by zero-padded station id.
#[derive(Debug, Clone, Default)]
pub struct StreamStatsTable {
    records: Vec<WatershedRecord>,
    index: HashMap<String, usize>,
}

impl StreamStatsTable {
    pub fn from_records(records: impl IntoIterator<Item = WatershedRecord>) -> Self {
        let mut table = StreamStatsTable::default();
        for record in records {
            // first row wins for duplicated stations
            if table.index.contains_key(&record.station_id) {
                continue;
            }
            table.index.insert(record.station_id.clone(), table.records.len());
            table.records.push(record);
        }
        table
    }

    /// Parses the table CSV. Rows without a latitude are dropped.
    pub fn parse(body: &str) -> Result<Self, EvalError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(body.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| EvalError::ParseError(format!("unreadable characteristics header: {}", e)))?
            .clone();
        let column = |name: &str| headers.iter().position(|h| h == name);

        let site_idx = column(COL_SITE_ID)
            .ok_or_else(|| EvalError::ParseError(format!("characteristics table has no {} column", COL_SITE_ID)))?;
        let name_idx = column(COL_SITE_NAME);
        let lat_idx = column(COL_LATITUDE);
        let lon_idx = column(COL_LONGITUDE);
        let state_idx = column(COL_STATE);
        let attribute_idx: Vec<(Attribute, usize)> = Attribute::ALL
            .into_iter()
            .filter_map(|a| column(a.column_name()).map(|i| (a, i)))
            .collect();

        let mut records = Vec::new();
        for (line, row) in reader.records().enumerate() {
            let row = row.map_err(|e| EvalError::ParseError(format!("characteristics row {}: {}", line + 1, e)))?;
            let cell = |idx: Option<usize>| idx.and_then(|i| row.get(i)).unwrap_or("");

            let raw_id = cell(Some(site_idx));
            if raw_id.is_empty() {
                continue;
            }
            let Some(latitude) = parse_number(cell(lat_idx)) else {
                continue;
            };

            let mut record = WatershedRecord::new(raw_id, cell(name_idx));
            record.latitude = Some(latitude);
            record.longitude = parse_number(cell(lon_idx));
            let state = cell(state_idx);
            if !state.is_empty() {
                record.region_code = Some(state.to_ascii_lowercase());
            }
            for (attribute, idx) in &attribute_idx {
                if let Some(value) = parse_number(cell(Some(*idx))) {
                    record.values.insert(attribute.column_name().to_string(), value);
                }
            }
            records.push(record);
        }

        Ok(Self::from_records(records))
    }

    pub fn load(store: &impl ObjectStore, key: &str) -> Result<Self, EvalError> {
        Self::parse(&store.get(key)?)
    }

    /// Station ids in a state, in table order.
    pub fn stations_in_region(&self, region: &str) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| r.region_code.as_deref().is_some_and(|code| code.eq_ignore_ascii_case(region)))
            .map(|r| r.station_id.clone())
            .collect()
    }

    pub fn get(&self, station_id: &str) -> Option<&WatershedRecord> {
        self.index
            .get(&normalize_station_id(station_id))
            .map(|&i| &self.records[i])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl CharacteristicsSource for StreamStatsTable {
    fn lookup(&self, station_id: &str) -> Result<Option<WatershedRecord>, EvalError> {
        Ok(self.get(station_id).cloned())
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
Unnamed: 0,NWIS_site_id,NWIS_sitename,dec_lat_va,dec_long_va,state_id,Drainage_area_mi2,Mean_Basin_Elev_ft,Perc_Forest,Perc_Imperv,Mean_Ann_Precip_in,Ann_low_cfs,Ann_mean_cfs,Ann_hi_cfs
0,2339495,MOORES CREEK NEAR LANETT AL,32.87,-85.22,AL,21.1,690,61.2,1.4,53.1,7.5,30.0,62.0
1,2339495,DUPLICATE ROW,0,0,AL,999,999,999,999,999,999,999,999
2,10126000,BEAR RIVER NEAR CORINNE UT,41.57,-112.1,UT,7040,6200,22.0,0.3,17.2,300,1600,4100
3,2342500,NO LOCATION,,,AL,5,5,5,5,5,5,5,5
4,2361000,CHOCTAWHATCHEE RIVER NEAR NEWTON AL,31.34,-85.61,AL,686,,45.0,,55.0,,,
";

    #[test]
    fn test_parse_pads_ids_and_keeps_first_duplicate() {
        let table = StreamStatsTable::parse(TABLE).expect("table should parse");
        let record = table.get("02339495").expect("padded id should be indexed");
        assert_eq!(record.name, "MOORES CREEK NEAR LANETT AL");
        assert_eq!(record.attribute(Attribute::DrainageArea), Some(21.1));
    }

    #[test]
    fn test_rows_without_latitude_are_dropped() {
        let table = StreamStatsTable::parse(TABLE).unwrap();
        assert!(table.get("02342500").is_none());
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_stations_in_region_filters_by_state() {
        let table = StreamStatsTable::parse(TABLE).unwrap();
        assert_eq!(table.stations_in_region("al"), vec!["02339495", "02361000"]);
        assert_eq!(table.stations_in_region("UT"), vec!["10126000"]);
    }

    #[test]
    fn test_lookup_attribute_accepts_codes_and_column_names() {
        let table = StreamStatsTable::parse(TABLE).unwrap();
        let record = table.get("10126000").unwrap();
        assert_eq!(record.lookup_attribute("DRNAREA"), Some(7040.0));
        assert_eq!(record.lookup_attribute("Drainage_area_mi2"), Some(7040.0));
        assert_eq!(record.lookup_attribute("Ann_hi_cfs"), Some(4100.0));
        assert_eq!(record.lookup_attribute("LC11DEV"), None, "column absent from table");
        assert_eq!(record.lookup_attribute("NOT_A_KEY"), None);
    }

    #[test]
    fn test_blank_cells_are_missing_attributes() {
        let table = StreamStatsTable::parse(TABLE).unwrap();
        let attrs = table.get("02361000").unwrap().site_attributes();
        assert_eq!(attrs.drainage_area, Some(686.0));
        assert_eq!(attrs.basin_elevation, None);
        assert_eq!(attrs.ann_mean_flow, None);
    }

    #[test]
    fn test_table_without_site_column_is_rejected() {
        assert!(StreamStatsTable::parse("id,name\n1,x\n").is_err());
    }
}
