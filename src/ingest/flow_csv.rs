/// Parsing of per-site flow CSV blobs.
///
/// Observed blobs carry a `Datetime` column and a `USGS_flow` column among
/// other site metadata; modeled blobs carry a pandas index column
/// (`Unnamed: 0` or blank), `Datetime`, and a single flow column whose name
/// varies by model version. Both store one row per day.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::model::{EvalError, MISSING_SENTINEL};

const DATE_COLUMNS: [&str; 4] = ["Datetime", "value_time", "time", "date"];

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Parses a flow CSV into `(date, flow)` rows in file order.
///
/// `flow_column` names the discharge column; when `None` the first column that
/// is neither the timestamp nor an index column is used. Blank and `NaN` flow
/// cells become [`MISSING_SENTINEL`].
pub fn parse_flow_csv(body: &str, flow_column: Option<&str>) -> Result<Vec<(NaiveDate, f64)>, EvalError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| EvalError::ParseError(format!("unreadable CSV header: {}", e)))?
        .clone();

    let date_idx = DATE_COLUMNS
        .iter()
        .find_map(|name| headers.iter().position(|h| h.eq_ignore_ascii_case(name)))
        .unwrap_or(0);

    let flow_idx = match flow_column {
        Some(name) => headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| EvalError::ParseError(format!("missing flow column '{}'", name)))?,
        None => headers
            .iter()
            .enumerate()
            .position(|(i, h)| i != date_idx && !is_index_column(h))
            .ok_or_else(|| EvalError::ParseError("no flow column in CSV header".to_string()))?,
    };

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| EvalError::ParseError(format!("row {}: {}", line + 1, e)))?;
        let raw_date = record.get(date_idx).unwrap_or("");
        if raw_date.is_empty() {
            continue;
        }
        let date = parse_date(raw_date)
            .ok_or_else(|| EvalError::ParseError(format!("row {}: bad date '{}'", line + 1, raw_date)))?;
        let flow = parse_flow(record.get(flow_idx).unwrap_or(""))
            .ok_or_else(|| EvalError::ParseError(format!("row {}: bad flow value", line + 1)))?;
        rows.push((date, flow));
    }

    if rows.is_empty() {
        return Err(EvalError::ParseError("no data rows".to_string()));
    }
    Ok(rows)
}

fn is_index_column(header: &str) -> bool {
    header.is_empty() || header.starts_with("Unnamed")
}

/// Accepts plain dates, naive date-times, and RFC 3339 timestamps. Only the
/// calendar date is kept.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.date());
        }
    }
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive())
}

fn parse_flow(raw: &str) -> Option<f64> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") || raw.eq_ignore_ascii_case("null") {
        return Some(MISSING_SENTINEL);
    }
    let value: f64 = raw.parse().ok()?;
    Some(if value.is_finite() { value } else { MISSING_SENTINEL })
}
