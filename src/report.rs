/// Evaluation table and the plain data a presentation layer renders from it.
///
/// Nothing here draws anything: the table, skill bands, unit labels, and
/// attribute trend lines are handed to whatever front end consumes the run.

use std::io::Write;

use serde::Serialize;

use crate::model::{Attribute, EvalError, EvaluationRecord, Frequency, Site, SiteMetrics};
use crate::stations::Classification;

/// KGE values below this are drawn at the floor so one very poor site does
/// not stretch every color scale.
pub const DISPLAY_KGE_FLOOR: f64 = -1.0;

/// MAPE above this is shown as `> 1000`.
pub const DISPLAY_MAPE_CAP: f64 = 1000.0;

// ---------------------------------------------------------------------------
// Evaluation table
// ---------------------------------------------------------------------------

/// Per-site records, best KGE first, sentinel rows excluded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationTable {
    records: Vec<EvaluationRecord>,
}

/// Joins per-site metrics with site attributes, drops insufficient-data
/// sentinels, and sorts by KGE descending. Ties keep input order.
pub fn build_table(scored: &[(Site, SiteMetrics)], classification: Option<&Classification>) -> EvaluationTable {
    let mut records: Vec<EvaluationRecord> = scored
        .iter()
        .filter(|(_, metrics)| !metrics.is_insufficient())
        .map(|(site, metrics)| {
            let class = classification.and_then(|c| c.class_of(&site.observation_id));
            EvaluationRecord::new(site, *metrics, class)
        })
        .collect();
    records.sort_by(|a, b| b.kge.total_cmp(&a.kge));
    EvaluationTable { records }
}

impl EvaluationTable {
    pub fn records(&self) -> &[EvaluationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, observation_id: &str) -> Option<&EvaluationRecord> {
        self.records.iter().find(|r| r.observation_id == observation_id)
    }

    /// Copy of the table with KGE floored at [`DISPLAY_KGE_FLOOR`]. Row order
    /// is the order of the unclamped scores.
    pub fn display_copy(&self) -> EvaluationTable {
        EvaluationTable {
            records: self
                .records
                .iter()
                .map(|r| EvaluationRecord {
                    kge: clamp_kge_for_display(r.kge),
                    ..r.clone()
                })
                .collect(),
        }
    }

    /// Writes one flat CSV row per record.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), EvalError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for record in &self.records {
            csv_writer
                .serialize(TableRow::from(record))
                .map_err(|e| EvalError::Transport(format!("failed to write table row: {}", e)))?;
        }
        csv_writer
            .flush()
            .map_err(|e| EvalError::Transport(format!("failed to flush table: {}", e)))
    }

    pub fn to_json(&self) -> Result<String, EvalError> {
        serde_json::to_string_pretty(&self.records)
            .map_err(|e| EvalError::ParseError(format!("failed to serialise table: {}", e)))
    }
}

pub fn clamp_kge_for_display(kge: f64) -> f64 {
    kge.max(DISPLAY_KGE_FLOOR)
}

/// Flat CSV layout of an evaluation record, attribute columns named as in the
/// characteristics table.
#[derive(Debug, Serialize)]
struct TableRow<'a> {
    #[serde(rename = "NWIS_site_id")]
    observation_id: &'a str,
    #[serde(rename = "NWM_feature_id")]
    model_reach_id: u64,
    #[serde(rename = "Location")]
    location_name: &'a str,
    #[serde(rename = "RMSE")]
    rmse: f64,
    #[serde(rename = "MaxError")]
    max_error: f64,
    #[serde(rename = "MAPE")]
    mape: f64,
    #[serde(rename = "KGE")]
    kge: f64,
    size_class: Option<String>,
    #[serde(rename = "dec_lat_va")]
    latitude: f64,
    #[serde(rename = "dec_long_va")]
    longitude: f64,
    #[serde(rename = "Drainage_area_mi2")]
    drainage_area: Option<f64>,
    #[serde(rename = "Mean_Basin_Elev_ft")]
    basin_elevation: Option<f64>,
    #[serde(rename = "Perc_Forest")]
    pct_forest: Option<f64>,
    #[serde(rename = "Perc_Develop")]
    pct_developed: Option<f64>,
    #[serde(rename = "Perc_Imperv")]
    pct_impervious: Option<f64>,
    #[serde(rename = "Perc_Herbace")]
    pct_herbaceous: Option<f64>,
    #[serde(rename = "Perc_Slop_30")]
    pct_slope_30: Option<f64>,
    #[serde(rename = "Mean_Ann_Precip_in")]
    mean_annual_precip: Option<f64>,
    #[serde(rename = "Ann_low_cfs")]
    ann_low_flow: Option<f64>,
    #[serde(rename = "Ann_mean_cfs")]
    ann_mean_flow: Option<f64>,
    #[serde(rename = "Ann_hi_cfs")]
    ann_high_flow: Option<f64>,
}

impl<'a> From<&'a EvaluationRecord> for TableRow<'a> {
    fn from(r: &'a EvaluationRecord) -> Self {
        let a = &r.attributes;
        TableRow {
            observation_id: &r.observation_id,
            model_reach_id: r.model_reach_id,
            location_name: &r.location_name,
            rmse: r.rmse,
            max_error: r.max_error,
            mape: r.mape,
            kge: r.kge,
            size_class: r.size_class.map(|c| c.to_string()),
            latitude: r.latitude,
            longitude: r.longitude,
            drainage_area: a.drainage_area,
            basin_elevation: a.basin_elevation,
            pct_forest: a.pct_forest,
            pct_developed: a.pct_developed,
            pct_impervious: a.pct_impervious,
            pct_herbaceous: a.pct_herbaceous,
            pct_slope_30: a.pct_slope_30,
            mean_annual_precip: a.mean_annual_precip,
            ann_low_flow: a.ann_low_flow,
            ann_mean_flow: a.ann_mean_flow,
            ann_high_flow: a.ann_high_flow,
        }
    }
}

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

/// Map-marker band for a site's KGE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkillBand {
    Good,
    Fair,
    Poor,
    Failing,
}

impl SkillBand {
    pub fn from_kge(kge: f64) -> SkillBand {
        if kge > 0.30 {
            SkillBand::Good
        } else if kge > 0.0 {
            SkillBand::Fair
        } else if kge > -0.40 {
            SkillBand::Poor
        } else {
            SkillBand::Failing
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            SkillBand::Good => "green",
            SkillBand::Fair => "lightgreen",
            SkillBand::Poor => "orange",
            SkillBand::Failing => "red",
        }
    }
}

/// Flow unit of a series resampled to `frequency`.
pub fn units_label(frequency: Frequency) -> &'static str {
    match frequency {
        Frequency::Daily => "cfs",
        _ => "Acre-Feet",
    }
}

/// Whole-percent MAPE for labels, capped text above 1000 %.
pub fn display_mape(mape: f64) -> String {
    if mape > DISPLAY_MAPE_CAP {
        format!("> {}", DISPLAY_MAPE_CAP as u32)
    } else {
        format!("{}", mape.round_ties_even() as i64)
    }
}

// ---------------------------------------------------------------------------
// Attribute trends
// ---------------------------------------------------------------------------

/// Least-squares line `attribute = slope * kge + intercept` across a table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributeTrend {
    pub attribute: Attribute,
    pub slope: f64,
    pub intercept: f64,
    /// Sites with a value for the attribute.
    pub points: usize,
}

/// One trend per attribute against display-clamped KGE, skipping sites that
/// lack the attribute. Attributes with fewer than two sites, or whose sites
/// all share one KGE, have no trend.
pub fn attribute_trends(table: &EvaluationTable) -> Vec<AttributeTrend> {
    let display = table.display_copy();
    Attribute::ALL
        .into_iter()
        .filter_map(|attribute| {
            let points: Vec<(f64, f64)> = display
                .records()
                .iter()
                .filter_map(|r| r.attributes.get(attribute).map(|y| (r.kge, y)))
                .filter(|(_, y)| y.is_finite())
                .collect();
            linear_fit(&points).map(|(slope, intercept)| AttributeTrend {
                attribute,
                slope,
                intercept,
                points: points.len(),
            })
        })
        .collect()
}

fn linear_fit(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    if sxx == 0.0 {
        return None;
    }
    let sxy: f64 = points.iter().map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
    let slope = sxy / sxx;
    Some((slope, mean_y - slope * mean_x))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
