/// Core data types for the streamflow evaluation engine.
///
/// This module defines the shared domain model imported by all other modules:
/// sites and their watershed attributes, dated flow series, aligned
/// observed/modeled pairs, per-site evaluation records, and the error
/// taxonomy. It contains no I/O.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// USGS parameter code for discharge (streamflow), in cubic feet per second.
pub const PARAM_DISCHARGE: &str = "00060";

/// USGS station ids are 8-digit, left-zero-padded numeric strings.
pub const STATION_ID_WIDTH: usize = 8;

/// Placeholder written for days with no reported flow. Any negative value is
/// treated as missing by the cleaning pass.
pub const MISSING_SENTINEL: f64 = -100.0;

/// One cubic foot per second sustained for a day, in acre-feet.
pub const CFS_DAY_TO_ACRE_FEET: f64 = 1.983;

/// Cubic feet per second in one cubic meter per second.
pub const CMS_TO_CFS: f64 = 35.314666212661;

// ---------------------------------------------------------------------------
// Watershed attributes
// ---------------------------------------------------------------------------

/// Static watershed attribute that sites can be classified or compared by.
///
/// Column names follow the statewide characteristics table; characteristic
/// codes are the ones the remote statistics service reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attribute {
    DrainageArea,
    BasinElevation,
    PctForest,
    PctDeveloped,
    PctImpervious,
    PctHerbaceous,
    PctSlope30,
    MeanAnnualPrecip,
    AnnLowFlow,
    AnnMeanFlow,
    AnnHighFlow,
}

impl Attribute {
    pub const ALL: [Attribute; 11] = [
        Attribute::DrainageArea,
        Attribute::BasinElevation,
        Attribute::PctForest,
        Attribute::PctDeveloped,
        Attribute::PctImpervious,
        Attribute::PctHerbaceous,
        Attribute::PctSlope30,
        Attribute::MeanAnnualPrecip,
        Attribute::AnnLowFlow,
        Attribute::AnnMeanFlow,
        Attribute::AnnHighFlow,
    ];

    /// Column name in the characteristics table.
    pub fn column_name(self) -> &'static str {
        match self {
            Attribute::DrainageArea => "Drainage_area_mi2",
            Attribute::BasinElevation => "Mean_Basin_Elev_ft",
            Attribute::PctForest => "Perc_Forest",
            Attribute::PctDeveloped => "Perc_Develop",
            Attribute::PctImpervious => "Perc_Imperv",
            Attribute::PctHerbaceous => "Perc_Herbace",
            Attribute::PctSlope30 => "Perc_Slop_30",
            Attribute::MeanAnnualPrecip => "Mean_Ann_Precip_in",
            Attribute::AnnLowFlow => "Ann_low_cfs",
            Attribute::AnnMeanFlow => "Ann_mean_cfs",
            Attribute::AnnHighFlow => "Ann_hi_cfs",
        }
    }

    /// Characteristic code used by the watershed statistics service.
    /// Annual flow statistics come from gauge records, not the service.
    pub fn characteristic_code(self) -> Option<&'static str> {
        match self {
            Attribute::DrainageArea => Some("DRNAREA"),
            Attribute::BasinElevation => Some("ELEV"),
            Attribute::PctForest => Some("FOREST"),
            Attribute::PctDeveloped => Some("LC11DEV"),
            Attribute::PctImpervious => Some("LC11IMP"),
            Attribute::PctHerbaceous => Some("LU92HRBN"),
            Attribute::PctSlope30 => Some("SLOP30_10M"),
            Attribute::MeanAnnualPrecip => Some("PRECIP"),
            Attribute::AnnLowFlow | Attribute::AnnMeanFlow | Attribute::AnnHighFlow => None,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column_name())
    }
}

impl FromStr for Attribute {
    type Err = EvalError;

    /// Accepts either the column name or the characteristic code, ignoring case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Attribute::ALL
            .into_iter()
            .find(|a| {
                a.column_name().eq_ignore_ascii_case(wanted)
                    || a.characteristic_code()
                        .is_some_and(|code| code.eq_ignore_ascii_case(wanted))
            })
            .ok_or_else(|| EvalError::Config(format!("unknown watershed attribute '{}'", s)))
    }
}

/// Watershed attributes for one site. Any value the characteristics source
/// could not provide is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteAttributes {
    pub drainage_area: Option<f64>,
    pub basin_elevation: Option<f64>,
    pub pct_forest: Option<f64>,
    pub pct_developed: Option<f64>,
    pub pct_impervious: Option<f64>,
    pub pct_herbaceous: Option<f64>,
    pub pct_slope_30: Option<f64>,
    pub mean_annual_precip: Option<f64>,
    pub ann_low_flow: Option<f64>,
    pub ann_mean_flow: Option<f64>,
    pub ann_high_flow: Option<f64>,
}

impl SiteAttributes {
    pub fn get(&self, attribute: Attribute) -> Option<f64> {
        match attribute {
            Attribute::DrainageArea => self.drainage_area,
            Attribute::BasinElevation => self.basin_elevation,
            Attribute::PctForest => self.pct_forest,
            Attribute::PctDeveloped => self.pct_developed,
            Attribute::PctImpervious => self.pct_impervious,
            Attribute::PctHerbaceous => self.pct_herbaceous,
            Attribute::PctSlope30 => self.pct_slope_30,
            Attribute::MeanAnnualPrecip => self.mean_annual_precip,
            Attribute::AnnLowFlow => self.ann_low_flow,
            Attribute::AnnMeanFlow => self.ann_mean_flow,
            Attribute::AnnHighFlow => self.ann_high_flow,
        }
    }

    /// Builds the attribute set from any keyed lookup, one call per attribute.
    pub fn from_lookup(mut lookup: impl FnMut(Attribute) -> Option<f64>) -> Self {
        SiteAttributes {
            drainage_area: lookup(Attribute::DrainageArea),
            basin_elevation: lookup(Attribute::BasinElevation),
            pct_forest: lookup(Attribute::PctForest),
            pct_developed: lookup(Attribute::PctDeveloped),
            pct_impervious: lookup(Attribute::PctImpervious),
            pct_herbaceous: lookup(Attribute::PctHerbaceous),
            pct_slope_30: lookup(Attribute::PctSlope30),
            mean_annual_precip: lookup(Attribute::MeanAnnualPrecip),
            ann_low_flow: lookup(Attribute::AnnLowFlow),
            ann_mean_flow: lookup(Attribute::AnnMeanFlow),
            ann_high_flow: lookup(Attribute::AnnHighFlow),
        }
    }
}

// ---------------------------------------------------------------------------
// Site
// ---------------------------------------------------------------------------

/// A gauge station paired with the model reach it is compared against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// 8-digit, zero-padded USGS station id.
    pub observation_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Model reach (NHD feature) id from the crosswalk.
    pub model_reach_id: u64,
    /// Lower-case state partition used in object store keys, e.g. "al".
    pub region_code: String,
    pub attributes: SiteAttributes,
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

/// Which side of the comparison a series belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeriesKind {
    Observed,
    Modeled,
}

impl fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesKind::Observed => write!(f, "observed"),
            SeriesKind::Modeled => write!(f, "modeled"),
        }
    }
}

/// A dated flow series with unique, ascending timestamps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    points: Vec<(NaiveDate, f64)>,
}

impl TimeSeries {
    /// Builds a series from points in any order. When a date repeats, the
    /// first occurrence in input order wins.
    pub fn from_points(points: impl IntoIterator<Item = (NaiveDate, f64)>) -> Self {
        let mut points: Vec<(NaiveDate, f64)> = points.into_iter().collect();
        // stable: equal dates keep input order
        points.sort_by_key(|(date, _)| *date);
        points.dedup_by_key(|(date, _)| *date);
        TimeSeries { points }
    }

    /// Restricts to `[start, end]`, both inclusive.
    pub fn window(&self, start: NaiveDate, end: NaiveDate) -> TimeSeries {
        TimeSeries {
            points: self
                .points
                .iter()
                .copied()
                .filter(|(date, _)| *date >= start && *date <= end)
                .collect(),
        }
    }

    /// Multiplies every non-missing value by `factor`. Negative sentinels are
    /// left as they are so the cleaning pass still recognises them.
    pub fn scaled(&self, factor: f64) -> TimeSeries {
        TimeSeries {
            points: self
                .points
                .iter()
                .map(|&(date, value)| (date, if value < 0.0 { value } else { value * factor }))
                .collect(),
        }
    }

    pub fn points(&self) -> &[(NaiveDate, f64)] {
        &self.points
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.points.iter().map(|(date, _)| *date)
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|(_, value)| *value)
    }

    pub fn value_at(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |(d, _)| *d)
            .ok()
            .map(|i| self.points[i].1)
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|(date, _)| *date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|(date, _)| *date)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Temporal frequency an evaluation runs at. Codes follow the pandas-style
/// aliases the evaluation notebooks use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    #[serde(rename = "D")]
    Daily,
    #[serde(rename = "M")]
    Monthly,
    #[serde(rename = "Q")]
    Quarterly,
    #[serde(rename = "A")]
    Annual,
}

impl Frequency {
    pub fn code(self) -> &'static str {
        match self {
            Frequency::Daily => "D",
            Frequency::Monthly => "M",
            Frequency::Quarterly => "Q",
            Frequency::Annual => "A",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Frequency::Daily => "Daily",
            Frequency::Monthly => "Monthly",
            Frequency::Quarterly => "Quarterly",
            Frequency::Annual => "Annual",
        }
    }
}

impl FromStr for Frequency {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "D" | "DAILY" => Ok(Frequency::Daily),
            "M" | "MONTHLY" => Ok(Frequency::Monthly),
            "Q" | "QUARTERLY" => Ok(Frequency::Quarterly),
            "A" | "Y" | "ANNUAL" => Ok(Frequency::Annual),
            _ => Err(EvalError::Config(format!("unknown frequency '{}'", s))),
        }
    }
}

/// One date of an aligned comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PairedPoint {
    pub date: NaiveDate,
    pub observed: f64,
    pub modeled: f64,
}

/// Observed and modeled flow for one site on an identical date index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignedPair {
    pub observation_id: String,
    pub model_reach_id: u64,
    pub frequency: Frequency,
    pub points: Vec<PairedPoint>,
}

impl AlignedPair {
    pub fn observed(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.observed)
    }

    pub fn modeled(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.modeled)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Ordinal size class from natural-breaks clustering, smallest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SizeClass {
    VerySmall,
    Small,
    Medium,
    Large,
    VeryLarge,
}

impl SizeClass {
    pub const ALL: [SizeClass; 5] = [
        SizeClass::VerySmall,
        SizeClass::Small,
        SizeClass::Medium,
        SizeClass::Large,
        SizeClass::VeryLarge,
    ];

    /// Class for the `index`-th run of a five-way partition.
    pub fn from_index(index: usize) -> Option<SizeClass> {
        SizeClass::ALL.get(index).copied()
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeClass::VerySmall => write!(f, "very-small"),
            SizeClass::Small => write!(f, "small"),
            SizeClass::Medium => write!(f, "medium"),
            SizeClass::Large => write!(f, "large"),
            SizeClass::VeryLarge => write!(f, "very-large"),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Error and skill scores for one site or one pooled group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SiteMetrics {
    /// Root-mean-square error, rounded to whole flow units.
    pub rmse: f64,
    /// Largest absolute error, rounded to whole flow units.
    pub max_error: f64,
    /// Mean absolute percentage error, already in percent.
    pub mape: f64,
    /// Kling-Gupta Efficiency.
    pub kge: f64,
}

impl SiteMetrics {
    /// Sentinel KGE marking a site with no valid rows after cleaning.
    pub const INSUFFICIENT_KGE: f64 = -10000.0;

    /// Records below this KGE are sentinels, not real scores.
    pub const SENTINEL_CUTOFF: f64 = -1000.0;

    pub const INSUFFICIENT: SiteMetrics = SiteMetrics {
        rmse: 0.0,
        max_error: 0.0,
        mape: 0.0,
        kge: SiteMetrics::INSUFFICIENT_KGE,
    };

    pub fn is_insufficient(&self) -> bool {
        self.kge < SiteMetrics::SENTINEL_CUTOFF
    }
}

/// Per-site evaluation result. Created once per run, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRecord {
    pub observation_id: String,
    pub model_reach_id: u64,
    pub location_name: String,
    pub rmse: f64,
    pub max_error: f64,
    pub mape: f64,
    pub kge: f64,
    pub size_class: Option<SizeClass>,
    pub latitude: f64,
    pub longitude: f64,
    pub attributes: SiteAttributes,
}

impl EvaluationRecord {
    pub fn new(site: &Site, metrics: SiteMetrics, size_class: Option<SizeClass>) -> Self {
        EvaluationRecord {
            observation_id: site.observation_id.clone(),
            model_reach_id: site.model_reach_id,
            location_name: site.name.clone(),
            rmse: metrics.rmse,
            max_error: metrics.max_error,
            mape: metrics.mape,
            kge: metrics.kge,
            size_class,
            latitude: site.latitude,
            longitude: site.longitude,
            attributes: site.attributes.clone(),
        }
    }

    pub fn metrics(&self) -> SiteMetrics {
        SiteMetrics {
            rmse: self.rmse,
            max_error: self.max_error,
            mape: self.mape,
            kge: self.kge,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise while resolving, fetching, or scoring sites.
///
/// Everything except `NoActiveSites` and `Config` is contained at the site
/// level: the pipeline records it against the site and moves on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    /// The station has no model reach in the crosswalk.
    #[error("No model reach for station: {0}")]
    MissingCrosswalk(String),
    /// A series could not be retrieved for the site.
    #[error("Source unavailable for {kind} series of site {site}: {reason}")]
    SourceUnavailable {
        site: String,
        kind: SeriesKind,
        reason: String,
    },
    /// Fewer than one valid row survived cleaning.
    #[error("Insufficient data for site: {0}")]
    InsufficientData(String),
    /// Too few distinct attribute values to form the requested classes.
    #[error("Cannot form {classes} classes for {attribute}: only {distinct} distinct values")]
    ClassificationUnderflow {
        attribute: String,
        distinct: usize,
        classes: usize,
    },
    /// The characteristics service asked us to back off.
    #[error("Rate limited by {0}")]
    RateLimited(String),
    /// No site survived registry resolution and fetching.
    #[error("No sites left in the active comparison set")]
    NoActiveSites,
    /// Non-2xx HTTP response from a remote store.
    #[error("HTTP error: {0}")]
    HttpError(u16),
    /// The request never produced a response (connection, timeout, disk).
    #[error("Transport error: {0}")]
    Transport(String),
    /// The response body could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),
    /// The requested object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Database error: {0}")]
    Database(String),
}

impl EvalError {
    /// Wraps a fetch error as the site-level `SourceUnavailable` failure.
    pub fn unavailable(site: &str, kind: SeriesKind, cause: &EvalError) -> EvalError {
        EvalError::SourceUnavailable {
            site: site.to_string(),
            kind,
            reason: cause.to_string(),
        }
    }
}

/// A site excluded from a run, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteFailure {
    pub observation_id: String,
    pub error: EvalError,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
