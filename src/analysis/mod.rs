/// Numerical core of the evaluation: no I/O, only value types in and out.
///
/// Submodules:
/// - `resample`: daily pass-through or period volumes, within-year totals.
/// - `align`   : joins observed and modeled series on one date index.
/// - `jenks`   : natural-breaks classification of attribute values.
/// - `metrics` : cleaning policy, RMSE / max error / MAPE / KGE, pooled scoring.

pub mod align;
pub mod jenks;
pub mod metrics;
pub mod resample;
