/// Streamflow model evaluation.
///
/// Compares modeled river discharge against USGS gauge observations across a
/// state: resolves gauges to model reaches, fetches both series, aligns and
/// resamples them, scores each site (RMSE, max error, MAPE, KGE), and
/// builds a ranked evaluation table, optionally per watershed size class.
///
/// Module tree:
/// - `model`   : shared value types and the error taxonomy.
/// - `config`  : TOML run configuration with `.env` overrides.
/// - `logging` : global structured logger and failure classification.
/// - `ingest`  : object stores, CSV tables, crosswalk, series fetching.
/// - `stations`: site registry and size-class partitioning.
/// - `analysis`: resampling, alignment, natural breaks, metrics.
/// - `report`  : evaluation table, export, and presentation helpers.
/// - `pipeline`: end-to-end group and per-class evaluation runs.

pub mod analysis;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod stations;
