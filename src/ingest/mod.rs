/// Data acquisition for the evaluation pipeline.
///
/// Submodules:
/// - `store`      : object store trait, public bucket over HTTPS, local mirror.
/// - `flow_csv`   : parsing of per-site flow CSV blobs into dated series.
/// - `streamstats`: statewide watershed characteristics table.
/// - `crosswalk`  : station-to-reach crosswalk table.
/// - `postgres`   : observed discharge from the flood-monitor database.
/// - `fetch`      : observed/modeled series retrieval and the active-set sweep.

pub mod crosswalk;
pub mod fetch;
pub mod flow_csv;
pub mod postgres;
pub mod store;
pub mod streamstats;
