/// Evaluation runs: fetch, align, score, and tabulate a group of sites.
///
/// Every stage takes and returns plain values. Per-site problems are
/// recorded on the result; only an empty active set fails the run.

use chrono::NaiveDate;

use crate::analysis::align::{align, resample_pair};
use crate::analysis::metrics::{aggregate_metrics, site_metrics};
use crate::config::{EvalConfig, StoreBackend};
use crate::ingest::fetch::{SeriesFetcher, SiteSeries};
use crate::ingest::store::{HttpBucketStore, LocalDirStore, ObjectStore};
use crate::ingest::streamstats::StreamStatsTable;
use crate::logging::{self, DataSource};
use crate::model::{AlignedPair, Attribute, EvalError, Frequency, Site, SiteFailure, SiteMetrics, SizeClass};
use crate::report::{EvaluationTable, build_table};
use crate::stations::{Classification, classify};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSettings {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub frequency: Frequency,
    pub cumulative_supply: bool,
}

impl RunSettings {
    pub fn from_config(config: &EvalConfig) -> Self {
        Self {
            start: config.run.start_date,
            end: config.run.end_date,
            frequency: config.run.frequency,
            cumulative_supply: config.run.cumulative_supply,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A site that made it through fetching, with its scored pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSite {
    pub site: Site,
    pub pair: AlignedPair,
    pub metrics: SiteMetrics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupEvaluation {
    pub table: EvaluationTable,
    /// Pooled scores over every cleaned row in the group.
    pub aggregate: SiteMetrics,
    /// Aligned pairs in site order, for plotting.
    pub pairs: Vec<AlignedPair>,
    /// Sites scored with the insufficient-data sentinel.
    pub insufficient: Vec<String>,
    pub failures: Vec<SiteFailure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassedEvaluation {
    pub overall: GroupEvaluation,
    /// `None` when the attribute could not be partitioned.
    pub classification: Option<Classification>,
    /// One evaluation per non-empty class, smallest class first.
    pub classes: Vec<(SizeClass, GroupEvaluation)>,
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

pub struct Evaluator<'a> {
    fetcher: SeriesFetcher<'a>,
    settings: RunSettings,
}

impl<'a> Evaluator<'a> {
    pub fn new(fetcher: SeriesFetcher<'a>, settings: RunSettings) -> Self {
        Self { fetcher, settings }
    }

    /// Evaluates one group of sites. Fails only when no site survives
    /// fetching.
    pub fn evaluate_group(&self, sites: Vec<Site>) -> Result<GroupEvaluation, EvalError> {
        let (scored, failures) = self.fetch_and_score(sites)?;
        Ok(summarize(&scored, None, failures))
    }

    /// Evaluates the whole group, then each size class of `attribute` on its
    /// own. Breaks come from the sites that survived fetching. When the
    /// attribute cannot be partitioned only the overall evaluation is
    /// returned.
    pub fn evaluate_by_class(&self, sites: Vec<Site>, attribute: Attribute) -> Result<ClassedEvaluation, EvalError> {
        let (scored, failures) = self.fetch_and_score(sites)?;
        let active: Vec<Site> = scored.iter().map(|s| s.site.clone()).collect();

        let classification = match classify(&active, attribute) {
            Ok(classification) => Some(classification),
            Err(e) => {
                logging::warn(DataSource::System, None, &format!("Skipping size classes: {}", e));
                None
            }
        };

        let overall = summarize(&scored, classification.as_ref(), failures);

        let mut classes = Vec::new();
        if let Some(classification) = &classification {
            for class in SizeClass::ALL {
                let members: Vec<ScoredSite> = scored
                    .iter()
                    .filter(|s| classification.class_of(&s.site.observation_id) == Some(class))
                    .cloned()
                    .collect();
                if members.is_empty() {
                    continue;
                }
                let evaluation = summarize(&members, Some(classification), Vec::new());
                logging::info(
                    DataSource::System,
                    None,
                    &format!(
                        "{} {}: {} sites, pooled KGE {:.3}",
                        attribute,
                        class,
                        members.len(),
                        evaluation.aggregate.kge
                    ),
                );
                classes.push((class, evaluation));
            }
        }

        Ok(ClassedEvaluation {
            overall,
            classification,
            classes,
        })
    }

    fn fetch_and_score(&self, sites: Vec<Site>) -> Result<(Vec<ScoredSite>, Vec<SiteFailure>), EvalError> {
        let RunSettings {
            start,
            end,
            frequency,
            cumulative_supply,
        } = self.settings;

        logging::info(
            DataSource::System,
            None,
            &format!(
                "Evaluating {} sites, {} to {}, {}{}",
                sites.len(),
                start,
                end,
                frequency.label(),
                if cumulative_supply { " cumulative supply" } else { "" }
            ),
        );

        let outcome = self.fetcher.fetch_all(sites, start, end);
        if outcome.fetched.is_empty() {
            return Err(EvalError::NoActiveSites);
        }

        let scored = outcome
            .fetched
            .into_iter()
            .map(|fetched| score_site(fetched, frequency, cumulative_supply))
            .collect();
        Ok((scored, outcome.failures))
    }
}

fn score_site(fetched: SiteSeries, frequency: Frequency, cumulative_supply: bool) -> ScoredSite {
    let SiteSeries { site, observed, modeled } = fetched;
    let daily = align(&site.observation_id, site.model_reach_id, &observed, &modeled);
    let pair = resample_pair(&daily, frequency, cumulative_supply);
    let metrics = site_metrics(&pair);

    if metrics.is_insufficient() {
        let error = EvalError::InsufficientData(site.observation_id.clone());
        logging::log_site_failure(DataSource::System, &site.observation_id, "Scoring", &error);
    }

    ScoredSite { site, pair, metrics }
}

fn summarize(scored: &[ScoredSite], classification: Option<&Classification>, failures: Vec<SiteFailure>) -> GroupEvaluation {
    let entries: Vec<(Site, SiteMetrics)> = scored.iter().map(|s| (s.site.clone(), s.metrics)).collect();
    let pairs: Vec<AlignedPair> = scored.iter().map(|s| s.pair.clone()).collect();

    GroupEvaluation {
        table: build_table(&entries, classification),
        aggregate: aggregate_metrics(&pairs),
        insufficient: scored
            .iter()
            .filter(|s| s.metrics.is_insufficient())
            .map(|s| s.site.observation_id.clone())
            .collect(),
        pairs,
        failures,
    }
}

// ---------------------------------------------------------------------------
// Run setup
// ---------------------------------------------------------------------------

/// Opens the configured object store.
pub fn open_store(config: &EvalConfig) -> Result<Box<dyn ObjectStore>, EvalError> {
    match config.store.backend {
        StoreBackend::Bucket => Ok(Box::new(HttpBucketStore::new(
            &config.store.bucket_url,
            config.request_timeout(),
        )?)),
        StoreBackend::Local => {
            let root = config
                .store
                .local_root
                .as_ref()
                .ok_or_else(|| EvalError::Config("store.local_root is required for the local backend".into()))?;
            Ok(Box::new(LocalDirStore::new(root)))
        }
    }
}

/// Candidate station ids: the configured list, or every station in the
/// region when none is given.
pub fn candidate_stations(config: &EvalConfig, stats: &StreamStatsTable) -> Vec<String> {
    if config.run.stations.is_empty() {
        stats.stations_in_region(&config.run.region)
    } else {
        config.run.stations.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
