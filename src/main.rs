use std::error::Error;
use std::fs::File;
use std::path::PathBuf;

use clap::Parser;

use floeval::config::{EvalConfig, ObservedBackend, load_config};
use floeval::ingest::crosswalk::CrosswalkTable;
use floeval::ingest::fetch::{SeriesFetcher, SeriesSource, StoreSeriesSource};
use floeval::ingest::postgres::PostgresObservedSource;
use floeval::ingest::streamstats::StreamStatsTable;
use floeval::logging::{self, DataSource, init_logger};
use floeval::model::{EvalError, SiteMetrics};
use floeval::pipeline::{Evaluator, GroupEvaluation, RunSettings, candidate_stations, open_store};
use floeval::report::units_label;
use floeval::stations::resolve_sites;

#[derive(Parser, Debug)]
#[command(name = "floeval", version, about = "Evaluate modeled streamflow against USGS observations")]
struct Args {
    /// Run configuration file.
    #[arg(long, default_value = "floeval.toml")]
    config: PathBuf,
    /// Partition sites by this attribute (overrides run.classify_by).
    #[arg(long)]
    classify_by: Option<String>,
    /// Write the evaluation table as CSV here.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Print the evaluation table as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let mut config = load_config(&args.config)?;
    if args.classify_by.is_some() {
        config.run.classify_by = args.classify_by.clone();
    }
    let attribute = config.classify_attribute()?;

    init_logger(
        config.logging.level,
        config.logging.file.as_deref(),
        config.logging.console_timestamps,
    );
    logging::info(
        DataSource::System,
        None,
        &format!("floeval: {} in region '{}'", config.run.model, config.run.region),
    );

    let store = open_store(&config)?;
    let stats = StreamStatsTable::load(&store, &config.store.streamstats_key)?;
    let crosswalk = CrosswalkTable::load(&store, &config.store.crosswalk_key)?;

    let candidates = candidate_stations(&config, &stats);
    let registry = resolve_sites(
        &candidates,
        &config.run.region,
        &stats,
        &crosswalk,
        &config.retry_policy(),
    );

    let store_source = StoreSeriesSource::new(store, &config.run.model, &config.store.observed_flow_column);
    let observed_source = observed_source(&config)?;
    let fetcher = SeriesFetcher::new(
        observed_source.as_deref().unwrap_or(&store_source),
        &store_source,
    )
    .with_model_factor(config.run.model_flow_units.to_cfs_factor());
    let evaluator = Evaluator::new(fetcher, RunSettings::from_config(&config));

    let overall = match attribute {
        Some(attribute) => {
            let classed = evaluator.evaluate_by_class(registry.sites, attribute)?;
            for (class, evaluation) in &classed.classes {
                print_summary(&format!("{} {}", attribute, class), evaluation, &config);
            }
            classed.overall
        }
        None => evaluator.evaluate_group(registry.sites)?,
    };
    print_summary("All sites", &overall, &config);
    println!(
        "   {} excluded at resolution, {} at fetch",
        registry.failures.len(),
        overall.failures.len()
    );

    if let Some(path) = &args.output {
        let file = File::create(path).map_err(|e| EvalError::Transport(format!("{}: {}", path.display(), e)))?;
        overall.table.write_csv(file)?;
        logging::info(DataSource::System, None, &format!("Wrote {}", path.display()));
    }
    if args.json {
        println!("{}", overall.table.to_json()?);
    }

    Ok(())
}

/// Postgres observations when configured; `None` means read them from the store.
fn observed_source(config: &EvalConfig) -> Result<Option<Box<dyn SeriesSource>>, EvalError> {
    match config.store.observed_backend {
        ObservedBackend::Store => Ok(None),
        ObservedBackend::Postgres => {
            let url = config
                .store
                .database_url
                .as_deref()
                .ok_or_else(|| EvalError::Config("DATABASE_URL is not set".into()))?;
            Ok(Some(Box::new(PostgresObservedSource::connect(url)?)))
        }
    }
}

fn print_summary(label: &str, evaluation: &GroupEvaluation, config: &EvalConfig) {
    let SiteMetrics { rmse, max_error, mape, kge } = evaluation.aggregate;
    let units = units_label(config.run.frequency);
    println!(
        "{}: {} sites scored, {} with insufficient data",
        label,
        evaluation.table.len(),
        evaluation.insufficient.len()
    );
    println!(
        "   RMSE {} {}, max error {} {}, MAPE {:.1} %, KGE {:.3}",
        rmse, units, max_error, units, mape, kge
    );
}
