//! End-to-end evaluation runs against a local bucket mirror.
//!
//! Each test writes a small mirror (characteristics table, crosswalk, and
//! per-site flow CSVs) into a temporary directory laid out exactly like the
//! public bucket, then drives configuration loading, site resolution,
//! fetching, scoring, and table export through the library API.
//!
//! The live-bucket test is ignored by default:
//!   cargo test --test pipeline_integration -- --ignored

use std::fs;
use std::path::Path;

use chrono::{Duration, NaiveDate};
use floeval::config::load_config;
use floeval::ingest::crosswalk::CrosswalkTable;
use floeval::ingest::fetch::{SeriesFetcher, StoreSeriesSource};
use floeval::ingest::store::{ObjectStore, modeled_key, observed_key};
use floeval::ingest::streamstats::StreamStatsTable;
use floeval::model::{Attribute, EvalError, Frequency};
use floeval::pipeline::{Evaluator, RunSettings, candidate_stations, open_store};
use floeval::report::{SkillBand, attribute_trends};
use floeval::stations::resolve_sites;

const MODEL: &str = "NWM_v2.1";

// ---------------------------------------------------------------------------
// Mirror fixtures
// ---------------------------------------------------------------------------

const STREAMSTATS: &str = "\
Unnamed: 0,NWIS_site_id,NWIS_sitename,dec_lat_va,dec_long_va,state_id,Drainage_area_mi2,Mean_Basin_Elev_ft,Perc_Forest,Perc_Develop,Perc_Imperv,Perc_Herbace,Perc_Slop_30,Mean_Ann_Precip_in,Ann_low_cfs,Ann_mean_cfs,Ann_hi_cfs
0,2339495,SITE A PERFECT MODEL,32.87,-85.22,AL,21.1,690,61.2,8.0,1.4,3.0,2.0,53.1,7.5,30.0,62.0
1,2342500,SITE B NO OBSERVATIONS,32.51,-85.01,AL,120.0,560,55.0,9.0,2.0,4.0,1.0,54.0,20.0,150.0,400.0
2,2361000,SITE C NO REACH,31.34,-85.61,AL,686,300,45.0,12.0,3.1,6.0,0.5,55.0,80.0,900.0,3000.0
3,2369000,SITE D NO MODEL BLOB,31.00,-86.10,AL,3500,250,60.0,5.0,0.8,2.0,0.2,60.0,500.0,4000.0,12000.0
4,2371500,SITE E DOUBLE FLOW,31.20,-86.40,AL,8.2,400,70.0,4.0,0.5,1.0,3.0,58.0,1.0,9.0,20.0
5,10126000,BEAR RIVER NEAR CORINNE UT,41.57,-112.1,UT,7040,6200,22.0,3.0,0.3,30.0,15.0,17.2,300,1600,4100
";

const CROSSWALK: &str = "\
usgs_site_code,nwm_feature_id
2339495,18524227
2342500,18524301
2361000,0
2369000,18524555
2371500,18524777
10126000,10376192
";

fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2019, 1, 1).unwrap() + Duration::days(offset)
}

fn flow_csv(index_column: bool, flow_header: &str, values: &[f64]) -> String {
    let mut body = if index_column {
        format!("Unnamed: 0,Datetime,{}\n", flow_header)
    } else {
        format!("Datetime,{},USGS_ID\n", flow_header)
    };
    for (i, value) in values.iter().enumerate() {
        let flow = if value.is_nan() { String::new() } else { value.to_string() };
        if index_column {
            body.push_str(&format!("{},{},{}\n", i, day(i as i64), flow));
        } else {
            body.push_str(&format!("{},{},x\n", day(i as i64), flow));
        }
    }
    body
}

fn write(root: &Path, key: &str, body: &str) {
    let path = root.join(key);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

/// 90 days of flow for five Alabama gauges.
fn write_mirror(root: &Path) {
    write(root, "Streamstats/Streamstats.csv", STREAMSTATS);
    write(root, "Crosswalk/usgs_nwm_crosswalk.csv", CROSSWALK);

    let seasonal: Vec<f64> = (0..90).map(|i| 50.0 + (i as f64 * 0.2).sin() * 20.0).collect();
    let doubled: Vec<f64> = seasonal.iter().map(|v| v * 2.0).collect();
    let missing = vec![f64::NAN; 90];

    // A: model matches observations exactly
    write(root, &observed_key("al", "02339495"), &flow_csv(false, "USGS_flow", &seasonal));
    write(root, &modeled_key(MODEL, "al", 18524227), &flow_csv(true, "NWM_flow", &seasonal));
    // B: every observation blank
    write(root, &observed_key("al", "02342500"), &flow_csv(false, "USGS_flow", &missing));
    write(root, &modeled_key(MODEL, "al", 18524301), &flow_csv(true, "NWM_flow", &seasonal));
    // C: no reach in the crosswalk, blobs present anyway
    write(root, &observed_key("al", "02361000"), &flow_csv(false, "USGS_flow", &seasonal));
    // D: observed only
    write(root, &observed_key("al", "02369000"), &flow_csv(false, "USGS_flow", &seasonal));
    // E: model runs at twice the observed flow
    write(root, &observed_key("al", "02371500"), &flow_csv(false, "USGS_flow", &seasonal));
    write(root, &modeled_key(MODEL, "al", 18524777), &flow_csv(true, "NWM_flow", &doubled));
}

fn write_config(root: &Path, extra_run: &str) -> std::path::PathBuf {
    let text = format!(
        r#"
[run]
model = "{}"
region = "AL"
start_date = "2019-01-01"
end_date = "2019-12-31"
{}

[store]
backend = "local"
local_root = "{}"

[retry]
cooldown_secs = 0
"#,
        MODEL,
        extra_run,
        root.display()
    );
    let path = root.join("floeval.toml");
    fs::write(&path, text).unwrap();
    path
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_statewide_daily_run_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_mirror(dir.path());
    let config = load_config(write_config(dir.path(), "")).expect("config should load");

    let store = open_store(&config).expect("local store");
    let stats = StreamStatsTable::load(&store, &config.store.streamstats_key).unwrap();
    let crosswalk = CrosswalkTable::load(&store, &config.store.crosswalk_key).unwrap();

    let candidates = candidate_stations(&config, &stats);
    assert_eq!(candidates.len(), 5, "only Alabama stations are candidates");

    let registry = resolve_sites(&candidates, &config.run.region, &stats, &crosswalk, &config.retry_policy());
    assert_eq!(registry.sites.len(), 4);
    assert_eq!(registry.failures.len(), 1);
    assert_eq!(registry.failures[0].observation_id, "02361000");
    assert!(matches!(registry.failures[0].error, EvalError::MissingCrosswalk(_)));

    let source = StoreSeriesSource::new(store, MODEL, &config.store.observed_flow_column);
    let evaluator = Evaluator::new(SeriesFetcher::single(&source), RunSettings::from_config(&config));
    let result = evaluator.evaluate_group(registry.sites).expect("some sites survive");

    // D is dropped at fetch time, B is scored with the sentinel and left out
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].observation_id, "02369000");
    assert_eq!(result.insufficient, vec!["02342500"]);

    let records = result.table.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].observation_id, "02339495");
    assert!((records[0].kge - 1.0).abs() < 1e-9, "perfect model scores KGE 1");
    assert_eq!(records[0].rmse, 0.0);
    assert_eq!(records[0].model_reach_id, 18524227);
    assert_eq!(records[0].location_name, "SITE A PERFECT MODEL");
    assert_eq!(records[0].attributes.drainage_area, Some(21.1));
    assert_eq!(SkillBand::from_kge(records[0].kge), SkillBand::Good);

    // doubled flow: r = 1, alpha = 2, beta = 2
    assert_eq!(records[1].observation_id, "02371500");
    assert!((records[1].kge - (1.0 - 2f64.sqrt())).abs() < 1e-9);
    assert!((records[1].mape - 100.0).abs() < 1e-9);

    for pair in records.windows(2) {
        assert!(pair[0].kge >= pair[1].kge, "table must be sorted by KGE descending");
    }
}

#[test]
fn test_monthly_cumulative_run_labels_periods() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_mirror(dir.path());
    let config = load_config(write_config(
        dir.path(),
        "frequency = \"M\"\ncumulative_supply = true\nstations = [\"2339495\"]",
    ))
    .unwrap();
    assert_eq!(config.run.frequency, Frequency::Monthly);

    let store = open_store(&config).unwrap();
    let stats = StreamStatsTable::load(&store, &config.store.streamstats_key).unwrap();
    let crosswalk = CrosswalkTable::load(&store, &config.store.crosswalk_key).unwrap();
    let registry = resolve_sites(
        &candidate_stations(&config, &stats),
        &config.run.region,
        &stats,
        &crosswalk,
        &config.retry_policy(),
    );

    let source = StoreSeriesSource::new(store, MODEL, &config.store.observed_flow_column);
    let evaluator = Evaluator::new(SeriesFetcher::single(&source), RunSettings::from_config(&config));
    let result = evaluator.evaluate_group(registry.sites).unwrap();

    let pair = &result.pairs[0];
    let labels: Vec<NaiveDate> = pair.points.iter().map(|p| p.date).collect();
    assert_eq!(
        labels,
        vec![
            NaiveDate::from_ymd_opt(2019, 1, 31).unwrap(),
            NaiveDate::from_ymd_opt(2019, 2, 28).unwrap(),
            NaiveDate::from_ymd_opt(2019, 3, 31).unwrap(),
        ]
    );
    let totals: Vec<f64> = pair.observed().collect();
    assert!(totals.windows(2).all(|w| w[1] > w[0]), "supply accumulates within the year");
}

#[test]
fn test_class_partitioned_run_and_export() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_mirror(dir.path());

    // six more perfectly-modeled gauges so drainage area has enough spread
    let mut stats = String::from(STREAMSTATS);
    let mut crosswalk = String::from(CROSSWALK);
    let seasonal: Vec<f64> = (0..30).map(|i| 10.0 + i as f64).collect();
    for i in 0..6u64 {
        let id = format!("0240{:04}", i);
        let reach = 19_000_000 + i;
        stats.push_str(&format!(
            "{},{},EXTRA {},32.0,-86.0,AL,{},500,50,5,1,2,1,55,1,10,20\n",
            10 + i,
            id,
            i,
            5.0 * 3f64.powi(i as i32)
        ));
        crosswalk.push_str(&format!("{},{}\n", id, reach));
        write(dir.path(), &observed_key("al", &id), &flow_csv(false, "USGS_flow", &seasonal));
        write(dir.path(), &modeled_key(MODEL, "al", reach), &flow_csv(true, "NWM_flow", &seasonal));
    }
    write(dir.path(), "Streamstats/Streamstats.csv", &stats);
    write(dir.path(), "Crosswalk/usgs_nwm_crosswalk.csv", &crosswalk);

    let config = load_config(write_config(dir.path(), "classify_by = \"DRNAREA\"")).unwrap();
    let attribute = config.classify_attribute().unwrap().expect("attribute configured");
    assert_eq!(attribute, Attribute::DrainageArea);

    let store = open_store(&config).unwrap();
    let stats = StreamStatsTable::load(&store, &config.store.streamstats_key).unwrap();
    let crosswalk = CrosswalkTable::load(&store, &config.store.crosswalk_key).unwrap();
    let registry = resolve_sites(
        &candidate_stations(&config, &stats),
        &config.run.region,
        &stats,
        &crosswalk,
        &config.retry_policy(),
    );

    let source = StoreSeriesSource::new(store, MODEL, &config.store.observed_flow_column);
    let evaluator = Evaluator::new(SeriesFetcher::single(&source), RunSettings::from_config(&config));
    let result = evaluator.evaluate_by_class(registry.sites, attribute).unwrap();

    assert!(result.classification.is_some());
    let classed: usize = result.classes.iter().map(|(_, e)| e.pairs.len()).sum();
    assert_eq!(classed, result.overall.pairs.len(), "classes partition the active sites");
    assert!(result.overall.table.records().iter().all(|r| r.size_class.is_some()));

    let output = dir.path().join("table.csv");
    result
        .overall
        .table
        .write_csv(fs::File::create(&output).unwrap())
        .expect("table export");
    let mut reader = csv::Reader::from_path(&output).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(&headers[0], "NWIS_site_id");
    assert!(headers.iter().any(|h| h == "Drainage_area_mi2"));
    assert_eq!(reader.records().count(), result.overall.table.len());

    assert!(!attribute_trends(&result.overall.table).is_empty());
}

#[test]
#[ignore] // Don't run in CI - depends on the public bucket
fn test_live_bucket_tables_load() {
    let text = r#"
        [run]
        model = "NWM_v2.1"
        region = "al"
        start_date = "2019-01-01"
        end_date = "2019-12-31"
    "#;
    let config = floeval::config::parse_config(text).unwrap();
    let store = open_store(&config).expect("bucket client");

    let stats = StreamStatsTable::load(&store, &config.store.streamstats_key)
        .expect("characteristics table should be public");
    assert!(!stats.stations_in_region("al").is_empty());

    let body = store.get(&config.store.crosswalk_key);
    println!("crosswalk fetch: {:?}", body.as_ref().map(|b| b.len()));
}
