/// Site registry for a statewide evaluation run.
///
/// Turns candidate station ids into `Site`s by joining watershed
/// characteristics with the station-to-reach crosswalk, and partitions the
/// resolved sites into natural-breaks size classes on a chosen attribute.
/// Unresolvable stations are recorded as failures and never abort the batch.

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use crate::analysis::jenks::{NaturalBreaks, distinct_count};
use crate::ingest::crosswalk::ReachCrosswalk;
use crate::ingest::streamstats::CharacteristicsSource;
use crate::logging::{self, DataSource};
use crate::model::{Attribute, EvalError, STATION_ID_WIDTH, Site, SiteFailure, SizeClass};

/// Attribute values at or below this are treated as absent when classifying.
pub const CLASSIFY_MIN_VALUE: f64 = 1e-5;

pub const SIZE_CLASS_COUNT: usize = 5;

// ---------------------------------------------------------------------------
// Station ids
// ---------------------------------------------------------------------------

/// Left-zero-pads a numeric station id to 8 digits.
///
/// Tables written through spreadsheet tools drop leading zeros and sometimes
/// add a float suffix (`2339495.0`); both are undone. Ids that are already
/// 8 or more characters, or not numeric, are returned trimmed but otherwise
/// unchanged. Idempotent.
pub fn normalize_station_id(raw: &str) -> String {
    let trimmed = raw.trim();
    let digits = trimmed.strip_suffix(".0").unwrap_or(trimmed);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        if digits.len() < STATION_ID_WIDTH {
            return format!("{:0>width$}", digits, width = STATION_ID_WIDTH);
        }
        return digits.to_string();
    }
    trimmed.to_string()
}

/// Normalizes an id and rejects anything that is not an 8-digit stream gauge.
/// Longer ids belong to wells, springs, and other non-stream sites.
pub fn validate_station_id(raw: &str) -> Result<String, EvalError> {
    let id = normalize_station_id(raw);
    if id.len() != STATION_ID_WIDTH || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(EvalError::NotFound(format!("'{}' is not an 8-digit stream gauge id", raw.trim())));
    }
    Ok(id)
}

// ---------------------------------------------------------------------------
// Rate-limit retry
// ---------------------------------------------------------------------------

/// Fixed cooldown-and-retry policy for throttled lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub cooldown: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(181),
            max_attempts: 3,
        }
    }
}

/// Runs `op`, sleeping for the cooldown and retrying whenever it reports
/// `RateLimited`, up to `max_attempts` calls in total. Any other error is
/// returned immediately.
pub fn with_cooldown_retry<T>(
    policy: &RetryPolicy,
    site_id: &str,
    mut op: impl FnMut() -> Result<T, EvalError>,
) -> Result<T, EvalError> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(EvalError::RateLimited(service)) if attempt < policy.max_attempts => {
                logging::warn(
                    DataSource::Characteristics,
                    Some(site_id),
                    &format!(
                        "{} is throttling requests, cooling down {}s (attempt {}/{})",
                        service,
                        policy.cooldown.as_secs(),
                        attempt,
                        policy.max_attempts
                    ),
                );
                thread::sleep(policy.cooldown);
                attempt += 1;
            }
            other => return other,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RegistryOutcome {
    /// Resolved sites, in candidate order.
    pub sites: Vec<Site>,
    pub failures: Vec<SiteFailure>,
}

/// Resolves candidate station ids into sites.
///
/// A station is excluded (and recorded) when its id is malformed, it has no
/// watershed characteristics or no location, or the crosswalk has no reach
/// for it. Repeated candidates are resolved once. `region` fills in the
/// partition for records that carry no state.
pub fn resolve_sites<S: AsRef<str>>(
    candidates: &[S],
    region: &str,
    characteristics: &dyn CharacteristicsSource,
    crosswalk: &dyn ReachCrosswalk,
    policy: &RetryPolicy,
) -> RegistryOutcome {
    let mut outcome = RegistryOutcome::default();
    let mut seen = HashSet::new();

    for raw in candidates {
        let raw = raw.as_ref();
        let key = normalize_station_id(raw);
        if !seen.insert(key.clone()) {
            continue;
        }

        match resolve_one(raw, region, characteristics, crosswalk, policy) {
            Ok(site) => outcome.sites.push(site),
            Err(error) => {
                let source = match error {
                    EvalError::MissingCrosswalk(_) => DataSource::Crosswalk,
                    _ => DataSource::Characteristics,
                };
                logging::log_site_failure(source, &key, "Site resolution", &error);
                outcome.failures.push(SiteFailure {
                    observation_id: key,
                    error,
                });
            }
        }
    }

    logging::log_run_summary(
        DataSource::System,
        "Site resolution",
        seen.len(),
        outcome.sites.len(),
        outcome.failures.len(),
    );
    outcome
}

fn resolve_one(
    raw: &str,
    region: &str,
    characteristics: &dyn CharacteristicsSource,
    crosswalk: &dyn ReachCrosswalk,
    policy: &RetryPolicy,
) -> Result<Site, EvalError> {
    let id = validate_station_id(raw)?;

    let record = with_cooldown_retry(policy, &id, || characteristics.lookup(&id))?
        .ok_or_else(|| EvalError::NotFound(format!("watershed characteristics for {}", id)))?;
    let (Some(latitude), Some(longitude)) = (record.latitude, record.longitude) else {
        return Err(EvalError::NotFound(format!("location of station {}", id)));
    };

    let model_reach_id = crosswalk
        .reach_for(&id)?
        .ok_or_else(|| EvalError::MissingCrosswalk(id.clone()))?;

    Ok(Site {
        name: record.name.clone(),
        latitude,
        longitude,
        model_reach_id,
        region_code: record
            .region_code
            .clone()
            .unwrap_or_else(|| region.to_ascii_lowercase()),
        attributes: record.site_attributes(),
        observation_id: id,
    })
}

// ---------------------------------------------------------------------------
// Size classes
// ---------------------------------------------------------------------------

/// Five-way natural-breaks partition of the active sites on one attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub attribute: Attribute,
    pub breaks: NaturalBreaks,
    /// `(observation_id, class)` in site order. Sites without a usable
    /// attribute value are absent.
    pub assignments: Vec<(String, SizeClass)>,
}

impl Classification {
    pub fn class_of(&self, observation_id: &str) -> Option<SizeClass> {
        self.assignments
            .iter()
            .find(|(id, _)| id == observation_id)
            .map(|(_, class)| *class)
    }

    /// Sites assigned to `class`, in site order.
    pub fn members<'s>(&self, class: SizeClass, sites: &'s [Site]) -> Vec<&'s Site> {
        sites
            .iter()
            .filter(|s| self.class_of(&s.observation_id) == Some(class))
            .collect()
    }
}

/// Computes breaks over the attribute values of `sites` above
/// [`CLASSIFY_MIN_VALUE`] and assigns every such site a class.
///
/// Breaks depend only on the set of values, never on site order. Fewer than
/// five distinct values is a `ClassificationUnderflow`.
pub fn classify(sites: &[Site], attribute: Attribute) -> Result<Classification, EvalError> {
    let usable: Vec<(&Site, f64)> = sites
        .iter()
        .filter_map(|s| s.attributes.get(attribute).map(|v| (s, v)))
        .filter(|(_, v)| v.is_finite() && *v > CLASSIFY_MIN_VALUE)
        .collect();
    let values: Vec<f64> = usable.iter().map(|(_, v)| *v).collect();

    let breaks = NaturalBreaks::compute(&values, SIZE_CLASS_COUNT).ok_or_else(|| {
        EvalError::ClassificationUnderflow {
            attribute: attribute.to_string(),
            distinct: distinct_count(&values),
            classes: SIZE_CLASS_COUNT,
        }
    })?;

    let assignments = usable
        .iter()
        .filter_map(|(site, value)| {
            breaks
                .class_index(*value)
                .and_then(SizeClass::from_index)
                .map(|class| (site.observation_id.clone(), class))
        })
        .collect();

    Ok(Classification {
        attribute,
        breaks,
        assignments,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::crosswalk::CrosswalkTable;
    use crate::ingest::streamstats::{StreamStatsTable, WatershedRecord};
    use crate::model::SiteAttributes;
    use std::cell::Cell;

    fn site_with_area(id: &str, area: Option<f64>) -> Site {
        Site {
            observation_id: id.to_string(),
            name: format!("Gauge {}", id),
            latitude: 33.0,
            longitude: -87.0,
            model_reach_id: 1,
            region_code: "al".to_string(),
            attributes: SiteAttributes {
                drainage_area: area,
                ..SiteAttributes::default()
            },
        }
    }

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            cooldown: Duration::ZERO,
            max_attempts: 3,
        }
    }

    #[test]
    fn test_normalize_pads_short_numeric_ids() {
        assert_eq!(normalize_station_id("2339495"), "02339495");
        assert_eq!(normalize_station_id(" 2339495.0 "), "02339495");
        assert_eq!(normalize_station_id("10126000"), "10126000");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["2339495", "02339495", "123", "10126000", "394220106431500"] {
            let once = normalize_station_id(raw);
            assert_eq!(normalize_station_id(&once), once, "normalizing '{}' twice changed it", raw);
        }
    }

    #[test]
    fn test_validate_rejects_long_and_non_numeric_ids() {
        assert!(validate_station_id("394220106431500").is_err(), "15-digit well ids are not stream gauges");
        assert!(validate_station_id("ABC12345").is_err());
        assert_eq!(validate_station_id("5568500").unwrap(), "05568500");
    }

    #[test]
    fn test_retry_recovers_after_rate_limit() {
        let calls = Cell::new(0);
        let result = with_cooldown_retry(&no_wait(), "02339495", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(EvalError::RateLimited("streamstats".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), EvalError> = with_cooldown_retry(&no_wait(), "02339495", || {
            calls.set(calls.get() + 1);
            Err(EvalError::RateLimited("streamstats".into()))
        });
        assert!(matches!(result, Err(EvalError::RateLimited(_))));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_does_not_repeat_other_errors() {
        let calls = Cell::new(0);
        let result: Result<(), EvalError> = with_cooldown_retry(&no_wait(), "02339495", || {
            calls.set(calls.get() + 1);
            Err(EvalError::HttpError(500))
        });
        assert_eq!(result, Err(EvalError::HttpError(500)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_resolve_sites_excludes_unmapped_stations() {
        let stats = StreamStatsTable::from_records([
            WatershedRecord::new("2339495", "Moores Creek")
                .with_location(32.87, -85.22, "AL")
                .with_value(Attribute::DrainageArea, 21.1),
            WatershedRecord::new("2342500", "No Reach Creek").with_location(32.5, -85.0, "AL"),
            WatershedRecord::new("2361000", "Unplaced Creek"),
        ]);
        let crosswalk = CrosswalkTable::from_pairs([("02339495", 18524227u64), ("02361000", 5)]);

        let candidates = ["2339495", "02342500", "02361000", "07777777", "02339495"];
        let outcome = resolve_sites(&candidates, "al", &stats, &crosswalk, &no_wait());

        assert_eq!(outcome.sites.len(), 1);
        let site = &outcome.sites[0];
        assert_eq!(site.observation_id, "02339495");
        assert_eq!(site.model_reach_id, 18524227);
        assert_eq!(site.region_code, "al");
        assert_eq!(site.attributes.drainage_area, Some(21.1));

        let failed: Vec<(&str, &EvalError)> = outcome
            .failures
            .iter()
            .map(|f| (f.observation_id.as_str(), &f.error))
            .collect();
        assert_eq!(failed.len(), 3, "duplicate candidate must be resolved once");
        assert_eq!(failed[0].0, "02342500");
        assert!(matches!(failed[0].1, EvalError::MissingCrosswalk(_)));
        assert!(matches!(failed[1].1, EvalError::NotFound(_)), "no location");
        assert!(matches!(failed[2].1, EvalError::NotFound(_)), "no characteristics");
    }

    #[test]
    fn test_classify_assigns_ordered_classes() {
        let areas = [1.0, 2.0, 3.0, 100.0, 101.0, 102.0, 500.0, 501.0, 502.0, 1000.0];
        let sites: Vec<Site> = areas
            .iter()
            .enumerate()
            .map(|(i, a)| site_with_area(&format!("{:08}", i + 1), Some(*a)))
            .collect();

        let classification = classify(&sites, Attribute::DrainageArea).expect("10 distinct values are enough");
        assert_eq!(classification.assignments.len(), 10);
        assert_eq!(classification.class_of("00000010"), Some(SizeClass::VeryLarge));
        assert_eq!(classification.class_of("00000001"), Some(SizeClass::VerySmall));

        // a larger value never lands in a smaller class
        for (a, ca) in areas.iter().zip(&classification.assignments) {
            for (b, cb) in areas.iter().zip(&classification.assignments) {
                if a < b {
                    assert!(ca.1 <= cb.1, "{} classed above {}", a, b);
                }
            }
        }
    }

    #[test]
    fn test_classify_ignores_tiny_and_missing_values() {
        let mut sites: Vec<Site> = (1..=5)
            .map(|i| site_with_area(&format!("{:08}", i), Some(i as f64 * 10.0)))
            .collect();
        sites.push(site_with_area("00000098", Some(0.0)));
        sites.push(site_with_area("00000099", None));

        let classification = classify(&sites, Attribute::DrainageArea).unwrap();
        assert_eq!(classification.class_of("00000098"), None);
        assert_eq!(classification.class_of("00000099"), None);
        assert_eq!(classification.members(SizeClass::VeryLarge, &sites).len(), 1);
    }

    #[test]
    fn test_classify_underflow_with_few_distinct_values() {
        let sites: Vec<Site> = [5.0, 5.0, 7.0, 9.0, 9.0, 11.0]
            .iter()
            .enumerate()
            .map(|(i, a)| site_with_area(&format!("{:08}", i), Some(*a)))
            .collect();
        let err = classify(&sites, Attribute::DrainageArea).unwrap_err();
        assert_eq!(
            err,
            EvalError::ClassificationUnderflow {
                attribute: "Drainage_area_mi2".into(),
                distinct: 4,
                classes: 5,
            }
        );
    }

    #[test]
    fn test_classify_is_independent_of_site_order() {
        let areas = [12.0, 3.5, 800.0, 45.0, 46.0, 9000.0, 2.0, 150.0];
        let forward: Vec<Site> = areas
            .iter()
            .enumerate()
            .map(|(i, a)| site_with_area(&format!("{:08}", i), Some(*a)))
            .collect();
        let mut reversed = forward.clone();
        reversed.reverse();

        let a = classify(&forward, Attribute::DrainageArea).unwrap();
        let b = classify(&reversed, Attribute::DrainageArea).unwrap();
        assert_eq!(a.breaks, b.breaks);
        for site in &forward {
            assert_eq!(a.class_of(&site.observation_id), b.class_of(&site.observation_id));
        }
    }
}
