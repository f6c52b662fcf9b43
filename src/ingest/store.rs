/// Object store access for per-site flow blobs and lookup tables.
///
/// The public streamflow bucket is read with unsigned HTTPS requests; a local
/// directory mirror with the same key layout works for offline runs.
///
/// Key layout:
///   observed: `NWIS/NWIS_sites_{region}.h5/NWIS_{station}.csv`
///   modeled:  `{model}/NHD_segments_{region}.h5/{model[..3]}_{reach}.csv`

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::EvalError;

// ============================================================================
// Store trait
// ============================================================================

/// Read-only keyed blob store.
pub trait ObjectStore {
    /// Returns the object body as text.
    fn get(&self, key: &str) -> Result<String, EvalError>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for &S {
    fn get(&self, key: &str) -> Result<String, EvalError> {
        (**self).get(key)
    }
}

impl<S: ObjectStore + ?Sized> ObjectStore for Box<S> {
    fn get(&self, key: &str) -> Result<String, EvalError> {
        (**self).get(key)
    }
}

/// Key of a station's observed discharge CSV.
pub fn observed_key(region: &str, station_id: &str) -> String {
    format!("NWIS/NWIS_sites_{}.h5/NWIS_{}.csv", region, station_id)
}

/// Key of a reach's modeled discharge CSV.
pub fn modeled_key(model: &str, region: &str, reach_id: u64) -> String {
    let prefix: String = model.chars().take(3).collect();
    format!("{}/NHD_segments_{}.h5/{}_{}.csv", model, region, prefix, reach_id)
}

// ============================================================================
// Public bucket over HTTPS
// ============================================================================

pub struct HttpBucketStore {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpBucketStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EvalError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EvalError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }
}

impl ObjectStore for HttpBucketStore {
    fn get(&self, key: &str) -> Result<String, EvalError> {
        let url = self.object_url(key);

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| EvalError::Transport(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        // Anonymous reads of a missing key come back 403 when listing is not public.
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::FORBIDDEN {
            return Err(EvalError::NotFound(key.to_string()));
        }
        if !status.is_success() {
            return Err(EvalError::HttpError(status.as_u16()));
        }

        response
            .text()
            .map_err(|e| EvalError::Transport(format!("failed to read body of {}: {}", url, e)))
    }
}

// ============================================================================
// Local directory mirror
// ============================================================================

pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ObjectStore for LocalDirStore {
    fn get(&self, key: &str) -> Result<String, EvalError> {
        let path = self.root.join(key.trim_start_matches('/'));
        std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EvalError::NotFound(key.to_string()),
            _ => EvalError::Transport(format!("cannot read {}: {}", path.display(), e)),
        })
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Map-backed store for fixtures and pre-fetched batches.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    objects: HashMap<String, String>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, body: impl Into<String>) {
        self.objects.insert(key.into(), body.into());
    }

    pub fn with(mut self, key: impl Into<String>, body: impl Into<String>) -> Self {
        self.insert(key, body);
        self
    }
}

impl ObjectStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<String, EvalError> {
        self.objects
            .get(key)
            .cloned()
            .ok_or_else(|| EvalError::NotFound(key.to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================
