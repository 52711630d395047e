//! Owns every per-operator dataset plus the shared shape cache. One store
//! per process; a loaded dataset lives for the lifetime of the store and is
//! never evicted or refreshed.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use log::{info, warn};
use lru::LruCache;
use rustc_hash::FxHashMap;

use crate::config::EngineConfig;
use crate::error::Error;
use crate::loader::{self, ArchiveSource, HttpArchiveSource};
use crate::records::{BoundingBox, Dataset, LatLng, ShapePolyline, StopRecord};

type LoadFutureInner = BoxFuture<'static, Option<Arc<Dataset>>>;
type LoadFuture = Shared<LoadFutureInner>;

/// One in-flight load. The future is held weakly: the waiters own it, so a
/// load every waiter has abandoned is dropped mid-flight and its dangling
/// entry is replaced by the next preload instead of being joined.
struct InflightLoad {
    id: u64,
    load: WeakShared<LoadFutureInner>,
}

pub struct DatasetStore {
    source: Arc<dyn ArchiveSource>,
    /// Loaded datasets, append-only. Once a key is present its value never
    /// changes, so readers only contend on the map lock itself.
    loaded: RwLock<FxHashMap<String, Arc<Dataset>>>,
    /// At most one live in-flight load per operator key; concurrent
    /// preloads share the same future.
    inflight: tokio::sync::Mutex<FxHashMap<String, InflightLoad>>,
    next_load_id: AtomicU64,
    /// Keyed by shape id alone; shape ids are assumed distinct across
    /// operators. Last writer wins on a population race, the value is
    /// deterministic either way.
    shape_cache: Mutex<LruCache<String, Arc<ShapePolyline>>>,
}

impl DatasetStore {
    pub fn new(config: &EngineConfig) -> Result<Self, Error> {
        let source = Arc::new(HttpArchiveSource::new(config)?);
        Ok(Self::with_source(source, config.shape_cache_size))
    }

    pub fn with_source(source: Arc<dyn ArchiveSource>, shape_cache_size: usize) -> Self {
        DatasetStore {
            source,
            loaded: RwLock::new(FxHashMap::default()),
            inflight: tokio::sync::Mutex::new(FxHashMap::default()),
            next_load_id: AtomicU64::new(0),
            shape_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(shape_cache_size.max(1)).unwrap(),
            )),
        }
    }

    /// Non-blocking view of an operator's dataset. `None` until a preload
    /// for that operator has completed.
    pub fn dataset(&self, operator: &str) -> Option<Arc<Dataset>> {
        self.loaded.read().unwrap().get(operator).cloned()
    }

    /// Loads the operator's dataset unless it is already loaded. Any number
    /// of concurrent callers share a single fetch; a failed or abandoned
    /// load caches nothing, so the next explicit preload retries.
    pub async fn preload(&self, operator: &str) -> Option<Arc<Dataset>> {
        if let Some(dataset) = self.dataset(operator) {
            return Some(dataset);
        }

        let (load, load_id) = {
            let mut inflight = self.inflight.lock().await;
            // A load may have completed while we waited for the map lock.
            if let Some(dataset) = self.dataset(operator) {
                return Some(dataset);
            }
            let live = inflight
                .get(operator)
                .and_then(|entry| entry.load.upgrade().map(|load| (load, entry.id)));
            match live {
                Some(live) => live,
                None => {
                    let load = start_load(self.source.clone(), operator);
                    let id = self.next_load_id.fetch_add(1, Ordering::Relaxed);
                    if let Some(weak) = load.downgrade() {
                        inflight.insert(operator.to_string(), InflightLoad { id, load: weak });
                    }
                    (load, id)
                }
            }
        };

        let result = load.await;

        // Publish before clearing the in-flight entry, so a caller arriving
        // in between sees the loaded map rather than starting a second
        // fetch. Every completing caller clears the entry, not just the one
        // that created it; the id check keeps a newer load in place.
        if let Some(dataset) = &result {
            self.loaded
                .write()
                .unwrap()
                .entry(operator.to_string())
                .or_insert_with(|| dataset.clone());
        }
        {
            let mut inflight = self.inflight.lock().await;
            if inflight.get(operator).map(|entry| entry.id) == Some(load_id) {
                inflight.remove(operator);
            }
        }

        result?;
        // Re-read so every caller observes the same Arc.
        self.dataset(operator)
    }

    /// Lists the stops currently known for an operator, optionally clipped
    /// to a bounding box. Empty when the operator is not loaded.
    pub fn stops_in_bbox(&self, operator: &str, bbox: Option<BoundingBox>) -> Vec<StopRecord> {
        let Some(dataset) = self.dataset(operator) else {
            return Vec::new();
        };
        dataset
            .stops
            .values()
            .filter(|stop| match bbox {
                Some(bbox) => bbox.contains(LatLng::from_lat_lng(stop.lat, stop.lon)),
                None => true,
            })
            .cloned()
            .collect()
    }

    pub(crate) fn cached_shape(&self, shape_id: &str) -> Option<Arc<ShapePolyline>> {
        self.shape_cache.lock().unwrap().get(shape_id).cloned()
    }

    pub(crate) fn cache_shape(&self, shape: Arc<ShapePolyline>) {
        self.shape_cache
            .lock()
            .unwrap()
            .put(shape.shape_id.clone(), shape);
    }

    #[cfg(test)]
    pub(crate) fn insert_dataset(&self, operator: &str, dataset: Dataset) {
        self.loaded
            .write()
            .unwrap()
            .insert(operator.to_string(), Arc::new(dataset));
    }
}

fn start_load(source: Arc<dyn ArchiveSource>, operator: &str) -> LoadFuture {
    let operator = operator.to_string();
    async move {
        info!("loading dataset for {operator}");
        let bytes = match source.fetch(&operator).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to fetch dataset for {operator}: {e}");
                return None;
            }
        };
        match loader::parse_dataset(&operator, &bytes) {
            Ok(dataset) => Some(Arc::new(dataset)),
            Err(e) => {
                warn!("failed to parse dataset for {operator}: {e}");
                None
            }
        }
    }
    .boxed()
    .shared()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Source for cache-only tests; resolution must never reach it.
    struct UnusedSource;

    impl ArchiveSource for UnusedSource {
        fn fetch(&self, operator: &str) -> BoxFuture<'static, Result<Vec<u8>, Error>> {
            unreachable!("cache-only test fetched operator '{operator}'")
        }
    }

    pub(crate) fn store_with(datasets: Vec<(&str, Dataset)>) -> DatasetStore {
        let store = DatasetStore::with_source(Arc::new(UnusedSource), 16);
        for (operator, dataset) in datasets {
            store.insert_dataset(operator, dataset);
        }
        store
    }
}
