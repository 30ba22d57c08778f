//! Dataset cache
//!
//! [CacheManager] holds the current [CacheEntry] behind a lock that is only taken to copy or
//! swap an `Arc`. Queries compare the live source fingerprint with the cached one and reload
//! only when it changed. Concurrent callers that need the same reload wait on one shared
//! `watch` channel instead of reloading again.
//!
//! Each reload is stamped with a generation when it starts. A reload installs its result only
//! if its generation is newer than the installed entry and not older than the last
//! invalidation. A caller that sees another reload start or install while it was listing the
//! sources lists them again, so generations follow the order in which the sources were
//! listed and readers never observe an older dataset after a newer one.

use crate::error::{error_chain, CycleStatError, LoadError, Warning};
use crate::fingerprint::Fingerprint;
use crate::loader::SourceLoader;
use crate::metrics::{CACHE_LOOKUPS, DATASET_ROWS, RELOAD_TIME_COLLECTOR};
use crate::models::{CacheOutcome, CacheStatus, InvalidateReport};
use crate::types::Dataset;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{event, Level};

/// An installed dataset plus the fingerprint of the sources it was built from
#[derive(Debug)]
pub struct CacheEntry {
    pub dataset: Arc<Dataset>,
    pub fingerprint: Fingerprint,
    /// Time at which the reload finished
    pub loaded_at: OffsetDateTime,
    /// Reload generation, increasing with every reload started
    pub generation: u64,
    /// Time spent reading and merging the sources
    pub load_time: Duration,
}

/// Dataset handed to a query
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub entry: Arc<CacheEntry>,
    pub outcome: CacheOutcome,
    /// Set when a reload failed and a previous dataset was served
    pub warning: Option<Warning>,
}

impl Snapshot {
    pub fn dataset(&self) -> &Dataset {
        &self.entry.dataset
    }
}

type ReloadResult = Result<Arc<CacheEntry>, Arc<LoadError>>;

/// A reload that has been started and not yet finished
struct Inflight {
    fingerprint: Fingerprint,
    generation: u64,
    receiver: watch::Receiver<Option<ReloadResult>>,
}

struct ReloadState {
    inflight: Option<Inflight>,
    next_generation: u64,
    /// Bumped whenever a reload starts or installs.
    epoch: u64,
    /// Reloads started before the last invalidation have a generation below this.
    floor: u64,
}

struct Inner {
    loader: SourceLoader,
    current: RwLock<Option<Arc<CacheEntry>>>,
    state: Mutex<ReloadState>,
}

/// Owns the current dataset and reloads it when the sources change.
///
/// Cheap to clone; clones share the same cache.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

impl CacheManager {
    /// Return a new, empty CacheManager.
    pub fn new(loader: SourceLoader) -> Self {
        Self {
            inner: Arc::new(Inner {
                loader,
                current: RwLock::new(None),
                state: Mutex::new(ReloadState {
                    inflight: None,
                    next_generation: 1,
                    epoch: 0,
                    floor: 0,
                }),
            }),
        }
    }

    /// Returns the installed entry without checking freshness.
    pub fn current(&self) -> Option<Arc<CacheEntry>> {
        self.inner.current()
    }

    /// Returns a dataset that reflects the sources as they are now.
    ///
    /// Reloads when the live fingerprint differs from the cached one. If reloading fails and a
    /// dataset is cached, the cached dataset is returned with a [Warning::StaleData].
    #[tracing::instrument(level = "DEBUG", skip(self))]
    pub async fn get_current_dataset(&self) -> Result<Snapshot, CycleStatError> {
        let (receiver, outcome) = loop {
            let epoch = self.inner.lock_state().epoch;
            let live = match self.live_fingerprint().await? {
                Ok(live) => live,
                Err(error) => return self.degrade(Arc::new(error)),
            };

            let mut state = self.inner.lock_state();
            if state.epoch != epoch {
                // Another reload started or installed while the sources were listed, so `live`
                // may already be outdated.
                event!(Level::DEBUG, "sources changed while listing, listing again");
                continue;
            }
            // Read under the state lock so a reload finishing now is either visible here or
            // still registered as in flight.
            if let Some(entry) = self.inner.current() {
                if entry.fingerprint == live {
                    return Ok(self.record(entry, CacheOutcome::Hit, None));
                }
            }
            let joinable = state
                .inflight
                .as_ref()
                .filter(|inflight| inflight.fingerprint == live)
                .map(|inflight| (inflight.generation, inflight.receiver.clone()));
            if let Some((generation, receiver)) = joinable {
                event!(Level::DEBUG, generation, "joining reload");
                break (receiver, CacheOutcome::Coalesced);
            }
            break (self.start_reload(&mut state, live), CacheOutcome::Miss);
        };

        match wait(receiver).await {
            Ok(entry) => Ok(self.record(entry, outcome, None)),
            Err(error) => self.degrade(error),
        }
    }

    /// Returns the state of the cache and whether it matches the sources as they are now.
    pub async fn cache_status(&self) -> Result<CacheStatus, CycleStatError> {
        let live = self.live_fingerprint().await?;
        let entry = self.inner.current();
        let live = match live {
            Ok(live) => Some(live),
            Err(error) => {
                event!(Level::WARN, error = %error_chain(&error), "failed to list sources");
                None
            }
        };
        let valid = match (&entry, &live) {
            (Some(entry), Some(live)) => entry.fingerprint == *live,
            _ => false,
        };
        Ok(CacheStatus {
            cached: entry.is_some(),
            fingerprint: entry.as_ref().map(|e| e.fingerprint.digest().to_string()),
            loaded_at: entry.as_ref().map(|e| format_time(e.loaded_at)),
            row_count: entry.as_ref().map_or(0, |e| e.dataset.len()),
            source_count: entry.as_ref().map_or(0, |e| e.fingerprint.len()),
            generation: entry.as_ref().map(|e| e.generation),
            load_ms: entry.as_ref().map(|e| e.load_time.as_secs_f64() * 1000.0),
            live_fingerprint: live.map(|l| l.digest().to_string()),
            valid,
        })
    }

    /// Discard the installed entry and any reload in flight.
    ///
    /// The next call to [CacheManager::get_current_dataset] reloads unconditionally. Readers
    /// already holding the discarded dataset keep it.
    pub fn force_invalidate(&self) -> InvalidateReport {
        let had_dataset = {
            let mut state = self.inner.lock_state();
            state.floor = state.next_generation;
            state.inflight = None;
            self.inner.write_current().take().is_some()
        };
        DATASET_ROWS.set(0);
        event!(Level::INFO, had_dataset, "cache invalidated");
        InvalidateReport {
            had_dataset,
            invalidated_at: format_time(OffsetDateTime::now_utc()),
        }
    }

    /// Discover sources on the blocking thread pool.
    ///
    /// The outer error is a failure to run the task, the inner one a failure to list sources.
    async fn live_fingerprint(&self) -> Result<Result<Fingerprint, LoadError>, CycleStatError> {
        let inner = self.inner.clone();
        Ok(tokio::task::spawn_blocking(move || inner.loader.fingerprint()).await?)
    }

    /// Register a reload for `live` and run it in a detached blocking task.
    fn start_reload(
        &self,
        state: &mut ReloadState,
        live: Fingerprint,
    ) -> watch::Receiver<Option<ReloadResult>> {
        let generation = state.next_generation;
        state.next_generation += 1;
        state.epoch += 1;
        let (sender, receiver) = watch::channel(None);
        state.inflight = Some(Inflight {
            fingerprint: live.clone(),
            generation,
            receiver: receiver.clone(),
        });
        event!(Level::INFO, generation, fingerprint = live.digest(), "reloading dataset");

        let inner = self.inner.clone();
        // Not awaited: the reload completes and installs even if every caller goes away.
        tokio::task::spawn_blocking(move || {
            let _guard = InflightGuard {
                inner: &inner,
                generation,
            };
            let result = inner.reload(live, generation);
            sender.send_replace(Some(result));
        });
        receiver
    }

    /// Serve the installed entry after a failure, or fail if there is none.
    fn degrade(&self, error: Arc<LoadError>) -> Result<Snapshot, CycleStatError> {
        let reason = error_chain(error.as_ref());
        match self.inner.current() {
            Some(entry) => {
                event!(Level::WARN, %reason, "serving stale dataset");
                let warning = Warning::StaleData { reason };
                Ok(self.record(entry, CacheOutcome::Stale, Some(warning)))
            }
            None => Err(CycleStatError::Load(error)),
        }
    }

    fn record(
        &self,
        entry: Arc<CacheEntry>,
        outcome: CacheOutcome,
        warning: Option<Warning>,
    ) -> Snapshot {
        CACHE_LOOKUPS
            .with_label_values(&[&outcome.to_string()])
            .inc();
        Snapshot {
            entry,
            outcome,
            warning,
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, ReloadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Option<Arc<CacheEntry>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write_current(&self) -> RwLockWriteGuard<'_, Option<Arc<CacheEntry>>> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the sources of `fingerprint` and install the result.
    ///
    /// Returns the entry readers should use: the new one, or a newer one installed meanwhile.
    fn reload(&self, fingerprint: Fingerprint, generation: u64) -> ReloadResult {
        let started = Instant::now();
        let loaded = self.loader.load(fingerprint.sources());
        let load_time = started.elapsed();
        let status = if loaded.is_ok() { "ok" } else { "error" };
        RELOAD_TIME_COLLECTOR
            .with_label_values(&[status])
            .observe(load_time.as_secs_f64());

        let dataset = match loaded {
            Ok(dataset) => dataset,
            Err(error) => {
                event!(
                    Level::ERROR,
                    generation,
                    error = %error_chain(&error),
                    "reload failed"
                );
                return Err(Arc::new(error));
            }
        };
        let entry = Arc::new(CacheEntry {
            dataset: Arc::new(dataset),
            fingerprint,
            loaded_at: OffsetDateTime::now_utc(),
            generation,
            load_time,
        });
        Ok(self.install(entry))
    }

    fn install(&self, entry: Arc<CacheEntry>) -> Arc<CacheEntry> {
        let mut state = self.lock_state();
        if entry.generation < state.floor {
            event!(
                Level::DEBUG,
                generation = entry.generation,
                "reload started before invalidation, not installing"
            );
            return entry;
        }
        let mut current = self.write_current();
        match current.as_ref() {
            Some(installed) if installed.generation > entry.generation => installed.clone(),
            _ => {
                let rows = entry.dataset.len();
                *current = Some(entry.clone());
                state.epoch += 1;
                DATASET_ROWS.set(i64::try_from(rows).unwrap_or(i64::MAX));
                event!(
                    Level::INFO,
                    generation = entry.generation,
                    rows,
                    sources = entry.fingerprint.len(),
                    load_ms = entry.load_time.as_secs_f64() * 1000.0,
                    "dataset installed"
                );
                entry
            }
        }
    }
}

/// Forgets the in-flight reload when the reload task ends, including by panic.
struct InflightGuard<'a> {
    inner: &'a Inner,
    generation: u64,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.lock_state();
        if state
            .inflight
            .as_ref()
            .map_or(false, |i| i.generation == self.generation)
        {
            state.inflight = None;
        }
    }
}

/// Wait for a reload to publish its result.
async fn wait(mut receiver: watch::Receiver<Option<ReloadResult>>) -> ReloadResult {
    match receiver.wait_for(Option::is_some).await {
        Ok(result) => match &*result {
            Some(result) => result.clone(),
            None => Err(Arc::new(LoadError::Interrupted)),
        },
        // The sender was dropped without a result: the reload task panicked.
        Err(_) => Err(Arc::new(LoadError::Interrupted)),
    }
}

fn format_time(time: OffsetDateTime) -> String {
    time.format(&Rfc3339)
        .unwrap_or_else(|_| time.unix_timestamp().to_string())
}
