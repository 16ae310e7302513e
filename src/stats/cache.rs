//! Result Cache
//!
//! Holds the most recent statistics document and the time it was computed.
//! A stale or forced read runs a new aggregation pass; concurrent callers that
//! find the slot stale wait on the same pass instead of starting their own.

use crate::models::StatisticsDocument;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Producer of statistics documents; in production the aggregator.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn compute(&self) -> Result<StatisticsDocument>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// A published document and when it was computed.
#[derive(Debug, Clone)]
pub struct CachedStats {
    pub document: Arc<StatisticsDocument>,
    pub computed_at: DateTime<Utc>,
}

type PassOutcome = std::result::Result<Arc<StatisticsDocument>, Arc<anyhow::Error>>;

struct Inner {
    source: Arc<dyn StatsSource>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    slot: RwLock<Option<CachedStats>>,
    // Serialises passes; held for the whole duration of one.
    refresh_lock: tokio::sync::Mutex<()>,
    passes: AtomicU64,
    // Passes finished, successful or not. Written under `refresh_lock`.
    finished: AtomicU64,
    // Outcome of the last finished pass. Written under `refresh_lock`.
    last_outcome: Mutex<Option<PassOutcome>>,
}

impl Inner {
    fn fresh_document(&self) -> Option<Arc<StatisticsDocument>> {
        let slot = self.slot.read();
        let cached = slot.as_ref()?;
        // A clock that went backwards counts as no time elapsed.
        let elapsed = (self.clock.now() - cached.computed_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        (elapsed < self.ttl).then(|| Arc::clone(&cached.document))
    }

    async fn refresh(&self, force_refresh: bool) -> Result<Arc<StatisticsDocument>> {
        let waiting_since = self.finished.load(Ordering::Acquire);
        let _pass = self.refresh_lock.lock().await;

        if !force_refresh {
            // A pass finished while we waited for the lock: take its outcome,
            // failure included, instead of starting another one.
            if self.finished.load(Ordering::Acquire) != waiting_since {
                let last = self.last_outcome.lock().clone();
                if let Some(outcome) = last {
                    debug!("served by a pass completed while waiting");
                    return outcome.map_err(|e| anyhow!("aggregation pass failed: {e:#}"));
                }
            }
            if let Some(document) = self.fresh_document() {
                return Ok(document);
            }
        }

        let pass = self.passes.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();
        debug!(pass, force_refresh, "starting aggregation pass");

        let computed = self.source.compute().await;
        let document = match computed {
            Ok(document) => Arc::new(document),
            Err(e) => {
                let e = Arc::new(e);
                *self.last_outcome.lock() = Some(Err(Arc::clone(&e)));
                self.finished.fetch_add(1, Ordering::Release);
                return Err(anyhow!("aggregation pass failed: {e:#}"));
            }
        };
        let computed_at = self.clock.now();
        *self.slot.write() = Some(CachedStats {
            document: Arc::clone(&document),
            computed_at,
        });
        *self.last_outcome.lock() = Some(Ok(Arc::clone(&document)));
        self.finished.fetch_add(1, Ordering::Release);

        info!(
            pass,
            elapsed_ms = started.elapsed().as_millis() as u64,
            computed_at = %computed_at,
            "statistics cache updated"
        );
        Ok(document)
    }
}

#[derive(Clone)]
pub struct StatsCache {
    inner: Arc<Inner>,
}

impl StatsCache {
    pub fn new(source: Arc<dyn StatsSource>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                clock,
                ttl,
                slot: RwLock::new(None),
                refresh_lock: tokio::sync::Mutex::new(()),
                passes: AtomicU64::new(0),
                finished: AtomicU64::new(0),
                last_outcome: Mutex::new(None),
            }),
        }
    }

    pub fn with_system_clock(source: Arc<dyn StatsSource>, ttl: Duration) -> Self {
        Self::new(source, Arc::new(SystemClock), ttl)
    }

    /// True iff a document exists and is younger than the TTL.
    pub fn is_fresh(&self) -> bool {
        self.inner.fresh_document().is_some()
    }

    /// The last published document, regardless of age.
    pub fn peek(&self) -> Option<CachedStats> {
        self.inner.slot.read().clone()
    }

    /// Number of aggregation passes started so far.
    pub fn passes(&self) -> u64 {
        self.inner.passes.load(Ordering::Relaxed)
    }

    /// Returns the cached document when fresh, otherwise runs (or joins) a pass.
    ///
    /// The pass runs on its own task: dropping the returned future does not
    /// cancel it, and the slot is still updated when it finishes. On failure the
    /// previous document stays in place.
    pub async fn get(&self, force_refresh: bool) -> Result<Arc<StatisticsDocument>> {
        if !force_refresh {
            if let Some(document) = self.inner.fresh_document() {
                return Ok(document);
            }
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.refresh(force_refresh).await })
            .await
            .context("aggregation pass task failed")?
    }
}
