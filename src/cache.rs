//! Short-lived plan dedupe cache.
//!
//! Repeated questions against the same schema inside a small window (page
//! reloads, double-clicks, chat retries) should not recompute the plan or
//! trigger a second backend call. The cache maps a key derived from the
//! sorted schema column names and the literal question text to the plan
//! computed for it, with a fixed TTL. Expired entries are purged lazily by
//! `sweep`, which the owning request layer runs before each lookup.
//!
//! Time is passed in, never read: the owner holds the `Clock`, so the TTL
//! behavior is testable without sleeping.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use crate::plan::Plan;
use crate::schema::Schema;

pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

/// Source of "now" for cache expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct CacheEntry {
    plan: Plan,
    inserted_at: Instant,
}

pub struct PlanCache {
    entries: HashMap<u64, CacheEntry>,
    ttl: Duration,
}

impl PlanCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: HashMap::new(), ttl }
    }

    /// Cache key for a (schema, question) pair: sorted column names joined
    /// by `|`, plus the question verbatim.
    pub fn key(schema: &Schema, question: &str) -> u64 {
        let mut names = schema.names();
        names.sort();
        let mut hasher = DefaultHasher::new();
        names.join("|").hash(&mut hasher);
        question.hash(&mut hasher);
        hasher.finish()
    }

    /// Plan cached under `key`, unless its entry has outlived the TTL.
    pub fn lookup(&self, key: u64, now: Instant) -> Option<Plan> {
        self.entries
            .get(&key)
            .filter(|e| now.duration_since(e.inserted_at) < self.ttl)
            .map(|e| e.plan.clone())
    }

    pub fn insert(&mut self, key: u64, plan: Plan, now: Instant) {
        self.entries.insert(key, CacheEntry { plan, inserted_at: now });
    }

    /// Drop every entry older than the TTL.
    pub fn sweep(&mut self, now: Instant) {
        self.entries
            .retain(|_, e| now.duration_since(e.inserted_at) < self.ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
