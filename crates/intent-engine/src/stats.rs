//! Per-replica counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated lock-free by workers
#[derive(Debug, Default)]
pub struct EngineStats {
    transitions: AtomicU64,
    promotions: AtomicU64,
    cas_conflicts: AtomicU64,
    abandoned: AtomicU64,
    retries: AtomicU64,
    rejected_requests: AtomicU64,
    panics: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Phase transitions written
    pub transitions: u64,
    /// Pending requests promoted into current records
    pub promotions: u64,
    /// Writes lost to a concurrent writer
    pub cas_conflicts: u64,
    /// Passes dropped after ownership loss
    pub abandoned: u64,
    /// Batch re-submissions after transient errors
    pub retries: u64,
    /// Pending requests discarded as inapplicable
    pub rejected_requests: u64,
    /// Passes cut short by a panic
    pub panics: u64,
}

impl StatsSnapshot {
    /// Field-wise sum
    #[must_use]
    pub fn merged(self, other: Self) -> Self {
        Self {
            transitions: self.transitions + other.transitions,
            promotions: self.promotions + other.promotions,
            cas_conflicts: self.cas_conflicts + other.cas_conflicts,
            abandoned: self.abandoned + other.abandoned,
            retries: self.retries + other.retries,
            rejected_requests: self.rejected_requests + other.rejected_requests,
            panics: self.panics + other.panics,
        }
    }
}

impl EngineStats {
    #[inline]
    pub(crate) fn transition(&self) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn cas_conflict(&self) {
        self.cas_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn rejected_request(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn panicked(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transitions: self.transitions.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            cas_conflicts: self.cas_conflicts.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
        }
    }
}
