//! Advisory lock metrics
//!
//! Counts lock outcomes per [`LockCategory`] and how long acquired locks
//! were held. Counters are lock-free; read them through
//! [`LockMetrics::snapshot`].

#![allow(clippy::cast_possible_truncation)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reconcile_types::LockCategory;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
struct CategoryCounters {
    acquired: AtomicU64,
    contended: AtomicU64,
    lock_errors: AtomicU64,
    released: AtomicU64,
    unlock_errors: AtomicU64,
    held_micros: AtomicU64,
}

/// Live lock counters shared by a lock factory and its clones.
#[derive(Debug, Default)]
pub struct LockMetrics {
    categories: [CategoryCounters; 3],
}

const fn slot(category: LockCategory) -> usize {
    match category {
        LockCategory::Migrations => 0,
        LockCategory::Dinosaurs => 1,
        LockCategory::Events => 2,
    }
}

impl LockMetrics {
    /// All counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, category: LockCategory) -> &CategoryCounters {
        &self.categories[slot(category)]
    }

    /// Count a granted lock.
    pub fn record_acquired(&self, category: LockCategory) {
        let _ = self.counters(category).acquired.fetch_add(1, Ordering::Relaxed);
    }

    /// A non-blocking attempt found the lock held elsewhere.
    pub fn record_contended(&self, category: LockCategory) {
        let _ = self.counters(category).contended.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an attempt that failed to begin or to run.
    pub fn record_lock_error(&self, category: LockCategory) {
        let _ = self.counters(category).lock_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a released lock held for `held`.
    pub fn record_released(&self, category: LockCategory, held: Duration) {
        let counters = self.counters(category);
        let _ = counters.released.fetch_add(1, Ordering::Relaxed);
        let _ = counters
            .held_micros
            .fetch_add(u64::try_from(held.as_micros()).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    /// Count a release whose commit failed.
    pub fn record_unlock_error(&self, category: LockCategory) {
        let _ = self.counters(category).unlock_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters out.
    pub fn snapshot(&self) -> LockMetricsSnapshot {
        LockMetricsSnapshot {
            categories: LockCategory::ALL
                .into_iter()
                .map(|category| {
                    let counters = self.counters(category);
                    let released = counters.released.load(Ordering::Relaxed);
                    let held_micros = counters.held_micros.load(Ordering::Relaxed);
                    CategoryLockMetrics {
                        category,
                        acquired: counters.acquired.load(Ordering::Relaxed),
                        contended: counters.contended.load(Ordering::Relaxed),
                        lock_errors: counters.lock_errors.load(Ordering::Relaxed),
                        released,
                        unlock_errors: counters.unlock_errors.load(Ordering::Relaxed),
                        total_held: Duration::from_micros(held_micros),
                        average_held: Duration::from_micros(
                            held_micros.checked_div(released).unwrap_or(0),
                        ),
                    }
                })
                .collect(),
            taken_at: Utc::now(),
        }
    }
}

/// Point-in-time copy of [`LockMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockMetricsSnapshot {
    /// One entry per lock category
    pub categories: Vec<CategoryLockMetrics>,
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
}

impl LockMetricsSnapshot {
    /// Counters for `category`.
    pub fn category(&self, category: LockCategory) -> Option<&CategoryLockMetrics> {
        self.categories
            .iter()
            .find(|metrics| metrics.category == category)
    }
}

/// Counters for one lock category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLockMetrics {
    /// Category these counters cover
    pub category: LockCategory,
    /// Locks granted
    pub acquired: u64,
    /// Non-blocking attempts that found the lock taken
    pub contended: u64,
    /// Attempts that failed to begin or to run the lock statement
    pub lock_errors: u64,
    /// Granted locks that were released
    pub released: u64,
    /// Releases whose commit failed
    pub unlock_errors: u64,
    /// Time released locks were held, summed
    pub total_held: Duration,
    /// `total_held` divided by `released`
    pub average_held: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_kept_per_category() {
        let metrics = LockMetrics::new();
        metrics.record_acquired(LockCategory::Events);
        metrics.record_acquired(LockCategory::Events);
        metrics.record_contended(LockCategory::Events);
        metrics.record_lock_error(LockCategory::Dinosaurs);

        let snapshot = metrics.snapshot();
        let events = snapshot.category(LockCategory::Events).expect("events metrics");
        assert_eq!(events.acquired, 2);
        assert_eq!(events.contended, 1);
        let dinosaurs = snapshot
            .category(LockCategory::Dinosaurs)
            .expect("dinosaurs metrics");
        assert_eq!(dinosaurs.lock_errors, 1);
        assert_eq!(dinosaurs.acquired, 0);
    }

    #[test]
    fn average_hold_time_divides_by_releases() {
        let metrics = LockMetrics::new();
        metrics.record_released(LockCategory::Migrations, Duration::from_millis(10));
        metrics.record_released(LockCategory::Migrations, Duration::from_millis(30));

        let snapshot = metrics.snapshot();
        let migrations = snapshot
            .category(LockCategory::Migrations)
            .expect("migrations metrics");
        assert_eq!(migrations.total_held, Duration::from_millis(40));
        assert_eq!(migrations.average_held, Duration::from_millis(20));
        assert_eq!(
            snapshot
                .category(LockCategory::Events)
                .expect("events metrics")
                .average_held,
            Duration::ZERO
        );
    }

    #[test]
    fn oversized_hold_time_saturates() {
        let metrics = LockMetrics::new();
        metrics.record_released(LockCategory::Dinosaurs, Duration::MAX);

        let dinosaurs = metrics.snapshot();
        let dinosaurs = dinosaurs
            .category(LockCategory::Dinosaurs)
            .expect("dinosaurs metrics");
        assert_eq!(dinosaurs.total_held, Duration::from_micros(u64::MAX));
    }

    #[test]
    fn snapshot_serializes() {
        let json = serde_json::to_value(LockMetrics::new().snapshot()).expect("serializes");
        assert_eq!(json["categories"].as_array().map(Vec::len), Some(3));
    }
}
