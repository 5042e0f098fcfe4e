//! Periodic re-dispatch of events that never got reconciled.
//!
//! A notification is fired once per event. If every dispatcher missed it,
//! or the handler chain failed, nothing would ever deliver the event again;
//! the resync loop closes that gap by scanning for old un-reconciled events.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reconcile_types::{BatchSize, EventStore, EventStoreError, LockFactory};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manager::{ControllerManager, DispatchOutcome};

/// How often and how far back the resync loop looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResyncConfig {
    /// Time between scans (default: 5 minutes)
    pub interval: Duration,
    /// Events younger than this are left to their notification (default: 1 minute)
    pub min_age: Duration,
    /// Events read per page of a scan (default: 100)
    pub batch_size: BatchSize,
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            min_age: Duration::from_secs(60),
            batch_size: BatchSize::default(),
        }
    }
}

/// Counts from one resync scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// Un-reconciled events the scan found old enough to re-dispatch
    pub examined: usize,
    /// Of those, events whose re-dispatch ended in `Reconciled`
    pub reconciled: usize,
}

fn cutoff(min_age: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    TimeDelta::from_std(min_age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl<S, L> ControllerManager<S, L>
where
    S: EventStore + Sync,
    L: LockFactory + Sync,
{
    /// Re-dispatch every un-reconciled event older than `min_age`.
    ///
    /// The backlog is read in id order, `batch_size` events per page, with a
    /// cursor past the last id seen. Events that stay un-reconciled (unrouted
    /// or still failing) therefore never hide newer ones from the scan.
    pub async fn resync(
        &self,
        min_age: Duration,
        batch_size: BatchSize,
    ) -> Result<ResyncReport, EventStoreError> {
        let created_before = cutoff(min_age);
        let page_size = usize::from(batch_size);
        let mut after = None;
        let mut report = ResyncReport::default();

        loop {
            let page = self
                .store()
                .find_unreconciled(created_before, after, batch_size)
                .await?;
            let last_page = page.len() < page_size;
            report.examined += page.len();

            for event in page {
                after = Some(event.id);
                if self.handle_event_id(event.id).await == DispatchOutcome::Reconciled {
                    report.reconciled += 1;
                }
            }
            if last_page {
                return Ok(report);
            }
        }
    }

    /// Run `resync` every `config.interval` until `shutdown` is cancelled.
    ///
    /// The first scan happens one interval after start. A failed scan is
    /// logged and the loop waits for the next tick.
    pub async fn run_resync(&self, config: ResyncConfig, shutdown: &CancellationToken) {
        let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!("[resync.shutdown] resync loop cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    match self.resync(config.min_age, config.batch_size).await {
                        Ok(report) if report.examined > 0 => info!(
                            examined = report.examined,
                            reconciled = report.reconciled,
                            "[resync.scan] re-dispatched unreconciled events"
                        ),
                        Ok(_) => debug!("[resync.scan] nothing to resync"),
                        Err(error) => warn!(error = %error, "[resync.scan_failed] resync scan failed"),
                    }
                }
            }
        }
    }
}
