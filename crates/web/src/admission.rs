//! Run admission
//!
//! At most one checkout may run at a time. [`RunGuard::try_acquire`] hands
//! out a [`RunPermit`] to the first caller and refuses everyone else until
//! that permit is dropped. Dropping is the release, so a run that errors,
//! panics or is abandoned still frees the guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;
use vouchflow_common::{PaymentCard, RunInfo, RunOutcome, ServiceStatus, VERSION};

#[derive(Default)]
struct GuardState {
    /// Admission flag; set before `ledger.current` and cleared after it
    busy: AtomicBool,
    ledger: Mutex<Ledger>,
}

/// Everything `/status` reports, updated under one lock
#[derive(Default)]
struct Ledger {
    current: Option<RunInfo>,
    last: Option<RunOutcome>,
    started: u64,
    succeeded: u64,
    failed: u64,
}

/// Single-slot admission guard shared by all request handlers
#[derive(Clone, Default)]
pub struct RunGuard {
    inner: Arc<GuardState>,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot, or `None` when a run is already in progress.
    ///
    /// Never blocks.
    pub fn try_acquire(&self, card: PaymentCard) -> Option<RunPermit> {
        if self
            .inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let info = RunInfo {
            id: Uuid::new_v4().to_string(),
            card,
            started_at: Utc::now(),
        };
        {
            let mut ledger = self.inner.ledger.lock();
            ledger.current = Some(info.clone());
            ledger.started += 1;
        }
        debug!(run = %info.id, "Run admitted");

        Some(RunPermit {
            inner: self.inner.clone(),
            info,
            outcome: None,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    pub fn current(&self) -> Option<RunInfo> {
        self.inner.ledger.lock().current.clone()
    }

    pub fn last(&self) -> Option<RunOutcome> {
        self.inner.ledger.lock().last.clone()
    }

    /// Consistent view: `busy` is true exactly when `current_run` is set
    pub fn status(&self) -> ServiceStatus {
        let ledger = self.inner.ledger.lock();
        ServiceStatus {
            busy: ledger.current.is_some(),
            current_run: ledger.current.clone(),
            last_run: ledger.last.clone(),
            runs_started: ledger.started,
            runs_succeeded: ledger.succeeded,
            runs_failed: ledger.failed,
            version: VERSION.to_string(),
        }
    }
}

/// Proof of admission; the guard is released when this is dropped
pub struct RunPermit {
    inner: Arc<GuardState>,
    info: RunInfo,
    outcome: Option<(bool, String)>,
}

impl RunPermit {
    pub fn info(&self) -> &RunInfo {
        &self.info
    }

    /// Record how the run ended and release the guard
    pub fn release(mut self, success: bool, message: impl Into<String>) {
        self.outcome = Some((success, message.into()));
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        let (success, message) = self
            .outcome
            .take()
            .unwrap_or_else(|| (false, "Run aborted before completion".to_string()));

        {
            let mut ledger = self.inner.ledger.lock();
            if success {
                ledger.succeeded += 1;
            } else {
                ledger.failed += 1;
            }
            ledger.last = Some(RunOutcome {
                id: self.info.id.clone(),
                card: self.info.card,
                success,
                message,
                started_at: self.info.started_at,
                finished_at: Utc::now(),
            });
            ledger.current = None;
        }

        self.inner.busy.store(false, Ordering::Release);
        debug!(run = %self.info.id, "Run released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[test]
    fn test_single_admission() {
        let guard = RunGuard::new();
        let permit = guard.try_acquire(PaymentCard::MembershipRewards).unwrap();

        assert!(guard.is_busy());
        assert!(guard.try_acquire(PaymentCard::GoldCharge).is_none());
        assert_eq!(guard.current().map(|r| r.id), Some(permit.info().id.clone()));

        permit.release(true, "done");
        assert!(!guard.is_busy());
        assert!(guard.current().is_none());
        assert!(guard.try_acquire(PaymentCard::GoldCharge).is_some());
    }

    #[test]
    fn test_release_records_outcome() {
        let guard = RunGuard::new();
        guard
            .try_acquire(PaymentCard::GoldCharge)
            .unwrap()
            .release(false, "Timeout waiting for payment_otp");

        let last = guard.last().unwrap();
        assert!(!last.success);
        assert_eq!(last.card, PaymentCard::GoldCharge);
        assert_eq!(last.message, "Timeout waiting for payment_otp");

        let status = guard.status();
        assert_eq!((status.runs_started, status.runs_succeeded, status.runs_failed), (1, 0, 1));
    }

    #[test]
    fn test_drop_without_release_counts_as_failure() {
        let guard = RunGuard::new();
        drop(guard.try_acquire(PaymentCard::MembershipRewards));

        assert!(!guard.is_busy());
        let last = guard.last().unwrap();
        assert!(!last.success);
        assert!(last.message.contains("aborted"));
    }

    #[test]
    fn test_released_on_panic() {
        let guard = RunGuard::new();
        let inner = guard.clone();

        let result = std::thread::spawn(move || {
            let _permit = inner.try_acquire(PaymentCard::MembershipRewards).unwrap();
            panic!("browser crashed");
        })
        .join();

        assert!(result.is_err());
        assert!(!guard.is_busy());
        assert_eq!(guard.status().runs_failed, 1);
    }

    #[test]
    fn test_status_is_consistent_while_runs_cycle() {
        let guard = RunGuard::new();
        let cycler = guard.clone();

        let worker = std::thread::spawn(move || {
            for i in 0..2_000 {
                if let Some(permit) = cycler.try_acquire(PaymentCard::MembershipRewards) {
                    permit.release(i % 2 == 0, "done");
                }
            }
        });

        while !worker.is_finished() {
            let status = guard.status();
            assert_eq!(status.busy, status.current_run.is_some());
            let running = u64::from(status.busy);
            assert_eq!(status.runs_started, status.runs_succeeded + status.runs_failed + running);
        }
        worker.join().unwrap();

        let status = guard.status();
        assert!(!status.busy);
        assert_eq!(status.runs_started, 2_000);
    }

    #[test]
    fn test_concurrent_acquire_admits_one() {
        let guard = RunGuard::new();
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let guard = guard.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let permit = guard.try_acquire(PaymentCard::MembershipRewards);
                    let admitted = permit.is_some();
                    // hold the slot until every thread has tried
                    barrier.wait();
                    admitted
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|a| *a)
            .count();
        assert_eq!(admitted, 1);
        assert!(!guard.is_busy());
    }
}
