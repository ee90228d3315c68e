//! OTP rendezvous
//!
//! The automation run and whoever relays the SMS never talk to each other
//! directly. Both reach the state store, so the run polls it until a fresh
//! secret of the requested kind shows up.
//!
//! ```text
//!            ┌──────────── Snapshot: absent / stale / !ok ─────────┐
//!            │             (reset errors, sleep poll_interval)     │
//!            ▼                                                     │
//!   ──► WAITING ── elapsed >= deadline ──────────────► EXPIRED_DEADLINE
//!            │ ▲
//!            │ └──── Failure, errors < max (sleep error_backoff)
//!            │
//!            ├──── Failure, errors == max ───────────► ERROR_EXHAUSTED
//!            │
//!            └──── Snapshot: ok, present, fresh ─────► FOUND
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::error::RendezvousError;
use crate::store::StateStore;
use crate::types::{mask_secret, FetchOutcome, SecretKind, SecretLookup};

/// Polling behaviour for a rendezvous
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Sleep between well-formed but not yet actionable responses
    pub poll_interval: Duration,
    /// Sleep after a transport failure; longer than `poll_interval`
    pub error_backoff: Duration,
    /// Consecutive transport failures that abort the wait
    pub max_consecutive_errors: u32,
    /// Grace period before the first poll, counted against the deadline
    pub initial_wait: Duration,
    /// Extra validity granted to `expires_at` for clock drift
    pub clock_skew_tolerance: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(10),
            max_consecutive_errors: 3,
            initial_wait: Duration::from_secs(2),
            clock_skew_tolerance: Duration::ZERO,
        }
    }
}

/// Where a single rendezvous currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Waiting,
    Found,
    ExpiredDeadline,
    ErrorExhausted,
    Cancelled,
}

/// Bookkeeping for one `await_secret` call
#[derive(Debug, Clone)]
pub struct PollAttempt {
    pub started: Instant,
    pub deadline: Duration,
    pub attempts: u32,
    pub consecutive_errors: u32,
    pub state: PollState,
}

impl PollAttempt {
    fn start(now: Instant, deadline: Duration) -> Self {
        Self {
            started: now,
            deadline,
            attempts: 0,
            consecutive_errors: 0,
            state: PollState::Waiting,
        }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_sub(self.elapsed(now))
    }
}

enum Transition {
    Found(String),
    Retry(Duration),
    Fail(RendezvousError),
}

/// Anything that can hand the checkout flow a secret of a given kind
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Wait for `kind` using the source's own deadline for it
    async fn wait_for(&self, kind: SecretKind) -> Result<String, RendezvousError>;
}

/// Polls a [`StateStore`] until a fresh secret appears
pub struct Rendezvous<S, C = TokioClock> {
    store: S,
    clock: C,
    config: PollerConfig,
    deadlines: HashMap<SecretKind, Duration>,
    cancel: CancellationToken,
}

impl<S: StateStore> Rendezvous<S, TokioClock> {
    pub fn new(store: S, config: PollerConfig) -> Self {
        Self::with_clock(store, TokioClock, config)
    }
}

impl<S: StateStore, C: Clock> Rendezvous<S, C> {
    pub fn with_clock(store: S, clock: C, config: PollerConfig) -> Self {
        Self {
            store,
            clock,
            config,
            deadlines: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Deadline used by [`SecretSource::wait_for`] for `kind`
    pub fn with_deadline(mut self, kind: SecretKind, deadline: Duration) -> Self {
        self.deadlines.insert(kind, deadline);
        self
    }

    /// Token that aborts waits started through [`SecretSource::wait_for`]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn deadline_for(&self, kind: SecretKind) -> Duration {
        self.deadlines
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_deadline())
    }

    /// Wait until the store holds a fresh `kind` secret or `deadline` passes.
    pub async fn await_secret(&self, kind: SecretKind, deadline: Duration) -> Result<String, RendezvousError> {
        self.await_secret_with_cancel(kind, deadline, &CancellationToken::new())
            .await
    }

    /// Like [`await_secret`](Self::await_secret), but gives up as soon as
    /// `cancel` fires.
    pub async fn await_secret_with_cancel(
        &self,
        kind: SecretKind,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, RendezvousError> {
        let mut attempt = PollAttempt::start(self.clock.now(), deadline);
        info!(%kind, deadline_secs = deadline.as_secs(), "Waiting for {} from state store", kind);

        if !self.config.initial_wait.is_zero() {
            debug!("Initial wait of {:?} before first check", self.config.initial_wait);
            self.pause(&mut attempt, self.config.initial_wait, kind, cancel).await?;
        }

        loop {
            if cancel.is_cancelled() {
                attempt.state = PollState::Cancelled;
                return Err(RendezvousError::Cancelled { kind });
            }

            match self.poll_once(&mut attempt, kind).await {
                Transition::Found(value) => {
                    attempt.state = PollState::Found;
                    info!(
                        %kind,
                        attempts = attempt.attempts,
                        elapsed_ms = attempt.elapsed(self.clock.now()).as_millis() as u64,
                        "{} found ({})",
                        kind,
                        mask_secret(&value)
                    );
                    return Ok(value);
                }
                Transition::Fail(err) => {
                    warn!(%kind, state = ?attempt.state, attempts = attempt.attempts, "{}", err);
                    return Err(err);
                }
                Transition::Retry(delay) => {
                    self.pause(&mut attempt, delay, kind, cancel).await?;
                }
            }
        }
    }

    /// One cycle of the WAITING state
    async fn poll_once(&self, attempt: &mut PollAttempt, kind: SecretKind) -> Transition {
        let elapsed = attempt.elapsed(self.clock.now());
        if elapsed >= attempt.deadline {
            attempt.state = PollState::ExpiredDeadline;
            return Transition::Fail(RendezvousError::Timeout { kind, waited: elapsed });
        }

        attempt.attempts += 1;
        debug!(%kind, attempt = attempt.attempts, "Checking for {}", kind);

        match self.store.fetch_snapshot().await {
            FetchOutcome::Snapshot(snapshot) => {
                attempt.consecutive_errors = 0;
                let now = self.clock.wall_now();
                match snapshot.usable_secret(kind, now, self.config.clock_skew_tolerance) {
                    SecretLookup::Usable(value) => return Transition::Found(value.to_string()),
                    SecretLookup::Stale { expired_at } => {
                        info!(%kind, %expired_at, "{} has expired, waiting for a fresh one", kind);
                    }
                    SecretLookup::Absent => debug!(%kind, "No {} found yet", kind),
                    SecretLookup::NotOk => debug!("State store reported no valid state"),
                }
                Transition::Retry(self.config.poll_interval)
            }
            FetchOutcome::Failure(failure) => {
                attempt.consecutive_errors += 1;
                warn!(
                    %kind,
                    consecutive_errors = attempt.consecutive_errors,
                    max = self.config.max_consecutive_errors,
                    "Error checking for {}: {}",
                    kind,
                    failure
                );
                if attempt.consecutive_errors >= self.config.max_consecutive_errors {
                    attempt.state = PollState::ErrorExhausted;
                    Transition::Fail(RendezvousError::Exhausted {
                        kind,
                        attempts: attempt.consecutive_errors,
                    })
                } else {
                    Transition::Retry(self.config.error_backoff)
                }
            }
        }
    }

    /// Sleep for `delay`, clamped to the time left before the deadline.
    async fn pause(
        &self,
        attempt: &mut PollAttempt,
        delay: Duration,
        kind: SecretKind,
        cancel: &CancellationToken,
    ) -> Result<(), RendezvousError> {
        let delay = delay.min(attempt.remaining(self.clock.now()));
        if delay.is_zero() {
            return Ok(());
        }

        tokio::select! {
            _ = self.clock.sleep(delay) => Ok(()),
            _ = cancel.cancelled() => {
                attempt.state = PollState::Cancelled;
                Err(RendezvousError::Cancelled { kind })
            }
        }
    }
}

#[async_trait]
impl<S: StateStore, C: Clock> SecretSource for Rendezvous<S, C> {
    async fn wait_for(&self, kind: SecretKind) -> Result<String, RendezvousError> {
        self.await_secret_with_cancel(kind, self.deadline_for(kind), &self.cancel)
            .await
    }
}
