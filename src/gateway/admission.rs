//! Identify Admission Gate
//!
//! Bounds how many shards of one application may be in the identify
//! handshake at once. A held gate releases on its own after the hold
//! timeout, or sooner (or later) when the gateway manager reports the
//! cooldown the platform asked for.
//!
//! Every release restores the whole permit pool: the platform enforces one
//! cooldown window per application, not one per handshake.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::config::DEFAULT_HOLD_TIMEOUT_SECS;
use super::error::GatewayError;
use crate::metrics;

/// Identify gate for one application
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    inner: Arc<GateInner>,
}

#[derive(Debug)]
struct GateInner {
    application_id: u64,
    max_concurrency: usize,
    hold: Duration,
    permits: Semaphore,
    timer: Mutex<TimerState>,
}

#[derive(Debug, Default)]
struct TimerState {
    next_id: u64,
    pending: Option<PendingRelease>,
}

#[derive(Debug)]
struct PendingRelease {
    id: u64,
    handle: JoinHandle<()>,
}

impl AdmissionGate {
    /// Create a gate with the default 30 second hold
    pub fn new(application_id: u64, max_concurrency: usize) -> Result<Self, GatewayError> {
        Self::with_hold(
            application_id,
            max_concurrency,
            Duration::from_secs(DEFAULT_HOLD_TIMEOUT_SECS),
        )
    }

    /// Create a gate with a custom automatic release timeout
    pub fn with_hold(
        application_id: u64,
        max_concurrency: usize,
        hold: Duration,
    ) -> Result<Self, GatewayError> {
        if max_concurrency == 0 || max_concurrency > Semaphore::MAX_PERMITS {
            return Err(GatewayError::InvalidConcurrency(max_concurrency));
        }

        Ok(Self {
            inner: Arc::new(GateInner {
                application_id,
                max_concurrency,
                hold,
                permits: Semaphore::new(max_concurrency),
                timer: Mutex::new(TimerState::default()),
            }),
        })
    }

    /// Application this gate belongs to
    pub fn application_id(&self) -> u64 {
        self.inner.application_id
    }

    /// Permits in a full pool
    pub fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Whether any permit is taken
    pub fn is_held(&self) -> bool {
        self.available() < self.inner.max_concurrency
    }

    /// Wait for a permit before sending an identify.
    ///
    /// Arms the automatic release unless one is already pending for the
    /// current window.
    pub async fn lock(&self) -> Result<(), GatewayError> {
        let permit = self
            .inner
            .permits
            .acquire()
            .await
            .map_err(|_| GatewayError::GateClosed(self.inner.application_id))?;
        permit.forget();
        metrics::IDENTIFY_LOCKS_TOTAL.inc();

        let mut timer = self.inner.timer()?;
        if timer.pending.is_none() {
            self.schedule(&mut timer, self.inner.hold);
        }
        debug!(
            application_id = self.inner.application_id,
            available = self.available(),
            "Identify gate locked"
        );
        Ok(())
    }

    /// Release the gate after `delay` instead of the pending timeout.
    ///
    /// Does nothing if the gate is not held.
    pub fn unlock_after(&self, delay: Duration) -> Result<(), GatewayError> {
        let mut timer = self.inner.timer()?;
        if !self.is_held() {
            return Ok(());
        }

        if let Some(pending) = timer.pending.take() {
            pending.handle.abort();
        }
        self.schedule(&mut timer, delay);
        debug!(
            application_id = self.inner.application_id,
            delay_ms = delay.as_millis() as u64,
            "Identify gate release rescheduled"
        );
        Ok(())
    }

    /// Release the gate now
    pub fn release(&self) -> Result<(), GatewayError> {
        let mut timer = self.inner.timer()?;
        if let Some(pending) = timer.pending.take() {
            pending.handle.abort();
        }
        self.inner.restore("explicit");
        Ok(())
    }

    fn schedule(&self, timer: &mut TimerState, delay: Duration) {
        let id = timer.next_id;
        timer.next_id += 1;

        let gate: Weak<GateInner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(gate) = gate.upgrade() {
                gate.expire(id);
            }
        });
        timer.pending = Some(PendingRelease { id, handle });
    }
}

impl GateInner {
    fn timer(&self) -> Result<MutexGuard<'_, TimerState>, GatewayError> {
        self.timer
            .lock()
            .map_err(|_| GatewayError::LockPoisoned(self.application_id))
    }

    /// Timer callback; a superseded timer finds another id pending and
    /// leaves the gate alone.
    fn expire(&self, id: u64) {
        let Ok(mut timer) = self.timer() else {
            return;
        };
        if timer.pending.as_ref().map(|p| p.id) != Some(id) {
            trace!(application_id = self.application_id, id, "Superseded release timer fired");
            return;
        }
        timer.pending = None;
        self.restore("timer");
    }

    /// Refill the pool to exactly `max_concurrency`. Callers hold the timer lock.
    fn restore(&self, trigger: &'static str) {
        let available = self.permits.available_permits();
        if available < self.max_concurrency {
            self.permits.add_permits(self.max_concurrency - available);
        }
        metrics::IDENTIFY_RELEASES_TOTAL
            .with_label_values(&[trigger])
            .inc();
        debug!(application_id = self.application_id, trigger, "Identify gate released");
    }
}

impl Drop for GateInner {
    fn drop(&mut self) {
        if let Ok(timer) = self.timer.get_mut() {
            if let Some(pending) = timer.pending.take() {
                pending.handle.abort();
            }
        }
    }
}
