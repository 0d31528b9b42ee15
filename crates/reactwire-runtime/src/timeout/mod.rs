//! Client timeout tracking
//!
//! An expiry-ordered index of registered clients. The reactor consults it
//! once per loop iteration: `next_deadline()` bounds the poll wait and
//! `sweep()` evicts whoever has gone quiet for too long.
//!
//! ```text
//!   register(owner, reg) ──► index: BTreeMap<ExpiryKey, (owner, id)>   (deadline order)
//!                            owners: HashMap<RegistrationId, owner>
//!
//!   sweep(regs):  pass 1  collect keys <= now
//!                 pass 2  per key: drop index + owner entry, clear the
//!                         registration's key, then the callback (may re-register)
//! ```
//!
//! A fired registration is forgotten entirely, the same as after
//! `unregister`. The caller hands its registrations to `sweep` through
//! [`ExpiryOwners`] so their keys can be cleared.
//!
//! Time is measured in microseconds since the registry's [`Clock`] started.
//! Tests drive it with a [`ManualClock`].

mod entry;
mod registry;

pub use entry::{ExpiryConfig, ExpiryKey, ExpiryRegistration, RegistrationId};
pub use registry::{ExpiryOwners, TimeoutRegistry};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Whole microseconds in `d`, saturating at `u64::MAX`
#[inline]
pub(crate) fn saturating_micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

/// Source of "now" for the registry
pub trait Clock {
    /// Microseconds since some fixed origin; never decreases
    fn now_us(&self) -> u64;
}

/// Wall-clock time since construction
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now_us(&self) -> u64 {
        saturating_micros(self.start.elapsed())
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to an absolute time (never backwards)
    pub fn set_us(&self, us: u64) {
        self.now.fetch_max(us, Ordering::Relaxed);
    }

    pub fn advance(&self, by: Duration) {
        let by = saturating_micros(by);
        let _ = self
            .now
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |now| Some(now.saturating_add(by)));
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}
