//! Hot-swappable limiter slot with one level of rollback.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use super::backend::{Decision, RateLimiter, Snapshot};

#[derive(Debug)]
struct Slots {
    active: Arc<dyn RateLimiter>,
    previous: Option<Arc<dyn RateLimiter>>,
}

/// Holds the active limiter and allows replacing it at runtime.
///
/// Replaced engines are never shut down here: the displaced engine stays
/// available for [`SwappableLimiter::revert`], and engines that fall out of
/// the single-step history are handed back to the caller, who decides
/// whether to shut them down.
#[derive(Debug)]
pub struct SwappableLimiter {
    slots: RwLock<Slots>,
}

impl SwappableLimiter {
    pub fn new(initial: Arc<dyn RateLimiter>) -> Self {
        Self {
            slots: RwLock::new(Slots {
                active: initial,
                previous: None,
            }),
        }
    }

    /// The limiter currently in charge of decisions.
    pub fn current(&self) -> Arc<dyn RateLimiter> {
        Arc::clone(&self.slots.read().active)
    }

    /// The limiter [`SwappableLimiter::revert`] would restore, if any.
    pub fn previous(&self) -> Option<Arc<dyn RateLimiter>> {
        self.slots.read().previous.clone()
    }

    /// Install `next` as the active limiter.
    ///
    /// The displaced limiter becomes the rollback target. Returns the limiter
    /// that was the rollback target before, which is no longer reachable
    /// from this slot.
    pub fn replace(&self, next: Arc<dyn RateLimiter>) -> Option<Arc<dyn RateLimiter>> {
        let mut slots = self.slots.write();
        info!(
            from = slots.active.name(),
            to = next.name(),
            limit = next.limit(),
            "Replacing active rate limiter"
        );
        let displaced = std::mem::replace(&mut slots.active, next);
        slots.previous.replace(displaced)
    }

    /// Restore the limiter that was active before the last
    /// [`SwappableLimiter::replace`].
    ///
    /// Returns the limiter taken out of service, or `None` when there is no
    /// history. Reverting twice in a row is a no-op the second time.
    pub fn revert(&self) -> Option<Arc<dyn RateLimiter>> {
        let mut slots = self.slots.write();
        let previous = slots.previous.take()?;
        info!(
            from = slots.active.name(),
            to = previous.name(),
            "Reverting to previous rate limiter"
        );
        Some(std::mem::replace(&mut slots.active, previous))
    }
}

impl RateLimiter for SwappableLimiter {
    fn decide(&self, identity: &str) -> Decision {
        self.current().decide(identity)
    }

    /// Forgets the identity in the active limiter and the rollback target,
    /// so a later revert can't bring its state back.
    fn forget(&self, identity: &str) {
        let slots = self.slots.read();
        slots.active.forget(identity);
        if let Some(previous) = &slots.previous {
            previous.forget(identity);
        }
    }

    /// Shuts down the active limiter and the rollback target.
    fn shutdown(&self) {
        let slots = self.slots.read();
        slots.active.shutdown();
        if let Some(previous) = &slots.previous {
            previous.shutdown();
        }
    }

    fn limit(&self) -> u64 {
        self.current().limit()
    }

    fn snapshot(&self) -> Snapshot {
        self.current().snapshot()
    }

    fn name(&self) -> &'static str {
        self.current().name()
    }
}
