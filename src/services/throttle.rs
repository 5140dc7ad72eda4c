// src/services/throttle.rs

//! Per-site dispatch gating.
//!
//! Two rules, enforced together: at most one job per site is active at any
//! instant, and successive dispatches to the same site are spaced by at
//! least the politeness delay. State lives in a site-keyed table behind a
//! plain mutex so acquiring never suspends, and a permit releases its slot
//! on drop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct SiteSlot {
    busy: bool,
    last_dispatch: Option<Instant>,
}

/// Outcome of a dispatch attempt for a site.
pub enum Gate {
    /// The site is free; the permit holds its slot until dropped.
    Ready(SitePermit),
    /// Another job for this site is in flight.
    Busy,
    /// The politeness delay has not elapsed; ready in the given duration.
    Cooldown(Duration),
}

/// Site-keyed mutual exclusion with politeness spacing.
#[derive(Clone)]
pub struct SiteThrottle {
    delay: Duration,
    slots: Arc<Mutex<HashMap<String, SiteSlot>>>,
}

impl SiteThrottle {
    /// Create a throttle with the given minimum spacing between dispatches
    /// to the same site.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Try to claim the site's dispatch slot.
    pub fn try_acquire(&self, site: &str) -> Gate {
        let mut slots = self.slots.lock().expect("throttle mutex poisoned");
        let slot = slots.entry(site.to_string()).or_default();

        if slot.busy {
            return Gate::Busy;
        }
        if let Some(last) = slot.last_dispatch {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                return Gate::Cooldown(self.delay - elapsed);
            }
        }

        slot.busy = true;
        slot.last_dispatch = Some(Instant::now());
        Gate::Ready(SitePermit {
            slots: Arc::clone(&self.slots),
            site: site.to_string(),
        })
    }
}

/// Exclusive hold on a site's dispatch slot. Dropping it frees the site
/// (the politeness clock keeps running from dispatch time).
pub struct SitePermit {
    slots: Arc<Mutex<HashMap<String, SiteSlot>>>,
    site: String,
}

impl Drop for SitePermit {
    fn drop(&mut self) {
        if let Ok(mut slots) = self.slots.lock() {
            if let Some(slot) = slots.get_mut(&self.site) {
                slot.busy = false;
            }
        }
    }
}
