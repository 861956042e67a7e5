//! Per-identity rate limiting gating access to the sandbox pipeline.
//!
//! A pre-condition gate, not grading logic: rejection happens before any
//! sandbox resource is allocated, protecting the finite container engine
//! from abusive load.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::CheckError;

pub struct AdmissionController {
    max_checks: u32,
    window: Duration,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl AdmissionController {
    pub fn new(max_checks: u32, window: Duration) -> Self {
        Self {
            max_checks,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admits or rejects one check attempt for `caller`. Admission counts
    /// against the caller's rolling window immediately.
    pub fn try_admit(&self, caller: &str) -> Result<(), CheckError> {
        let now = Instant::now();
        let span = self.window;
        let mut windows = self.windows.lock();

        // Evict identities whose windows have fully drained so the map does
        // not grow with every caller ever seen
        windows.retain(|_, window| {
            prune(window, now, span);
            !window.is_empty()
        });

        let window = windows.entry(caller.to_string()).or_default();
        if window.len() >= self.max_checks as usize {
            log::warn!("Caller {caller} rejected by admission gate");
            return Err(CheckError::RateLimited {
                max: self.max_checks,
                window_secs: self.window.as_secs(),
            });
        }

        window.push_back(now);
        Ok(())
    }

    #[cfg(test)]
    fn tracked_callers(&self) -> usize {
        self.windows.lock().len()
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant, span: Duration) {
    while let Some(oldest) = window.front() {
        if now.duration_since(*oldest) >= span {
            window.pop_front();
        } else {
            break;
        }
    }
}
