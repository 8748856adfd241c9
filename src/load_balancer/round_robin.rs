// src/load_balancer/round_robin.rs
use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared round-robin position over a fixed-size backend list.
#[derive(Debug, Default)]
pub struct RoundRobinCursor {
    position: AtomicUsize,
}

impl RoundRobinCursor {
    pub fn new() -> Self {
        Self {
            position: AtomicUsize::new(0),
        }
    }

    pub fn position(&self) -> usize {
        self.position.load(Ordering::Acquire)
    }

    /// Scan forward from the cursor, at most once around `len` slots, for the
    /// first index accepted by `eligible`, and move the cursor just past it.
    ///
    /// The scan and the advance commit together: if another selection moved
    /// the cursor in between, the scan restarts from the new position.
    pub fn next_eligible(&self, len: usize, eligible: impl Fn(usize) -> bool) -> Option<usize> {
        if len == 0 {
            return None;
        }

        let mut current = self.position.load(Ordering::Acquire);
        loop {
            let start = current % len;
            let chosen = (0..len)
                .map(|offset| (start + offset) % len)
                .find(|&index| eligible(index))?;

            match self.position.compare_exchange_weak(
                current,
                (chosen + 1) % len,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(chosen),
                Err(actual) => current = actual,
            }
        }
    }
}
