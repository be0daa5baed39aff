//! In-flight memory accounting for download backpressure.
//!
//! Each fetch reserves its expected body size against a shared budget
//! before the body is read; new fetch starts are deferred until enough
//! in-flight bytes have been released.

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

struct BudgetState {
    in_flight: u64,
}

struct Inner {
    capacity: u64,
    state: Mutex<BudgetState>,
    freed: Notify,
}

/// Shared in-flight memory budget.
#[derive(Clone)]
pub struct MemoryBudget {
    inner: Arc<Inner>,
}

/// RAII reservation; releases its bytes back to the budget on drop.
pub struct MemoryReservation {
    inner: Arc<Inner>,
    bytes: u64,
}

impl MemoryBudget {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity: capacity_bytes,
                state: Mutex::new(BudgetState { in_flight: 0 }),
                freed: Notify::new(),
            }),
        }
    }

    /// Bytes currently reserved.
    pub fn in_flight(&self) -> u64 {
        self.inner.state.lock().expect("budget mutex poisoned").in_flight
    }

    /// Reserve `bytes` of in-flight capacity, waiting while the budget is
    /// exhausted. A request larger than the whole budget is clamped to the
    /// capacity so it can still proceed (alone) rather than deadlock.
    pub async fn reserve(&self, bytes: u64) -> MemoryReservation {
        let bytes = bytes.min(self.inner.capacity).max(1);
        loop {
            let notified = self.inner.freed.notified();
            {
                let mut state = self.inner.state.lock().expect("budget mutex poisoned");
                if state.in_flight + bytes <= self.inner.capacity || state.in_flight == 0 {
                    state.in_flight += bytes;
                    return MemoryReservation {
                        inner: self.inner.clone(),
                        bytes,
                    };
                }
            }
            notified.await;
        }
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().expect("budget mutex poisoned");
        state.in_flight = state.in_flight.saturating_sub(self.bytes);
        drop(state);
        self.inner.freed.notify_waiters();
    }
}
