//! Serialization of radio-exclusive adapter operations.
//!
//! The BLE adapter can drive only one scan or connection attempt at a time;
//! data reception on established links is unaffected. All radio-exclusive
//! calls route through a single [`RadioGate`] instead of touching the
//! adapter ad hoc.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::error::{Error, Result};

/// Gate serializing access to the shared radio.
///
/// Waiters are granted the gate in FIFO order of request (the underlying
/// `tokio::sync::Semaphore` is fair). A queued wait is abandoned without
/// side effects by dropping the `acquire` future, which is how cancelled
/// sessions leave the queue.
#[derive(Debug)]
pub struct RadioGate {
    permits: Arc<Semaphore>,
    active: AtomicUsize,
}

impl RadioGate {
    /// Create a gate admitting one radio operation at a time.
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
            active: AtomicUsize::new(0),
        }
    }

    /// Wait for exclusive radio access.
    ///
    /// The returned permit releases the gate when dropped.
    pub async fn acquire(&self, operation: &'static str) -> Result<RadioPermit<'_>> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::Cancelled)?;

        let previous = self.active.fetch_add(1, Ordering::SeqCst);
        debug_assert_eq!(previous, 0, "radio gate admitted overlapping operations");
        trace!(operation, "radio gate acquired");

        Ok(RadioPermit {
            gate: self,
            operation,
            _permit: permit,
        })
    }

    /// Whether a radio-exclusive operation is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }
}

impl Default for RadioGate {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for exclusive radio access.
#[derive(Debug)]
pub struct RadioPermit<'a> {
    gate: &'a RadioGate,
    operation: &'static str,
    _permit: OwnedSemaphorePermit,
}

impl Drop for RadioPermit<'_> {
    fn drop(&mut self) {
        self.gate.active.fetch_sub(1, Ordering::SeqCst);
        trace!(operation = self.operation, "radio gate released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_gate_starts_idle() {
        let gate = RadioGate::new();
        assert!(!gate.is_busy());

        let permit = gate.acquire("scan").await.unwrap();
        assert!(gate.is_busy());
        drop(permit);
        assert!(!gate.is_busy());
    }

    #[tokio::test]
    async fn test_operations_never_overlap() {
        let gate = Arc::new(RadioGate::new());
        let intervals: Arc<Mutex<Vec<(u32, u32)>>> = Arc::new(Mutex::new(Vec::new()));
        let clock = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            let intervals = Arc::clone(&intervals);
            let clock = Arc::clone(&clock);
            tasks.push(tokio::spawn(async move {
                let _permit = gate.acquire("connect").await.unwrap();
                let start = clock.fetch_add(1, Ordering::SeqCst) as u32;
                tokio::time::sleep(Duration::from_millis(5)).await;
                let end = clock.fetch_add(1, Ordering::SeqCst) as u32;
                intervals.lock().unwrap().push((start, end));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Each holder must see end = start + 1 on the shared clock: any
        // overlap would interleave another holder's tick in between.
        let intervals = intervals.lock().unwrap();
        assert_eq!(intervals.len(), 8);
        for (start, end) in intervals.iter() {
            assert_eq!(*end, *start + 1, "overlapping gate intervals detected");
        }
    }

    #[tokio::test]
    async fn test_abandoned_wait_leaves_no_trace() {
        let gate = Arc::new(RadioGate::new());
        let held = gate.acquire("scan").await.unwrap();

        // A queued waiter dropped before being granted must not consume
        // the permit or leave the gate busy.
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                let _ = gate.acquire("connect").await;
            })
        };
        tokio::task::yield_now().await;
        waiter.abort();
        let _ = waiter.await;

        drop(held);
        let permit = gate.acquire("connect").await.unwrap();
        assert!(gate.is_busy());
        drop(permit);
        assert!(!gate.is_busy());
    }
}
