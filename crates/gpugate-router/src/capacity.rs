//! Admission control.
//!
//! A backend's in-flight counter is only ever changed through this module.
//! [`CapacityTracker::admit`] hands out an [`AdmissionSlot`] guard whose `Drop`
//! releases the slot, which covers every exit path of a dispatch: success,
//! failure, panic and cancellation of the owning future.

use gpugate_common::{GateError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

use crate::backend::Backend;

#[derive(Debug, Default)]
pub struct CapacityTracker {
    admitted: AtomicU64,
    denied: AtomicU64,
    release_errors: AtomicU64,
}

/// Counters kept by the tracker itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityStats {
    pub admitted: u64,
    pub denied: u64,
    pub release_errors: u64,
}

impl CapacityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves one in-flight slot if the backend is below its ceiling.
    ///
    /// Never waits; returns `false` with no side effect when full.
    pub fn try_admit(&self, backend: &Backend) -> bool {
        if backend.try_increment_in_flight() {
            self.admitted.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Returns one slot reserved by [`try_admit`](Self::try_admit).
    ///
    /// Releasing more slots than were admitted is a bug in the caller. The
    /// counter is left at zero and the error is both logged and returned.
    pub fn release(&self, backend: &Backend) -> Result<()> {
        if backend.try_decrement_in_flight() {
            return Ok(());
        }
        self.release_errors.fetch_add(1, Ordering::Relaxed);
        error!(
            "Release without matching admission on backend {} (in-flight already 0)",
            backend.address()
        );
        Err(GateError::ReleaseWithoutAdmit(backend.address().to_string()))
    }

    /// Scoped admission: the returned guard releases the slot when dropped.
    ///
    /// A full backend yields [`GateError::AdmissionDenied`].
    pub fn admit(self: &Arc<Self>, backend: &Arc<Backend>) -> Result<AdmissionSlot> {
        if !self.try_admit(backend) {
            return Err(GateError::AdmissionDenied(backend.address().to_string()));
        }
        Ok(AdmissionSlot {
            tracker: Arc::clone(self),
            backend: Arc::clone(backend),
            released: false,
        })
    }

    pub fn stats(&self) -> CapacityStats {
        CapacityStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            release_errors: self.release_errors.load(Ordering::Relaxed),
        }
    }
}

/// One reserved in-flight slot on a backend.
#[derive(Debug)]
pub struct AdmissionSlot {
    tracker: Arc<CapacityTracker>,
    backend: Arc<Backend>,
    released: bool,
}

impl AdmissionSlot {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// Releases the slot now instead of at drop.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.tracker.release(&self.backend)
    }
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            // error already logged by the tracker
            let _ = self.tracker.release(&self.backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpugate_common::BackendSpec;
    use std::thread;

    fn backend(max: u32) -> Arc<Backend> {
        Arc::new(Backend::new(BackendSpec::new("10.0.0.1:8000", 1, max)))
    }

    #[test]
    fn test_admit_until_full() {
        let tracker = CapacityTracker::new();
        let b = backend(2);

        assert!(tracker.try_admit(&b));
        assert!(tracker.try_admit(&b));
        assert!(!tracker.try_admit(&b));
        assert_eq!(b.in_flight(), 2);

        tracker.release(&b).unwrap();
        assert!(tracker.try_admit(&b));

        let stats = tracker.stats();
        assert_eq!(stats.admitted, 3);
        assert_eq!(stats.denied, 1);
    }

    #[test]
    fn test_release_without_admit_is_error() {
        let tracker = CapacityTracker::new();
        let b = backend(2);

        let err = tracker.release(&b).unwrap_err();
        assert!(matches!(err, GateError::ReleaseWithoutAdmit(ref addr) if addr == "10.0.0.1:8000"));
        assert_eq!(b.in_flight(), 0);
        assert_eq!(tracker.stats().release_errors, 1);
    }

    #[test]
    fn test_slot_releases_on_drop() {
        let tracker = Arc::new(CapacityTracker::new());
        let b = backend(1);

        {
            let slot = tracker.admit(&b).unwrap();
            assert_eq!(slot.backend().address(), "10.0.0.1:8000");
            assert_eq!(b.in_flight(), 1);
            let err = tracker.admit(&b).unwrap_err();
            assert!(matches!(err, GateError::AdmissionDenied(ref addr) if addr == "10.0.0.1:8000"));
            assert!(err.is_transient());
            assert_eq!(tracker.stats().denied, 1);
        }
        assert_eq!(b.in_flight(), 0);
    }

    #[test]
    fn test_explicit_release_does_not_double_release() {
        let tracker = Arc::new(CapacityTracker::new());
        let b = backend(1);

        let slot = tracker.admit(&b).unwrap();
        slot.release().unwrap();
        assert_eq!(b.in_flight(), 0);
        assert_eq!(tracker.stats().release_errors, 0);
    }

    #[tokio::test]
    async fn test_slot_released_when_future_cancelled() {
        let tracker = Arc::new(CapacityTracker::new());
        let b = backend(1);

        let task = {
            let tracker = tracker.clone();
            let b = b.clone();
            tokio::spawn(async move {
                let _slot = tracker.admit(&b).unwrap();
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            })
        };

        while b.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;
        assert_eq!(b.in_flight(), 0);
    }

    #[test]
    fn test_concurrent_admissions_never_exceed_ceiling() {
        let tracker = Arc::new(CapacityTracker::new());
        let b = backend(5);
        let mut handles = vec![];

        for _ in 0..8 {
            let tracker = tracker.clone();
            let b = b.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..5000 {
                    if tracker.try_admit(&b) {
                        let seen = b.in_flight();
                        assert!(seen >= 1 && seen <= 5, "in-flight {} out of range", seen);
                        tracker.release(&b).unwrap();
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(b.in_flight(), 0);
        assert_eq!(tracker.stats().release_errors, 0);
    }
}
