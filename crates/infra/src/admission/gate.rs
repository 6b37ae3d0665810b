//! Non-blocking single-flight gate.

use std::sync::atomic::{AtomicBool, Ordering};

/// At most one holder at a time; contenders are rejected, never queued.
#[derive(Debug, Default)]
pub struct AdmissionGate {
    held: AtomicBool,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the gate if it is free. The gate is released when the returned
    /// permit is dropped, including during unwinding.
    pub fn try_acquire(&self) -> Option<GatePermit<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GatePermit { gate: self })
    }

    pub fn is_busy(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Proof of holding the gate.
#[derive(Debug)]
#[must_use = "the gate is released as soon as the permit is dropped"]
pub struct GatePermit<'a> {
    gate: &'a AdmissionGate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        self.gate.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;

    #[test]
    fn second_acquire_fails_until_release() {
        let gate = AdmissionGate::new();
        let permit = gate.try_acquire().unwrap();
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());

        drop(permit);
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn released_when_holder_panics() {
        let gate = AdmissionGate::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _permit = gate.try_acquire().unwrap();
            panic!("pipeline failure");
        }));
        assert!(outcome.is_err());
        assert!(!gate.is_busy());
    }

    #[test]
    fn concurrent_contenders_get_exactly_one_permit() {
        let gate = Arc::new(AdmissionGate::new());
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let (tx, rx) = std::sync::mpsc::channel();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let barrier = barrier.clone();
                let tx = tx.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let permit = gate.try_acquire();
                    tx.send(permit.is_some()).unwrap();
                    // Hold until every contender has tried.
                    barrier.wait();
                })
            })
            .collect();
        drop(tx);

        for h in handles {
            h.join().unwrap();
        }
        let winners = rx.iter().filter(|won| *won).count();
        assert_eq!(winners, 1);
    }
}
