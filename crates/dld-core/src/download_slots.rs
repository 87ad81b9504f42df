//! Bound on concurrent HTTP downloads.
//!
//! Dataset workers copy local files freely; only `location` transfers
//! hold a slot while streaming.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Fixed number of download slots shared by all dataset workers.
pub struct DownloadSlots {
    limit: usize,
    in_flight: Mutex<usize>,
    freed: Condvar,
}

/// A held download slot, returned to the pool on drop.
pub struct DownloadSlot<'a>(&'a DownloadSlots);

impl DownloadSlots {
    /// `max_downloads` slots; zero is treated as one.
    pub fn new(max_downloads: usize) -> Self {
        Self {
            limit: max_downloads.max(1),
            in_flight: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, usize> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for a free slot. `url` only names the waiter in the log.
    pub fn acquire(&self, url: &str) -> DownloadSlot<'_> {
        let mut in_flight = self.in_flight();
        if *in_flight >= self.limit {
            log::debug!("{url}: waiting, {} download(s) in flight", *in_flight);
        }
        while *in_flight >= self.limit {
            in_flight = self
                .freed
                .wait(in_flight)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *in_flight += 1;
        DownloadSlot(self)
    }
}

impl Drop for DownloadSlot<'_> {
    fn drop(&mut self) {
        *self.0.in_flight() -= 1;
        self.0.freed.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn slots_bound_concurrent_holders() {
        let slots = Arc::new(DownloadSlots::new(2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let (slots, active, peak) = (slots.clone(), active.clone(), peak.clone());
                std::thread::spawn(move || {
                    let _slot = slots.acquire(&format!("http://x/{i}.nt"));
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(*slots.in_flight(), 0);
    }

    #[test]
    fn zero_limit_still_admits_one() {
        let slots = DownloadSlots::new(0);
        let slot = slots.acquire("http://x/a.nt");
        assert_eq!(*slots.in_flight(), 1);
        drop(slot);
        assert_eq!(*slots.in_flight(), 0);
    }

    #[test]
    fn waiter_proceeds_once_slot_freed() {
        let slots = Arc::new(DownloadSlots::new(1));
        let held = slots.acquire("http://x/a.nt");

        let (tx, rx) = std::sync::mpsc::channel();
        let waiter = {
            let slots = slots.clone();
            std::thread::spawn(move || {
                let _slot = slots.acquire("http://x/b.nt");
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }
}
