use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Shared stop flag that also wakes anyone sleeping on it.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        *self.lock() = true;
        self.wake.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.lock()
    }

    /// Sleeps for up to `duration`; returns true if stopped.
    pub fn sleep(&self, duration: Duration) -> bool {
        let guard = self.lock();
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, duration, |stopped| !*stopped)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.stopped.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Last measured cycle length of a background loop.
#[derive(Debug, Default)]
pub struct CycleTiming {
    last_micros: AtomicU64,
    cycles: AtomicU64,
    overruns: AtomicU64,
}

impl CycleTiming {
    pub fn record(&self, elapsed: Duration, overran: bool) {
        self.last_micros
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.cycles.fetch_add(1, Ordering::Relaxed);
        if overran {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn last(&self) -> Duration {
        Duration::from_micros(self.last_micros.load(Ordering::Relaxed))
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

/// Calls `cycle` every `period` until `stop` fires. A cycle that overruns its
/// period is followed immediately by the next one; missed cycles are not
/// made up.
pub fn run_cadence(period: Duration, stop: &StopSignal, timing: &CycleTiming, mut cycle: impl FnMut()) {
    while !stop.is_stopped() {
        let started = Instant::now();
        cycle();
        let elapsed = started.elapsed();
        match period.checked_sub(elapsed) {
            Some(remaining) => {
                timing.record(elapsed, false);
                if stop.sleep(remaining) {
                    break;
                }
            }
            None => {
                timing.record(elapsed, true);
                log::trace!("cycle took {:?}, period is {:?}", elapsed, period);
            }
        }
    }
}
