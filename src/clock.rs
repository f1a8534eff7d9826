//! Wall-clock and CPU-time readings

use nix::sys::resource::{getrusage, UsageWho};
use nix::sys::time::TimeValLike;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static RUSAGE_WARNED: AtomicBool = AtomicBool::new(false);

/// CPU time consumed by the whole process so far (user + system)
///
/// Reads as zero if `getrusage` fails; a warning is logged once.
pub fn process_cpu_time() -> Duration {
    match getrusage(UsageWho::RUSAGE_SELF) {
        Ok(usage) => {
            let micros = usage.user_time().num_microseconds() + usage.system_time().num_microseconds();
            Duration::from_micros(micros.max(0) as u64)
        }
        Err(errno) => {
            if !RUSAGE_WARNED.swap(true, Ordering::Relaxed) {
                tracing::warn!(target: "sniffer", %errno, "getrusage failed, CPU time reads as zero");
            }
            Duration::ZERO
        }
    }
}

/// A pair of wall-clock and CPU-time readings taken together
#[derive(Debug, Clone, Copy)]
pub struct ClockReading {
    pub wall: Instant,
    pub cpu: Duration,
}

impl ClockReading {
    /// Opening reading: wall clock first, then CPU clock
    pub fn start() -> Self {
        let wall = Instant::now();
        let cpu = process_cpu_time();
        Self { wall, cpu }
    }

    /// Closing reading: CPU clock first, then wall clock
    pub fn stop() -> Self {
        let cpu = process_cpu_time();
        let wall = Instant::now();
        Self { wall, cpu }
    }

    /// Wall and CPU time elapsed between `self` and a later reading
    pub fn elapsed_until(&self, later: &ClockReading) -> (Duration, Duration) {
        (
            later.wall.saturating_duration_since(self.wall),
            later.cpu.saturating_sub(self.cpu),
        )
    }
}
