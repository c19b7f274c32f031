use nix::time::{ClockId, clock_gettime};
use ports::secondary::clock_port::ClockPort;

/// `CLOCK_BOOTTIME`, the clock the offload programs stamp `last_used` with.
#[derive(Debug, Default, Clone, Copy)]
pub struct BootClock;

impl ClockPort for BootClock {
    fn now_boot_ns(&self) -> u64 {
        match clock_gettime(ClockId::CLOCK_BOOTTIME) {
            Ok(ts) => {
                let secs = u64::try_from(ts.tv_sec()).unwrap_or(0);
                let nanos = u64::try_from(ts.tv_nsec()).unwrap_or(0);
                secs.saturating_mul(1_000_000_000).saturating_add(nanos)
            }
            Err(e) => {
                tracing::warn!(error = %e, "clock_gettime(CLOCK_BOOTTIME) failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_clock_is_monotonic() {
        let clock = BootClock;
        let a = clock.now_boot_ns();
        let b = clock.now_boot_ns();
        assert!(a > 0);
        assert!(b >= a);
    }
}
