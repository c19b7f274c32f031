/// Monotonic clock matching the one the offload programs stamp
/// `last_used` with (CLOCK_BOOTTIME).
pub trait ClockPort: Send + Sync {
    fn now_boot_ns(&self) -> u64;
}
