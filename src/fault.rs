//! Transient-fault accounting for bus-attached devices.
//!
//! Drivers absorb bus errors and keep polling; the scheduler never sees
//! them. What survives is a per-device counter that the console can
//! inspect, which is how a wedged or unplugged device becomes visible.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// Fault codes for a failed bus transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BusFault {
    /// No fault recorded.
    None = 0,

    /// Address or data byte not acknowledged.
    Nack = 1,

    /// Lost arbitration to another master.
    ArbitrationLoss = 2,

    /// Transaction exceeded the driver's deadline.
    Timeout = 3,

    /// Anything the underlying bus reports that has no mapping here.
    Other = 4,
}

impl BusFault {
    /// Convert from raw u8 value.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => BusFault::Nack,
            2 => BusFault::ArbitrationLoss,
            3 => BusFault::Timeout,
            4 => BusFault::Other,
            _ => BusFault::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BusFault::None => "none",
            BusFault::Nack => "NACK",
            BusFault::ArbitrationLoss => "arbitration loss",
            BusFault::Timeout => "timeout",
            BusFault::Other => "bus error",
        }
    }
}

/// Fault counter owned by a device or bus adapter.
///
/// Recording is total (count never resets during operation) so repeated
/// transients read as a trend, not a blip. Atomics keep the type shareable
/// without locks; within one cooperative cycle there is no contention.
pub struct FaultCounter {
    last: AtomicU8,
    count: AtomicU32,
}

impl FaultCounter {
    /// Create a counter with no fault recorded.
    pub const fn new() -> Self {
        Self {
            last: AtomicU8::new(0),
            count: AtomicU32::new(0),
        }
    }

    /// Record one fault.
    #[inline]
    pub fn record(&self, fault: BusFault) {
        self.last.store(fault as u8, Ordering::Release);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Most recent fault code.
    #[inline]
    pub fn last(&self) -> BusFault {
        BusFault::from_u8(self.last.load(Ordering::Acquire))
    }

    /// Total faults since boot.
    #[inline]
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for FaultCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_accumulates() {
        let faults = FaultCounter::new();
        assert_eq!(faults.count(), 0);
        assert_eq!(faults.last(), BusFault::None);

        faults.record(BusFault::Nack);
        faults.record(BusFault::Timeout);
        faults.record(BusFault::Nack);

        assert_eq!(faults.count(), 3);
        assert_eq!(faults.last(), BusFault::Nack);
    }

    #[test]
    fn test_from_u8_roundtrip() {
        for f in [
            BusFault::None,
            BusFault::Nack,
            BusFault::ArbitrationLoss,
            BusFault::Timeout,
            BusFault::Other,
        ] {
            assert_eq!(BusFault::from_u8(f as u8), f);
        }
        assert_eq!(BusFault::from_u8(250), BusFault::None);
    }
}
