//! Per-pin edge registration and dispatch.
//!
//! "Interrupt" here means "edge observed during the next poll cycle", not
//! asynchronous preemption: the expander's `poll()` reads a level
//! snapshot, diffs it against the previous one, and invokes handlers
//! synchronously. Handlers therefore run in loop context and may do
//! bounded, non-blocking work.
//!
//! Registrations are sparse: a pin with no entry generates no callback no
//! matter how it transitions.

/// Pin-level transition that triggers a callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeCondition {
    /// 0 -> 1 only
    Rising,
    /// 1 -> 0 only
    Falling,
    /// Either direction
    Change,
}

impl EdgeCondition {
    /// Does a `was` -> `now` transition satisfy this condition?
    #[inline]
    pub fn matches(self, was: bool, now: bool) -> bool {
        match self {
            EdgeCondition::Rising => !was && now,
            EdgeCondition::Falling => was && !now,
            EdgeCondition::Change => was != now,
        }
    }
}

/// Edge callback: (pin index, new level).
pub type PinHandler = fn(pin: u8, level: bool);

/// Registration error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IrqError {
    /// Pin index outside the device's range; no registration occurred.
    InvalidPin,
}

impl core::fmt::Display for IrqError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            IrqError::InvalidPin => f.write_str("invalid pin index"),
        }
    }
}

#[derive(Clone, Copy)]
struct PinRegistration {
    handler: PinHandler,
    condition: EdgeCondition,
}

/// Sparse per-pin dispatch table for an `N`-pin device (`N` <= 16).
///
/// At most one registration per pin; re-registering replaces the prior
/// entry. Dispatch order is ascending pin index.
pub struct IrqTable<const N: usize = 16> {
    slots: [Option<PinRegistration>; N],
    /// Total callbacks fired since boot.
    dispatched: u32,
}

impl<const N: usize> IrqTable<N> {
    /// Create an empty table.
    pub const fn new() -> Self {
        assert!(N <= 16, "snapshot words are 16 bits wide");
        Self {
            slots: [None; N],
            dispatched: 0,
        }
    }

    /// Register `handler` for `pin`, replacing any prior registration.
    pub fn attach(
        &mut self,
        pin: u8,
        handler: PinHandler,
        condition: EdgeCondition,
    ) -> Result<(), IrqError> {
        let slot = self
            .slots
            .get_mut(pin as usize)
            .ok_or(IrqError::InvalidPin)?;
        *slot = Some(PinRegistration { handler, condition });
        Ok(())
    }

    /// Remove the registration for `pin`, if any.
    pub fn detach(&mut self, pin: u8) -> Result<(), IrqError> {
        let slot = self
            .slots
            .get_mut(pin as usize)
            .ok_or(IrqError::InvalidPin)?;
        *slot = None;
        Ok(())
    }

    /// Number of active registrations.
    pub fn registered(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Total callbacks fired since boot.
    pub fn dispatched(&self) -> u32 {
        self.dispatched
    }

    /// Fire handlers for every registered pin whose transition between
    /// the two snapshots matches its condition.
    ///
    /// Bit `i` of a snapshot is pin `i`'s level. Returns the number of
    /// handlers invoked.
    pub fn dispatch(&mut self, was: u16, now: u16) -> u32 {
        let mut fired = 0;
        for pin in 0..N {
            let Some(reg) = self.slots[pin] else { continue };
            let was_hi = was & (1 << pin) != 0;
            let now_hi = now & (1 << pin) != 0;
            if reg.condition.matches(was_hi, now_hi) {
                (reg.handler)(pin as u8, now_hi);
                fired += 1;
            }
        }
        self.dispatched = self.dispatched.wrapping_add(fired);
        fired
    }
}

impl<const N: usize> Default for IrqTable<N> {
    fn default() -> Self {
        Self::new()
    }
}
