//! Cooperative polling loop scheduler.
//!
//! One execution context services every device. Each cycle: mark the
//! start time, poll every registered device in order, fold freshness
//! transitions and console traffic into an activity flag, mark the stop
//! time, then either continue immediately (active cycle) or hand the
//! processor back to the runtime (idle cycle). The yield is a voluntary
//! relinquish, never a fixed-duration sleep.
//!
//! Activity is monotonic within a cycle: `begin_cycle` resets the
//! accumulator to "sleepy", any source of activity clears it, and nothing
//! can set it back before the next cycle.

use crate::device::PolledDevice;
use crate::logging;

/// Upper bound on devices the loop will track freshness for.
pub const MAX_POLLED_DEVICES: usize = 8;

/// Time and yield services from the surrounding runtime.
///
/// `yield_now` maps to the lowest-overhead voluntary relinquish the
/// runtime offers (FreeRTOS `vPortYield` on target, `thread::yield_now`
/// on host). It carries no duration and no cancellation; the loop runs
/// for the life of the process.
pub trait Platform {
    /// Monotonic microseconds.
    fn now_us(&self) -> i64;

    /// Voluntarily relinquish the execution context.
    fn yield_now(&self);
}

/// Cycle duration bookkeeping (diagnostics only, never control flow).
#[derive(Clone, Copy, Debug)]
pub struct StopWatch {
    start_us: i64,
    last_us: u32,
    best_us: u32,
    worst_us: u32,
    total_us: u64,
    laps: u32,
}

impl StopWatch {
    pub const fn new() -> Self {
        Self {
            start_us: 0,
            last_us: 0,
            best_us: u32::MAX,
            worst_us: 0,
            total_us: 0,
            laps: 0,
        }
    }

    #[inline]
    pub fn mark_start(&mut self, now_us: i64) {
        self.start_us = now_us;
    }

    /// Close the lap opened by `mark_start`; returns its duration.
    #[inline]
    pub fn mark_stop(&mut self, now_us: i64) -> u32 {
        let lap = now_us.saturating_sub(self.start_us).max(0) as u32;
        self.last_us = lap;
        self.best_us = self.best_us.min(lap);
        self.worst_us = self.worst_us.max(lap);
        self.total_us += lap as u64;
        self.laps += 1;
        lap
    }

    pub fn last_us(&self) -> u32 {
        self.last_us
    }

    pub fn best_us(&self) -> u32 {
        if self.laps == 0 {
            0
        } else {
            self.best_us
        }
    }

    pub fn worst_us(&self) -> u32 {
        self.worst_us
    }

    pub fn mean_us(&self) -> u32 {
        if self.laps == 0 {
            0
        } else {
            (self.total_us / self.laps as u64) as u32
        }
    }

    pub fn laps(&self) -> u32 {
        self.laps
    }
}

impl Default for StopWatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one polling cycle.
#[derive(Clone, Copy, Debug)]
pub struct CycleReport {
    /// True when nothing happened: the loop should yield before the next
    /// cycle.
    pub should_sleep: bool,
    /// Devices whose freshness went stale -> fresh this cycle.
    pub fresh_transitions: u8,
    /// Cycle duration (observability only).
    pub duration_us: u32,
}

/// The polling loop's per-cycle state machine.
///
/// The scheduler holds no device references of its own; the application
/// wiring passes its device list into `poll_all` each cycle, in fixed
/// registration order.
pub struct Scheduler {
    stopwatch: StopWatch,
    prev_fresh: [bool; MAX_POLLED_DEVICES],
    should_sleep: bool,
    fresh_transitions: u8,
    cycle_now_us: i64,
    cycles: u32,
    active_cycles: u32,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            stopwatch: StopWatch::new(),
            prev_fresh: [false; MAX_POLLED_DEVICES],
            should_sleep: true,
            fresh_transitions: 0,
            cycle_now_us: 0,
            cycles: 0,
            active_cycles: 0,
        }
    }

    /// Open a cycle: mark the start time and reset the activity
    /// accumulator to "sleepy".
    pub fn begin_cycle(&mut self, now_us: i64) {
        self.cycle_now_us = now_us;
        self.should_sleep = true;
        self.fresh_transitions = 0;
        self.stopwatch.mark_start(now_us);
        logging::set_wall_clock_us(now_us);
    }

    /// Poll every device in order, then fold freshness into the activity
    /// accumulator.
    ///
    /// A device counts as active only when its freshness transitioned
    /// from stale to fresh during this cycle; data left unconsumed does
    /// not keep the loop spinning.
    pub fn poll_all(&mut self, devices: &mut [&mut dyn PolledDevice]) {
        debug_assert!(devices.len() <= MAX_POLLED_DEVICES);

        for device in devices.iter_mut() {
            device.poll(self.cycle_now_us);
        }

        for (slot, device) in devices.iter().enumerate().take(MAX_POLLED_DEVICES) {
            let fresh = device.fresh();
            if fresh && !self.prev_fresh[slot] {
                self.should_sleep = false;
                self.fresh_transitions += 1;
            }
            self.prev_fresh[slot] = fresh;
        }
    }

    /// Record activity from outside the device list (console byte
    /// traffic, drained log output).
    pub fn note_activity(&mut self) {
        self.should_sleep = false;
    }

    /// Close the cycle and report whether the loop should yield.
    pub fn end_cycle(&mut self, now_us: i64) -> CycleReport {
        let duration_us = self.stopwatch.mark_stop(now_us);
        self.cycles = self.cycles.wrapping_add(1);
        if !self.should_sleep {
            self.active_cycles = self.active_cycles.wrapping_add(1);
        }
        CycleReport {
            should_sleep: self.should_sleep,
            fresh_transitions: self.fresh_transitions,
            duration_us,
        }
    }

    /// Cycle timing, for the `stats` command.
    pub fn stopwatch(&self) -> &StopWatch {
        &self.stopwatch
    }

    /// Cycles completed since boot.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Cycles that ended active (did not yield).
    pub fn active_cycles(&self) -> u32 {
        self.active_cycles
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
