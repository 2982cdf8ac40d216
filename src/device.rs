//! Device capability interface.
//!
//! Anything the service loop polls implements [`PolledDevice`]. The
//! contract mirrors the way the loop treats hardware: `poll()` performs at
//! most one unit of bus work and never blocks, freshness is owned by the
//! device and only read by the scheduler, and faults are absorbed
//! internally rather than propagated into the loop.

use core::fmt::Write;

use crate::console::{ConsoleError, ParsedLine};

/// A peripheral serviced by the polling loop.
pub trait PolledDevice {
    /// Short identifier for diagnostics.
    fn name(&self) -> &'static str;

    /// Advance the device's internal state machine.
    ///
    /// Must be non-blocking and bounded: at most one outstanding bus
    /// transaction is issued or checked per call, so no device can starve
    /// the others. Errors are absorbed into the device's fault counter;
    /// this method has no failure path the loop could observe.
    fn poll(&mut self, now_us: i64);

    /// True when any data channel holds unconsumed data.
    ///
    /// Read (never written) by the scheduler; the device clears its
    /// freshness when the data is consumed.
    fn fresh(&self) -> bool {
        false
    }

    /// Total transient faults absorbed since boot.
    fn fault_count(&self) -> u32 {
        0
    }

    /// Handle a console line routed to this device.
    ///
    /// `args.command` carries the action token (`sub_line` re-rooting);
    /// responses go to `out`, never to I/O directly.
    fn console_handler(
        &mut self,
        out: &mut dyn Write,
        args: &ParsedLine<'_>,
    ) -> Result<(), ConsoleError> {
        let _ = (out, args);
        Err(ConsoleError::Unsupported)
    }
}
