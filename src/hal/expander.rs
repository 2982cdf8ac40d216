//! MCP23017-style 16-pin GPIO expander driver.
//!
//! Each poll takes one level snapshot off the bus and diffs it against
//! the previous one; pins whose transition matches a registered edge
//! condition get their callback invoked right there, in loop context.
//! Reference: MCP23017 datasheet register map (BANK=0 addressing).

use core::cell::RefCell;
use core::fmt::Write;

use embedded_hal::i2c::I2c;

use crate::console::{ConsoleError, ParsedLine};
use crate::device::PolledDevice;
use crate::fault::FaultCounter;
use crate::hal::i2c::I2cAdapter;
use crate::irq::{EdgeCondition, IrqError, IrqTable, PinHandler};
use crate::logging::LOG;
use crate::mon_debug;

/// MCP23017 I2C address for this board's strapping.
pub const MCP23017_I2C_ADDR: u8 = 0x23;

/// Pins on the expander (two 8-bit ports).
pub const EXPANDER_PINS: usize = 16;

/// MCP23017 register addresses (IOCON.BANK = 0)
#[allow(dead_code)]
mod regs {
    pub const IODIRA: u8 = 0x00;
    pub const IODIRB: u8 = 0x01;
    pub const IPOLA: u8 = 0x02;
    pub const IPOLB: u8 = 0x03;
    pub const GPINTENA: u8 = 0x04;
    pub const GPINTENB: u8 = 0x05;
    pub const IOCON: u8 = 0x0A;
    pub const GPPUA: u8 = 0x0C;
    pub const GPPUB: u8 = 0x0D;
    pub const GPIOA: u8 = 0x12;
    pub const GPIOB: u8 = 0x13;
    pub const OLATA: u8 = 0x14;
    pub const OLATB: u8 = 0x15;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// IODIR not yet written: all pins become inputs.
    Configure,
    /// Steady state: snapshot GPIOA/GPIOB each poll.
    Snapshot,
}

/// 16-bit GPIO expander on a shared I2C adapter.
pub struct GpioExpander<'a, B: I2c> {
    bus: &'a RefCell<I2cAdapter<B>>,
    addr: u8,
    irq: IrqTable<EXPANDER_PINS>,
    phase: Phase,
    /// Last observed pin levels (bit i = pin i).
    snapshot: u16,
    have_snapshot: bool,
    /// Set when a snapshot differed from the previous one; cleared when
    /// the levels are consumed through the console.
    input_fresh: bool,
    faults: FaultCounter,
}

impl<'a, B: I2c> GpioExpander<'a, B> {
    pub fn new(bus: &'a RefCell<I2cAdapter<B>>, addr: u8) -> Self {
        Self {
            bus,
            addr,
            irq: IrqTable::new(),
            phase: Phase::Configure,
            snapshot: 0,
            have_snapshot: false,
            input_fresh: false,
            faults: FaultCounter::new(),
        }
    }

    /// Register an edge callback for `pin`, replacing any prior
    /// registration. Out-of-range pins are rejected with no state change.
    pub fn attach_interrupt(
        &mut self,
        pin: u8,
        handler: PinHandler,
        condition: EdgeCondition,
    ) -> Result<(), IrqError> {
        self.irq.attach(pin, handler, condition)
    }

    /// Remove the registration for `pin`.
    pub fn detach_interrupt(&mut self, pin: u8) -> Result<(), IrqError> {
        self.irq.detach(pin)
    }

    /// Last observed pin levels.
    pub fn levels(&self) -> u16 {
        self.snapshot
    }

    /// Level of a single pin from the last snapshot.
    pub fn pin_level(&self, pin: u8) -> Result<bool, IrqError> {
        if (pin as usize) >= EXPANDER_PINS {
            return Err(IrqError::InvalidPin);
        }
        Ok(self.snapshot & (1 << pin) != 0)
    }

    pub fn dispatched(&self) -> u32 {
        self.irq.dispatched()
    }

    /// Rewrite the pin configuration on the next poll and take a fresh
    /// baseline snapshot (the console `reconf` action).
    pub fn reconfigure(&mut self) {
        self.phase = Phase::Configure;
        self.have_snapshot = false;
    }
}

impl<'a, B: I2c> PolledDevice for GpioExpander<'a, B> {
    fn name(&self) -> &'static str {
        "mcp23017"
    }

    /// One bus transaction per call; faults leave the phase unchanged so
    /// the next cycle retries.
    fn poll(&mut self, now_us: i64) {
        match self.phase {
            Phase::Configure => {
                // IODIRA/IODIRB are sequential: one write sets both ports
                let result =
                    self.bus
                        .borrow_mut()
                        .write_reg16(self.addr, regs::IODIRA, 0xFF, 0xFF);
                match result {
                    Ok(()) => self.phase = Phase::Snapshot,
                    Err(fault) => self.faults.record(fault),
                }
            }
            Phase::Snapshot => {
                let mut ports = [0u8; 2];
                let result = self
                    .bus
                    .borrow_mut()
                    .read_regs(self.addr, regs::GPIOA, &mut ports);
                match result {
                    Ok(()) => {
                        let now = u16::from_le_bytes(ports);
                        if self.have_snapshot && now != self.snapshot {
                            let fired = self.irq.dispatch(self.snapshot, now);
                            self.input_fresh = true;
                            if fired > 0 {
                                mon_debug!(
                                    LOG,
                                    now_us,
                                    "mcp23017: {} edge callback(s), levels 0x{:04x}",
                                    fired,
                                    now
                                );
                            }
                        }
                        self.snapshot = now;
                        self.have_snapshot = true;
                    }
                    Err(fault) => self.faults.record(fault),
                }
            }
        }
    }

    fn fresh(&self) -> bool {
        self.input_fresh
    }

    fn fault_count(&self) -> u32 {
        self.faults.count()
    }

    /// Console surface: `info` (default), `read`, `pin <n>`.
    fn console_handler(
        &mut self,
        out: &mut dyn Write,
        args: &ParsedLine<'_>,
    ) -> Result<(), ConsoleError> {
        match args.command {
            "" | "info" => {
                let _ = writeln!(
                    out,
                    "mcp23017 @ 0x{:02x}: levels 0x{:04x}{}",
                    self.addr,
                    self.snapshot,
                    if self.input_fresh { " (fresh)" } else { "" }
                );
                let _ = writeln!(
                    out,
                    "  irq: {} registered, {} dispatched",
                    self.irq.registered(),
                    self.irq.dispatched()
                );
                let _ = writeln!(
                    out,
                    "  faults: {} (last: {})",
                    self.faults.count(),
                    self.faults.last().as_str()
                );
                Ok(())
            }
            "read" => {
                // Consuming the levels clears the freshness flag
                self.input_fresh = false;
                let _ = writeln!(out, "0x{:04x}", self.snapshot);
                Ok(())
            }
            "pin" => {
                let pin = args.arg_as_u32(0)?;
                let level = self
                    .pin_level(pin as u8)
                    .map_err(|_| ConsoleError::OutOfRange)?;
                let _ = writeln!(out, "pin {}: {}", pin, if level { 1 } else { 0 });
                Ok(())
            }
            _ => Err(ConsoleError::Unsupported),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    use crate::hal::i2c::I2cAdapterOptions;
    use crate::sim::SimBus;

    static EDGES: AtomicU32 = AtomicU32::new(0);

    fn count_edges(_pin: u8, _level: bool) {
        EDGES.fetch_add(1, Ordering::Relaxed);
    }

    fn wired_bus() -> RefCell<I2cAdapter<SimBus>> {
        let mut sim = SimBus::new();
        sim.add_device(MCP23017_I2C_ADDR);
        RefCell::new(I2cAdapter::new(sim, I2cAdapterOptions::new(0, 200_000)))
    }

    /// Simulate external pin changes by writing the GPIO registers.
    fn set_pins(bus: &RefCell<I2cAdapter<SimBus>>, pins: u16) {
        let mut adapter = bus.borrow_mut();
        let _ = adapter.write_reg16(
            MCP23017_I2C_ADDR,
            regs::GPIOA,
            pins as u8,
            (pins >> 8) as u8,
        );
    }

    #[test]
    fn test_configure_then_snapshot() {
        let bus = wired_bus();
        let mut exp = GpioExpander::new(&bus, MCP23017_I2C_ADDR);

        exp.poll(0); // IODIR write
        assert_eq!(bus.borrow().transactions(), 1);

        set_pins(&bus, 0x0010);
        exp.poll(1); // first snapshot, no dispatch baseline
        assert_eq!(exp.levels(), 0x0010);
        assert!(!exp.fresh(), "first snapshot is a baseline, not an edge");
    }

    #[test]
    fn test_edge_dispatch_and_freshness() {
        EDGES.store(0, Ordering::Relaxed);
        let bus = wired_bus();
        let mut exp = GpioExpander::new(&bus, MCP23017_I2C_ADDR);
        exp.attach_interrupt(4, count_edges, EdgeCondition::Change)
            .unwrap();

        exp.poll(0); // configure
        exp.poll(1); // baseline snapshot (all low)

        set_pins(&bus, 1 << 4);
        exp.poll(2);
        assert_eq!(EDGES.load(Ordering::Relaxed), 1);
        assert!(exp.fresh());
        assert_eq!(exp.dispatched(), 1);

        // Unchanged level: no new dispatch
        exp.poll(3);
        assert_eq!(EDGES.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unregistered_pin_changes_set_fresh_only() {
        EDGES.store(0, Ordering::Relaxed);
        let bus = wired_bus();
        let mut exp = GpioExpander::new(&bus, MCP23017_I2C_ADDR);
        exp.attach_interrupt(4, count_edges, EdgeCondition::Rising)
            .unwrap();

        exp.poll(0);
        exp.poll(1);
        set_pins(&bus, 1 << 9);
        exp.poll(2);
        assert_eq!(EDGES.load(Ordering::Relaxed), 0);
        assert!(exp.fresh());
    }

    #[test]
    fn test_read_consumes_freshness() {
        let bus = wired_bus();
        let mut exp = GpioExpander::new(&bus, MCP23017_I2C_ADDR);
        exp.poll(0);
        exp.poll(1);
        set_pins(&bus, 0x8001);
        exp.poll(2);
        assert!(exp.fresh());

        let mut out = String::new();
        let line = crate::console::parse_line("read");
        exp.console_handler(&mut out, &line).unwrap();
        assert!(out.contains("0x8001"));
        assert!(!exp.fresh());
    }

    #[test]
    fn test_pin_query_and_range() {
        let bus = wired_bus();
        let mut exp = GpioExpander::new(&bus, MCP23017_I2C_ADDR);
        exp.poll(0);
        set_pins(&bus, 1 << 13);
        exp.poll(1);

        let mut out = String::new();
        let line = crate::console::parse_line("pin 13");
        exp.console_handler(&mut out, &line).unwrap();
        assert!(out.contains("pin 13: 1"));

        let line = crate::console::parse_line("pin 16");
        assert_eq!(
            exp.console_handler(&mut out, &line),
            Err(ConsoleError::OutOfRange)
        );
    }

    #[test]
    fn test_bus_fault_absorbed() {
        let bus = wired_bus();
        // No device at this address: every poll NACKs
        let mut lost = GpioExpander::new(&bus, 0x45);
        lost.poll(0);
        lost.poll(1);
        assert_eq!(lost.fault_count(), 2);
        assert!(!lost.fresh());
    }
}
