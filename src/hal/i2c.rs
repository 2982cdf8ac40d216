//! I2C bus adapter.
//!
//! Wraps an `embedded_hal::i2c::I2c` implementation with fault
//! absorption, a transaction counter, and the bus-level console tools
//! (`scan`, `ping`, `info`). Drivers share one adapter through a
//! `RefCell`; all access happens inside a single cooperative cycle.

use core::fmt::Write;

use embedded_hal::i2c::{Error as _, ErrorKind, I2c};

use crate::console::{ConsoleError, ParsedLine};
use crate::fault::{BusFault, FaultCounter};

/// First and last addresses probed by `scan` (reserved ranges skipped).
const SCAN_FIRST: u8 = 0x08;
const SCAN_LAST: u8 = 0x77;

/// Bus adapter configuration.
#[derive(Clone, Copy, Debug)]
pub struct I2cAdapterOptions {
    /// Platform bus identifier (the `<bus>` index on the console).
    pub bus_id: u8,
    /// Bus clock, for display only at this layer.
    pub freq_hz: u32,
}

impl I2cAdapterOptions {
    pub const fn new(bus_id: u8, freq_hz: u32) -> Self {
        Self { bus_id, freq_hz }
    }
}

/// A pollable I2C bus with fault accounting.
pub struct I2cAdapter<B: I2c> {
    bus: B,
    opts: I2cAdapterOptions,
    faults: FaultCounter,
    transactions: u32,
}

impl<B: I2c> I2cAdapter<B> {
    pub fn new(bus: B, opts: I2cAdapterOptions) -> Self {
        Self {
            bus,
            opts,
            faults: FaultCounter::new(),
            transactions: 0,
        }
    }

    pub fn bus_id(&self) -> u8 {
        self.opts.bus_id
    }

    pub fn faults(&self) -> &FaultCounter {
        &self.faults
    }

    /// Transactions issued since boot.
    pub fn transactions(&self) -> u32 {
        self.transactions
    }

    fn absorb(&mut self, err: B::Error) -> BusFault {
        let fault = match err.kind() {
            ErrorKind::NoAcknowledge(_) => BusFault::Nack,
            ErrorKind::ArbitrationLoss => BusFault::ArbitrationLoss,
            _ => BusFault::Other,
        };
        self.faults.record(fault);
        fault
    }

    /// Write one register.
    pub fn write_reg(&mut self, addr: u8, reg: u8, value: u8) -> Result<(), BusFault> {
        self.transactions += 1;
        match self.bus.write(addr, &[reg, value]) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.absorb(e)),
        }
    }

    /// Write a register pair (devices with sequential register pointers).
    pub fn write_reg16(&mut self, addr: u8, reg: u8, lo: u8, hi: u8) -> Result<(), BusFault> {
        self.transactions += 1;
        match self.bus.write(addr, &[reg, lo, hi]) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.absorb(e)),
        }
    }

    /// Send a bare command byte (register pointer with no data).
    pub fn write_cmd(&mut self, addr: u8, cmd: u8) -> Result<(), BusFault> {
        self.transactions += 1;
        match self.bus.write(addr, &[cmd]) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.absorb(e)),
        }
    }

    /// Read `buf.len()` bytes starting at `reg`.
    pub fn read_regs(&mut self, addr: u8, reg: u8, buf: &mut [u8]) -> Result<(), BusFault> {
        self.transactions += 1;
        match self.bus.write_read(addr, &[reg], buf) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.absorb(e)),
        }
    }

    /// Probe an address with a zero-length write.
    ///
    /// A NACK here is an answer, not a fault; nothing is recorded.
    pub fn ping(&mut self, addr: u8) -> bool {
        self.transactions += 1;
        self.bus.write(addr, &[]).is_ok()
    }

    /// Probe the full address range, reporting responders.
    pub fn scan(&mut self, out: &mut dyn Write) {
        let mut found = 0;
        for addr in SCAN_FIRST..=SCAN_LAST {
            if self.ping(addr) {
                let _ = writeln!(out, "  0x{:02x} present", addr);
                found += 1;
            }
        }
        let _ = writeln!(out, "{} device(s) found", found);
    }

    /// Console surface: `scan`, `ping <addr>`, `info` (default).
    pub fn console_handler(
        &mut self,
        out: &mut dyn Write,
        args: &ParsedLine<'_>,
    ) -> Result<(), ConsoleError> {
        match args.command {
            "" | "info" => {
                let _ = writeln!(out, "i2c{}: {} Hz", self.opts.bus_id, self.opts.freq_hz);
                let _ = writeln!(out, "  transactions: {}", self.transactions);
                let _ = writeln!(
                    out,
                    "  faults: {} (last: {})",
                    self.faults.count(),
                    self.faults.last().as_str()
                );
                Ok(())
            }
            "scan" => {
                self.scan(out);
                Ok(())
            }
            "ping" => {
                let addr = args.arg_as_u32(0)?;
                if addr > 0x7F {
                    return Err(ConsoleError::OutOfRange);
                }
                let verdict = if self.ping(addr as u8) { "ACK" } else { "NACK" };
                let _ = writeln!(out, "0x{:02x}: {}", addr, verdict);
                Ok(())
            }
            _ => Err(ConsoleError::Unsupported),
        }
    }
}
