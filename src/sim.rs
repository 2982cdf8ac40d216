//! Host-side simulation doubles.
//!
//! Compiled only off-target; the integration tests and the host demo
//! binary wire the monitor together with these instead of real hardware.

use embedded_hal::i2c::{self, ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use heapless::{Deque, Vec};

use crate::console::Transport;
use crate::device::PolledDevice;
use crate::sched::Platform;

/// Register space per simulated target.
const REG_SPACE: usize = 64;

/// Bus error surfaced by [`SimBus`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimBusError(pub ErrorKind);

impl i2c::Error for SimBusError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

struct SimTarget {
    addr: u8,
    regs: [u8; REG_SPACE],
    /// Force-NACK switch for fault-path tests.
    nack: bool,
}

/// Register-level I2C bus double.
///
/// Models targets with an auto-incrementing register pointer: a write's
/// first byte selects the register, remaining bytes store sequentially,
/// reads continue from the pointer. Absent or force-NACKed addresses
/// refuse with `NoAcknowledge`.
pub struct SimBus {
    targets: Vec<SimTarget, 4>,
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            targets: Vec::new(),
        }
    }

    /// Attach a target at `addr` with zeroed registers.
    pub fn add_device(&mut self, addr: u8) {
        let _ = self.targets.push(SimTarget {
            addr,
            regs: [0; REG_SPACE],
            nack: false,
        });
    }

    pub fn set_reg(&mut self, addr: u8, reg: u8, value: u8) {
        if let Some(t) = self.target_mut(addr) {
            t.regs[reg as usize] = value;
        }
    }

    /// Store a big-endian 16-bit value at `reg`.
    pub fn set_reg16(&mut self, addr: u8, reg: u8, value: u16) {
        if let Some(t) = self.target_mut(addr) {
            t.regs[reg as usize] = (value >> 8) as u8;
            t.regs[reg as usize + 1] = value as u8;
        }
    }

    pub fn reg(&self, addr: u8, reg: u8) -> u8 {
        self.targets
            .iter()
            .find(|t| t.addr == addr)
            .map(|t| t.regs[reg as usize])
            .unwrap_or(0)
    }

    /// Make `addr` refuse all transactions (unplugged device).
    pub fn set_nack(&mut self, addr: u8, on: bool) {
        if let Some(t) = self.target_mut(addr) {
            t.nack = on;
        }
    }

    fn target_mut(&mut self, addr: u8) -> Option<&mut SimTarget> {
        self.targets.iter_mut().find(|t| t.addr == addr)
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorType for SimBus {
    type Error = SimBusError;
}

impl I2c for SimBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let target = match self.target_mut(address) {
            Some(t) if !t.nack => t,
            _ => {
                return Err(SimBusError(ErrorKind::NoAcknowledge(
                    NoAcknowledgeSource::Address,
                )))
            }
        };

        let mut pointer = 0usize;
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => {
                    if let Some((&reg, data)) = bytes.split_first() {
                        pointer = reg as usize;
                        for &b in data {
                            if pointer < REG_SPACE {
                                target.regs[pointer] = b;
                                pointer += 1;
                            }
                        }
                    }
                }
                Operation::Read(buf) => {
                    for b in buf.iter_mut() {
                        *b = if pointer < REG_SPACE {
                            target.regs[pointer]
                        } else {
                            0
                        };
                        pointer += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

/// In-memory console transport.
///
/// Tests queue input with [`SimTransport::feed`] and read responses from
/// [`SimTransport::take_output`].
pub struct SimTransport {
    rx: Deque<u8, 256>,
    tx: Deque<u8, 1024>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            rx: Deque::new(),
            tx: Deque::new(),
        }
    }

    /// Queue bytes as if the operator typed them.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &b in bytes {
            let _ = self.rx.push_back(b);
        }
    }

    /// Drain everything the console wrote, lossily decoded.
    pub fn take_output(&mut self) -> std::string::String {
        let mut s = std::string::String::new();
        while let Some(b) = self.tx.pop_front() {
            s.push(b as char);
        }
        s
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimTransport {
    fn read_byte(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            let _ = self.tx.push_back(b);
        }
    }
}

/// Scriptable device for scheduler tests: freshness is set by the test,
/// cleared by `consume`.
pub struct SimDevice {
    name: &'static str,
    fresh: bool,
    polls: u32,
}

impl SimDevice {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fresh: false,
            polls: 0,
        }
    }

    pub fn set_fresh(&mut self) {
        self.fresh = true;
    }

    pub fn consume(&mut self) {
        self.fresh = false;
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }
}

impl PolledDevice for SimDevice {
    fn name(&self) -> &'static str {
        self.name
    }

    fn poll(&mut self, _now_us: i64) {
        self.polls += 1;
    }

    fn fresh(&self) -> bool {
        self.fresh
    }
}

/// Host platform: wall-clock microseconds, `thread::yield_now`.
pub struct HostPlatform {
    epoch: std::time::Instant,
}

impl HostPlatform {
    pub fn new() -> Self {
        Self {
            epoch: std::time::Instant::now(),
        }
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HostPlatform {
    fn now_us(&self) -> i64 {
        self.epoch.elapsed().as_micros() as i64
    }

    fn yield_now(&self) {
        std::thread::yield_now();
    }
}
