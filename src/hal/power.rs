//! PAC195x-style multi-channel power sensor driver.
//!
//! I2C control only; the loop issues at most one bus transaction per
//! poll, walking configure -> refresh -> per-channel reads round-robin.
//! Reference: PAC1953 datasheet register map.

use core::cell::RefCell;
use core::fmt::Write;

use embedded_hal::i2c::I2c;

use crate::console::{ConsoleError, ParsedLine};
use crate::device::PolledDevice;
use crate::fault::FaultCounter;
use crate::hal::i2c::I2cAdapter;
use crate::logging::LOG;
use crate::mon_info;

/// PAC195x I2C address for this board's strapping.
pub const PAC195X_I2C_ADDR: u8 = 0x17;

/// Measurement channels on the PAC1953.
pub const CHAN_COUNT: usize = 4;

/// Settle time after a REFRESH before results latch (datasheet: ~1ms).
const REFRESH_SETTLE_US: i64 = 1_000;

/// PAC195x register addresses
#[allow(dead_code)]
mod regs {
    pub const REFRESH: u8 = 0x00;
    pub const CTRL: u8 = 0x01;
    pub const ACC_COUNT: u8 = 0x02;
    pub const VBUS1: u8 = 0x07;
    pub const VBUS2: u8 = 0x08;
    pub const VBUS3: u8 = 0x09;
    pub const VBUS4: u8 = 0x0A;
    pub const VSENSE1: u8 = 0x0B;
    pub const VSENSE2: u8 = 0x0C;
    pub const VSENSE3: u8 = 0x0D;
    pub const VSENSE4: u8 = 0x0E;
    pub const CHANNEL_DIS: u8 = 0x1C;
    pub const NEG_PWR_FSR: u8 = 0x1D;
    pub const REFRESH_G: u8 = 0x1E;
    pub const REFRESH_V: u8 = 0x1F;
    pub const PRODUCT_ID: u8 = 0xFD;
    pub const MANUFACTURER_ID: u8 = 0xFE;
    pub const REVISION_ID: u8 = 0xFF;
}

/// Conversion rate (CTRL[7:6]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleRate {
    Sps1024,
    Sps256,
    Sps64,
    Sps8,
}

impl SampleRate {
    fn ctrl_bits(self) -> u8 {
        match self {
            SampleRate::Sps1024 => 0b00 << 6,
            SampleRate::Sps256 => 0b01 << 6,
            SampleRate::Sps64 => 0b10 << 6,
            SampleRate::Sps8 => 0b11 << 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SampleRate::Sps1024 => "1024sps",
            SampleRate::Sps256 => "256sps",
            SampleRate::Sps64 => "64sps",
            SampleRate::Sps8 => "8sps",
        }
    }
}

/// Sensor configuration.
#[derive(Clone, Copy, Debug)]
pub struct PowerSensorConfig {
    /// Bitmask of enabled channels (bit 0 = channel 1).
    pub chan_mask: u8,
    pub sample_rate: SampleRate,
    /// Shunt resistor per channel, milliohms.
    pub rsense_mohm: u32,
}

impl PowerSensorConfig {
    pub const fn new(chan_mask: u8, sample_rate: SampleRate) -> Self {
        Self {
            chan_mask,
            sample_rate,
            rsense_mohm: 10,
        }
    }
}

/// One measurement channel.
///
/// `fresh` is owned here: set when a VBUS/VSENSE pair lands, cleared when
/// the data is consumed. The scheduler only ever reads it.
#[derive(Clone, Copy, Debug, Default)]
pub struct SensorChannel {
    voltage_mv: u32,
    current_ma: u32,
    fresh: bool,
    updates: u32,
}

impl SensorChannel {
    pub fn fresh(&self) -> bool {
        self.fresh
    }

    pub fn voltage_mv(&self) -> u32 {
        self.voltage_mv
    }

    pub fn current_ma(&self) -> u32 {
        self.current_ma
    }

    pub fn updates(&self) -> u32 {
        self.updates
    }

    /// Take the latest reading, clearing freshness.
    pub fn consume(&mut self) -> (u32, u32) {
        self.fresh = false;
        (self.voltage_mv, self.current_ma)
    }

    fn update(&mut self, vbus_raw: u16, vsense_raw: u16, rsense_mohm: u32) {
        // VBUS full-scale is 32 V over the 16-bit range
        self.voltage_mv = ((vbus_raw as u64 * 32_000) >> 16) as u32;
        // VSENSE full-scale is 100 mV; I = Vsense / Rsense
        let vsense_uv = ((vsense_raw as u64 * 100_000) >> 16) as u32;
        self.current_ma = vsense_uv / rsense_mohm.max(1);
        self.fresh = true;
        self.updates = self.updates.wrapping_add(1);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// CTRL not yet written.
    Configure,
    /// Results need a REFRESH to latch.
    Refresh,
    /// REFRESH issued at the held timestamp; results not yet stable.
    Settle(i64),
    /// Read VBUS for the held channel.
    ReadVbus(u8),
    /// Read VSENSE for the held channel, completing its update.
    ReadVsense(u8, u16),
}

/// Multi-channel power monitor on a shared I2C adapter.
pub struct PowerSensor<'a, B: I2c> {
    bus: &'a RefCell<I2cAdapter<B>>,
    addr: u8,
    cfg: PowerSensorConfig,
    chans: [SensorChannel; CHAN_COUNT],
    phase: Phase,
    faults: FaultCounter,
}

impl<'a, B: I2c> PowerSensor<'a, B> {
    pub fn new(bus: &'a RefCell<I2cAdapter<B>>, addr: u8, cfg: PowerSensorConfig) -> Self {
        Self {
            bus,
            addr,
            cfg,
            chans: [SensorChannel::default(); CHAN_COUNT],
            phase: Phase::Configure,
            faults: FaultCounter::new(),
        }
    }

    /// Channel accessor (0-based).
    pub fn chan(&self, idx: usize) -> Option<&SensorChannel> {
        self.chans.get(idx)
    }

    /// Mutable channel accessor, for consumption.
    pub fn chan_mut(&mut self, idx: usize) -> Option<&mut SensorChannel> {
        self.chans.get_mut(idx)
    }

    pub fn config(&self) -> &PowerSensorConfig {
        &self.cfg
    }

    fn enabled(&self, chan: u8) -> bool {
        self.cfg.chan_mask & (1 << chan) != 0
    }

    /// First enabled channel at or after `from`, wrapping to REFRESH when
    /// the round is complete.
    fn next_phase_from(&self, from: u8) -> Phase {
        for chan in from..CHAN_COUNT as u8 {
            if self.enabled(chan) {
                return Phase::ReadVbus(chan);
            }
        }
        Phase::Refresh
    }

    fn read_u16(&mut self, reg: u8) -> Option<u16> {
        let mut buf = [0u8; 2];
        let result = self.bus.borrow_mut().read_regs(self.addr, reg, &mut buf);
        match result {
            Ok(()) => Some(u16::from_be_bytes(buf)),
            Err(fault) => {
                self.faults.record(fault);
                None
            }
        }
    }
}

impl<'a, B: I2c> PolledDevice for PowerSensor<'a, B> {
    fn name(&self) -> &'static str {
        "pac195x"
    }

    /// One bus transaction per call; faults leave the phase unchanged so
    /// the next cycle retries.
    fn poll(&mut self, now_us: i64) {
        match self.phase {
            Phase::Configure => {
                let ctrl = self.cfg.sample_rate.ctrl_bits();
                let result = self
                    .bus
                    .borrow_mut()
                    .write_reg(self.addr, regs::CTRL, ctrl);
                match result {
                    Ok(()) => {
                        mon_info!(
                            LOG,
                            now_us,
                            "pac195x: configured (mask 0x{:x}, {})",
                            self.cfg.chan_mask,
                            self.cfg.sample_rate.as_str()
                        );
                        self.phase = Phase::Refresh;
                    }
                    Err(fault) => self.faults.record(fault),
                }
            }
            Phase::Refresh => {
                let result = self.bus.borrow_mut().write_cmd(self.addr, regs::REFRESH);
                match result {
                    Ok(()) => self.phase = Phase::Settle(now_us),
                    Err(fault) => self.faults.record(fault),
                }
            }
            Phase::Settle(since) => {
                // No bus work; results latch REFRESH_SETTLE_US after refresh
                if now_us.saturating_sub(since) >= REFRESH_SETTLE_US {
                    self.phase = self.next_phase_from(0);
                }
            }
            Phase::ReadVbus(chan) => {
                if let Some(raw) = self.read_u16(regs::VBUS1 + chan) {
                    self.phase = Phase::ReadVsense(chan, raw);
                }
            }
            Phase::ReadVsense(chan, vbus_raw) => {
                if let Some(raw) = self.read_u16(regs::VSENSE1 + chan) {
                    self.chans[chan as usize].update(vbus_raw, raw, self.cfg.rsense_mohm);
                    self.phase = self.next_phase_from(chan + 1);
                }
            }
        }
    }

    fn fresh(&self) -> bool {
        self.chans
            .iter()
            .enumerate()
            .any(|(idx, c)| self.enabled(idx as u8) && c.fresh())
    }

    fn fault_count(&self) -> u32 {
        self.faults.count()
    }

    /// Console surface: `info` (default), `consume`.
    fn console_handler(
        &mut self,
        out: &mut dyn Write,
        args: &ParsedLine<'_>,
    ) -> Result<(), ConsoleError> {
        match args.command {
            "" | "info" => {
                let _ = writeln!(
                    out,
                    "pac195x @ 0x{:02x}: mask 0x{:x}, {}, faults {}",
                    self.addr,
                    self.cfg.chan_mask,
                    self.cfg.sample_rate.as_str(),
                    self.faults.count()
                );
                for idx in 0..CHAN_COUNT {
                    if !self.enabled(idx as u8) {
                        continue;
                    }
                    let c = &self.chans[idx];
                    let _ = writeln!(
                        out,
                        "  chan {}: {} mV  {} mA  {}  ({} updates)",
                        idx + 1,
                        c.voltage_mv(),
                        c.current_ma(),
                        if c.fresh() { "fresh" } else { "stale" },
                        c.updates()
                    );
                }
                Ok(())
            }
            "consume" => {
                for idx in 0..CHAN_COUNT {
                    if !self.enabled(idx as u8) || !self.chans[idx].fresh() {
                        continue;
                    }
                    let (mv, ma) = self.chans[idx].consume();
                    let _ = writeln!(out, "chan {}: {} mV  {} mA", idx + 1, mv, ma);
                }
                Ok(())
            }
            _ => Err(ConsoleError::Unsupported),
        }
    }
}
