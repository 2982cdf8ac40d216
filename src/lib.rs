//! # JuiceMonitor
//!
//! Single-node embedded monitor: a cooperative loop polls a multi-channel
//! power sensor and a GPIO expander over I2C, fans expander-pin edges out
//! to registered callbacks, and serves a line-oriented console for
//! inspection and control.
//!
//! ## Architecture
//!
//! - One execution context services everything; `poll()` does at most one
//!   unit of bus work, and an idle cycle yields the processor voluntarily.
//! - Freshness flags are owned by devices, read by the scheduler.
//! - "Interrupts" are edges observed during the poll cycle, dispatched
//!   synchronously from loop context.
//! - Console handlers write into a caller-supplied sink; I/O framing
//!   stays in the console transport layer.

#![cfg_attr(not(test), no_std)]

#[cfg(all(not(test), not(target_arch = "xtensa")))]
extern crate std;

pub mod app;
pub mod console;
pub mod device;
pub mod fault;
pub mod hal;
pub mod irq;
pub mod logging;
pub mod sched;

#[cfg(not(target_arch = "xtensa"))]
pub mod sim;

pub use app::MonitorApp;
pub use console::{Console, ConsoleError, ConsoleOptions, Transport};
pub use device::PolledDevice;
pub use fault::{BusFault, FaultCounter};
pub use irq::{EdgeCondition, IrqError, IrqTable};
pub use logging::{LogLevel, LogStream, LOG};
pub use sched::{CycleReport, Platform, Scheduler, StopWatch};
