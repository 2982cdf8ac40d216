//! Hardware layer for JuiceMonitor.
//!
//! Thin drivers over an `embedded-hal` I2C bus. Business logic stays in
//! the core modules; drivers own their state machines, freshness flags,
//! and fault counters.

pub mod expander;
pub mod i2c;
pub mod power;

pub use expander::{GpioExpander, EXPANDER_PINS, MCP23017_I2C_ADDR};
pub use i2c::{I2cAdapter, I2cAdapterOptions};
pub use power::{PowerSensor, PowerSensorConfig, SampleRate, SensorChannel, PAC195X_I2C_ADDR};
