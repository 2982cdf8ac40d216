//! End-to-end service loop tests: activity detection, yield decisions,
//! and edge dispatch through the full device/console stack.

use std::cell::{Cell, RefCell};
use std::sync::{Mutex, MutexGuard};

use juice_monitor::app::{self, MonitorApp};
use juice_monitor::console::{Console, ConsoleOptions};
use juice_monitor::hal::{I2cAdapter, I2cAdapterOptions, MCP23017_I2C_ADDR, PAC195X_I2C_ADDR};
use juice_monitor::sched::{CycleReport, Platform};
use juice_monitor::sim::{SimBus, SimTransport};

/// MCP23017 GPIOA register; the sim exposes pin levels through it.
const REG_GPIOA: u8 = 0x12;

/// The log ring and edge counter are process-wide; run these end-to-end
/// tests one at a time.
static GATE: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    GATE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Deterministic clock: each cycle advances a fixed step.
struct TestPlatform {
    now: Cell<i64>,
}

impl TestPlatform {
    fn new() -> Self {
        Self { now: Cell::new(0) }
    }

    fn step(&self, us: i64) {
        self.now.set(self.now.get() + us);
    }
}

impl Platform for TestPlatform {
    fn now_us(&self) -> i64 {
        self.now.get()
    }

    fn yield_now(&self) {}
}

fn wired_bus() -> RefCell<I2cAdapter<SimBus>> {
    let mut sim = SimBus::new();
    sim.add_device(PAC195X_I2C_ADDR);
    sim.add_device(MCP23017_I2C_ADDR);
    // Channel 1 under load: 16 V, quarter-scale shunt voltage
    sim.set_reg16(PAC195X_I2C_ADDR, 0x07, 0x8000);
    sim.set_reg16(PAC195X_I2C_ADDR, 0x0B, 0x4000);
    RefCell::new(I2cAdapter::new(sim, I2cAdapterOptions::new(0, 200_000)))
}

fn run_cycles<'a>(
    n: usize,
    platform: &TestPlatform,
    monitor: &mut MonitorApp<'a, SimBus>,
    console: &mut Console<'_, MonitorApp<'a, SimBus>>,
    transport: &mut SimTransport,
) -> Vec<CycleReport> {
    let mut reports = Vec::with_capacity(n);
    for _ in 0..n {
        reports.push(app::service_cycle(platform, monitor, console, transport));
        platform.step(300);
    }
    reports
}

#[test]
fn quiet_cycle_decides_to_sleep() {
    let _gate = serial();
    let bus = wired_bus();
    let opts = ConsoleOptions::new();
    let platform = TestPlatform::new();
    let mut monitor = MonitorApp::new(&bus, &opts);
    let mut console = Console::new(&opts);
    MonitorApp::register_commands(&mut console).unwrap();
    let mut transport = SimTransport::new();

    let reports = run_cycles(4, &platform, &mut monitor, &mut console, &mut transport);
    // Cycle 1 is active (boot log drains); the settle cycles that follow
    // have no fresh data and no console bytes, so they sleep.
    assert!(reports[2].should_sleep);
    assert!(reports[3].should_sleep);
}

#[test]
fn fresh_sensor_data_wakes_exactly_one_cycle() {
    let _gate = serial();
    let bus = wired_bus();
    let opts = ConsoleOptions::new();
    let platform = TestPlatform::new();
    let mut monitor = MonitorApp::new(&bus, &opts);
    let mut console = Console::new(&opts);
    MonitorApp::register_commands(&mut console).unwrap();
    let mut transport = SimTransport::new();

    let reports = run_cycles(60, &platform, &mut monitor, &mut console, &mut transport);

    let transitions: u32 = reports.iter().map(|r| r.fresh_transitions as u32).sum();
    assert_eq!(
        transitions, 1,
        "one stale->fresh transition for the sensor; unconsumed data must not retrigger"
    );
    assert!(monitor.power.chan(0).unwrap().fresh());

    // Steady state with data waiting: the loop is idle again
    let tail = run_cycles(10, &platform, &mut monitor, &mut console, &mut transport);
    assert!(tail.iter().all(|r| r.should_sleep));
}

#[test]
fn consuming_data_rearms_the_transition() {
    let _gate = serial();
    let bus = wired_bus();
    let opts = ConsoleOptions::new();
    let platform = TestPlatform::new();
    let mut monitor = MonitorApp::new(&bus, &opts);
    let mut console = Console::new(&opts);
    MonitorApp::register_commands(&mut console).unwrap();
    let mut transport = SimTransport::new();

    run_cycles(60, &platform, &mut monitor, &mut console, &mut transport);
    let _ = transport.take_output();

    // The sensor keeps sampling; consumed channels go fresh again
    transport.feed(b"pwr consume\n");
    let reports = run_cycles(44, &platform, &mut monitor, &mut console, &mut transport);
    let out = transport.take_output();
    assert!(out.contains("chan 1: 16000 mV"), "got: {}", out);

    let transitions: u32 = reports.iter().map(|r| r.fresh_transitions as u32).sum();
    assert_eq!(transitions, 1);
}

#[test]
fn console_bytes_wake_the_cycle() {
    let _gate = serial();
    let bus = wired_bus();
    let opts = ConsoleOptions::new();
    let platform = TestPlatform::new();
    let mut monitor = MonitorApp::new(&bus, &opts);
    let mut console = Console::new(&opts);
    MonitorApp::register_commands(&mut console).unwrap();
    let mut transport = SimTransport::new();

    run_cycles(60, &platform, &mut monitor, &mut console, &mut transport);
    let _ = transport.take_output();

    transport.feed(b"help\n");
    let reports = run_cycles(2, &platform, &mut monitor, &mut console, &mut transport);
    assert!(!reports[0].should_sleep, "console traffic is activity");
    assert!(reports[1].should_sleep);

    let out = transport.take_output();
    assert!(out.contains("Power sensor tools"));
    assert!(out.contains("JuiceMonitor # "), "prompt re-emitted");
}

#[test]
fn alias_and_sub_router_work_over_the_wire() {
    let _gate = serial();
    let bus = wired_bus();
    let opts = ConsoleOptions::new();
    let platform = TestPlatform::new();
    let mut monitor = MonitorApp::new(&bus, &opts);
    let mut console = Console::new(&opts);
    MonitorApp::register_commands(&mut console).unwrap();
    let mut transport = SimTransport::new();

    run_cycles(4, &platform, &mut monitor, &mut console, &mut transport);
    let _ = transport.take_output();

    // 'I' is the i2c alias; bus 0 routes to the adapter's sub-handler
    transport.feed(b"I 0 ping 0x17\n");
    run_cycles(2, &platform, &mut monitor, &mut console, &mut transport);
    let out = transport.take_output();
    assert!(out.contains("0x17: ACK"), "got: {}", out);

    transport.feed(b"i2c 9 scan\n");
    run_cycles(2, &platform, &mut monitor, &mut console, &mut transport);
    let out = transport.take_output();
    assert!(out.contains("Unsupported bus: 9"));

    transport.feed(b"i2c 0 scan\n");
    run_cycles(2, &platform, &mut monitor, &mut console, &mut transport);
    let out = transport.take_output();
    assert!(out.contains("0x17 present"));
    assert!(out.contains("0x23 present"));
}

#[test]
fn expander_edge_reaches_callback_and_log() {
    let _gate = serial();
    let bus = wired_bus();
    let opts = ConsoleOptions::new();
    let platform = TestPlatform::new();
    let mut monitor = MonitorApp::new(&bus, &opts);
    let mut console = Console::new(&opts);
    MonitorApp::register_commands(&mut console).unwrap();
    let mut transport = SimTransport::new();

    // Baseline snapshot in place
    run_cycles(6, &platform, &mut monitor, &mut console, &mut transport);
    let _ = transport.take_output();
    let events_before = app::edge_events();

    // Raise watched pin 13 (port B bit 5)
    bus.borrow_mut()
        .write_reg16(MCP23017_I2C_ADDR, REG_GPIOA, 0x00, 0x20)
        .unwrap();

    let reports = run_cycles(2, &platform, &mut monitor, &mut console, &mut transport);
    assert_eq!(app::edge_events(), events_before + 1);
    assert!(!reports[0].should_sleep, "edge activity must not sleep");

    let out = transport.take_output();
    assert!(out.contains("edge: pin 13 -> 1"), "got: {}", out);

    // Reading the expander consumes the freshness
    transport.feed(b"mcp read\n");
    run_cycles(2, &platform, &mut monitor, &mut console, &mut transport);
    let out = transport.take_output();
    assert!(out.contains("0x2000"));
}

#[test]
fn stats_command_reports_cycle_timing() {
    let _gate = serial();
    let bus = wired_bus();
    let opts = ConsoleOptions::new();
    let platform = TestPlatform::new();
    let mut monitor = MonitorApp::new(&bus, &opts);
    let mut console = Console::new(&opts);
    MonitorApp::register_commands(&mut console).unwrap();
    let mut transport = SimTransport::new();

    run_cycles(10, &platform, &mut monitor, &mut console, &mut transport);
    let _ = transport.take_output();

    transport.feed(b"stats\n");
    run_cycles(2, &platform, &mut monitor, &mut console, &mut transport);
    let out = transport.take_output();
    assert!(out.contains("cycles:"), "got: {}", out);
    assert!(out.contains("cycle us:"));
}
