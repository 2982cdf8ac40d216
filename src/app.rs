//! Application wiring for JuiceMonitor.
//!
//! Owns the concrete devices, registers the console command table, and
//! runs the service loop. The core modules (scheduler, dispatch table,
//! router) stay application-agnostic; everything that knows this board's
//! shape lives here.

use core::cell::RefCell;
use core::fmt::Write;
use core::sync::atomic::{AtomicU32, Ordering};

use embedded_hal::i2c::I2c;

use crate::console::{
    CommandDescriptor, CommandSet, Console, ConsoleError, ConsoleOptions, LineTerm, ParsedLine,
    Transport, TransportWriter,
};
use crate::device::PolledDevice;
use crate::hal::{
    GpioExpander, I2cAdapter, PowerSensor, PowerSensorConfig, SampleRate, MCP23017_I2C_ADDR,
    PAC195X_I2C_ADDR,
};
use crate::irq::EdgeCondition;
use crate::logging::{self, LogLevel, LOG};
use crate::sched::{CycleReport, Platform, Scheduler};
use crate::{mon_info, mon_warn};

/// Expander pins watched at the top level.
pub const WATCHED_PIN_CHANGE: u8 = 4;
pub const WATCHED_PIN_RISING: u8 = 13;
pub const WATCHED_PIN_FALLING: u8 = 14;

/// Power sensor channels 1-3 enabled.
pub const POWER_CHAN_MASK: u8 = 0b0111;

/// Edge events witnessed by the top-level callback.
static EDGE_EVENTS: AtomicU32 = AtomicU32::new(0);

/// Edge events seen since boot.
pub fn edge_events() -> u32 {
    EDGE_EVENTS.load(Ordering::Relaxed)
}

/// Top-level pin witness: counts the event and logs it.
///
/// Runs synchronously inside the expander's poll, so it stays cheap.
fn pin_edge_witness(pin: u8, level: bool) {
    EDGE_EVENTS.fetch_add(1, Ordering::Relaxed);
    mon_info!(
        LOG,
        logging::wall_clock_us(),
        "edge: pin {} -> {}",
        pin,
        level as u8
    );
}

/// The monitor application: scheduler plus this board's devices.
///
/// Devices are owned here and lent to the scheduler (poll pass) and the
/// console (command dispatch) within each cycle; only the bus adapter is
/// shared, through a `RefCell`.
pub struct MonitorApp<'a, B: I2c> {
    pub sched: Scheduler,
    pub i2c0: &'a RefCell<I2cAdapter<B>>,
    pub power: PowerSensor<'a, B>,
    pub expander: GpioExpander<'a, B>,
    pub opts: &'a ConsoleOptions,
}

impl<'a, B: I2c> MonitorApp<'a, B> {
    pub fn new(i2c0: &'a RefCell<I2cAdapter<B>>, opts: &'a ConsoleOptions) -> Self {
        let mut app = Self {
            sched: Scheduler::new(),
            i2c0,
            power: PowerSensor::new(
                i2c0,
                PAC195X_I2C_ADDR,
                PowerSensorConfig::new(POWER_CHAN_MASK, SampleRate::Sps64),
            ),
            expander: GpioExpander::new(i2c0, MCP23017_I2C_ADDR),
            opts,
        };

        // Top-level pin responsibilities. Drivers handle their own pins;
        // these three are watched by the application itself.
        let watches = [
            (WATCHED_PIN_CHANGE, EdgeCondition::Change),
            (WATCHED_PIN_RISING, EdgeCondition::Rising),
            (WATCHED_PIN_FALLING, EdgeCondition::Falling),
        ];
        for (pin, condition) in watches {
            if app
                .expander
                .attach_interrupt(pin, pin_edge_witness, condition)
                .is_err()
            {
                mon_warn!(LOG, 0, "wiring: invalid watch pin {}", pin);
            }
        }

        app
    }

    /// Register the command table.
    pub fn register_commands(console: &mut Console<'a, Self>) -> Result<(), ConsoleError> {
        console.define(CommandDescriptor {
            name: "help",
            alias: Some('?'),
            help: "Prints help to console.",
            usage: "[<specific command>]",
            min_args: 0,
            handler: cmd_help,
        })?;
        console.define(CommandDescriptor {
            name: "console",
            alias: None,
            help: "Console conf.",
            usage: "[echo|prompt|helpfail|txterm] [<value>]",
            min_args: 0,
            handler: cmd_console,
        })?;
        console.define(CommandDescriptor {
            name: "pwr",
            alias: Some('p'),
            help: "Power sensor tools",
            usage: "pwr [info|consume]",
            min_args: 0,
            handler: cmd_pwr,
        })?;
        console.define(CommandDescriptor {
            name: "mcp",
            alias: Some('m'),
            help: "MCP23017 test",
            usage: "mcp [info|read|pin <n>|reconf]",
            min_args: 0,
            handler: cmd_mcp,
        })?;
        console.define(CommandDescriptor {
            name: "i2c",
            alias: Some('I'),
            help: "I2C tools",
            usage: "i2c <bus> <action> [addr]",
            min_args: 1,
            handler: cmd_i2c,
        })?;
        console.define(CommandDescriptor {
            name: "stats",
            alias: Some('s'),
            help: "Loop and log statistics",
            usage: "stats [loop|log]",
            min_args: 0,
            handler: cmd_stats,
        })?;
        console.define(CommandDescriptor {
            name: "debug",
            alias: None,
            help: "Get/set log verbosity",
            usage: "debug [error|warn|info|debug|trace]",
            min_args: 0,
            handler: cmd_debug,
        })?;
        Ok(())
    }
}

// --- Console callbacks ---

fn cmd_help<'a, B: I2c>(
    _app: &mut MonitorApp<'a, B>,
    set: &CommandSet<MonitorApp<'a, B>>,
    line: &ParsedLine<'_>,
    out: &mut dyn Write,
) -> Result<(), ConsoleError> {
    if let Some(name) = line.arg(0) {
        let desc = set.resolve(name).ok_or(ConsoleError::UnknownCommand)?;
        CommandSet::write_usage(desc, out);
    } else {
        set.write_listing(out);
    }
    Ok(())
}

fn parse_on_off(token: &str) -> Result<bool, ConsoleError> {
    match token {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        _ => Err(ConsoleError::InvalidValue),
    }
}

fn cmd_console<'a, B: I2c>(
    app: &mut MonitorApp<'a, B>,
    _set: &CommandSet<MonitorApp<'a, B>>,
    line: &ParsedLine<'_>,
    out: &mut dyn Write,
) -> Result<(), ConsoleError> {
    let opts = app.opts;
    match line.arg(0) {
        None => {
            let _ = writeln!(out, "echo:     {}", opts.local_echo());
            let _ = writeln!(out, "prompt:   {}", opts.emit_prompt());
            let _ = writeln!(out, "helpfail: {}", opts.help_on_fail());
            let _ = writeln!(
                out,
                "txterm:   {}",
                match opts.tx_term() {
                    LineTerm::Lf => "lf",
                    LineTerm::Crlf => "crlf",
                }
            );
            Ok(())
        }
        Some("echo") => {
            let on = parse_on_off(line.arg(1).ok_or(ConsoleError::MissingArg)?)?;
            opts.set_local_echo(on);
            let _ = writeln!(out, "echo: {}", on);
            Ok(())
        }
        Some("prompt") => {
            let on = parse_on_off(line.arg(1).ok_or(ConsoleError::MissingArg)?)?;
            opts.set_emit_prompt(on);
            let _ = writeln!(out, "prompt: {}", on);
            Ok(())
        }
        Some("helpfail") => {
            let on = parse_on_off(line.arg(1).ok_or(ConsoleError::MissingArg)?)?;
            opts.set_help_on_fail(on);
            let _ = writeln!(out, "helpfail: {}", on);
            Ok(())
        }
        Some("txterm") => {
            let term = match line.arg(1) {
                Some("lf") => LineTerm::Lf,
                Some("crlf") => LineTerm::Crlf,
                Some(_) => return Err(ConsoleError::InvalidValue),
                None => return Err(ConsoleError::MissingArg),
            };
            opts.set_tx_term(term);
            Ok(())
        }
        Some(_) => Err(ConsoleError::InvalidValue),
    }
}

fn cmd_pwr<'a, B: I2c>(
    app: &mut MonitorApp<'a, B>,
    _set: &CommandSet<MonitorApp<'a, B>>,
    line: &ParsedLine<'_>,
    out: &mut dyn Write,
) -> Result<(), ConsoleError> {
    app.power.console_handler(out, &line.sub_line(0))
}

fn cmd_mcp<'a, B: I2c>(
    app: &mut MonitorApp<'a, B>,
    _set: &CommandSet<MonitorApp<'a, B>>,
    line: &ParsedLine<'_>,
    out: &mut dyn Write,
) -> Result<(), ConsoleError> {
    // Interdict actions specific to this application; everything else
    // belongs to the driver.
    if line.arg(0) == Some("reconf") {
        app.expander.reconfigure();
        let _ = writeln!(out, "mcp23017: reconfiguring");
        return Ok(());
    }
    app.expander.console_handler(out, &line.sub_line(0))
}

fn cmd_i2c<'a, B: I2c>(
    app: &mut MonitorApp<'a, B>,
    _set: &CommandSet<MonitorApp<'a, B>>,
    line: &ParsedLine<'_>,
    out: &mut dyn Write,
) -> Result<(), ConsoleError> {
    let bus_id = line.arg_as_u32(0)?;
    match bus_id {
        0 => app
            .i2c0
            .borrow_mut()
            .console_handler(out, &line.sub_line(1)),
        n => {
            let _ = writeln!(out, "Unsupported bus: {}", n);
            Ok(())
        }
    }
}

fn cmd_stats<'a, B: I2c>(
    app: &mut MonitorApp<'a, B>,
    _set: &CommandSet<MonitorApp<'a, B>>,
    line: &ParsedLine<'_>,
    out: &mut dyn Write,
) -> Result<(), ConsoleError> {
    match line.arg(0) {
        None | Some("loop") => {
            let sw = app.sched.stopwatch();
            let _ = writeln!(
                out,
                "cycles: {} ({} active)",
                app.sched.cycles(),
                app.sched.active_cycles()
            );
            let _ = writeln!(
                out,
                "cycle us: last {}  best {}  worst {}  mean {}",
                sw.last_us(),
                sw.best_us(),
                sw.worst_us(),
                sw.mean_us()
            );
            let _ = writeln!(out, "edge events: {}", edge_events());
            Ok(())
        }
        Some("log") => {
            let _ = writeln!(out, "level:   {}", LOG.level().as_str());
            let _ = writeln!(out, "pending: {}", LOG.pending());
            let _ = writeln!(out, "dropped: {}", LOG.dropped());
            Ok(())
        }
        Some(_) => Err(ConsoleError::InvalidValue),
    }
}

fn cmd_debug<'a, B: I2c>(
    _app: &mut MonitorApp<'a, B>,
    _set: &CommandSet<MonitorApp<'a, B>>,
    line: &ParsedLine<'_>,
    out: &mut dyn Write,
) -> Result<(), ConsoleError> {
    match line.arg(0) {
        None => {
            let _ = writeln!(out, "log level: {}", LOG.level().as_str());
            Ok(())
        }
        Some(token) => {
            let level = LogLevel::from_token(token).ok_or(ConsoleError::InvalidValue)?;
            LOG.set_level(level);
            let _ = writeln!(out, "log level: {}", level.as_str());
            Ok(())
        }
    }
}

// --- Service loop ---

/// One full cycle of the monitor: poll devices, service the console,
/// drain logs, close the cycle.
pub fn service_cycle<'o, 'a, B: I2c, P: Platform, T: Transport>(
    platform: &P,
    app: &mut MonitorApp<'a, B>,
    console: &mut Console<'o, MonitorApp<'a, B>>,
    transport: &mut T,
) -> CycleReport {
    app.sched.begin_cycle(platform.now_us());

    {
        let MonitorApp {
            sched,
            power,
            expander,
            ..
        } = app;
        sched.poll_all(&mut [
            power as &mut dyn PolledDevice,
            expander as &mut dyn PolledDevice,
        ]);
    }

    let term = app.opts.tx_term();
    let moved = console.service(app, transport);
    if moved > 0 {
        app.sched.note_activity();
    }

    let mut log_out = TransportWriter::new(transport, term);
    if LOG.drain_to(&mut log_out) > 0 {
        app.sched.note_activity();
    }

    app.sched.end_cycle(platform.now_us())
}

/// The monitor's forever loop.
///
/// Runs in one cooperative context; an idle cycle hands the processor
/// back to the runtime before the next one starts.
pub fn run<'o, 'a, B: I2c, P: Platform, T: Transport>(
    platform: &P,
    app: &mut MonitorApp<'a, B>,
    console: &mut Console<'o, MonitorApp<'a, B>>,
    transport: &mut T,
) -> ! {
    {
        let mut out = TransportWriter::new(transport, app.opts.tx_term());
        console.print_banner(&mut out);
    }

    loop {
        let report = service_cycle(platform, app, console, transport);
        if report.should_sleep {
            platform.yield_now();
        }
    }
}
