//! JuiceMonitor entry point.
//!
//! On the ESP32 target this wires the real UART console and I2C bus and
//! hands off to the service loop. On the host it runs the same loop over
//! simulated devices with stdin/stdout as the console transport.

#[cfg(target_arch = "xtensa")]
mod firmware {
    use core::cell::RefCell;

    use esp_idf_svc::hal::delay::NON_BLOCK;
    use esp_idf_svc::hal::gpio::AnyIOPin;
    use esp_idf_svc::hal::i2c::{config::Config as I2cConfig, I2cDriver};
    use esp_idf_svc::hal::peripherals::Peripherals;
    use esp_idf_svc::hal::uart::{config::Config as UartConfig, UartDriver};
    use esp_idf_svc::hal::units::Hertz;

    use juice_monitor::app::{self, MonitorApp};
    use juice_monitor::console::{Console, ConsoleOptions, Transport};
    use juice_monitor::hal::{I2cAdapter, I2cAdapterOptions};
    use juice_monitor::sched::Platform;

    const I2C0_FREQ_HZ: u32 = 200_000;

    struct EspPlatform;

    impl Platform for EspPlatform {
        fn now_us(&self) -> i64 {
            unsafe { esp_idf_svc::sys::esp_timer_get_time() }
        }

        fn yield_now(&self) {
            // Voluntary relinquish; equal-priority tasks get the core.
            unsafe { esp_idf_svc::sys::vPortYield() }
        }
    }

    struct UartTransport<'d> {
        uart: UartDriver<'d>,
    }

    impl<'d> Transport for UartTransport<'d> {
        fn read_byte(&mut self) -> Option<u8> {
            let mut buf = [0u8; 1];
            match self.uart.read(&mut buf, NON_BLOCK) {
                Ok(1) => Some(buf[0]),
                _ => None,
            }
        }

        fn write_bytes(&mut self, bytes: &[u8]) {
            let _ = self.uart.write(bytes);
        }
    }

    pub fn main() -> ! {
        esp_idf_svc::sys::link_patches();

        let peripherals = Peripherals::take().expect("peripherals already taken");
        let pins = peripherals.pins;

        // SDA on GPIO25, SCL on GPIO26. The ESP32's internal pull-ups are
        // insufficient for I2C; the board provides external ones.
        let i2c = I2cDriver::new(
            peripherals.i2c0,
            pins.gpio25,
            pins.gpio26,
            &I2cConfig::new().baudrate(Hertz(I2C0_FREQ_HZ)),
        )
        .expect("i2c0 init failed");

        let uart = UartDriver::new(
            peripherals.uart0,
            pins.gpio1,
            pins.gpio3,
            Option::<AnyIOPin>::None,
            Option::<AnyIOPin>::None,
            &UartConfig::default().baudrate(Hertz(115_200)),
        )
        .expect("console uart init failed");

        let bus = RefCell::new(I2cAdapter::new(i2c, I2cAdapterOptions::new(0, I2C0_FREQ_HZ)));
        let opts = ConsoleOptions::new();

        let mut monitor = MonitorApp::new(&bus, &opts);
        let mut console = Console::new(&opts);
        MonitorApp::register_commands(&mut console).expect("command table overflow");

        let mut transport = UartTransport { uart };
        app::run(&EspPlatform, &mut monitor, &mut console, &mut transport)
    }
}

#[cfg(target_arch = "xtensa")]
fn main() -> ! {
    firmware::main()
}

#[cfg(not(target_arch = "xtensa"))]
fn main() {
    use std::cell::RefCell;
    use std::io::{BufRead, Write as _};

    use juice_monitor::app::{self, MonitorApp};
    use juice_monitor::console::{Console, ConsoleOptions, TransportWriter};
    use juice_monitor::hal::{I2cAdapter, I2cAdapterOptions, MCP23017_I2C_ADDR, PAC195X_I2C_ADDR};
    use juice_monitor::sim::{HostPlatform, SimBus, SimTransport};

    // A plausible board: both devices answering, channel 1 under load.
    let mut sim = SimBus::new();
    sim.add_device(PAC195X_I2C_ADDR);
    sim.add_device(MCP23017_I2C_ADDR);
    sim.set_reg16(PAC195X_I2C_ADDR, 0x07, 0x2800); // VBUS1: 5 V
    sim.set_reg16(PAC195X_I2C_ADDR, 0x0B, 0x0800); // VSENSE1

    let bus = RefCell::new(I2cAdapter::new(sim, I2cAdapterOptions::new(0, 200_000)));
    let opts = ConsoleOptions::new();
    // The host terminal echoes locally already.
    opts.set_local_echo(false);
    opts.set_tx_term(juice_monitor::console::LineTerm::Lf);

    let platform = HostPlatform::new();
    let mut monitor = MonitorApp::new(&bus, &opts);
    let mut console: Console<'_, MonitorApp<'_, SimBus>> = Console::new(&opts);
    if MonitorApp::register_commands(&mut console).is_err() {
        eprintln!("command table overflow");
        return;
    }

    let mut transport = SimTransport::new();
    {
        let mut out = TransportWriter::new(&mut transport, opts.tx_term());
        console.print_banner(&mut out);
    }

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        // Let the sensors run their state machines before prompting.
        for _ in 0..32 {
            let report = app::service_cycle(&platform, &mut monitor, &mut console, &mut transport);
            if report.should_sleep {
                break;
            }
        }
        print!("{}", transport.take_output());
        let _ = stdout.flush();

        let mut input = String::new();
        match stdin.lock().read_line(&mut input) {
            Ok(0) | Err(_) => break,
            Ok(_) => transport.feed(input.as_bytes()),
        }
    }
}
