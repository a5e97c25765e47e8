use std::{env, time::Instant as StdInstant};

use hybrid_plant_poller::{
    Dispatcher, DispatcherConfig, GensetController, GensetGroup, GroupBuilder, Housekeeping,
    Instant, InverterGroup, InverterModel, LinkEvent, LoopStats, RtuTransport,
    config::{DEFAULT_BAUD_RATE, DEFAULT_SLAVE_ADDRESS, DEFAULT_TIMEOUT},
    dispatcher::Fleet,
};
use inquire::Select;
use log::{LevelFilter, info};
use serialport::SerialPort;

// Configuration constants - adjust these for your setup
const INVERTER_NODES: usize = 4;
const GENSET_NODES: usize = 2;
// Short read timeout, the transport only reads what is already buffered.
const SERIAL_TIMEOUT_MS: u64 = 5;

pub struct PortWrapper(Box<dyn SerialPort>);

#[derive(Debug)]
pub struct IoError(std::io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            std::io::ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            std::io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            std::io::ErrorKind::InvalidInput => embedded_io::ErrorKind::InvalidInput,
            std::io::ErrorKind::InvalidData => embedded_io::ErrorKind::InvalidData,
            std::io::ErrorKind::TimedOut => embedded_io::ErrorKind::TimedOut,
            std::io::ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
            std::io::ErrorKind::Unsupported => embedded_io::ErrorKind::Unsupported,
            std::io::ErrorKind::OutOfMemory => embedded_io::ErrorKind::OutOfMemory,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for PortWrapper {
    type Error = IoError;
}

impl embedded_io::Read for PortWrapper {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        std::io::Read::read(&mut self.0, buf).map_err(IoError)
    }
}

impl embedded_io::ReadReady for PortWrapper {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        self.0
            .bytes_to_read()
            .map(|pending| pending > 0)
            .map_err(|err| IoError(err.into()))
    }
}

impl embedded_io::Write for PortWrapper {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        std::io::Write::write(&mut self.0, buf).map_err(IoError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        std::io::Write::flush(&mut self.0).map_err(IoError)
    }
}

/// Prints the loop statistics the way the controller's debug console does.
struct Console;

impl Housekeeping for Console {
    fn heartbeat(&mut self, stats: LoopStats) {
        info!(
            "{} passes, average loop time {} us",
            stats.passes,
            stats.average_pass_us()
        );
    }
}

fn select_port(prompt: &str, arg: Option<String>) -> String {
    arg.unwrap_or_else(|| {
        let ports = serialport::available_ports().expect("Failed to enumerate serial ports");

        if ports.is_empty() {
            eprintln!("No serial ports found!");
            std::process::exit(1);
        }

        let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();
        Select::new(prompt, port_names)
            .prompt()
            .expect("Failed to select port")
    })
}

fn open(port_name: &str) -> PortWrapper {
    let port = serialport::new(port_name, DEFAULT_BAUD_RATE)
        .timeout(std::time::Duration::from_millis(SERIAL_TIMEOUT_MS))
        .open()
        .expect("Failed to open serial port");
    PortWrapper(port)
}

fn main() {
    let started = StdInstant::now();
    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{:>8.3}][{}][{}] {}",
                started.elapsed().as_secs_f32(),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(LevelFilter::Info)
        .chain(std::io::stdout())
        .apply()
        .expect("Failed to install logger");

    // Inverter and genset buses from the command line or interactive selection
    let pv_port = select_port("Select the inverter bus:", env::args().nth(1));
    let genset_port = select_port("Select the genset bus:", env::args().nth(2));
    info!("Inverters on {}, gensets on {}", pv_port, genset_port);

    let mut inverters: InverterGroup<RtuTransport<PortWrapper>> = GroupBuilder::new("inverters")
        .with_nodes(INVERTER_NODES)
        .with_all_devices(InverterModel::Sungrow)
        .build(RtuTransport::new(
            open(&pv_port),
            (),
            DEFAULT_SLAVE_ADDRESS,
            DEFAULT_TIMEOUT,
        ))
        .expect("Invalid inverter group");

    let mut gensets: GensetGroup<RtuTransport<PortWrapper>> = GroupBuilder::new("gensets")
        .with_nodes(GENSET_NODES)
        .with_all_devices(GensetController::Sices)
        .build(RtuTransport::new(
            open(&genset_port),
            (),
            DEFAULT_SLAVE_ADDRESS,
            DEFAULT_TIMEOUT,
        ))
        .expect("Invalid genset group");

    let now = || Instant::from_ticks(started.elapsed().as_millis() as u32);
    let mut dispatcher = Dispatcher::new(DispatcherConfig::default(), now());
    let mut on_link_change = |event: LinkEvent| {
        info!(
            "{} node {} (unit {}) is now {:?}",
            event.group, event.node, event.address, event.state
        );
    };
    let mut console = Console;

    let mut last_totals = (inverters.totals(), gensets.totals());
    loop {
        {
            let mut fleets: [&mut dyn Fleet; 2] = [&mut inverters, &mut gensets];
            dispatcher.run_once(now(), &mut fleets, &mut on_link_change, &mut console);
        }

        let totals = (inverters.totals(), gensets.totals());
        if totals != last_totals {
            info!(
                "PV {:.1} / {:.1} kW, gensets {:.1} / {:.1} kW",
                totals.0.active_power,
                totals.0.nominal_power,
                totals.1.active_power,
                totals.1.nominal_power
            );
            last_totals = totals;
        }

        std::thread::sleep(std::time::Duration::from_micros(200));
    }
}
