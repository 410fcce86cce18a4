use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant as HostInstant};

use critical_section::CriticalSection;
use node_core::app::{NodeConfig, NodeError, SensorNode, events, self_test};
use node_core::bus::{BusConfig, BusFault, BusId, BusManager};
use node_core::energy::{ENERGY_MODE_COUNT, EnergyArbiter, EnergyMode, SleepControl};
use node_core::link::{LinkConfig, LinkError, LinkTransmitter};
use node_core::scheduler::EventScheduler;
use node_core::sim::{SensorBus, SimulatedTimer, SimulatedUart, service_buses, service_link};

use crate::command::{self, Command, SensorInput};

/// Service passes allowed before a tick is declared stuck.
const SETTLE_LIMIT: usize = 256;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("tick", "tick [n]                      - run n sample periods (default 1)"),
    ("selftest", "selftest                      - run the humidity bus self-test"),
    ("status", "status                        - show readings and sleep votes"),
    (
        "set",
        "set <humidity|temperature|light> <raw> - override a sensor's raw output",
    ),
    ("help", "help                          - list commands"),
];

type Node = SensorNode<
    'static,
    BusManager<'static, SensorBus>,
    LinkTransmitter<'static, SimulatedUart>,
    SimulatedTimer,
>;

/// Records where the idle loop would have slept.
#[derive(Debug, Default)]
pub struct HostSleep {
    entered: [u32; ENERGY_MODE_COUNT],
}

impl HostSleep {
    pub fn count(&self, mode: EnergyMode) -> u32 {
        self.entered[mode.as_index()]
    }
}

impl SleepControl for HostSleep {
    fn enter(&mut self, _cs: CriticalSection<'_>, mode: EnergyMode) {
        self.entered[mode.as_index()] += 1;
    }
}

/// Why the session stopped driving the node.
#[derive(Clone, Copy, Debug)]
enum Halt {
    Fault(NodeError),
    /// Interrupts or events kept arriving past the settle limit.
    Stuck,
}

impl From<NodeError> for Halt {
    fn from(value: NodeError) -> Self {
        Halt::Fault(value)
    }
}

impl From<BusFault> for Halt {
    fn from(value: BusFault) -> Self {
        Halt::Fault(value.into())
    }
}

impl From<LinkError> for Halt {
    fn from(value: LinkError) -> Self {
        Halt::Fault(value.into())
    }
}

impl fmt::Display for Halt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Halt::Fault(error) => error.fmt(f),
            Halt::Stuck => write!(f, "node still busy after {SETTLE_LIMIT} passes"),
        }
    }
}

/// Output of one service-and-dispatch run.
struct Settled {
    text: String,
    idle: Option<EnergyMode>,
}

pub struct Session {
    node: Node,
    arbiter: &'static EnergyArbiter,
    scheduler: &'static EventScheduler,
    sleep: HostSleep,
    halted: Option<Halt>,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
}

impl Session {
    /// Builds the node and, when `transcript` is given, starts logging the
    /// session there.
    pub fn new(transcript: Option<&Path>) -> io::Result<Self> {
        let transcript = transcript.map(TranscriptLogger::new).transpose()?;
        // The node borrows both for as long as the process runs.
        let arbiter: &'static EnergyArbiter = Box::leak(Box::new(EnergyArbiter::new()));
        let scheduler: &'static EventScheduler = Box::leak(Box::new(EventScheduler::new()));
        let config = NodeConfig::default();

        let mut buses = BusManager::new(arbiter, scheduler, BusConfig::default());
        open_bus(&mut buses, config.light_bus, SensorBus::light())?;
        open_bus(&mut buses, config.humidity_bus, SensorBus::humidity())?;
        let link = LinkTransmitter::new(
            SimulatedUart::new(),
            arbiter,
            scheduler,
            LinkConfig::new(events::LINK_TX_DONE),
        );
        let node = SensorNode::new(
            buses,
            link,
            SimulatedTimer::default(),
            scheduler,
            arbiter,
            config,
        );

        Ok(Self {
            node,
            arbiter,
            scheduler,
            sleep: HostSleep::default(),
            halted: None,
            transcript,
            started_at: HostInstant::now(),
        })
    }

    /// Opens the node and returns what it printed while booting.
    pub fn boot(&mut self) -> io::Result<Vec<String>> {
        let elapsed = self.started_at.elapsed();
        let lines = match self.node.open() {
            Ok(()) => self.settle_lines(),
            Err(error) => self.halt(error.into()),
        };
        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let lines = match command::parse(trimmed) {
            Ok(Command::Help) => help_lines(),
            Ok(Command::Status) => self.status_lines(),
            Ok(command) if self.halted.is_some() => {
                let reason = self.halted.map(|error| error.to_string()).unwrap_or_default();
                vec![format!("ERR node halted ({reason}); `{}` ignored", command_label(command))]
            }
            Ok(Command::Tick(count)) => self.tick(count),
            Ok(Command::SelfTest) => self.self_test(),
            Ok(Command::Set(input, raw)) => self.set_input(input, raw),
            Err(error) => vec![format!("ERR syntax {error}")],
        };

        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    #[cfg(test)]
    pub fn sleep(&self) -> &HostSleep {
        &self.sleep
    }

    fn tick(&mut self, count: u32) -> Vec<String> {
        let mut lines = Vec::new();
        for _ in 0..count {
            self.scheduler.post(events::SAMPLE_TICK);
            lines.extend(self.settle_lines());
            if self.halted.is_some() {
                break;
            }
        }
        lines
    }

    fn settle_lines(&mut self) -> Vec<String> {
        match self.settle() {
            Ok(settled) => {
                let mut lines: Vec<String> = settled.text.lines().map(str::to_owned).collect();
                lines.push(match settled.idle {
                    Some(mode) => format!("[idle {mode}]"),
                    None => "[idle awake]".to_string(),
                });
                lines
            }
            Err(error) => self.halt(error),
        }
    }

    /// Delivers interrupts and dispatches events until the node goes quiet,
    /// then lets it idle once.
    fn settle(&mut self) -> Result<Settled, Halt> {
        let mut bytes = Vec::new();
        for _ in 0..SETTLE_LIMIT {
            let bus_work = service_buses(self.node.port_mut())?;
            let link_work = service_link(self.node.sink_mut())?;
            bytes.extend_from_slice(&self.node.sink_mut().peripheral_mut().take_output());
            let handled = self.node.dispatch()?;

            if bus_work == 0 && link_work == 0 && handled.is_empty() {
                let scheduler = self.scheduler;
                if let Some(idle) = self
                    .arbiter
                    .enter_idle(&mut self.sleep, || scheduler.pending().is_empty())
                {
                    return Ok(Settled {
                        text: String::from_utf8_lossy(&bytes).into_owned(),
                        idle: Some(idle),
                    });
                }
                if !scheduler.pending().is_empty() {
                    continue;
                }
                return Ok(Settled {
                    text: String::from_utf8_lossy(&bytes).into_owned(),
                    idle: None,
                });
            }
        }
        Err(Halt::Stuck)
    }

    fn halt(&mut self, reason: Halt) -> Vec<String> {
        self.halted = Some(reason);
        vec![format!("FAULT {reason}")]
    }

    fn self_test(&mut self) -> Vec<String> {
        let bus = self.node.config().humidity_bus;
        let mut service_fault: Option<BusFault> = None;
        let result = self_test::run(self.node.port_mut(), self.scheduler, bus, |buses| {
            if let Err(fault) = service_buses(buses) {
                service_fault.get_or_insert(fault);
            }
        });

        match (result, service_fault) {
            (_, Some(fault)) => self.halt(fault.into()),
            (Ok(report), None) => vec![format!(
                "OK self-test user-register={:#04x} humidity={:.1}% temperature={:.1} F",
                report.user_register, report.humidity, report.temperature_f
            )],
            (Err(error), None) => vec![format!("ERR self-test {error}")],
        }
    }

    fn set_input(&mut self, input: SensorInput, raw: u16) -> Vec<String> {
        let config = *self.node.config();
        let buses = self.node.port_mut();
        let applied = match input {
            SensorInput::Humidity => sensor_bus(buses, config.humidity_bus)
                .and_then(SensorBus::si7021_mut)
                .map(|model| model.humidity_raw = raw),
            SensorInput::Temperature => sensor_bus(buses, config.humidity_bus)
                .and_then(SensorBus::si7021_mut)
                .map(|model| model.temperature_raw = raw),
            SensorInput::Light => sensor_bus(buses, config.light_bus)
                .and_then(SensorBus::veml6030_mut)
                .map(|model| model.als_raw = raw),
        };
        match applied {
            Some(()) => vec![format!("OK {} raw={raw:#06x}", input_label(input))],
            None => vec![format!("ERR {} sensor not attached", input_label(input))],
        }
    }

    fn status_lines(&self) -> Vec<String> {
        let readings = self.node.readings();
        let votes: Vec<String> = EnergyMode::ALL
            .iter()
            .map(|&mode| format!("{mode}={}", self.arbiter.votes(mode)))
            .collect();
        let sleeps: Vec<String> = EnergyMode::ALL
            .iter()
            .map(|&mode| format!("{mode}={}", self.sleep.count(mode)))
            .collect();

        vec![
            format!("samples: {}", readings.samples),
            format!(
                "humidity: {}",
                readings
                    .humidity
                    .map_or_else(|| "n/a".to_string(), |value| format!("{value:.1}%"))
            ),
            format!(
                "temperature: {}",
                readings
                    .temperature_f
                    .map_or_else(|| "n/a".to_string(), |value| format!("{value:.1} F"))
            ),
            format!(
                "light: {}",
                readings
                    .lux
                    .map_or_else(|| "n/a".to_string(), |value| format!("{value} lux"))
            ),
            format!(
                "floor: {} ({})",
                self.arbiter.current_floor(),
                votes.join(" ")
            ),
            format!("idle entries: {}", sleeps.join(" ")),
            format!("pending events: {:#x}", self.scheduler.pending().bits()),
        ]
    }

    fn record_output(&mut self, elapsed: Duration, lines: &[String]) -> io::Result<()> {
        if let Some(transcript) = self.transcript.as_mut() {
            for line in lines {
                transcript.append_line(elapsed, TranscriptRole::Emulator, line)?;
            }
        }
        Ok(())
    }
}

fn open_bus(
    buses: &mut BusManager<'static, SensorBus>,
    bus: BusId,
    peripheral: SensorBus,
) -> io::Result<()> {
    buses
        .open(bus, peripheral)
        .map_err(|fault| io::Error::other(fault.to_string()))
}

fn sensor_bus<'a>(buses: &'a mut BusManager<'static, SensorBus>, bus: BusId) -> Option<&'a mut SensorBus> {
    buses.peripheral_mut(bus)
}

fn help_lines() -> Vec<String> {
    let mut lines = vec!["Available commands:".to_string()];
    for (_, detail) in HELP_TOPICS {
        lines.push(format!("  {detail}"));
    }
    lines
}

const fn input_label(input: SensorInput) -> &'static str {
    match input {
        SensorInput::Humidity => "humidity",
        SensorInput::Temperature => "temperature",
        SensorInput::Light => "light",
    }
}

const fn command_label(command: Command) -> &'static str {
    match command {
        Command::Tick(_) => "tick",
        Command::SelfTest => "selftest",
        Command::Status => "status",
        Command::Set(..) => "set",
        Command::Help => "help",
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    const fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => ">",
            TranscriptRole::Emulator => "<",
        }
    }
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        logger.write_header()?;
        Ok(logger)
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.writer, "# Sensor node emulator transcript")?;
        writeln!(self.writer, "# Timestamps are milliseconds since session start")?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(&mut self, elapsed: Duration, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booted() -> (Session, Vec<String>) {
        let mut session = Session::new(None).unwrap();
        let boot = session.boot().unwrap();
        (session, boot)
    }

    #[test]
    fn boot_prints_banner_and_idles_above_the_system_floor() {
        let (session, boot) = booted();

        assert_eq!(boot, ["", "Hello World", "[idle EM2]"]);
        assert_eq!(session.sleep().count(EnergyMode::Em2), 1);
    }

    #[test]
    fn tick_reports_one_sample() {
        let (mut session, _) = booted();

        let lines = session.handle_command("tick").unwrap();
        assert_eq!(
            lines,
            [
                "humidity = 44.9%",
                "light = 299 lux ",
                "",
                "temperature = 73.7 F",
                "[idle EM2]"
            ]
        );
    }

    #[test]
    fn set_changes_next_report() {
        let (mut session, _) = booted();

        let ack = session.handle_command("set humidity 0x8000").unwrap();
        assert_eq!(ack, ["OK humidity raw=0x8000"]);

        let lines = session.handle_command("tick 2").unwrap();
        let humidity: Vec<&String> = lines.iter().filter(|line| line.starts_with("humidity")).collect();
        assert_eq!(humidity, ["humidity = 56.5%", "humidity = 56.5%"]);
    }

    #[test]
    fn status_shows_votes_and_readings() {
        let (mut session, _) = booted();
        session.handle_command("tick").unwrap();

        let status = session.handle_command("status").unwrap();
        assert!(status.contains(&"samples: 1".to_string()));
        assert!(status.contains(&"light: 299 lux".to_string()));
        assert!(status.contains(&"floor: EM3 (EM0=0 EM1=0 EM2=0 EM3=1 EM4=0)".to_string()));
    }

    #[test]
    fn self_test_passes_between_samples() {
        let (mut session, _) = booted();

        let lines = session.handle_command("selftest").unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("OK self-test user-register=0x3a"), "{lines:?}");

        let after = session.handle_command("tick").unwrap();
        assert_eq!(after.first().map(String::as_str), Some("humidity = 44.9%"));
    }

    #[test]
    fn syntax_errors_are_reported() {
        let (mut session, _) = booted();

        let lines = session.handle_command("tick now").unwrap();
        assert_eq!(lines, ["ERR syntax unexpected input at column 6"]);
    }

    #[test]
    fn transcript_records_both_directions() {
        let path = std::env::temp_dir().join(format!("node-emulator-{}.log", std::process::id()));
        {
            let mut session = Session::new(Some(&path)).unwrap();
            session.boot().unwrap();
            session.handle_command("status").unwrap();
        }

        let transcript = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(transcript.starts_with("# Sensor node emulator transcript"));
        assert!(transcript.contains("> status"));
        assert!(transcript.contains("< Hello World"));
    }
}
