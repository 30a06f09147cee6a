//! Monitor plugins are driven by the session lifecycle and log through
//! ordinary loggers.

use std::{
    fmt, fs, io,
    str::FromStr,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Sender, bounded, select, tick};

use crate::{
    error::{BoxError, Error, Result},
    level::LogLevel,
    logger::Logger,
    params::Parameters,
    session::Shared,
};

/// Handle given to a monitor at init time.
#[derive(Clone)]
pub struct MonitorContext {
    shared: Weak<Shared>,
    kind: String,
}

impl MonitorContext {
    pub(crate) fn new(shared: &Arc<Shared>, kind: &str) -> Self {
        Self {
            shared: Arc::downgrade(shared),
            kind: kind.to_string(),
        }
    }

    /// Registered plugin name of the monitor.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Logger of the owning session manager.
    pub fn logger(&self, name: &str) -> Result<Logger> {
        let shared = self.shared.upgrade().ok_or(Error::SessionNotRunning)?;
        Shared::logger(&shared, name)
    }
}

/// A plugin driven by session state changes. Instances live for one session
/// and are dropped once it stops.
pub trait Monitor: Send {
    fn init(&mut self, context: MonitorContext, parameters: &Parameters) -> std::result::Result<(), BoxError>;

    fn session_started(&mut self) {}

    fn session_suspended(&mut self) {}

    fn session_resumed(&mut self) {}

    fn session_stopped(&mut self) {}
}

/// Process memory figure sampled by [`ProcessMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryKind {
    #[default]
    WorkingSet,
    PeakWorkingSet,
    VirtualMemorySize,
    PeakVirtualMemorySize,
    PrivateMemorySize,
    SwapSize,
}

impl MemoryKind {
    const ALL: [MemoryKind; 6] = [
        MemoryKind::WorkingSet,
        MemoryKind::PeakWorkingSet,
        MemoryKind::VirtualMemorySize,
        MemoryKind::PeakVirtualMemorySize,
        MemoryKind::PrivateMemorySize,
        MemoryKind::SwapSize,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            MemoryKind::WorkingSet => "WorkingSet",
            MemoryKind::PeakWorkingSet => "PeakWorkingSet",
            MemoryKind::VirtualMemorySize => "VirtualMemorySize",
            MemoryKind::PeakVirtualMemorySize => "PeakVirtualMemorySize",
            MemoryKind::PrivateMemorySize => "PrivateMemorySize",
            MemoryKind::SwapSize => "SwapSize",
        }
    }

    /// Field of `/proc/self/status` holding this figure.
    const fn status_key(self) -> &'static str {
        match self {
            MemoryKind::WorkingSet => "VmRSS",
            MemoryKind::PeakWorkingSet => "VmHWM",
            MemoryKind::VirtualMemorySize => "VmSize",
            MemoryKind::PeakVirtualMemorySize => "VmPeak",
            MemoryKind::PrivateMemorySize => "RssAnon",
            MemoryKind::SwapSize => "VmSwap",
        }
    }

    /// Current value in MB, `None` where the platform does not report it.
    pub fn sample(self) -> io::Result<Option<f64>> {
        match fs::read_to_string("/proc/self/status") {
            Ok(status) => parse_status(&status, self.status_key()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        MemoryKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown memory kind '{s}'"))
    }
}

fn parse_status(status: &str, key: &str) -> io::Result<Option<f64>> {
    for line in status.lines() {
        if let Some(value) = line.strip_prefix(key)
            && let Some(value) = value.strip_prefix(':')
        {
            let kb: f64 = value
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, format!("{key}: {err}")))?;
            return Ok(Some(kb / 1024.0));
        }
    }
    Ok(None)
}

fn parse_flag(value: &str) -> std::result::Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(format!("'{other}' is not a boolean")),
    }
}

/// Parameters of [`ProcessMonitor`]: `interval` (ms), `enabled`, `level`, `memory`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSettings {
    pub interval: Duration,
    pub enabled: bool,
    pub level: LogLevel,
    pub memory: MemoryKind,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            enabled: true,
            level: LogLevel::Debug,
            memory: MemoryKind::WorkingSet,
        }
    }
}

impl ProcessSettings {
    pub const UPPER_BOUND_MB: f64 = 2048.0;

    pub fn from_parameters(parameters: &Parameters) -> Result<Self> {
        let defaults = Self::default();
        let interval = parameters.try_get::<u64>("interval")?;
        if interval == Some(0) {
            return Err(Error::InvalidParameters {
                expression: parameters.to_string(),
                reason: "interval must be positive".into(),
            });
        }
        let enabled = parameters
            .get("enabled")
            .map(parse_flag)
            .transpose()
            .map_err(|reason| Error::InvalidParameters {
                expression: parameters.to_string(),
                reason,
            })?;
        Ok(Self {
            interval: interval.map_or(defaults.interval, Duration::from_millis),
            enabled: enabled.unwrap_or(defaults.enabled),
            level: parameters.try_get("level")?.unwrap_or(defaults.level),
            memory: parameters.try_get("memory")?.unwrap_or(defaults.memory),
        })
    }

    /// Logger name the samples are written to.
    pub fn logger_name(&self) -> String {
        format!("ProcessMonitor.{}", self.memory)
    }
}

struct Ticker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Periodically logs one memory figure of the current process as an
/// absolute value in MB.
#[derive(Default)]
pub struct ProcessMonitor {
    settings: ProcessSettings,
    logger: Option<Logger>,
    running: Arc<AtomicBool>,
    ticker: Option<Ticker>,
}

impl ProcessMonitor {
    pub fn settings(&self) -> &ProcessSettings {
        &self.settings
    }

    fn start_ticker(&mut self) {
        let Some(logger) = self.logger.clone() else {
            return;
        };
        let (stop, stopped) = bounded::<()>(0);
        let running = Arc::clone(&self.running);
        let settings = self.settings;
        let spawned = thread::Builder::new()
            .name("sessionlog-monitor".into())
            .spawn(move || {
                let ticker = tick(settings.interval);
                loop {
                    select! {
                        recv(stopped) -> _ => return,
                        recv(ticker) -> _ => {
                            if running.load(Ordering::SeqCst) && !sample(&logger, &settings) {
                                running.store(false, Ordering::SeqCst);
                                return;
                            }
                        }
                    }
                }
            });
        match spawned {
            Ok(handle) => self.ticker = Some(Ticker { stop, handle }),
            Err(err) => log::warn!(target: "sessionlog::monitor", "process monitor not started: {err}"),
        }
    }

    fn stop_ticker(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(ticker) = self.ticker.take() {
            drop(ticker.stop);
            let _ = ticker.handle.join();
        }
    }
}

/// Logs one sample; false once sampling failed and the monitor must stop.
fn sample(logger: &Logger, settings: &ProcessSettings) -> bool {
    match settings.memory.sample() {
        Ok(Some(value)) => {
            logger.add_absolute_value(
                settings.level,
                || format!("{} (MB)", settings.memory),
                value,
                0.0,
                ProcessSettings::UPPER_BOUND_MB,
            );
            true
        }
        Ok(None) => true,
        Err(err) => {
            logger.add_exception(
                LogLevel::Error,
                || format!("{} sampling failed, monitor disabled", settings.memory),
                || err,
            );
            false
        }
    }
}

impl Monitor for ProcessMonitor {
    fn init(&mut self, context: MonitorContext, parameters: &Parameters) -> std::result::Result<(), BoxError> {
        self.settings = ProcessSettings::from_parameters(parameters)?;
        self.logger = Some(context.logger(&self.settings.logger_name())?);
        Ok(())
    }

    fn session_started(&mut self) {
        if self.settings.enabled && self.ticker.is_none() {
            self.running.store(true, Ordering::SeqCst);
            self.start_ticker();
        }
    }

    fn session_suspended(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn session_resumed(&mut self) {
        if self.ticker.is_some() {
            self.running.store(true, Ordering::SeqCst);
        }
    }

    fn session_stopped(&mut self) {
        self.stop_ticker();
    }
}

impl Drop for ProcessMonitor {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}
