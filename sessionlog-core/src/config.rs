use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    error::{Error, Result},
    event::{LogError, LogObject},
    formatter::FormatterProvider,
    level::{LevelFlags, LocalTrace},
    params::Parameters,
    plugins::SINK_FILE,
    wildcard::WildcardExpression,
};

mod env {
    use std::sync::LazyLock;

    use derive_from_env::FromEnv;

    /// Process-wide defaults, read once from `SESSIONLOG_*` environment variables.
    #[derive(FromEnv)]
    #[from_env(prefix = "SESSIONLOG")]
    #[allow(non_snake_case)]
    pub struct SessionLogEnv {
        #[from_env(default = "2000")]
        pub AUTOFLUSH_STARTUP_MS: u64,
        #[from_env(default = "1000")]
        pub AUTOFLUSH_PERIOD_MS: u64,
        #[from_env(default = "10")]
        pub CLEANUP_SESSIONS: usize,
        #[from_env(default = "10")]
        pub CLEANUP_LOGS: u64,
        #[from_env(default = "20000")]
        pub CLEANUP_MESSAGES: u64,
    }

    pub static SESSIONLOG_ENV: LazyLock<SessionLogEnv> = LazyLock::new(|| {
        SessionLogEnv::from_env().expect("invalid SESSIONLOG_* environment variable")
    });
}

pub use env::{SESSIONLOG_ENV, SessionLogEnv};

/// Folder below which session folders are created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FolderMode {
    /// `LogConfig::folder`; relative paths are resolved against the executable directory.
    Custom,
    /// `<exe dir>/Log`
    Application,
    /// `<data dir>/<process>/Log`
    #[default]
    ProgramData,
    /// `<local data dir>/<process>/Log`
    User,
}

impl FolderMode {
    pub fn resolve(self, folder: &Path) -> Result<PathBuf> {
        let path = match self {
            FolderMode::Custom => {
                if folder.as_os_str().is_empty() {
                    return Err(Error::EmptyFolder);
                }
                if folder.is_absolute() {
                    folder.to_path_buf()
                } else {
                    executable_dir().join(folder)
                }
            }
            FolderMode::Application => executable_dir().join("Log"),
            FolderMode::ProgramData => dirs::data_dir()
                .ok_or(Error::EmptyFolder)?
                .join(process_name())
                .join("Log"),
            FolderMode::User => dirs::data_local_dir()
                .ok_or(Error::EmptyFolder)?
                .join(process_name())
                .join("Log"),
        };
        Ok(path)
    }
}

fn executable_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_default()
}

/// File stem of the running executable.
pub fn process_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "sessionlog".into())
}

/// A plugin reference: registered kind name plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSpec {
    pub kind: String,
    pub parameters: Parameters,
}

impl PluginSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            parameters: Parameters::default(),
        }
    }

    /// `kind` configured with a `name=value;...` expression.
    pub fn parse(kind: impl Into<String>, parameters: &str) -> Result<Self> {
        Ok(Self {
            kind: kind.into(),
            parameters: Parameters::parse(parameters)?,
        })
    }

    pub fn file() -> Self {
        Self::new(SINK_FILE)
    }
}

/// Routes loggers whose name matches `mask` to `sinks`, with local level and
/// trace overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub mask: WildcardExpression,
    pub sinks: Vec<PluginSpec>,
    pub levels: LevelFlags,
    pub trace: LocalTrace,
}

impl RouteEntry {
    /// An entry without sinks that inherits the global levels and trace flag.
    pub fn new(mask: &str) -> Self {
        Self {
            mask: WildcardExpression::mask(mask),
            sinks: Vec::new(),
            levels: LevelFlags::GLOBAL,
            trace: LocalTrace::Global,
        }
    }

    /// Fallback entry: matches everything and writes to one file sink.
    pub fn default_entry() -> Self {
        Self::new("*").with_sink(PluginSpec::file())
    }

    pub fn with_sink(mut self, sink: PluginSpec) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_levels(mut self, levels: LevelFlags) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_trace(mut self, trace: LocalTrace) -> Self {
        self.trace = trace;
        self
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.mask.is_match(name)
    }
}

/// Live configuration. `SessionManager::start` clones it into an immutable
/// snapshot, so later edits only affect the next session.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Start a session as soon as the manager is created.
    pub auto_start: bool,
    pub folder: PathBuf,
    pub folder_mode: FolderMode,
    pub global_levels: LevelFlags,
    pub global_trace: bool,
    /// Delay before the first auto-flush; zero disables auto-flush.
    pub auto_flush_startup: Duration,
    /// Auto-flush period; zero disables auto-flush.
    pub auto_flush_period: Duration,
    /// Previous session folders of the same context to keep (0 keeps all).
    pub cleanup_sessions: usize,
    /// Generations kept per sink (0 keeps all).
    pub cleanup_logs: u64,
    /// Events per generation (0 disables rotation).
    pub cleanup_messages: u64,
    /// Keep resource files of evicted generations.
    pub keep_resources: bool,
    pub default_entry: RouteEntry,
    /// Checked in order before `default_entry`; first match wins.
    pub entries: Vec<RouteEntry>,
    pub monitors: Vec<PluginSpec>,
    pub object_formatters: FormatterProvider<LogObject>,
    pub exception_formatters: FormatterProvider<LogError>,
}

impl Default for LogConfig {
    fn default() -> Self {
        let env = &*SESSIONLOG_ENV;
        Self {
            auto_start: false,
            folder: PathBuf::new(),
            folder_mode: FolderMode::default(),
            global_levels: LevelFlags::ALL,
            global_trace: false,
            auto_flush_startup: Duration::from_millis(env.AUTOFLUSH_STARTUP_MS),
            auto_flush_period: Duration::from_millis(env.AUTOFLUSH_PERIOD_MS),
            cleanup_sessions: env.CLEANUP_SESSIONS,
            cleanup_logs: env.CLEANUP_LOGS,
            cleanup_messages: env.CLEANUP_MESSAGES,
            keep_resources: false,
            default_entry: RouteEntry::default_entry(),
            entries: Vec::new(),
            monitors: Vec::new(),
            object_formatters: FormatterProvider::objects(),
            exception_formatters: FormatterProvider::exceptions(),
        }
    }
}

impl LogConfig {
    /// Custom-mode configuration rooted at `folder`.
    pub fn in_folder(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            folder_mode: FolderMode::Custom,
            ..Self::default()
        }
    }

    /// Root folder of all sessions, resolved from `folder` and `folder_mode`.
    pub fn full_folder_path(&self) -> Result<PathBuf> {
        self.folder_mode.resolve(&self.folder)
    }

    pub fn auto_flush_enabled(&self) -> bool {
        !self.auto_flush_startup.is_zero() && !self.auto_flush_period.is_zero()
    }

    /// Index into `entries` of the first entry matching `name`; `None` is the default entry.
    pub fn resolve_entry(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.is_match(name))
    }

    pub fn entry(&self, id: Option<usize>) -> &RouteEntry {
        id.and_then(|i| self.entries.get(i))
            .unwrap_or(&self.default_entry)
    }
}
