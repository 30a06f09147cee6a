//! # sessionlog
//! Session-oriented structured logger: typed events are queued by any number
//! of threads and written by one background worker to per-logger sinks, with
//! wildcard routing, message-count rotation and previous-session cleanup.
//!
//! ## Usage
//! ```toml
//! // Cargo.toml
//! ...
//! [dependencies]
//! sessionlog = "0.1.0"
//! ```
//!
//! ```rust
//! use sessionlog::{LogLevel, session_config};
//!
//! let folder = std::env::temp_dir().join("sessionlog-doc");
//! let guard = session_config()
//!     .with_folder(&folder)
//!     .with_context("demo")
//!     .init_global()
//!     .expect("Unable to start the session");
//!
//! // `log` records are routed by target, `::` becoming `.`
//! log::info!("Hello, world!");
//!
//! let db = sessionlog::logger("app.db").unwrap();
//! db.add_params(LogLevel::Info, || "connected", || [("host", "localhost")]);
//! let session_folder = guard.manager().session_folder().unwrap();
//! drop(guard); // stops the session once every event is written
//! assert!(session_folder.join("app.db__0.log").exists());
//! ```
//!
//! ## Routing
//! Route entries are checked in order, the first mask matching the logger
//! name wins and unmatched loggers use the default entry.
//!
//! ```rust
//! use sessionlog::{LevelFlags, LogLevel, PluginSpec, RouteEntry, session_config};
//!
//! let manager = session_config()
//!     .with_folder(std::env::temp_dir().join("sessionlog-doc-routing"))
//!     .with_route(
//!         RouteEntry::new("net.*;db.pool")
//!             .with_sink(PluginSpec::parse("file", "").unwrap())
//!             .with_levels(LevelFlags::at_least(LogLevel::Warning)),
//!     )
//!     .build()
//!     .unwrap();
//! manager.start().unwrap();
//! let tcp = manager.logger("net.tcp").unwrap();
//! assert!(!tcp.is_enabled(LogLevel::Info));
//! assert!(tcp.is_enabled(LogLevel::Error));
//! manager.stop().unwrap();
//! ```

use std::{
    path::PathBuf,
    sync::{Arc, LazyLock, PoisonError, RwLock},
    time::Duration,
};

use log::{LevelFilter, Log};

pub use sessionlog_core::*;

/// Process-wide manager used by the `log` bridge.
static GLOBAL_MANAGER: RwLock<Option<Arc<SessionManager>>> = RwLock::new(None);

/// Installs the bridge once; false when another `log` implementation was already set.
static BRIDGE_INSTALLED: LazyLock<bool> =
    LazyLock::new(|| log::set_boxed_logger(Box::new(SessionLogBridge)).is_ok());

/// Returns the process-wide manager, if one was initialized.
pub fn global() -> Option<Arc<SessionManager>> {
    GLOBAL_MANAGER
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Logger of the process-wide manager.
pub fn logger(name: &str) -> Result<Logger> {
    global().ok_or(Error::SessionNotRunning)?.logger(name)
}

/// Logger name for a `log` target.
fn logger_name(target: &str) -> String {
    target.replace("::", ".")
}

fn is_internal(target: &str) -> bool {
    target == "sessionlog" || target.starts_with("sessionlog::")
}

/// Most permissive `log` filter letting through the enabled levels.
fn level_filter(levels: LevelFlags) -> LevelFilter {
    match levels.resolve(LevelFlags::NONE).most_verbose() {
        None => LevelFilter::Off,
        Some(LogLevel::Debug) => LevelFilter::Trace,
        Some(LogLevel::Info) => LevelFilter::Info,
        Some(LogLevel::Warning) => LevelFilter::Warn,
        Some(LogLevel::Error | LogLevel::Fatal) => LevelFilter::Error,
    }
}

/// Feeds `log` records into the process-wide session.
struct SessionLogBridge;

impl Log for SessionLogBridge {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        is_internal(metadata.target())
            || global().is_some_and(|manager| manager.is_level_enabled(metadata.level().into()))
    }

    fn log(&self, record: &log::Record) {
        if is_internal(record.target()) {
            // pipeline diagnostics never re-enter the pipeline
            eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
            return;
        }
        let Some(manager) = global() else {
            return;
        };
        match manager.logger(&logger_name(record.target())) {
            Ok(logger) => {
                logger.add_text(record.level().into(), || record.args().to_string());
            }
            Err(err) => eprintln!("[WARN] sessionlog: {err}"),
        }
    }

    fn flush(&self) {
        if let Some(manager) = global() {
            manager.flush();
        }
    }
}

/// Keeps the process-wide session alive. Dropping it stops the session,
/// which writes every queued event first.
pub struct SessionGuard {
    manager: Arc<SessionManager>,
}

impl SessionGuard {
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.manager.mode() != SessionMode::Stopped {
            let _ = self.manager.stop();
        }
    }
}

/// Builder for configuring and starting a session.
pub struct ConfigBuilder {
    config: LogConfig,
    context: Option<String>,
    plugins: Plugins,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            config: LogConfig::default(),
            context: None,
            plugins: Plugins::default(),
        }
    }
}

impl ConfigBuilder {
    /// Writes sessions below `folder` (relative paths start at the executable directory).
    pub fn with_folder<P: Into<PathBuf>>(mut self, folder: P) -> Self {
        self.config.folder = folder.into();
        self.config.folder_mode = FolderMode::Custom;
        self
    }

    pub fn with_folder_mode(mut self, mode: FolderMode) -> Self {
        self.config.folder_mode = mode;
        self
    }

    /// Names session folders; defaults to `Session '<executable name>'`.
    pub fn with_context(mut self, context: &str) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_levels(mut self, levels: LevelFlags) -> Self {
        self.config.global_levels = levels;
        self
    }

    /// Echoes events to stderr.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.config.global_trace = trace;
        self
    }

    /// Auto-flush delays; a zero duration disables auto-flush.
    pub fn with_auto_flush(mut self, startup: Duration, period: Duration) -> Self {
        self.config.auto_flush_startup = startup;
        self.config.auto_flush_period = period;
        self
    }

    /// Retention: previous sessions kept, generations kept per sink and
    /// events per generation. Zero disables the respective limit.
    pub fn with_cleanup(mut self, sessions: usize, logs: u64, messages: u64) -> Self {
        self.config.cleanup_sessions = sessions;
        self.config.cleanup_logs = logs;
        self.config.cleanup_messages = messages;
        self
    }

    pub fn with_keep_resources(mut self, keep: bool) -> Self {
        self.config.keep_resources = keep;
        self
    }

    pub fn with_route(mut self, entry: RouteEntry) -> Self {
        self.config.entries.push(entry);
        self
    }

    /// Adds a sink to the default entry.
    pub fn with_sink(mut self, sink: PluginSpec) -> Self {
        self.config.default_entry.sinks.push(sink);
        self
    }

    pub fn with_monitor(mut self, monitor: PluginSpec) -> Self {
        self.config.monitors.push(monitor);
        self
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register_sink<F>(mut self, name: &str, factory: F) -> Result<Self>
    where
        F: Fn() -> Box<dyn Sink> + Send + Sync + 'static,
    {
        self.plugins.register_sink(name, factory)?;
        Ok(self)
    }

    pub fn register_monitor<F>(mut self, name: &str, factory: F) -> Result<Self>
    where
        F: Fn() -> Box<dyn Monitor> + Send + Sync + 'static,
    {
        self.plugins.register_monitor(name, factory)?;
        Ok(self)
    }

    /// Creates a manager without starting a session, unless `auto_start` is set.
    pub fn build(self) -> Result<SessionManager> {
        let Self {
            config,
            context,
            plugins,
        } = self;
        let auto_start = config.auto_start;
        let manager = SessionManager::with_plugins(
            LogConfig {
                auto_start: false,
                ..config
            },
            plugins,
        )?;
        if let Some(context) = context {
            manager.set_context(&context)?;
        }
        if auto_start {
            manager.start()?;
        }
        Ok(manager)
    }

    /// Starts a session on a new process-wide manager and routes the `log`
    /// macros to it. A previous process-wide session is stopped.
    #[must_use = "SessionGuard must be kept alive to keep the session running. Do \"let _guard = session_config().init_global()?;\""]
    pub fn init_global(self) -> Result<SessionGuard> {
        let manager = Arc::new(self.build()?);
        if !manager.is_running() {
            manager.start()?;
        }
        let previous = GLOBAL_MANAGER
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&manager));
        if let Some(previous) = previous
            && previous.mode() != SessionMode::Stopped
        {
            let _ = previous.stop();
        }
        if !*BRIDGE_INSTALLED {
            eprintln!("[WARN] sessionlog: another logger is installed, log records are not captured");
        }
        log::set_max_level(level_filter(manager.snapshot().global_levels));
        Ok(SessionGuard { manager })
    }
}

/// Returns a default ConfigBuilder for configuring the session.
pub fn session_config() -> ConfigBuilder {
    ConfigBuilder::default()
}
