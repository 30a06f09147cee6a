//! Session lifecycle controller and logger registry.

use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicU8, Ordering},
    },
};

use uuid::Uuid;

use crate::{
    cleanup::{next_session_folder, prune_sessions},
    config::{LogConfig, process_name},
    error::{Error, Result},
    event::{LogObject, Payload},
    level::LogLevel,
    logger::{Logger, LoggerInner},
    monitor::{Monitor, MonitorContext},
    plugins::Plugins,
    router::{SessionInfo, SinkRouter},
    worker::{DeliveryQueue, Worker},
};

/// Reserved name of the logger recording session events.
pub const SESSION_LOGGER: &str = "__session";
/// Sub-folder of a session folder holding resource files.
pub const RESOURCE_FOLDER: &str = "Resources";

const INVALID_NAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionMode {
    Stopped = 0,
    Running = 1,
    Suspended = 2,
}

impl SessionMode {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionMode::Running,
            2 => SessionMode::Suspended,
            _ => SessionMode::Stopped,
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionMode::Stopped => "Stopped",
            SessionMode::Running => "Running",
            SessionMode::Suspended => "Suspended",
        };
        f.write_str(name)
    }
}

type Observer = Arc<dyn Fn(SessionMode) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn validate_name<'a>(name: &'a str) -> std::result::Result<&'a str, &'static str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Err("must not be empty")
    } else if trimmed.contains(INVALID_NAME_CHARS) || trimmed.contains(char::is_control) {
        Err("contains a character that is not allowed in file names")
    } else {
        Ok(trimmed)
    }
}

fn validate_logger_name(name: &str) -> Result<&str> {
    let invalid = |reason| Error::InvalidLoggerName {
        name: name.to_string(),
        reason,
    };
    let trimmed = validate_name(name).map_err(invalid)?;
    if trimmed.eq_ignore_ascii_case(SESSION_LOGGER) {
        return Err(invalid("reserved for session events"));
    }
    Ok(trimmed)
}

fn validate_context(context: &str) -> Result<&str> {
    validate_name(context).map_err(|reason| Error::InvalidContext {
        context: context.to_string(),
        reason,
    })
}

fn create_folder(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| Error::FolderCreate {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Default)]
struct Controller {
    worker: Option<Worker>,
    monitors: Vec<Box<dyn Monitor>>,
    info: Option<SessionInfo>,
    root: Option<PathBuf>,
}

/// State shared by the manager and every logger it handed out.
pub(crate) struct Shared {
    mode: AtomicU8,
    /// Serializes state transitions.
    controller: Mutex<Controller>,
    context: RwLock<String>,
    live: Mutex<LogConfig>,
    snapshot: RwLock<Arc<LogConfig>>,
    pub(crate) queue: DeliveryQueue,
    /// Keyed by lowercase name.
    loggers: Mutex<BTreeMap<String, Arc<LoggerInner>>>,
    session_logger: Arc<LoggerInner>,
    observers: Mutex<Vec<Observer>>,
    plugins: Plugins,
}

impl Shared {
    fn new(config: LogConfig, plugins: Plugins) -> Self {
        let snapshot = Arc::new(config.clone());
        Self {
            mode: AtomicU8::new(SessionMode::Stopped as u8),
            controller: Mutex::new(Controller::default()),
            context: RwLock::new(format!("Session '{}'", process_name())),
            session_logger: Arc::new(LoggerInner::new(SESSION_LOGGER, &snapshot)),
            live: Mutex::new(config),
            snapshot: RwLock::new(snapshot),
            queue: DeliveryQueue::default(),
            loggers: Mutex::new(BTreeMap::new()),
            observers: Mutex::new(Vec::new()),
            plugins,
        }
    }

    pub(crate) fn mode(&self) -> SessionMode {
        SessionMode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    fn set_mode(&self, mode: SessionMode) {
        self.mode.store(mode as u8, Ordering::SeqCst);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.mode() == SessionMode::Running
    }

    pub(crate) fn snapshot(&self) -> Arc<LogConfig> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn session_logger(self: &Arc<Self>) -> Logger {
        Logger::new(Arc::clone(self), Arc::clone(&self.session_logger))
    }

    /// Logger registered under `name`, created on first request.
    pub(crate) fn logger(self: &Arc<Self>, name: &str) -> Result<Logger> {
        let name = validate_logger_name(name)?;
        let (inner, created) = {
            let mut loggers = lock(&self.loggers);
            match loggers.get(&name.to_lowercase()) {
                Some(inner) => (Arc::clone(inner), false),
                None => {
                    // read under the registry lock so a concurrent start re-points it
                    let inner = Arc::new(LoggerInner::new(name, &self.snapshot()));
                    loggers.insert(name.to_lowercase(), Arc::clone(&inner));
                    (inner, true)
                }
            }
        };
        if created && self.is_running() {
            self.session_logger().emit(
                LogLevel::Info,
                "GetLogger",
                Payload::Parameters(vec![("Name".into(), name.to_string())]),
            );
        }
        Ok(Logger::new(Arc::clone(self), inner))
    }

    fn repoint_loggers(&self, snapshot: &LogConfig) {
        self.session_logger.repoint(snapshot);
        for inner in lock(&self.loggers).values() {
            inner.repoint(snapshot);
        }
    }

    fn notify(&self, mode: SessionMode) {
        let observers = lock(&self.observers).clone();
        for observer in observers {
            observer(mode);
        }
    }
}

/// Owns the session lifecycle: `Stopped → Running ⇄ Suspended → Stopped`.
///
/// Dropping the manager stops a running session.
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("mode", &self.mode())
            .field("context", &self.context())
            .field("session", &self.session_info())
            .finish()
    }
}

impl SessionManager {
    /// Manager with the built-in plugins. Starts a session right away when
    /// `config.auto_start` is set.
    pub fn new(config: LogConfig) -> Result<Self> {
        Self::with_plugins(config, Plugins::default())
    }

    pub fn with_plugins(config: LogConfig, plugins: Plugins) -> Result<Self> {
        let auto_start = config.auto_start;
        let manager = Self {
            shared: Arc::new(Shared::new(config, plugins)),
        };
        if auto_start {
            manager.start()?;
        }
        Ok(manager)
    }

    pub fn plugins(&self) -> &Plugins {
        &self.shared.plugins
    }

    pub fn mode(&self) -> SessionMode {
        self.shared.mode()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Identity and folders of the current (or last) session.
    pub fn session_info(&self) -> Option<SessionInfo> {
        lock(&self.shared.controller).info.clone()
    }

    pub fn session_guid(&self) -> Option<Uuid> {
        self.session_info().map(|info| info.guid)
    }

    pub fn session_folder(&self) -> Option<PathBuf> {
        self.session_info().map(|info| info.session_folder)
    }

    pub fn resource_folder(&self) -> Option<PathBuf> {
        self.session_info().map(|info| info.resource_folder)
    }

    /// Root folder the current (or last) session was created in.
    pub fn root_folder(&self) -> Option<PathBuf> {
        lock(&self.shared.controller).root.clone()
    }

    pub fn context(&self) -> String {
        self.shared
            .context
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sets the context used by the next session.
    pub fn set_context(&self, context: &str) -> Result<()> {
        let context = validate_context(context)?;
        *self
            .shared
            .context
            .write()
            .unwrap_or_else(PoisonError::into_inner) = context.to_string();
        Ok(())
    }

    /// Copy of the live configuration.
    pub fn config(&self) -> LogConfig {
        lock(&self.shared.live).clone()
    }

    /// Edits the live configuration. A running session keeps its snapshot.
    pub fn update_config(&self, update: impl FnOnce(&mut LogConfig)) {
        update(&mut lock(&self.shared.live));
    }

    /// Configuration of the current (or last) session.
    pub fn snapshot(&self) -> Arc<LogConfig> {
        self.shared.snapshot()
    }

    pub fn logger(&self, name: &str) -> Result<Logger> {
        self.shared.logger(name)
    }

    /// Every registered logger, by name.
    pub fn loggers(&self) -> Vec<Logger> {
        lock(&self.shared.loggers)
            .values()
            .map(|inner| Logger::new(Arc::clone(&self.shared), Arc::clone(inner)))
            .collect()
    }

    pub fn session_logger(&self) -> Logger {
        self.shared.session_logger()
    }

    /// True when a session runs and `level` overlaps the global levels.
    pub fn is_level_enabled(&self, level: LogLevel) -> bool {
        self.is_running() && self.snapshot().global_levels.allows(level)
    }

    /// Events accepted but not yet taken by the worker.
    pub fn pending(&self) -> usize {
        self.shared.queue.pending()
    }

    /// Registers a callback invoked after every state transition.
    pub fn on_mode_changed(&self, observer: impl Fn(SessionMode) + Send + Sync + 'static) {
        lock(&self.shared.observers).push(Arc::new(observer));
    }

    pub fn start(&self) -> Result<()> {
        let shared = &self.shared;
        {
            let mut controller = lock(&shared.controller);
            if shared.mode() != SessionMode::Stopped {
                return Err(Error::SessionNotStopped);
            }
            let snapshot = Arc::new(self.config());
            shared.plugins.validate(&snapshot)?;

            let context = self.context();
            let root = snapshot.full_folder_path()?;
            create_folder(&root)?;
            let previous = prune_sessions(&root, &context, snapshot.cleanup_sessions);
            let session_folder = next_session_folder(&root, &context, &previous);
            let resource_folder = session_folder.join(RESOURCE_FOLDER);
            create_folder(&session_folder)?;
            create_folder(&resource_folder)?;
            let info = SessionInfo {
                guid: Uuid::new_v4(),
                context,
                session_folder,
                resource_folder,
            };

            *shared
                .snapshot
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Arc::clone(&snapshot);
            shared.repoint_loggers(&snapshot);

            let mut monitors = Vec::with_capacity(snapshot.monitors.len());
            for spec in &snapshot.monitors {
                let mut monitor = shared
                    .plugins
                    .create_monitor(&spec.kind)
                    .ok_or_else(|| Error::UnknownPlugin {
                        kind: "monitor",
                        name: spec.kind.clone(),
                    })?;
                monitor
                    .init(MonitorContext::new(shared, &spec.kind), &spec.parameters)
                    .map_err(|source| Error::MonitorInit {
                        name: spec.kind.clone(),
                        source,
                    })?;
                monitors.push(monitor);
            }

            let router = SinkRouter::new(info.clone(), Arc::clone(&snapshot), shared.plugins.clone());
            let (worker, sender) = Worker::spawn(router)?;
            shared.queue.open(sender);

            // queued before the session accepts anything else, so they get ids 0 and 1
            let session_logger = shared.session_logger();
            session_logger.emit(
                LogLevel::Info,
                "StartSession",
                Payload::Parameters(vec![
                    ("SessionGuid".into(), info.guid.to_string()),
                    ("Context".into(), info.context.clone()),
                    ("Folder".into(), info.session_folder.display().to_string()),
                ]),
            );
            let config: Arc<LogObject> = snapshot;
            session_logger.emit(
                LogLevel::Info,
                "SessionConfig",
                Payload::Object {
                    object: config,
                    formatter: None,
                },
            );
            shared.set_mode(SessionMode::Running);

            log::debug!(
                target: "sessionlog::session",
                "session {} started in '{}'",
                info.guid,
                info.session_folder.display()
            );
            controller.worker = Some(worker);
            controller.monitors = monitors;
            controller.info = Some(info);
            controller.root = Some(root);
            for monitor in &mut controller.monitors {
                monitor.session_started();
            }
        }
        shared.notify(SessionMode::Running);
        Ok(())
    }

    /// Stops accepting new events. Queued events are still delivered.
    /// Returns false unless a session was running.
    pub fn suspend(&self) -> bool {
        let shared = &self.shared;
        {
            let mut controller = lock(&shared.controller);
            if shared.mode() != SessionMode::Running {
                return false;
            }
            shared
                .session_logger()
                .emit(LogLevel::Info, "SuspendSession", Payload::Text);
            shared.set_mode(SessionMode::Suspended);
            for monitor in &mut controller.monitors {
                monitor.session_suspended();
            }
        }
        shared.notify(SessionMode::Suspended);
        true
    }

    /// Returns false unless the session was suspended.
    pub fn resume(&self) -> bool {
        let shared = &self.shared;
        {
            let mut controller = lock(&shared.controller);
            if shared.mode() != SessionMode::Suspended {
                return false;
            }
            shared.set_mode(SessionMode::Running);
            shared
                .session_logger()
                .emit(LogLevel::Info, "ResumeSession", Payload::Text);
            for monitor in &mut controller.monitors {
                monitor.session_resumed();
            }
        }
        shared.notify(SessionMode::Running);
        true
    }

    /// Delivers every queued event, closes all sinks and returns once the
    /// worker has exited.
    pub fn stop(&self) -> Result<()> {
        let shared = &self.shared;
        {
            let mut controller = lock(&shared.controller);
            if shared.mode() == SessionMode::Stopped {
                return Err(Error::SessionNotRunning);
            }
            shared
                .session_logger()
                .emit(LogLevel::Info, "StopSession", Payload::Text);
            shared.set_mode(SessionMode::Stopped);
            for mut monitor in std::mem::take(&mut controller.monitors) {
                monitor.session_stopped();
            }
            shared.queue.close();
            if let Some(mut worker) = controller.worker.take()
                && !worker.stop()
            {
                log::warn!(target: "sessionlog::session", "worker exited abnormally, some events may be lost");
            }
            if let Some(info) = &controller.info {
                log::debug!(target: "sessionlog::session", "session {} stopped", info.guid);
            }
        }
        shared.notify(SessionMode::Stopped);
        Ok(())
    }

    /// Asks the worker to deliver the pending batch. Does nothing unless a
    /// session is running with events pending.
    pub fn flush(&self) {
        if !self.is_running() || self.pending() == 0 {
            return;
        }
        if let Some(worker) = &lock(&self.shared.controller).worker {
            worker.flush();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if self.mode() != SessionMode::Stopped {
            let _ = self.stop();
        }
    }
}
