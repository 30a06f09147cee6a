use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use chrono::Local;

use crate::{
    config::LogConfig,
    event::{EventId, LogEvent, Measurement, Payload, current_thread_label},
    formatter::Formatted,
    level::{LevelFlags, LogLevel},
    session::{SESSION_LOGGER, Shared},
};

/// Routing of a logger within the current snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggerRoute {
    /// `None` is the default entry.
    pub entry_id: Option<usize>,
    /// Effective levels, global levels already applied.
    pub levels: LevelFlags,
    pub trace: bool,
}

impl LoggerRoute {
    pub fn resolve(name: &str, config: &LogConfig) -> Self {
        let entry_id = config.resolve_entry(name);
        let entry = config.entry(entry_id);
        let levels = if name.eq_ignore_ascii_case(SESSION_LOGGER) {
            LevelFlags::ALL
        } else {
            entry.levels.resolve(config.global_levels)
        };
        Self {
            entry_id,
            levels,
            trace: entry.trace.resolve(config.global_trace),
        }
    }
}

pub(crate) struct LoggerInner {
    name: Arc<str>,
    route: RwLock<LoggerRoute>,
}

impl LoggerInner {
    pub(crate) fn new(name: &str, config: &LogConfig) -> Self {
        Self {
            name: Arc::from(name),
            route: RwLock::new(LoggerRoute::resolve(name, config)),
        }
    }

    pub(crate) fn route(&self) -> LoggerRoute {
        *self.route.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Points the logger at a new snapshot.
    pub(crate) fn repoint(&self, config: &LogConfig) {
        let route = LoggerRoute::resolve(&self.name, config);
        *self.route.write().unwrap_or_else(PoisonError::into_inner) = route;
    }
}

/// Correlation and rendering options of a submission.
#[derive(Debug, Clone, Default)]
pub struct EventOptions {
    pub parent: EventId,
    pub start: EventId,
    /// Formatter of object and exception payloads; `None` uses the default one.
    pub formatter: Option<String>,
    /// Render object and exception payloads on the calling thread.
    pub render_sync: bool,
}

impl EventOptions {
    pub fn parent(mut self, parent: EventId) -> Self {
        self.parent = parent;
        self
    }

    pub fn start(mut self, start: EventId) -> Self {
        self.start = start;
        self
    }

    pub fn formatter(mut self, name: impl Into<String>) -> Self {
        self.formatter = Some(name.into());
        self
    }

    pub fn render_sync(mut self) -> Self {
        self.render_sync = true;
        self
    }
}

/// Named handle through which application code submits events.
///
/// Every `add_*` method takes its text, and any payload that is costly to
/// build, as closures. They run at most once, and only when the level is
/// enabled and the session is running. Rejected submissions return
/// [`EventId::INVALID`].
#[derive(Clone)]
pub struct Logger {
    shared: Arc<Shared>,
    inner: Arc<LoggerInner>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.inner.name)
            .field("route", &self.inner.route())
            .finish()
    }
}

impl Logger {
    pub(crate) fn new(shared: Arc<Shared>, inner: Arc<LoggerInner>) -> Self {
        Self { shared, inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn route(&self) -> LoggerRoute {
        self.inner.route()
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        self.shared.is_running() && self.inner.route().levels.allows(level)
    }

    /// General form of every `add_*` method.
    pub fn add<T, F, P>(&self, level: LogLevel, options: &EventOptions, text: F, payload: P) -> EventId
    where
        F: FnOnce() -> T,
        T: Into<String>,
        P: FnOnce() -> Payload,
    {
        let route = self.inner.route();
        if !self.shared.is_running() || !route.levels.allows(level) {
            return EventId::INVALID;
        }
        let text = text().into();
        let payload = payload();
        let rendered = if options.render_sync {
            render(&self.shared.snapshot(), level, &payload)
        } else {
            None
        };
        self.push(level, route, options, text, payload, rendered)
    }

    /// Submits without the enablement check. Used for the session bootstrap
    /// events, which are queued before the session accepts submissions.
    pub(crate) fn emit(&self, level: LogLevel, text: &str, payload: Payload) -> EventId {
        let route = self.inner.route();
        self.push(level, route, &EventOptions::default(), text.to_string(), payload, None)
    }

    fn push(
        &self,
        level: LogLevel,
        route: LoggerRoute,
        options: &EventOptions,
        text: String,
        payload: Payload,
        rendered: Option<Formatted>,
    ) -> EventId {
        let thread = current_thread_label();
        let timestamp = Local::now();
        self.shared.queue.push(|id| LogEvent {
            id,
            parent_id: options.parent,
            start_id: options.start,
            thread,
            timestamp,
            trace: route.trace,
            logger: Arc::clone(&self.inner.name),
            entry_id: route.entry_id,
            level,
            text,
            payload,
            rendered,
        })
    }

    pub fn add_text<T: Into<String>>(&self, level: LogLevel, text: impl FnOnce() -> T) -> EventId {
        self.add(level, &EventOptions::default(), text, || Payload::Text)
    }

    pub fn debug<T: Into<String>>(&self, text: impl FnOnce() -> T) -> EventId {
        self.add_text(LogLevel::Debug, text)
    }

    pub fn info<T: Into<String>>(&self, text: impl FnOnce() -> T) -> EventId {
        self.add_text(LogLevel::Info, text)
    }

    pub fn warning<T: Into<String>>(&self, text: impl FnOnce() -> T) -> EventId {
        self.add_text(LogLevel::Warning, text)
    }

    pub fn error<T: Into<String>>(&self, text: impl FnOnce() -> T) -> EventId {
        self.add_text(LogLevel::Error, text)
    }

    pub fn fatal<T: Into<String>>(&self, text: impl FnOnce() -> T) -> EventId {
        self.add_text(LogLevel::Fatal, text)
    }

    /// Object rendered through its `Debug` representation by the default formatter.
    pub fn add_object<T, O>(&self, level: LogLevel, text: impl FnOnce() -> T, object: impl FnOnce() -> O) -> EventId
    where
        T: Into<String>,
        O: fmt::Debug + Send + Sync + 'static,
    {
        self.add_object_with(level, &EventOptions::default(), text, object)
    }

    pub fn add_object_with<T, O>(
        &self,
        level: LogLevel,
        options: &EventOptions,
        text: impl FnOnce() -> T,
        object: impl FnOnce() -> O,
    ) -> EventId
    where
        T: Into<String>,
        O: fmt::Debug + Send + Sync + 'static,
    {
        self.add(level, options, text, || Payload::Object {
            object: Arc::new(object()),
            formatter: options.formatter.clone(),
        })
    }

    pub fn add_exception<T, E>(&self, level: LogLevel, text: impl FnOnce() -> T, error: impl FnOnce() -> E) -> EventId
    where
        T: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.add_exception_with(level, &EventOptions::default(), text, error)
    }

    pub fn add_exception_with<T, E>(
        &self,
        level: LogLevel,
        options: &EventOptions,
        text: impl FnOnce() -> T,
        error: impl FnOnce() -> E,
    ) -> EventId
    where
        T: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.add(level, options, text, || Payload::Exception {
            error: Arc::new(error()),
            formatter: options.formatter.clone(),
        })
    }

    /// Binary blob stored as a resource file with `extension`.
    pub fn add_bytes<T: Into<String>>(
        &self,
        level: LogLevel,
        text: impl FnOnce() -> T,
        extension: &str,
        bytes: impl FnOnce() -> Vec<u8>,
    ) -> EventId {
        self.add(level, &EventOptions::default(), text, || Payload::Bytes {
            bytes: bytes(),
            extension: extension.to_string(),
        })
    }

    /// Pre-rendered text document stored as a resource file with `extension`.
    pub fn add_report<T: Into<String>>(
        &self,
        level: LogLevel,
        text: impl FnOnce() -> T,
        extension: &str,
        report: impl FnOnce() -> String,
    ) -> EventId {
        self.add(level, &EventOptions::default(), text, || Payload::Report {
            report: report(),
            extension: extension.to_string(),
        })
    }

    pub fn add_params<T, I, K, V>(&self, level: LogLevel, text: impl FnOnce() -> T, params: impl FnOnce() -> I) -> EventId
    where
        T: Into<String>,
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.add(level, &EventOptions::default(), text, || {
            Payload::Parameters(
                params()
                    .into_iter()
                    .map(|(name, value)| (name.into(), value.into()))
                    .collect(),
            )
        })
    }

    pub fn add_absolute_value<T: Into<String>>(
        &self,
        level: LogLevel,
        text: impl FnOnce() -> T,
        value: f64,
        lower: f64,
        upper: f64,
    ) -> EventId {
        self.add(level, &EventOptions::default(), text, || {
            Payload::AbsoluteValue(Measurement { value, lower, upper })
        })
    }

    pub fn add_relative_value<T: Into<String>>(
        &self,
        level: LogLevel,
        text: impl FnOnce() -> T,
        value: f64,
        lower: f64,
        upper: f64,
    ) -> EventId {
        self.add(level, &EventOptions::default(), text, || {
            Payload::RelativeValue(Measurement { value, lower, upper })
        })
    }
}

fn render(config: &LogConfig, level: LogLevel, payload: &Payload) -> Option<Formatted> {
    match payload {
        Payload::Object { object, formatter } => Some(config.object_formatters.format(
            level,
            object.as_ref(),
            formatter.as_deref(),
        )),
        Payload::Exception { error, formatter } => Some(config.exception_formatters.format(
            level,
            error.as_ref(),
            formatter.as_deref(),
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::RouteEntry, level::LocalTrace};

    #[test]
    fn test_route_applies_global_levels() {
        let mut config = LogConfig::in_folder("/tmp/unused");
        config.global_levels = LevelFlags::at_least(LogLevel::Warning);
        config.entries.push(RouteEntry::new("net.*").with_levels(LevelFlags::DEBUG | LevelFlags::GLOBAL));
        config.entries.push(RouteEntry::new("quiet").with_levels(LevelFlags::NONE));

        let net = LoggerRoute::resolve("net.tcp", &config);
        assert_eq!(net.entry_id, Some(0));
        assert!(net.levels.allows(LogLevel::Debug));
        assert!(net.levels.allows(LogLevel::Error));
        assert!(!net.levels.allows(LogLevel::Info));

        let quiet = LoggerRoute::resolve("QUIET", &config);
        assert!(!quiet.levels.allows(LogLevel::Fatal));

        let other = LoggerRoute::resolve("ui", &config);
        assert_eq!(other.entry_id, None);
        assert!(!other.levels.allows(LogLevel::Info));
    }

    #[test]
    fn test_session_logger_is_always_enabled() {
        let mut config = LogConfig::in_folder("/tmp/unused");
        config.global_levels = LevelFlags::NONE;
        let route = LoggerRoute::resolve(SESSION_LOGGER, &config);
        assert!(route.levels.allows(LogLevel::Debug));
    }

    #[test]
    fn test_trace_resolution() {
        let mut config = LogConfig::in_folder("/tmp/unused");
        config.global_trace = true;
        config.entries.push(RouteEntry::new("muted").with_trace(LocalTrace::Off));
        assert!(!LoggerRoute::resolve("muted", &config).trace);
        assert!(LoggerRoute::resolve("loud", &config).trace);
    }

    #[test]
    fn test_repoint_follows_new_snapshot() {
        let config = LogConfig::in_folder("/tmp/unused");
        let inner = LoggerInner::new("db", &config);
        assert_eq!(inner.route().entry_id, None);

        let mut next = config.clone();
        next.entries.push(RouteEntry::new("db"));
        inner.repoint(&next);
        assert_eq!(inner.route().entry_id, Some(0));
    }

    #[test]
    fn test_sync_render_only_for_formatted_payloads() {
        let config = LogConfig::in_folder("/tmp/unused");
        let object = Payload::Object {
            object: Arc::new(vec![1, 2]),
            formatter: Some("dbg".into()),
        };
        let rendered = render(&config, LogLevel::Info, &object).unwrap();
        assert_eq!(rendered.text, "[1, 2]");
        assert!(render(&config, LogLevel::Info, &Payload::Text).is_none());
    }
}
