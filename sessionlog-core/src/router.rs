//! Resolves a logger name to its route entry and caches the live sinks bound
//! to it for the rest of the session. Owned by the worker thread only.

use std::{
    collections::HashMap,
    io,
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::Arc,
};

use uuid::Uuid;

use crate::{
    config::{LogConfig, PluginSpec},
    event::LogEvent,
    formatter::panic_message,
    plugins::Plugins,
    rotation::RotationPolicy,
    session::SESSION_LOGGER,
    sink::{Sink, SinkInit},
};

/// Identity and folders of a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub guid: Uuid,
    pub context: String,
    pub session_folder: PathBuf,
    pub resource_folder: PathBuf,
}

/// A live sink instance bound to one logger. Every call into the sink is
/// isolated: errors and panics are reported and only affect that call.
pub struct SinkBinding {
    kind: String,
    logger: Arc<str>,
    sink: Box<dyn Sink>,
    touched: bool,
}

impl SinkBinding {
    pub fn write(&mut self, event: &LogEvent) {
        self.touched = true;
        let sink = &mut self.sink;
        guarded(&self.kind, &self.logger, "write", || sink.write(event));
    }

    fn flush(&mut self) {
        if std::mem::take(&mut self.touched) {
            let sink = &mut self.sink;
            guarded(&self.kind, &self.logger, "flush", || sink.flush());
        }
    }

    fn close(&mut self) {
        self.touched = false;
        let sink = &mut self.sink;
        guarded(&self.kind, &self.logger, "close", || sink.close());
    }
}

fn guarded<R>(
    kind: &str,
    logger: &str,
    operation: &str,
    call: impl FnOnce() -> io::Result<R>,
) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            log::warn!(target: "sessionlog::worker", "{kind} sink of '{logger}' failed to {operation}: {err}");
            None
        }
        Err(panic) => {
            log::warn!(
                target: "sessionlog::worker",
                "{kind} sink of '{logger}' panicked during {operation}: {}",
                panic_message(panic.as_ref())
            );
            None
        }
    }
}

pub struct SinkRouter {
    session: SessionInfo,
    config: Arc<LogConfig>,
    plugins: Plugins,
    /// Keyed by lowercase logger name.
    bindings: HashMap<String, (Arc<str>, Vec<SinkBinding>)>,
}

impl SinkRouter {
    pub fn new(session: SessionInfo, config: Arc<LogConfig>, plugins: Plugins) -> Self {
        Self {
            session,
            config,
            plugins,
            bindings: HashMap::new(),
        }
    }

    pub fn config(&self) -> &Arc<LogConfig> {
        &self.config
    }

    #[cfg(test)]
    fn cached_loggers(&self) -> usize {
        self.bindings.len()
    }

    /// Sinks serving `event`'s logger, created on first use. The event's
    /// resolved entry is used when present, otherwise the name is matched again.
    pub fn bindings(&mut self, event: &LogEvent) -> &mut [SinkBinding] {
        let key = event.logger.to_lowercase();
        if !self.bindings.contains_key(&key) {
            let entry_id = event
                .entry_id
                .or_else(|| self.config.resolve_entry(&event.logger));
            let sinks = self.materialize(&event.logger, entry_id);
            self.bindings
                .insert(key.clone(), (Arc::clone(&event.logger), sinks));
        }
        match self.bindings.get_mut(&key) {
            Some((_, sinks)) => sinks.as_mut_slice(),
            None => &mut [],
        }
    }

    fn materialize(&self, logger: &Arc<str>, entry_id: Option<usize>) -> Vec<SinkBinding> {
        let entry = self.config.entry(entry_id);
        let mut rotation = RotationPolicy::from_config(&self.config);
        if logger.eq_ignore_ascii_case(SESSION_LOGGER) {
            rotation = rotation.unlimited();
        }
        let mut bindings = Vec::with_capacity(entry.sinks.len());
        for (position, spec) in entry.sinks.iter().enumerate() {
            let same_kind = |other: &&PluginSpec| other.kind.eq_ignore_ascii_case(&spec.kind);
            let sibling_count = entry.sinks.iter().filter(same_kind).count();
            let sibling_index = entry.sinks[..position].iter().filter(same_kind).count();
            let init = SinkInit {
                session_guid: self.session.guid,
                session_folder: self.session.session_folder.clone(),
                resource_folder: self.session.resource_folder.clone(),
                config: Arc::clone(&self.config),
                parameters: spec.parameters.clone(),
                logger: Arc::clone(logger),
                kind: spec.kind.clone(),
                sibling_count,
                sibling_index,
                rotation,
            };
            let created = guarded(&spec.kind, logger, "initialize", || {
                let Some(mut sink) = self.plugins.create_sink(&spec.kind) else {
                    return Err(io::Error::new(io::ErrorKind::NotFound, "unknown sink kind"));
                };
                sink.init(init)?;
                Ok(sink)
            });
            if let Some(sink) = created {
                bindings.push(SinkBinding {
                    kind: spec.kind.clone(),
                    logger: Arc::clone(logger),
                    sink,
                    touched: false,
                });
            }
        }
        bindings
    }

    /// Flushes every sink written to since the previous flush.
    pub fn flush_touched(&mut self) {
        for (_, sinks) in self.bindings.values_mut() {
            for binding in sinks {
                binding.flush();
            }
        }
    }

    pub fn close_all(&mut self) {
        for (_, sinks) in self.bindings.values_mut() {
            for binding in sinks {
                binding.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use chrono::Local;

    use super::*;
    use crate::{
        config::RouteEntry,
        event::{EventId, Payload},
        level::LogLevel,
    };

    type Seen = Arc<Mutex<Vec<(String, String, usize, usize)>>>;

    struct Recording {
        seen: Seen,
        init: Option<SinkInit>,
        flushes: Arc<Mutex<usize>>,
    }

    impl Sink for Recording {
        fn init(&mut self, init: SinkInit) -> io::Result<()> {
            self.init = Some(init);
            Ok(())
        }

        fn write(&mut self, event: &LogEvent) -> io::Result<()> {
            let init = self.init.as_ref().unwrap();
            self.seen.lock().unwrap().push((
                event.logger.to_string(),
                init.sibling_tag(),
                init.sibling_count,
                init.rotation.max_messages as usize,
            ));
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            *self.flushes.lock().unwrap() += 1;
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Sink for Broken {
        fn init(&mut self, _: SinkInit) -> io::Result<()> {
            Ok(())
        }

        fn write(&mut self, _: &LogEvent) -> io::Result<()> {
            panic!("write exploded")
        }

        fn flush(&mut self) -> io::Result<()> {
            panic!("flush exploded")
        }

        fn close(&mut self) -> io::Result<()> {
            Err(io::Error::other("close failed"))
        }
    }

    fn router(config: LogConfig) -> (SinkRouter, Seen, Arc<Mutex<usize>>) {
        let seen: Seen = Arc::default();
        let flushes = Arc::new(Mutex::new(0));
        let mut plugins = Plugins::empty();
        let (s, f) = (Arc::clone(&seen), Arc::clone(&flushes));
        plugins
            .register_sink("mem", move || {
                Box::new(Recording {
                    seen: Arc::clone(&s),
                    init: None,
                    flushes: Arc::clone(&f),
                })
            })
            .unwrap();
        plugins.register_sink("broken", || Box::new(Broken)).unwrap();
        let session = SessionInfo {
            guid: Uuid::new_v4(),
            context: "ctx".into(),
            session_folder: PathBuf::from("/tmp/unused"),
            resource_folder: PathBuf::from("/tmp/unused/Resources"),
        };
        (SinkRouter::new(session, Arc::new(config), plugins), seen, flushes)
    }

    fn event(logger: &str, entry_id: Option<usize>) -> LogEvent {
        LogEvent {
            id: EventId::new(0),
            parent_id: EventId::INVALID,
            start_id: EventId::INVALID,
            thread: "1".into(),
            timestamp: Local::now(),
            trace: false,
            logger: Arc::from(logger),
            entry_id,
            level: LogLevel::Info,
            text: String::new(),
            payload: Payload::Text,
            rendered: None,
        }
    }

    fn config() -> LogConfig {
        let mut config = LogConfig::in_folder("/tmp/unused");
        config.cleanup_messages = 5;
        config.default_entry = RouteEntry::new("*").with_sink(PluginSpec::new("mem"));
        config.entries.push(
            RouteEntry::new("A.*;B.C")
                .with_sink(PluginSpec::new("mem"))
                .with_sink(PluginSpec::new("MEM")),
        );
        config
    }

    #[test]
    fn test_unmatched_name_falls_back_to_default() {
        let (mut router, seen, _) = router(config());
        for binding in router.bindings(&event("B.D", None)) {
            binding.write(&event("B.D", None));
        }
        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[("B.D".to_string(), String::new(), 1, 5)]);
    }

    #[test]
    fn test_siblings_of_same_kind_are_tagged() {
        let (mut router, seen, _) = router(config());
        for binding in router.bindings(&event("A.X", Some(0))) {
            binding.write(&event("A.X", Some(0)));
        }
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].1, "mem1");
        assert_eq!(seen[1].1, "MEM2");
        assert_eq!(seen[1].2, 2);
    }

    #[test]
    fn test_bindings_are_cached_per_name() {
        let (mut router, _, _) = router(config());
        assert_eq!(router.bindings(&event("A.X", None)).len(), 2);
        assert_eq!(router.bindings(&event("a.x", None)).len(), 2);
        assert_eq!(router.bindings(&event("other", None)).len(), 1);
        assert_eq!(router.cached_loggers(), 2);
    }

    #[test]
    fn test_session_logger_is_exempt_from_rotation() {
        let (mut router, seen, _) = router(config());
        for binding in router.bindings(&event(SESSION_LOGGER, None)) {
            binding.write(&event(SESSION_LOGGER, None));
        }
        assert_eq!(seen.lock().unwrap()[0].3, 0);
    }

    #[test]
    fn test_flush_only_touched_sinks_once() {
        let (mut router, _, flushes) = router(config());
        router.bindings(&event("idle", None));
        for _ in 0..3 {
            for binding in router.bindings(&event("busy", None)) {
                binding.write(&event("busy", None));
            }
        }
        router.flush_touched();
        router.flush_touched();
        assert_eq!(*flushes.lock().unwrap(), 1);
    }

    #[test]
    fn test_panicking_sibling_does_not_affect_the_others() {
        let mut config = config();
        config.entries.insert(
            0,
            RouteEntry::new("mixed")
                .with_sink(PluginSpec::new("broken"))
                .with_sink(PluginSpec::new("mem")),
        );
        let (mut router, seen, flushes) = router(config);
        for binding in router.bindings(&event("mixed", Some(0))) {
            binding.write(&event("mixed", Some(0)));
        }
        router.flush_touched();
        router.close_all();
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(*flushes.lock().unwrap(), 1);
    }
}
