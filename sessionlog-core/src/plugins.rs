use std::{fmt, sync::Arc};

use crate::{
    config::LogConfig,
    error::{Error, Result},
    monitor::{Monitor, ProcessMonitor},
    sink::{FileSink, Sink},
};

pub const SINK_FILE: &str = "file";
pub const MONITOR_PROCESS: &str = "process";

pub type SinkFactory = Arc<dyn Fn() -> Box<dyn Sink> + Send + Sync>;
pub type MonitorFactory = Arc<dyn Fn() -> Box<dyn Monitor> + Send + Sync>;

/// Name → factory registry for sinks and monitors. Configuration refers to
/// plugins by these (case-insensitive) names.
#[derive(Clone)]
pub struct Plugins {
    sinks: Vec<(String, SinkFactory)>,
    monitors: Vec<(String, MonitorFactory)>,
}

impl Default for Plugins {
    /// Registry with the built-in `file` sink and `process` monitor.
    fn default() -> Self {
        let file: SinkFactory = Arc::new(|| Box::new(FileSink::default()) as Box<dyn Sink>);
        let process: MonitorFactory =
            Arc::new(|| Box::new(ProcessMonitor::default()) as Box<dyn Monitor>);
        let mut plugins = Self::empty();
        plugins.sinks.push((SINK_FILE.into(), file));
        plugins.monitors.push((MONITOR_PROCESS.into(), process));
        plugins
    }
}

impl fmt::Debug for Plugins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugins")
            .field("sinks", &self.sinks.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("monitors", &self.monitors.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}

fn find<'a, F>(entries: &'a [(String, F)], name: &str) -> Option<&'a F> {
    let name = name.trim();
    entries
        .iter()
        .find(|(registered, _)| registered.eq_ignore_ascii_case(name))
        .map(|(_, factory)| factory)
}

fn check_name<F>(entries: &[(String, F)], kind: &'static str, name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.contains(char::is_control) {
        return Err(Error::InvalidPluginName {
            kind,
            name: name.into(),
        });
    }
    if find(entries, trimmed).is_some() {
        return Err(Error::DuplicatePlugin {
            kind,
            name: trimmed.into(),
        });
    }
    Ok(trimmed.to_string())
}

impl Plugins {
    /// Registry without any plugin.
    pub fn empty() -> Self {
        Self {
            sinks: Vec::new(),
            monitors: Vec::new(),
        }
    }

    pub fn register_sink<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Sink> + Send + Sync + 'static,
    {
        let name = check_name(&self.sinks, "sink", name)?;
        self.sinks.push((name, Arc::new(factory)));
        Ok(())
    }

    pub fn register_monitor<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn Monitor> + Send + Sync + 'static,
    {
        let name = check_name(&self.monitors, "monitor", name)?;
        self.monitors.push((name, Arc::new(factory)));
        Ok(())
    }

    pub fn has_sink(&self, name: &str) -> bool {
        find(&self.sinks, name).is_some()
    }

    pub fn has_monitor(&self, name: &str) -> bool {
        find(&self.monitors, name).is_some()
    }

    pub fn create_sink(&self, name: &str) -> Option<Box<dyn Sink>> {
        find(&self.sinks, name).map(|factory| factory())
    }

    pub fn create_monitor(&self, name: &str) -> Option<Box<dyn Monitor>> {
        find(&self.monitors, name).map(|factory| factory())
    }

    /// Fails on the first sink or monitor kind `config` uses that is not registered.
    pub fn validate(&self, config: &LogConfig) -> Result<()> {
        let sinks = config
            .entries
            .iter()
            .chain(std::iter::once(&config.default_entry))
            .flat_map(|entry| entry.sinks.iter());
        for sink in sinks {
            if !self.has_sink(&sink.kind) {
                return Err(Error::UnknownPlugin {
                    kind: "sink",
                    name: sink.kind.clone(),
                });
            }
        }
        for monitor in &config.monitors {
            if !self.has_monitor(&monitor.kind) {
                return Err(Error::UnknownPlugin {
                    kind: "monitor",
                    name: monitor.kind.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PluginSpec, RouteEntry};

    #[test]
    fn test_builtins_registered() {
        let plugins = Plugins::default();
        assert!(plugins.has_sink("FILE"));
        assert!(plugins.has_monitor("process"));
        assert!(plugins.create_sink("file").is_some());
        assert!(plugins.create_sink("socket").is_none());
    }

    #[test]
    fn test_registration_rules() {
        let mut plugins = Plugins::default();
        assert!(matches!(
            plugins.register_sink(" File ", || Box::new(FileSink::default())),
            Err(Error::DuplicatePlugin { kind: "sink", .. })
        ));
        assert!(matches!(
            plugins.register_sink("", || Box::new(FileSink::default())),
            Err(Error::InvalidPluginName { .. })
        ));
        plugins
            .register_sink("mirror", || Box::new(FileSink::default()))
            .unwrap();
        assert!(plugins.has_sink("Mirror"));
    }

    #[test]
    fn test_validate_reports_unknown_kinds() {
        let plugins = Plugins::default();
        let mut config = LogConfig::in_folder("/tmp/sessionlog");
        assert!(plugins.validate(&config).is_ok());

        config
            .entries
            .push(RouteEntry::new("net.*").with_sink(PluginSpec::new("socket")));
        match plugins.validate(&config) {
            Err(Error::UnknownPlugin { kind, name }) => {
                assert_eq!(kind, "sink");
                assert_eq!(name, "socket");
            }
            other => panic!("unexpected {other:?}"),
        }

        config.entries.clear();
        config.monitors.push(PluginSpec::new("gpu"));
        assert!(matches!(
            plugins.validate(&config),
            Err(Error::UnknownPlugin { kind: "monitor", .. })
        ));
    }
}
