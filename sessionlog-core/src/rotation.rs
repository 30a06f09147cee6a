//! Message-count rotation and generation retention for sink bindings.

use std::{fs, io, path::Path};

use crate::config::LogConfig;

/// Rotation limits taken from the session snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotationPolicy {
    /// Events per generation; 0 disables rotation.
    pub max_messages: u64,
    /// Generations kept; 0 keeps all.
    pub max_generations: u64,
    pub keep_resources: bool,
}

impl RotationPolicy {
    pub fn from_config(config: &LogConfig) -> Self {
        Self {
            max_messages: config.cleanup_messages,
            max_generations: config.cleanup_logs,
            keep_resources: config.keep_resources,
        }
    }

    /// Same policy without message-count rotation (used by the session logger).
    pub fn unlimited(self) -> Self {
        Self {
            max_messages: 0,
            ..self
        }
    }
}

/// What a sink has to do after recording a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStep {
    Continue,
    /// Close the current file; the next write opens generation `next`.
    /// `evict` names the generation to delete, if any.
    Rotate { evict: Option<u64>, next: u64 },
}

/// Generation index and message counter of one sink binding.
#[derive(Debug, Clone, Default)]
pub struct Rotation {
    policy: RotationPolicy,
    generation: u64,
    messages: u64,
}

impl Rotation {
    pub fn new(policy: RotationPolicy) -> Self {
        Self {
            policy,
            generation: 0,
            messages: 0,
        }
    }

    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn messages(&self) -> u64 {
        self.messages
    }

    /// Counts one written event and advances the generation once the threshold is hit.
    pub fn record_write(&mut self) -> RotationStep {
        if self.policy.max_messages == 0 {
            return RotationStep::Continue;
        }
        self.messages += 1;
        if self.messages < self.policy.max_messages {
            return RotationStep::Continue;
        }
        let keep = self.policy.max_generations;
        let evict = (keep > 0 && self.generation >= keep).then(|| self.generation - keep);
        self.generation += 1;
        self.messages = 0;
        RotationStep::Rotate {
            evict,
            next: self.generation,
        }
    }
}

/// Deletes `path`; a missing file is not an error.
pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Deletes every `<id>_<stem>.*` file in `folder`. Keeps going past failures
/// and returns the last one.
pub fn remove_resources(folder: &Path, stem: &str) -> io::Result<()> {
    let mut result = Ok(());
    for entry in fs::read_dir(folder)?.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_resource_of(&name, stem)
            && let Err(err) = fs::remove_file(entry.path())
        {
            result = Err(err);
        }
    }
    result
}

fn is_resource_of(file_name: &str, stem: &str) -> bool {
    let Some((id, rest)) = file_name.split_once('_') else {
        return false;
    };
    !id.is_empty()
        && id.bytes().all(|b| b.is_ascii_digit())
        && rest
            .strip_prefix(stem)
            .is_some_and(|tail| tail.starts_with('.'))
}
