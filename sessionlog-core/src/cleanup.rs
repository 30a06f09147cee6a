//! Previous-session pruning and session folder naming.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::LazyLock,
    time::SystemTime,
};

use regex::Regex;

static SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d+)\)\s*$").expect("valid suffix pattern"));

/// Folders in `root` whose name contains `context`, most recent first.
pub fn session_folders(root: &Path, context: &str) -> io::Result<Vec<PathBuf>> {
    let mut folders: Vec<(SystemTime, PathBuf)> = fs::read_dir(root)?
        .flatten()
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .filter(|entry| entry.file_name().to_string_lossy().contains(context))
        .map(|entry| {
            let created = entry
                .metadata()
                .and_then(|m| m.created().or_else(|_| m.modified()))
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (created, entry.path())
        })
        .collect();
    folders.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    Ok(folders.into_iter().map(|(_, path)| path).collect())
}

/// Deletes the oldest session folders of `context` until fewer than `keep`
/// remain, leaving room for the session about to start. `keep == 0` disables
/// pruning. Folders that cannot be deleted are skipped. Returns the survivors.
pub fn prune_sessions(root: &Path, context: &str, keep: usize) -> Vec<PathBuf> {
    let mut folders = match session_folders(root, context) {
        Ok(folders) => folders,
        Err(err) => {
            log::debug!(target: "sessionlog::cleanup", "cannot list '{}': {err}", root.display());
            return Vec::new();
        }
    };
    if keep == 0 {
        return folders;
    }
    let mut survivors = Vec::new();
    while folders.len() >= keep {
        let Some(oldest) = folders.pop() else {
            break;
        };
        if let Err(err) = fs::remove_dir_all(&oldest) {
            log::debug!(
                target: "sessionlog::cleanup",
                "previous session '{}' not removed: {err}",
                oldest.display()
            );
            survivors.push(oldest);
        }
    }
    folders.extend(survivors.into_iter().rev());
    folders
}

/// Numeric `(N)` suffix of a folder name.
pub fn folder_index(name: &str) -> Option<u64> {
    SUFFIX
        .captures(name)
        .and_then(|captures| captures[1].parse().ok())
}

/// First free session folder for `context`: `<context> (N+1)` where N is the
/// highest suffix among `previous`, otherwise `<context>`, `<context> (2)`, ...
pub fn next_session_folder(root: &Path, context: &str, previous: &[PathBuf]) -> PathBuf {
    let highest = previous
        .iter()
        .filter_map(|path| path.file_name())
        .filter_map(|name| folder_index(&name.to_string_lossy()))
        .max();
    let mut counter = highest.map_or(1, |n| n + 1);
    let mut candidate = match highest {
        Some(_) => suffixed(root, context, counter),
        None => root.join(context),
    };
    while candidate.exists() {
        counter += 1;
        candidate = suffixed(root, context, counter);
    }
    candidate
}

fn suffixed(root: &Path, context: &str, counter: u64) -> PathBuf {
    root.join(format!("{context} ({counter})"))
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;

    fn make(root: &Path, name: &str) -> PathBuf {
        let path = root.join(name);
        fs::create_dir_all(&path).unwrap();
        // creation times need to differ for the ordering
        thread::sleep(Duration::from_millis(15));
        path
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_folder_index() {
        assert_eq!(folder_index("Session 'app' (12)"), Some(12));
        assert_eq!(folder_index("Session 'app'"), None);
        assert_eq!(folder_index("Session (x)"), None);
    }

    #[test]
    fn test_first_folder_then_probing() {
        let dir = tempfile::tempdir().unwrap();
        let first = next_session_folder(dir.path(), "ctx", &[]);
        assert_eq!(first, dir.path().join("ctx"));
        fs::create_dir(&first).unwrap();
        let second = next_session_folder(dir.path(), "ctx", &[]);
        assert_eq!(second, dir.path().join("ctx (2)"));
        fs::create_dir(&second).unwrap();
        assert_eq!(next_session_folder(dir.path(), "ctx", &[]), dir.path().join("ctx (3)"));
    }

    #[test]
    fn test_highest_suffix_wins() {
        let dir = tempfile::tempdir().unwrap();
        let previous = vec![
            make(dir.path(), "ctx (9)"),
            make(dir.path(), "ctx (10)"),
            make(dir.path(), "ctx (bad)"),
        ];
        assert_eq!(
            next_session_folder(dir.path(), "ctx", &previous),
            dir.path().join("ctx (11)")
        );
        make(dir.path(), "ctx (11)");
        assert_eq!(
            next_session_folder(dir.path(), "ctx", &previous),
            dir.path().join("ctx (12)")
        );
    }

    #[test]
    fn test_prune_keeps_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        make(dir.path(), "ctx");
        make(dir.path(), "ctx (2)");
        make(dir.path(), "ctx (3)");
        make(dir.path(), "other");
        let survivors = prune_sessions(dir.path(), "ctx", 3);
        assert_eq!(names(&survivors), vec!["ctx (3)", "ctx (2)"]);
        assert!(!dir.path().join("ctx").exists());
        assert!(dir.path().join("other").exists());
    }

    #[test]
    fn test_prune_disabled_or_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        make(dir.path(), "ctx");
        make(dir.path(), "ctx (2)");
        assert_eq!(prune_sessions(dir.path(), "ctx", 0).len(), 2);
        assert!(prune_sessions(&dir.path().join("missing"), "ctx", 3).is_empty());
    }
}
