//! Filesystem event binder: registers a native OS watch per directory and
//! lets the OS call back into the process, rather than running any
//! poll-and-sleep loop. Grounded on `src-tauri/src/file_watcher.rs`'s
//! `RecommendedWatcher` + mpsc-channel + dedicated-thread pattern, with the
//! graceful-degradation behavior (`active=false` instead of a hard failure
//! when no native watch can be installed) from
//! `original_source/multiclaws/roles/coo.py::COO`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;

pub type WatchCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

struct WatchEntry {
    path: PathBuf,
    pattern: String,
    description: String,
    active: bool,
    _watcher: Option<RecommendedWatcher>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchDescriptor {
    pub path: String,
    pub pattern: String,
    pub description: String,
    pub active: bool,
}

/// One native watch per registered directory. A directory that already has
/// one registered is a no-op on a second `watch` call, matching the
/// original's idempotent behavior.
#[derive(Clone, Default)]
pub struct EventBinder {
    watches: Arc<Mutex<HashMap<String, WatchEntry>>>,
}

impl EventBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a watch on `path`, filtered to file names matching `pattern`
    /// (a simple glob, e.g. `*.md`). Returns `true` if a native watch was
    /// actually installed, `false` if the registration still succeeded but
    /// degraded to a no-op (the host refused the watch, or the path doesn't
    /// exist); either way the watch shows up in `list_watches`.
    pub fn watch(&self, path: &Path, pattern: &str, description: &str, callback: WatchCallback) -> bool {
        let key = path.to_string_lossy().into_owned();
        let mut watches = self.watches.lock().expect("watch table poisoned");
        if watches.contains_key(&key) {
            return watches[&key].active;
        }

        let pattern_owned = pattern.to_string();
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let installed = RecommendedWatcher::new(tx, notify::Config::default())
            .and_then(|mut w| w.watch(path, RecursiveMode::NonRecursive).map(|_| w));

        let (watcher, active) = match installed {
            Ok(w) => {
                spawn_dispatch_thread(rx, pattern_owned.clone(), callback);
                (Some(w), true)
            }
            Err(err) => {
                tracing::warn!(path = %key, error = %err, "native filesystem watch unavailable, degrading to inactive registration");
                (None, false)
            }
        };

        watches.insert(
            key,
            WatchEntry {
                path: path.to_path_buf(),
                pattern: pattern_owned,
                description: description.to_string(),
                active,
                _watcher: watcher,
            },
        );
        active
    }

    /// Stops and drops a watch. Returns `true` if one was registered.
    pub fn unwatch(&self, path: &Path) -> bool {
        let key = path.to_string_lossy().into_owned();
        self.watches.lock().expect("watch table poisoned").remove(&key).is_some()
    }

    pub fn list_watches(&self) -> Vec<WatchDescriptor> {
        self.watches
            .lock()
            .expect("watch table poisoned")
            .values()
            .map(|e| WatchDescriptor {
                path: e.path.to_string_lossy().into_owned(),
                pattern: e.pattern.clone(),
                description: e.description.clone(),
                active: e.active,
            })
            .collect()
    }

    /// Stops every active watch. Called on shutdown.
    pub fn stop_all(&self) {
        self.watches.lock().expect("watch table poisoned").clear();
    }
}

fn spawn_dispatch_thread(rx: mpsc::Receiver<notify::Result<Event>>, pattern: String, callback: WatchCallback) {
    std::thread::spawn(move || {
        for result in rx {
            match result {
                Ok(event) => {
                    let kind = event_kind(&event);
                    for path in &event.paths {
                        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                        if matches_glob(&pattern, &name) {
                            callback(kind, &path.to_string_lossy());
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "filesystem watch error, continuing");
                }
            }
        }
    });
}

fn event_kind(event: &Event) -> &'static str {
    use notify::EventKind::*;
    match event.kind {
        Create(_) => "created",
        Modify(_) => "modified",
        Remove(_) => "deleted",
        _ => "other",
    }
}

/// `*` only, single-segment (no `**`); enough for the workspace-scoped
/// patterns this binder is ever asked to watch (e.g. `*.md`).
fn matches_glob(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.split_once('*') {
        Some((prefix, suffix)) => name.starts_with(prefix) && name.ends_with(suffix),
        None => pattern == name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_suffix_pattern() {
        assert!(matches_glob("*.md", "notes.md"));
        assert!(!matches_glob("*.md", "notes.txt"));
    }

    #[test]
    fn watching_same_path_twice_is_idempotent() {
        let binder = EventBinder::new();
        let dir = std::env::temp_dir();
        let first = binder.watch(&dir, "*", "test watch", Arc::new(|_, _| {}));
        let second = binder.watch(&dir, "*", "test watch again", Arc::new(|_, _| {}));
        assert_eq!(first, second);
        assert_eq!(binder.list_watches().len(), 1);
    }

    #[test]
    fn unwatch_removes_the_registration() {
        let binder = EventBinder::new();
        let dir = std::env::temp_dir();
        binder.watch(&dir, "*", "test watch", Arc::new(|_, _| {}));
        assert!(binder.unwatch(&dir));
        assert!(binder.list_watches().is_empty());
    }
}
