//! Development auto-reload: restart the server when its executable is
//! rebuilt.

use std::convert::Infallible;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use notify_debouncer_mini::notify::{self, RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Linkers write the output in several steps; wait for them to settle.
pub const DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to resolve the executable path: {0}")]
    Resolve(#[source] io::Error),

    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Watches the directory holding an executable and reports events that
/// touch the executable itself.
pub struct ExecutableWatcher {
    path: PathBuf,
    changes: mpsc::Receiver<()>,
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl ExecutableWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, WatchError> {
        let path = path.into();
        let watched = path.clone();
        // Capacity 1: a pending change already means "reload".
        let (changes_tx, changes) = mpsc::channel(1);

        let mut debouncer = new_debouncer(DEBOUNCE, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    if events.iter().any(|event| is_same_file(&event.path, &watched)) {
                        let _ = changes_tx.try_send(());
                    }
                }
                Err(err) => warn!(%err, "executable watcher reported an error"),
            }
        })
        .map_err(|source| WatchError::Watch {
            path: path.clone(),
            source,
        })?;

        let directory = path.parent().unwrap_or(&path).to_path_buf();
        debouncer
            .watcher()
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Watch {
                path: directory.clone(),
                source,
            })?;
        debug!(directory = %directory.display(), "watching for executable rebuilds");

        Ok(Self {
            path,
            changes,
            _debouncer: debouncer,
        })
    }

    pub fn current_exe() -> Result<Self, WatchError> {
        Self::new(std::env::current_exe().map_err(WatchError::Resolve)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolves once the executable has been rewritten.
    pub async fn wait_for_change(&mut self) {
        if self.changes.recv().await.is_some() {
            info!(path = %self.path.display(), "executable changed; reloading");
        } else {
            // The debouncer is owned by `self`, so the channel stays open.
            std::future::pending::<()>().await;
        }
    }
}

/// Only the executable's directory is watched, so the file name decides.
fn is_same_file(changed: &Path, watched: &Path) -> bool {
    changed.file_name() == watched.file_name()
}

/// Replaces the current process with a fresh run of the same executable and
/// arguments. Only returns on failure.
pub fn restart() -> io::Result<Infallible> {
    let exe = std::env::current_exe()?;
    let mut command = Command::new(&exe);
    command.args(std::env::args_os().skip(1));
    debug!(exe = %exe.display(), "re-executing server");

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        Err(command.exec())
    }

    #[cfg(not(unix))]
    {
        command.spawn()?;
        std::process::exit(0)
    }
}
