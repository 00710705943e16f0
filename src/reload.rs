//! Atomic engine reload from snapshot + signal files.
//!
//! ## Responsibility
//! Persist engine state as a JSON snapshot next to a signal file, and swap
//! a freshly built engine into the live [`EngineHandle`] when a signal
//! appears. All file I/O and deserialization happen outside any lock; the
//! critical section is exactly one pointer swap.
//!
//! ## Guarantees
//! - Requests never observe torn state: they run against the whole engine
//!   instance they captured at entry
//! - A corrupt or unreadable snapshot clears the signal, keeps the previous
//!   engine, and logs a warning — it is never fatal
//! - The new engine shares the feedback store and cache of its predecessor
//!
//! ## NOT Responsible For
//! - Producing learned state (that belongs to `engine::retrain`)

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::SemanticCache;
use crate::engine::{EngineHandle, EngineState, WeightEngine};
use crate::feedback::FeedbackStore;

/// Errors from snapshot publication or reload.
#[derive(Error, Debug)]
pub enum ReloadError {
    /// Reading or writing a snapshot/signal file failed.
    #[error("reload I/O error on {path}: {source}")]
    Io {
        /// The file involved.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Serializing engine state for the snapshot failed.
    #[error("snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The snapshot file did not contain valid engine state.
    #[error("corrupt snapshot at {path}: {reason}")]
    Corrupt {
        /// The snapshot file.
        path: String,
        /// Parse failure description.
        reason: String,
    },

    /// Setting up the filesystem watcher failed.
    #[error("signal watcher error: {0}")]
    Watch(#[from] notify::Error),
}

/// Publishes and applies engine snapshots.
pub struct ReloadManager {
    snapshot_path: PathBuf,
    signal_path: PathBuf,
    handle: EngineHandle,
    feedback: FeedbackStore,
    cache: Arc<SemanticCache>,
}

impl ReloadManager {
    /// Create a manager over the given file locations and live handle.
    pub fn new(
        snapshot_path: impl Into<PathBuf>,
        signal_path: impl Into<PathBuf>,
        handle: EngineHandle,
        feedback: FeedbackStore,
        cache: Arc<SemanticCache>,
    ) -> Self {
        Self {
            snapshot_path: snapshot_path.into(),
            signal_path: signal_path.into(),
            handle,
            feedback,
            cache,
        }
    }

    /// Write `state` to the snapshot file, then raise the signal file.
    ///
    /// Write order matters: the signal is only raised after the snapshot is
    /// fully on disk, so a reload triggered by the signal always reads a
    /// complete snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ReloadError`] if serialization or either file write fails.
    pub fn publish(&self, state: &EngineState) -> Result<(), ReloadError> {
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.snapshot_path, json).map_err(|e| ReloadError::Io {
            path: self.snapshot_path.display().to_string(),
            source: e,
        })?;
        std::fs::write(&self.signal_path, b"reload\n").map_err(|e| ReloadError::Io {
            path: self.signal_path.display().to_string(),
            source: e,
        })?;
        info!(snapshot = %self.snapshot_path.display(), "engine snapshot published");
        Ok(())
    }

    /// Apply a pending reload if the signal file is present.
    ///
    /// Returns `Ok(true)` when a new engine was swapped in, `Ok(false)` when
    /// no signal was pending. The signal file is always cleared once
    /// observed, including on failure, so a corrupt snapshot is not retried
    /// in a loop.
    ///
    /// # Errors
    ///
    /// Returns [`ReloadError`] if the snapshot is unreadable or corrupt.
    /// The live engine is left unchanged in that case.
    pub fn try_reload(&self) -> Result<bool, ReloadError> {
        if !self.signal_path.exists() {
            return Ok(false);
        }

        let result = self.load_and_swap();
        if let Err(e) = std::fs::remove_file(&self.signal_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to clear reload signal");
            }
        }
        match &result {
            Ok(()) => {
                crate::metrics::inc_reload("ok");
                info!("engine reloaded from snapshot");
            }
            Err(e) => {
                crate::metrics::inc_reload("error");
                warn!(error = %e, "reload failed, keeping current engine");
            }
        }
        result.map(|()| true)
    }

    fn load_and_swap(&self) -> Result<(), ReloadError> {
        let content =
            std::fs::read_to_string(&self.snapshot_path).map_err(|e| ReloadError::Io {
                path: self.snapshot_path.display().to_string(),
                source: e,
            })?;
        let state: EngineState =
            serde_json::from_str(&content).map_err(|e| ReloadError::Corrupt {
                path: self.snapshot_path.display().to_string(),
                reason: e.to_string(),
            })?;

        // Deserialization done; the only locked work is the swap itself.
        let engine = Arc::new(WeightEngine::new(
            state,
            self.feedback.clone(),
            Arc::clone(&self.cache),
        ));
        self.handle.swap(engine);
        Ok(())
    }

    /// Spawn a periodic poller applying pending reloads every `interval`.
    pub fn spawn_poller(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                match self.try_reload() {
                    Ok(true) => {}
                    Ok(false) => debug!("no reload signal pending"),
                    Err(e) => warn!(error = %e, "poll reload failed"),
                }
            }
        })
    }

    /// Spawn a filesystem watcher applying reloads when the signal file
    /// appears, with a short debounce for editors and non-atomic writers.
    ///
    /// Watches the signal file's parent directory because many writers
    /// replace files rather than modifying them in place.
    ///
    /// # Errors
    ///
    /// Returns [`ReloadError::Watch`] if the watcher cannot be registered.
    pub fn spawn_watcher(self: Arc<Self>) -> Result<JoinHandle<()>, ReloadError> {
        use notify::{RecursiveMode, Watcher};

        let watch_dir = self
            .signal_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(16);
        let signal_name = self.signal_path.file_name().map(|n| n.to_os_string());

        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    let relevant = event.paths.iter().any(|p| {
                        signal_name
                            .as_deref()
                            .is_some_and(|name| p.file_name() == Some(name))
                    });
                    if relevant {
                        let _ = tx.try_send(());
                    }
                }
            })?;
        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

        Ok(tokio::spawn(async move {
            // Keeps the watcher registered for the task's lifetime.
            let _watcher = watcher;
            while rx.recv().await.is_some() {
                // Debounce: absorb the burst of events a single publish emits.
                tokio::time::sleep(Duration::from_millis(100)).await;
                while rx.try_recv().is_ok() {}
                match self.try_reload() {
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "watched reload failed"),
                }
            }
        }))
    }
}
