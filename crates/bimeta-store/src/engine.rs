//! Engine binding
//!
//! [`KvEngine`] is the seam between the bidirectional store and the embedded
//! database. [`EngineHandle`] is the production implementation: it forwards
//! every call to the worker thread that owns the redb database.

use crate::error::{EngineError, EngineResult};
use crate::worker::{self, Command, Reply};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Flat string key/value engine
#[async_trait]
pub trait KvEngine: Send + Sync {
    /// Open or create the database at `path`
    async fn open(&self, path: &Path) -> EngineResult<()>;

    /// Store `value` under `key`, returning the value it replaced
    async fn put(&self, key: &str, value: &str) -> EngineResult<Option<String>>;

    /// Look up `key`. `None` means absent.
    async fn get(&self, key: &str) -> EngineResult<Option<String>>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> EngineResult<()>;

    /// Remove `key` and return the value it held, in one transaction
    async fn take(&self, key: &str) -> EngineResult<Option<String>>;

    /// Put `key` back to `previous` (remove it if `None`), but only while it
    /// still holds `expected`. Returns whether the record was restored.
    async fn restore_if(
        &self,
        key: &str,
        expected: &str,
        previous: Option<&str>,
    ) -> EngineResult<bool>;

    /// Number of records
    async fn size(&self) -> EngineResult<u64>;

    /// Compact now. Returns `false` if paused or nothing was reclaimed.
    async fn compact(&self) -> EngineResult<bool>;

    async fn pause_compaction(&self) -> EngineResult<()>;

    async fn resume_compaction(&self) -> EngineResult<()>;

    /// Release the database. Calling it again is a no-op.
    async fn close(&self) -> EngineResult<()>;
}

/// Options for the engine worker
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Run compaction on the worker at this interval
    pub compaction_interval: Option<Duration>,
}

/// Handle to the engine worker thread
///
/// Cloning is not supported; share it behind an `Arc`. Dropping the handle
/// without calling [`close`](KvEngine::close) lets the worker exit once it
/// notices the queue is gone.
pub struct EngineHandle {
    /// Command queue; `None` once closed
    tx: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EngineHandle {
    /// Spawn the worker thread. The database is not opened until
    /// [`open`](KvEngine::open) is called.
    pub fn new(options: EngineOptions) -> EngineResult<Self> {
        let (tx, rx) = mpsc::channel();
        let interval = options.compaction_interval;
        let worker = std::thread::Builder::new()
            .name("bimeta-engine".to_string())
            .spawn(move || worker::run(rx, interval))
            .map_err(EngineError::Spawn)?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue a command and wait for the worker's reply
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> EngineResult<T> {
        let (reply, rx) = oneshot::channel();
        {
            let guard = self.tx.lock();
            let tx = guard.as_ref().ok_or(EngineError::Closed)?;
            tx.send(make(reply)).map_err(|_| EngineError::WorkerGone)?;
        }
        rx.await.map_err(|_| EngineError::WorkerGone)?
    }
}

#[async_trait]
impl KvEngine for EngineHandle {
    async fn open(&self, path: &Path) -> EngineResult<()> {
        let path = path.to_path_buf();
        self.request(|reply| Command::Open { path, reply }).await
    }

    async fn put(&self, key: &str, value: &str) -> EngineResult<Option<String>> {
        let key = key.to_string();
        let value = value.to_string();
        self.request(|reply| Command::Put { key, value, reply })
            .await
    }

    async fn get(&self, key: &str) -> EngineResult<Option<String>> {
        let key = key.to_string();
        self.request(|reply| Command::Get { key, reply }).await
    }

    async fn delete(&self, key: &str) -> EngineResult<()> {
        let key = key.to_string();
        self.request(|reply| Command::Delete { key, reply }).await
    }

    async fn take(&self, key: &str) -> EngineResult<Option<String>> {
        let key = key.to_string();
        self.request(|reply| Command::Take { key, reply }).await
    }

    async fn restore_if(
        &self,
        key: &str,
        expected: &str,
        previous: Option<&str>,
    ) -> EngineResult<bool> {
        let key = key.to_string();
        let expected = expected.to_string();
        let previous = previous.map(ToString::to_string);
        self.request(|reply| Command::Restore {
            key,
            expected,
            previous,
            reply,
        })
        .await
    }

    async fn size(&self) -> EngineResult<u64> {
        self.request(|reply| Command::Size { reply }).await
    }

    async fn compact(&self) -> EngineResult<bool> {
        self.request(|reply| Command::Compact { reply }).await
    }

    async fn pause_compaction(&self) -> EngineResult<()> {
        self.request(|reply| Command::PauseCompaction { reply })
            .await
    }

    async fn resume_compaction(&self) -> EngineResult<()> {
        self.request(|reply| Command::ResumeCompaction { reply })
            .await
    }

    async fn close(&self) -> EngineResult<()> {
        let tx = self.tx.lock().take();
        let Some(tx) = tx else {
            debug!("Engine already closed");
            return Ok(());
        };

        let (reply, rx) = oneshot::channel();
        if tx.send(Command::Close { reply }).is_ok() {
            // Commands queued ahead of Close still run first.
            let _ = rx.await;
        }
        drop(tx);

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            tokio::task::spawn_blocking(move || worker.join())
                .await
                .map_err(|e| EngineError::Close(e.to_string()))?
                .map_err(|_| EngineError::Close("engine worker panicked".to_string()))?;
        }

        info!("Engine closed");
        Ok(())
    }
}
