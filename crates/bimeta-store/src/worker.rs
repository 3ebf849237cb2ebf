//! Engine worker thread
//!
//! The worker is the engine's execution context: it is spawned once when an
//! [`EngineHandle`](crate::EngineHandle) is built, owns the redb `Database`
//! for its whole life and is the only thread that ever touches it. Callers
//! never attach to the database; they queue a [`Command`] and await the
//! reply. Commands run one at a time in arrival order.
//!
//! A caller that stops waiting (for example on a request timeout) only drops
//! its reply receiver. The queued command still runs to completion.

use crate::error::{EngineError, EngineResult, RedbError};
use crate::tables;
use redb::{Database, ReadableTable, ReadableTableMetadata};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

pub(crate) type Reply<T> = oneshot::Sender<EngineResult<T>>;

/// Request sent to the worker thread
pub(crate) enum Command {
    Open {
        path: PathBuf,
        reply: Reply<()>,
    },
    Put {
        key: String,
        value: String,
        reply: Reply<Option<String>>,
    },
    Get {
        key: String,
        reply: Reply<Option<String>>,
    },
    Delete {
        key: String,
        reply: Reply<()>,
    },
    Take {
        key: String,
        reply: Reply<Option<String>>,
    },
    Restore {
        key: String,
        expected: String,
        previous: Option<String>,
        reply: Reply<bool>,
    },
    Size {
        reply: Reply<u64>,
    },
    Compact {
        reply: Reply<bool>,
    },
    PauseCompaction {
        reply: Reply<()>,
    },
    ResumeCompaction {
        reply: Reply<()>,
    },
    Close {
        reply: Reply<()>,
    },
}

impl Command {
    const fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Put { .. } => "put",
            Self::Get { .. } => "get",
            Self::Delete { .. } => "delete",
            Self::Take { .. } => "take",
            Self::Restore { .. } => "restore",
            Self::Size { .. } => "size",
            Self::Compact { .. } => "compact",
            Self::PauseCompaction { .. } => "pause_compaction",
            Self::ResumeCompaction { .. } => "resume_compaction",
            Self::Close { .. } => "close",
        }
    }
}

/// State owned by the worker thread
struct EngineWorker {
    db: Option<Database>,
    compaction_paused: bool,
}

/// Worker thread entry point. Returns when a `Close` command is processed
/// or every sender is gone.
pub(crate) fn run(rx: Receiver<Command>, compaction_interval: Option<Duration>) {
    let mut worker = EngineWorker {
        db: None,
        compaction_paused: false,
    };
    let mut next_compaction = compaction_interval.map(|i| Instant::now() + i);

    info!("Engine worker started");

    loop {
        let command = match next_event(&rx, next_compaction) {
            Event::Command(command) => command,
            Event::CompactionDue => {
                worker.periodic_compaction();
                next_compaction = compaction_interval.map(|i| Instant::now() + i);
                continue;
            }
            Event::Disconnected => {
                warn!("Engine handle dropped without close");
                break;
            }
        };

        debug!(command = command.name(), "engine command");

        if let Command::Close { reply } = command {
            // Dropping the database flushes and releases the file lock.
            worker.db = None;
            let _ = reply.send(Ok(()));
            break;
        }

        worker.handle(command);
    }

    info!("Engine worker stopped");
}

/// What the worker loop should do next
enum Event {
    Command(Command),
    CompactionDue,
    Disconnected,
}

/// Wait for the next command, or report that compaction is due. A due
/// compaction is reported before any queued command.
fn next_event(rx: &Receiver<Command>, next_compaction: Option<Instant>) -> Event {
    let received = match next_compaction {
        Some(at) => {
            let now = Instant::now();
            if now >= at {
                return Event::CompactionDue;
            }
            rx.recv_timeout(at - now)
        }
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };
    match received {
        Ok(command) => Event::Command(command),
        Err(RecvTimeoutError::Timeout) => Event::CompactionDue,
        Err(RecvTimeoutError::Disconnected) => Event::Disconnected,
    }
}

impl EngineWorker {
    fn handle(&mut self, command: Command) {
        // A send error only means the caller stopped waiting.
        match command {
            Command::Open { path, reply } => {
                let _ = reply.send(self.open(path));
            }
            Command::Put { key, value, reply } => {
                let _ = reply.send(self.put(key, &value));
            }
            Command::Get { key, reply } => {
                let _ = reply.send(self.get(key));
            }
            Command::Delete { key, reply } => {
                let _ = reply.send(self.take(key).map(|_| ()));
            }
            Command::Take { key, reply } => {
                let _ = reply.send(self.take(key));
            }
            Command::Restore {
                key,
                expected,
                previous,
                reply,
            } => {
                let _ = reply.send(self.restore_if(key, &expected, previous.as_deref()));
            }
            Command::Size { reply } => {
                let _ = reply.send(self.size());
            }
            Command::Compact { reply } => {
                let _ = reply.send(self.compact());
            }
            Command::PauseCompaction { reply } => {
                let _ = reply.send(self.set_compaction_paused(true));
            }
            Command::ResumeCompaction { reply } => {
                let _ = reply.send(self.set_compaction_paused(false));
            }
            Command::Close { reply } => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn db(&self) -> EngineResult<&Database> {
        self.db.as_ref().ok_or(EngineError::NotOpen)
    }

    fn open(&mut self, path: PathBuf) -> EngineResult<()> {
        if self.db.is_some() {
            return Err(EngineError::AlreadyOpen);
        }
        let db = open_database(&path).map_err(|source| EngineError::Open {
            path: path.clone(),
            source,
        })?;
        info!("Opened engine at {}", path.display());
        self.db = Some(db);
        Ok(())
    }

    fn put(&self, key: String, value: &str) -> EngineResult<Option<String>> {
        let db = self.db()?;
        let result = (|| -> Result<Option<String>, RedbError> {
            let write_txn = db.begin_write()?;
            let previous = {
                let mut table = write_txn.open_table(tables::RECORDS)?;
                let previous = table
                    .insert(key.as_str(), value)?
                    .map(|old| old.value().to_string());
                previous
            };
            write_txn.commit()?;
            Ok(previous)
        })();
        result.map_err(|source| EngineError::Write { key, source })
    }

    fn get(&self, key: String) -> EngineResult<Option<String>> {
        let db = self.db()?;
        let result = (|| -> Result<Option<String>, RedbError> {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(tables::RECORDS)?;
            let value = table.get(key.as_str())?.map(|v| v.value().to_string());
            Ok(value)
        })();
        result.map_err(|source| EngineError::Read { key, source })
    }

    fn take(&self, key: String) -> EngineResult<Option<String>> {
        let db = self.db()?;
        let result = (|| -> Result<Option<String>, RedbError> {
            let write_txn = db.begin_write()?;
            let removed = {
                let mut table = write_txn.open_table(tables::RECORDS)?;
                let removed = table
                    .remove(key.as_str())?
                    .map(|old| old.value().to_string());
                removed
            };
            write_txn.commit()?;
            Ok(removed)
        })();
        result.map_err(|source| EngineError::Delete { key, source })
    }

    fn restore_if(
        &self,
        key: String,
        expected: &str,
        previous: Option<&str>,
    ) -> EngineResult<bool> {
        let db = self.db()?;
        let result = (|| -> Result<bool, RedbError> {
            let write_txn = db.begin_write()?;
            let restored = {
                let mut table = write_txn.open_table(tables::RECORDS)?;
                let matches = table
                    .get(key.as_str())?
                    .is_some_and(|current| current.value() == expected);
                if matches {
                    match previous {
                        Some(previous) => {
                            table.insert(key.as_str(), previous)?;
                        }
                        None => {
                            table.remove(key.as_str())?;
                        }
                    }
                }
                matches
            };
            write_txn.commit()?;
            Ok(restored)
        })();
        result.map_err(|source| EngineError::Write { key, source })
    }

    fn size(&self) -> EngineResult<u64> {
        let db = self.db()?;
        let result = (|| -> Result<u64, RedbError> {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(tables::RECORDS)?;
            Ok(table.len()?)
        })();
        result.map_err(EngineError::Size)
    }

    fn compact(&mut self) -> EngineResult<bool> {
        if self.compaction_paused {
            debug!("Compaction requested while paused, skipping");
            return Ok(false);
        }
        let db = self.db.as_mut().ok_or(EngineError::NotOpen)?;
        db.compact()
            .map_err(|e| EngineError::Compaction(RedbError::from(e)))
    }

    fn periodic_compaction(&mut self) {
        if self.db.is_none() {
            return;
        }
        match self.compact() {
            Ok(true) => info!("Periodic compaction reclaimed space"),
            Ok(false) => debug!("Periodic compaction had nothing to do"),
            Err(e) => error!("Periodic compaction failed: {}", e),
        }
    }

    fn set_compaction_paused(&mut self, paused: bool) -> EngineResult<()> {
        self.db()?;
        match (self.compaction_paused, paused) {
            (true, true) => Err(EngineError::CompactionState("already paused")),
            (false, false) => Err(EngineError::CompactionState("not paused")),
            _ => {
                self.compaction_paused = paused;
                info!(
                    "Compaction {}",
                    if paused { "paused" } else { "resumed" }
                );
                Ok(())
            }
        }
    }
}

/// Open (or create) the database and create the record table eagerly so
/// later read transactions don't fail.
fn open_database(path: &Path) -> Result<Database, RedbError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::create(path)?;
    let write_txn = db.begin_write()?;
    {
        let _t = write_txn.open_table(tables::RECORDS)?;
    }
    write_txn.commit()?;
    Ok(db)
}
