mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod store;

pub use conflict::{validate, Rejection, Verdict};
pub use error::EngineError;
pub use lifecycle::{Operation, Stage};
pub use store::{BookingStore, SharedPropertyState};

use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::LOCK_ATTEMPTS;
use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Waits for one append, drains whatever else is already queued,
/// then writes the whole batch with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Everything queued before it must hit disk first.
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't leak into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Booking lifecycle service over a WAL-backed [`BookingStore`].
///
/// Constructed once per process and handed to callers explicitly.
pub struct Engine {
    pub(super) store: BookingStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold this shared for their whole run; compaction holds it
    /// exclusively so no commit can slip between snapshot and swap.
    pub(super) gate: RwLock<()>,
    /// Serializes property registration and removal.
    pub(super) catalog: Mutex<()>,
    lock_timeout: Duration,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task. Needs a Tokio runtime.
    pub fn new(wal_path: PathBuf, lock_timeout: Duration) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let store = BookingStore::from_states(store::rebuild(&events));
        info!(
            "replayed {} events: {} properties, {} bookings",
            events.len(),
            store.property_count(),
            store.booking_count()
        );

        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            store,
            wal_tx,
            gate: RwLock::new(()),
            catalog: Mutex::new(()),
            lock_timeout,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Log the event, then apply it. Memory is untouched if the log write fails.
    pub(super) async fn persist_and_apply(
        &self,
        ps: &mut PropertyState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(ps, event);
        Ok(())
    }

    /// Take a property's write lock: the start of a booking transaction.
    ///
    /// Each attempt is bounded by the lock timeout; after the retry runs out the
    /// caller gets `Transient`.
    pub(super) async fn lock_property(
        &self,
        property_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<PropertyState>, EngineError> {
        let handle = self
            .store
            .get_property(&property_id)
            .ok_or(EngineError::NotFound(property_id))?;

        for attempt in 1..=LOCK_ATTEMPTS {
            match tokio::time::timeout(self.lock_timeout, handle.clone().write_owned()).await {
                Ok(guard) => {
                    // Removed (or removed and re-registered) while we waited.
                    if !self.store.is_current(&property_id, &handle) {
                        return Err(EngineError::NotFound(property_id));
                    }
                    return Ok(guard);
                }
                Err(_) => {
                    metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                    warn!(
                        "lock timeout on property {property_id} (attempt {attempt}/{LOCK_ATTEMPTS})"
                    );
                }
            }
        }
        Err(EngineError::Transient(property_id))
    }

    /// Booking id → owning property, write-locked.
    pub(super) async fn lock_booking(
        &self,
        booking_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<PropertyState>, EngineError> {
        let property_id = self
            .store
            .property_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let guard = self.lock_property(property_id).await?;
        // Deleted between the index lookup and the lock.
        self.store.check_present(&guard, booking_id)?;
        Ok(guard)
    }
}
