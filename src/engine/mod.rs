mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{available_tables, busy_tables};
pub use conflict::conflicting_reservation;
pub use error::EngineError;

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedCafeState = Arc<RwLock<CafeState>>;

/// Everything bookable in one cafe. Reservations are kept sorted by `at`.
#[derive(Debug, Clone, Default)]
pub struct CafeState {
    pub id: CafeId,
    pub locations: BTreeMap<LocationId, Location>,
    pub occasions: BTreeMap<OccasionId, Occasion>,
    pub tables: BTreeMap<TableId, Table>,
    pub reservations: Vec<Reservation>,
}

impl CafeState {
    pub fn new(id: CafeId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.at <= reservation.at);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// Reservations whose booking time lies inside `window`.
    pub fn reserved_within(&self, window: &ConflictWindow) -> impl Iterator<Item = &Reservation> {
        let lo = self.reservations.partition_point(|r| r.at < window.min);
        let hi = self.reservations.partition_point(|r| r.at <= window.max);
        self.reservations[lo..hi].iter()
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    /// Start recording appended events so a snapshot taken afterwards can be
    /// topped up with whatever committed while it was being built.
    BeginCompact {
        response: oneshot::Sender<()>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is queued, fsync once,
/// answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    // Events flushed since the last BeginCompact; None when no compaction runs.
    let mut since_snapshot: Option<Vec<Event>> = None;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                let started = Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                if let (Ok(()), Some(tail)) = (&result, since_snapshot.as_mut()) {
                    tail.extend(batch.iter().map(|(event, _)| event.clone()));
                }
                respond_batch(batch, &result);

                if let Some(cmd) = deferred {
                    handle_non_append(&mut wal, cmd, &mut since_snapshot);
                }
            }
            other => handle_non_append(&mut wal, other, &mut since_snapshot),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so the partial batch does not leak into the next one.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand, since_snapshot: &mut Option<Vec<Event>>) {
    match cmd {
        WalCommand::BeginCompact { response } => {
            *since_snapshot = Some(Vec::new());
            let _ = response.send(());
        }
        WalCommand::Compact { mut events, response } => {
            // Replay applies these on top of the snapshot; duplicates are no-ops.
            events.extend(since_snapshot.take().unwrap_or_default());
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

pub struct Engine {
    pub(super) state: DashMap<CafeId, SharedCafeState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: reservation id → cafe id.
    pub(super) reservation_to_cafe: DashMap<Ulid, CafeId>,
    /// One compaction at a time.
    pub(super) compaction: Mutex<()>,
}

/// Apply an event to a cafe. The caller holds the write lock.
fn apply_to_cafe(cafe: &mut CafeState, event: &Event, index: &DashMap<Ulid, CafeId>) {
    match event {
        Event::LocationAdded { location, .. } => {
            cafe.locations.insert(location.id, location.clone());
        }
        Event::OccasionAdded { occasion, .. } => {
            cafe.occasions.insert(occasion.id, occasion.clone());
        }
        Event::TableAdded { table } => {
            cafe.tables.insert(table.id, *table);
        }
        Event::ReservationBooked { reservation } => {
            if index.contains_key(&reservation.id) {
                return;
            }
            index.insert(reservation.id, reservation.cafe_id);
            cafe.insert_reservation(reservation.clone());
        }
        Event::ReservationsFreed { ids, .. } => {
            for id in ids {
                cafe.remove_reservation(*id);
                index.remove(id);
            }
        }
        Event::RemindersSent { ids, .. } => {
            for r in cafe.reservations.iter_mut().filter(|r| ids.contains(&r.id)) {
                r.notified = true;
            }
        }
    }
}

impl Engine {
    /// Replay the journal at `wal_path` and start its writer task.
    /// Must be called from within a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            reservation_to_cafe: DashMap::new(),
            compaction: Mutex::new(()),
        };

        // We are the sole owner of these Arcs during replay, so try_write always
        // succeeds. Never block here: this may run inside an async context.
        for event in &events {
            let cafe = engine.cafe_or_insert(event.cafe_id());
            let mut guard = cafe
                .try_write()
                .map_err(|_| io::Error::other("journal replay: cafe state contended"))?;
            apply_to_cafe(&mut guard, event, &engine.reservation_to_cafe);
        }
        tracing::debug!(events = events.len(), cafes = engine.state.len(), "journal replayed");

        Ok(engine)
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

    pub fn get_cafe(&self, id: CafeId) -> Option<SharedCafeState> {
        self.state.get(&id).map(|e| e.value().clone())
    }

    pub fn get_cafe_for_reservation(&self, id: &Ulid) -> Option<CafeId> {
        self.reservation_to_cafe.get(id).map(|e| *e.value())
    }

    pub(super) fn cafe_or_insert(&self, id: CafeId) -> SharedCafeState {
        self.state
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(CafeState::new(id))))
            .value()
            .clone()
    }

    /// WAL-append then apply, with the cafe's write lock held by the caller.
    pub(super) async fn persist_and_apply(
        &self,
        cafe: &mut CafeState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_cafe(cafe, event, &self.reservation_to_cafe);
        Ok(())
    }
}
