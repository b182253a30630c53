mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::debug;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedLocationState = Arc<RwLock<LocationState>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Booking book for one tenant: locations, their bookings, and the WAL
/// that makes them durable.
pub struct Engine {
    pub state: DashMap<Ulid, SharedLocationState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking id → location id
    pub(super) booking_to_location: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a LocationState. Caller holds the lock.
fn apply_to_location(ls: &mut LocationState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingCreated { booking } => {
            index.insert(booking.id, booking.location_id);
            ls.insert_booking(booking.clone());
        }
        Event::BookingUpdated { booking } => {
            ls.replace_booking(booking.clone());
        }
        Event::BookingCancelled { id, .. } => {
            ls.remove_booking(*id);
            index.remove(id);
        }
        Event::LocationRenamed { name, .. } => {
            ls.name = name.clone();
        }
        // LocationCreated/Deleted are handled at the DashMap level, not here
        Event::LocationCreated { .. } | Event::LocationDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            booking_to_location: DashMap::new(),
        };

        // Sole owner of these Arcs during replay, so try_write never contends.
        // blocking_write would panic here when called from async tenant creation.
        for event in &events {
            match event {
                Event::LocationCreated { id, name } => {
                    let ls = LocationState::new(*id, name.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(ls)));
                }
                Event::LocationDeleted { id } => {
                    engine.state.remove(id);
                }
                other => {
                    let Some(location_id) = event_location_id(other) else { continue };
                    if let Some(entry) = engine.state.get(&location_id) {
                        let ls_arc = entry.clone();
                        let mut guard = ls_arc.try_write().expect("replay: uncontended write");
                        apply_to_location(&mut guard, other, &engine.booking_to_location);
                    }
                }
            }
        }
        debug!(events = events.len(), locations = engine.state.len(), "replayed WAL");

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

    pub fn get_location(&self, id: &Ulid) -> Option<SharedLocationState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_location_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_location.get(booking_id).map(|e| *e.value())
    }

    /// A location removed while a writer waited on its lock is gone, even
    /// though the writer still holds its `Arc`.
    pub(super) fn ensure_live(&self, id: &Ulid, ls: &SharedLocationState) -> Result<(), EngineError> {
        match self.state.get(id) {
            Some(entry) if Arc::ptr_eq(entry.value(), ls) => Ok(()),
            _ => Err(EngineError::NotFound(*id)),
        }
    }

    /// Claim booking ids in the index before persisting. All or none:
    /// a taken id releases the ones already claimed.
    pub(super) fn reserve_booking_ids(&self, claims: &[(Ulid, Ulid)]) -> Result<(), EngineError> {
        for (i, &(id, location_id)) in claims.iter().enumerate() {
            let taken = match self.booking_to_location.entry(id) {
                Entry::Occupied(_) => true,
                Entry::Vacant(slot) => {
                    slot.insert(location_id);
                    false
                }
            };
            if taken {
                self.release_booking_ids(claims[..i].iter().map(|(id, _)| id));
                return Err(EngineError::AlreadyExists(id));
            }
        }
        Ok(())
    }

    pub(super) fn release_booking_ids<'a>(&self, ids: impl IntoIterator<Item = &'a Ulid>) {
        for id in ids {
            self.booking_to_location.remove(id);
        }
    }

    /// WAL-append then apply, under the caller's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        ls: &mut LocationState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_location(ls, event, &self.booking_to_location);
        Ok(())
    }

    /// Lookup booking → location, acquire the location's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<LocationState>, EngineError> {
        let location_id = self
            .get_location_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let ls = self
            .get_location(&location_id)
            .ok_or(EngineError::NotFound(location_id))?;
        Ok(ls.write_owned().await)
    }
}

/// Location an event belongs to (for non-Create/Delete events).
fn event_location_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingCreated { booking } | Event::BookingUpdated { booking } => {
            Some(booking.location_id)
        }
        Event::BookingCancelled { location_id, .. } => Some(*location_id),
        Event::LocationRenamed { id, .. } => Some(*id),
        Event::LocationCreated { .. } | Event::LocationDeleted { .. } => None,
    }
}
