use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_batch_conflicts, check_no_conflict, validate_booking};
use super::{apply_to_location, Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_location(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        if self.state.len() >= MAX_LOCATIONS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many locations"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("location name too long"));
            }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::LocationCreated { id, name: name.clone() };
        self.wal_append(&event).await?;
        self.state.insert(id, Arc::new(RwLock::new(LocationState::new(id, name))));
        Ok(())
    }

    pub async fn rename_location(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("location name too long"));
            }
        let ls = self.get_location(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = ls.write().await;
        self.ensure_live(&id, &ls)?;
        let event = Event::LocationRenamed { id, name };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn delete_location(&self, id: Ulid) -> Result<(), EngineError> {
        let ls = self.get_location(&id).ok_or(EngineError::NotFound(id))?;
        let guard = ls.write().await;
        self.ensure_live(&id, &ls)?;
        if !guard.bookings.is_empty() {
            return Err(EngineError::HasBookings(id));
        }

        let event = Event::LocationDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        Ok(())
    }

    /// Validate, check for double-booking under the location's write lock,
    /// then persist.
    pub async fn create_booking(&self, booking: Booking) -> Result<(), EngineError> {
        validate_booking(&booking)?;
        if self.booking_to_location.contains_key(&booking.id) {
            return Err(EngineError::AlreadyExists(booking.id));
        }
        let ls = self
            .get_location(&booking.location_id)
            .ok_or(EngineError::NotFound(booking.location_id))?;
        let mut guard = ls.write().await;
        self.ensure_live(&booking.location_id, &ls)?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_LOCATION {
            return Err(EngineError::LimitExceeded("too many bookings at location"));
        }

        check_no_conflict(&guard, &booking)?;
        let id = booking.id;
        self.reserve_booking_ids(&[(id, booking.location_id)])?;

        let event = Event::BookingCreated { booking };
        let result = self.persist_and_apply(&mut guard, &event).await;
        if result.is_err() {
            self.release_booking_ids([&id]);
        }
        result
    }

    /// All-or-nothing: if any booking is invalid or collides, with stored
    /// bookings or with another in the batch, none are written.
    pub async fn batch_create_bookings(&self, bookings: Vec<Booking>) -> Result<(), EngineError> {
        if bookings.is_empty() {
            return Ok(());
        }
        if bookings.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let mut seen = HashSet::with_capacity(bookings.len());
        for booking in &bookings {
            validate_booking(booking)?;
            if !seen.insert(booking.id) || self.booking_to_location.contains_key(&booking.id) {
                return Err(EngineError::AlreadyExists(booking.id));
            }
        }

        // Acquire write locks in sorted order to prevent deadlocks.
        let mut location_ids: Vec<Ulid> = bookings.iter().map(|b| b.location_id).collect();
        location_ids.sort();
        location_ids.dedup();

        let mut guards = Vec::with_capacity(location_ids.len());
        let mut guard_index = HashMap::new();
        for lid in &location_ids {
            let ls = self.get_location(lid).ok_or(EngineError::NotFound(*lid))?;
            let guard = ls.clone().write_owned().await;
            self.ensure_live(lid, &ls)?;
            guard_index.insert(*lid, guards.len());
            guards.push(guard);
        }

        // Phase 1: validate against stored bookings and within the batch.
        let mut by_location: HashMap<Ulid, Vec<&Booking>> = HashMap::new();
        for booking in &bookings {
            by_location.entry(booking.location_id).or_default().push(booking);
        }
        for (lid, batch) in &by_location {
            let guard = &guards[guard_index[lid]];
            if guard.bookings.len() + batch.len() > MAX_BOOKINGS_PER_LOCATION {
                return Err(EngineError::LimitExceeded("too many bookings at location"));
            }
            for booking in batch {
                check_no_conflict(guard, booking)?;
            }
            check_batch_conflicts(batch)?;
        }

        drop(by_location);

        let claims: Vec<(Ulid, Ulid)> = bookings.iter().map(|b| (b.id, b.location_id)).collect();
        self.reserve_booking_ids(&claims)?;

        // Phase 2: commit.
        let count = bookings.len();
        for (i, booking) in bookings.into_iter().enumerate() {
            let idx = guard_index[&booking.location_id];
            let event = Event::BookingCreated { booking };
            if let Err(e) = self.wal_append(&event).await {
                self.release_booking_ids(claims[i..].iter().map(|(id, _)| id));
                return Err(e);
            }
            apply_to_location(&mut guards[idx], &event, &self.booking_to_location);
        }
        info!(count, "batch of bookings committed");
        Ok(())
    }

    /// Edit a booking in place. Recurring bookings stay recurring and dated
    /// bookings stay dated.
    pub async fn update_booking(&self, id: Ulid, patch: BookingPatch) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let current = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if let Some(when) = patch.when
            && when.is_recurring() != current.when.is_recurring() {
                return Err(EngineError::Invalid(
                    "cannot turn a recurring booking into a dated one or back".into(),
                ));
            }
        let next = patch.apply(current);
        validate_booking(&next)?;
        check_no_conflict(&guard, &next)?;

        let event = Event::BookingUpdated { booking: next.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(next)
    }

    pub async fn cancel_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let location_id = guard.id;
        let event = Event::BookingCancelled { id, location_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(location_id)
    }

    /// Import a booking stored in the legacy JSON document shape.
    pub async fn import_document(
        &self,
        id: Ulid,
        location_id: Ulid,
        json: &str,
    ) -> Result<Booking, EngineError> {
        if json.len() > MAX_DOCUMENT_LEN {
            return Err(EngineError::LimitExceeded("document too large"));
        }
        let doc: BookingDocument = serde_json::from_str(json)
            .map_err(|e| EngineError::Invalid(format!("bad booking document: {e}")))?;
        let booking = Booking::from_document(id, location_id, doc)?;
        self.create_booking(booking.clone()).await?;
        Ok(booking)
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();
        let location_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in location_ids {
            let Some(ls) = self.get_location(&id) else { continue };
            let guard = ls.read().await;
            events.push(Event::LocationCreated {
                id: guard.id,
                name: guard.name.clone(),
            });
            for booking in &guard.bookings {
                events.push(Event::BookingCreated { booking: booking.clone() });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
