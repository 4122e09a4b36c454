use std::collections::HashMap;

use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::conflicting_reservation;
use super::{Engine, EngineError, SharedCafeState, WalCommand};

impl Engine {
    /// Cafe state for onboarding writes; creating a new cafe counts against the limit.
    fn cafe_for_onboarding(&self, cafe_id: CafeId) -> Result<SharedCafeState, EngineError> {
        if let Some(cafe) = self.get_cafe(cafe_id) {
            return Ok(cafe);
        }
        if self.state.len() >= MAX_CAFES {
            return Err(EngineError::LimitExceeded("too many cafes"));
        }
        Ok(self.cafe_or_insert(cafe_id))
    }

    pub async fn add_location(&self, cafe_id: CafeId, id: LocationId, name: String) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("location name too long"));
        }
        let cafe = self.cafe_for_onboarding(cafe_id)?;
        let mut guard = cafe.write().await;
        if guard.locations.len() >= MAX_LOCATIONS_PER_CAFE {
            return Err(EngineError::LimitExceeded("too many locations"));
        }
        if guard.locations.contains_key(&id) {
            return Err(EngineError::AlreadyExists("location", id));
        }
        let event = Event::LocationAdded {
            cafe_id,
            location: Location { id, name },
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn add_occasion(&self, cafe_id: CafeId, id: OccasionId, name: String) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("occasion name too long"));
        }
        let cafe = self.cafe_for_onboarding(cafe_id)?;
        let mut guard = cafe.write().await;
        if guard.occasions.len() >= MAX_OCCASIONS_PER_CAFE {
            return Err(EngineError::LimitExceeded("too many occasions"));
        }
        if guard.occasions.contains_key(&id) {
            return Err(EngineError::AlreadyExists("occasion", id));
        }
        let event = Event::OccasionAdded {
            cafe_id,
            occasion: Occasion { id, name },
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Tables are immutable once added; capacity and location are fixed here.
    pub async fn add_table(&self, table: Table) -> Result<(), EngineError> {
        if table.capacity == 0 || table.capacity > MAX_TABLE_CAPACITY {
            return Err(EngineError::LimitExceeded("table capacity out of range"));
        }
        let cafe = self.cafe_for_onboarding(table.cafe_id)?;
        let mut guard = cafe.write().await;
        if guard.tables.len() >= MAX_TABLES_PER_CAFE {
            return Err(EngineError::LimitExceeded("too many tables"));
        }
        if guard.tables.contains_key(&table.id) {
            return Err(EngineError::AlreadyExists("table", table.id));
        }
        if !guard.locations.contains_key(&table.location_id) {
            return Err(EngineError::LocationNotFound {
                cafe_id: table.cafe_id,
                location_id: table.location_id,
            });
        }
        self.persist_and_apply(&mut guard, &Event::TableAdded { table }).await
    }

    /// Atomically claim the reservation's table for `window`.
    ///
    /// The conflict check and the insert happen under the cafe's write lock,
    /// so of two concurrent claims on overlapping windows exactly one wins; the
    /// loser gets [`EngineError::Conflict`] naming the reservation in its way.
    pub async fn insert_reservation(
        &self,
        reservation: Reservation,
        window: &ConflictWindow,
    ) -> Result<Ulid, EngineError> {
        if reservation.party_size == 0 {
            return Err(EngineError::EmptyParty);
        }
        if reservation
            .description
            .as_ref()
            .is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN)
        {
            return Err(EngineError::LimitExceeded("event description too long"));
        }
        let cafe = self
            .get_cafe(reservation.cafe_id)
            .ok_or(EngineError::CafeNotFound(reservation.cafe_id))?;
        let mut guard = cafe.write().await;
        let Some(table) = guard.tables.get(&reservation.table_id).copied() else {
            return Err(EngineError::TableNotFound {
                cafe_id: reservation.cafe_id,
                table_id: reservation.table_id,
            });
        };
        if table.capacity < reservation.party_size {
            return Err(EngineError::PartyDoesNotFit {
                table_id: table.id,
                capacity: table.capacity,
                party_size: reservation.party_size,
            });
        }
        if !guard.occasions.contains_key(&reservation.occasion_id) {
            return Err(EngineError::OccasionNotFound {
                cafe_id: reservation.cafe_id,
                occasion_id: reservation.occasion_id,
            });
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_CAFE {
            return Err(EngineError::LimitExceeded("too many reservations"));
        }
        if let Some(existing) = conflicting_reservation(&guard, reservation.table_id, window) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Conflict(existing.id));
        }

        let id = reservation.id;
        self.persist_and_apply(&mut guard, &Event::ReservationBooked { reservation })
            .await?;
        Ok(id)
    }

    /// Delete every reservation of `table_id` whose time lies inside `window`.
    /// Returns the removed ids; an empty result is not an error.
    pub async fn delete_reservations_in_window(
        &self,
        cafe_id: CafeId,
        table_id: TableId,
        window: &ConflictWindow,
    ) -> Result<Vec<Ulid>, EngineError> {
        let Some(cafe) = self.get_cafe(cafe_id) else {
            return Ok(Vec::new());
        };
        let mut guard = cafe.write().await;
        let ids: Vec<Ulid> = guard
            .reserved_within(window)
            .filter(|r| r.table_id == table_id)
            .map(|r| r.id)
            .collect();
        if ids.is_empty() {
            return Ok(ids);
        }
        let event = Event::ReservationsFreed {
            cafe_id,
            ids: ids.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(ids)
    }

    /// Record that reminders went out for `ids`. Unknown or already marked ids
    /// are skipped; returns the ids that were newly marked.
    pub async fn mark_reminders_sent(&self, ids: &[Ulid]) -> Result<Vec<Ulid>, EngineError> {
        let mut by_cafe: HashMap<CafeId, Vec<Ulid>> = HashMap::new();
        for id in ids {
            if let Some(cafe_id) = self.get_cafe_for_reservation(id) {
                by_cafe.entry(cafe_id).or_default().push(*id);
            }
        }

        let mut marked = Vec::new();
        for (cafe_id, candidates) in by_cafe {
            let Some(cafe) = self.get_cafe(cafe_id) else { continue };
            let mut guard = cafe.write().await;
            let fresh: Vec<Ulid> = guard
                .reservations
                .iter()
                .filter(|r| !r.notified && candidates.contains(&r.id))
                .map(|r| r.id)
                .collect();
            if fresh.is_empty() {
                continue;
            }
            let event = Event::RemindersSent {
                cafe_id,
                ids: fresh.clone(),
            };
            self.persist_and_apply(&mut guard, &event).await?;
            marked.extend(fresh);
        }
        Ok(marked)
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    ///
    /// The writer starts recording appends before the snapshot is read, and
    /// writes them after the snapshot, so bookings that commit while cafes are
    /// being copied survive the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _running = self.compaction.lock().await;
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::BeginCompact { response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?;

        let mut events = Vec::new();
        let cafe_ids: Vec<CafeId> = self.state.iter().map(|e| *e.key()).collect();
        for cafe_id in cafe_ids {
            let Some(cafe) = self.get_cafe(cafe_id) else { continue };
            let guard = cafe.read().await;
            for location in guard.locations.values() {
                events.push(Event::LocationAdded {
                    cafe_id,
                    location: location.clone(),
                });
            }
            for occasion in guard.occasions.values() {
                events.push(Event::OccasionAdded {
                    cafe_id,
                    occasion: occasion.clone(),
                });
            }
            for table in guard.tables.values() {
                events.push(Event::TableAdded { table: *table });
            }
            for reservation in &guard.reservations {
                events.push(Event::ReservationBooked {
                    reservation: reservation.clone(),
                });
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
