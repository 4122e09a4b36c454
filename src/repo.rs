use async_trait::async_trait;
use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::*;

/// Storage seen by the booking service.
///
/// `insert_reservation` must check for a conflicting reservation and insert
/// in one atomic step; callers never check availability first.
#[async_trait]
pub trait ReservationRepo: Send + Sync {
    async fn find_available_tables(
        &self,
        cafe_id: CafeId,
        party_size: u32,
        location_id: LocationId,
        window: &ConflictWindow,
    ) -> Result<Vec<Table>, EngineError>;

    async fn find_busy_tables(
        &self,
        cafe_id: CafeId,
        party_size: u32,
        location_id: LocationId,
        window: &ConflictWindow,
    ) -> Result<Vec<Table>, EngineError>;

    async fn insert_reservation(
        &self,
        reservation: Reservation,
        window: &ConflictWindow,
    ) -> Result<Ulid, EngineError>;

    async fn delete_reservations_in_window(
        &self,
        cafe_id: CafeId,
        table_id: TableId,
        window: &ConflictWindow,
    ) -> Result<Vec<Ulid>, EngineError>;

    async fn table(&self, cafe_id: CafeId, table_id: TableId) -> Result<Option<Table>, EngineError>;

    async fn locations(&self, cafe_id: CafeId) -> Result<Vec<Location>, EngineError>;

    async fn occasions(&self, cafe_id: CafeId) -> Result<Vec<Occasion>, EngineError>;

    async fn user_reservations(&self, user_id: UserId) -> Result<Vec<Reservation>, EngineError>;

    async fn due_reminders(&self, now: NaiveDateTime) -> Result<Vec<Reservation>, EngineError>;

    async fn mark_reminders_sent(&self, ids: &[Ulid]) -> Result<Vec<Ulid>, EngineError>;
}

#[async_trait]
impl ReservationRepo for Engine {
    async fn find_available_tables(
        &self,
        cafe_id: CafeId,
        party_size: u32,
        location_id: LocationId,
        window: &ConflictWindow,
    ) -> Result<Vec<Table>, EngineError> {
        Ok(Engine::find_available_tables(self, cafe_id, party_size, location_id, window).await)
    }

    async fn find_busy_tables(
        &self,
        cafe_id: CafeId,
        party_size: u32,
        location_id: LocationId,
        window: &ConflictWindow,
    ) -> Result<Vec<Table>, EngineError> {
        Ok(Engine::find_busy_tables(self, cafe_id, party_size, location_id, window).await)
    }

    async fn insert_reservation(
        &self,
        reservation: Reservation,
        window: &ConflictWindow,
    ) -> Result<Ulid, EngineError> {
        Engine::insert_reservation(self, reservation, window).await
    }

    async fn delete_reservations_in_window(
        &self,
        cafe_id: CafeId,
        table_id: TableId,
        window: &ConflictWindow,
    ) -> Result<Vec<Ulid>, EngineError> {
        Engine::delete_reservations_in_window(self, cafe_id, table_id, window).await
    }

    async fn table(&self, cafe_id: CafeId, table_id: TableId) -> Result<Option<Table>, EngineError> {
        Ok(Engine::table(self, cafe_id, table_id).await)
    }

    async fn locations(&self, cafe_id: CafeId) -> Result<Vec<Location>, EngineError> {
        Ok(Engine::locations(self, cafe_id).await)
    }

    async fn occasions(&self, cafe_id: CafeId) -> Result<Vec<Occasion>, EngineError> {
        Ok(Engine::occasions(self, cafe_id).await)
    }

    async fn user_reservations(&self, user_id: UserId) -> Result<Vec<Reservation>, EngineError> {
        Ok(Engine::user_reservations(self, user_id).await)
    }

    async fn due_reminders(&self, now: NaiveDateTime) -> Result<Vec<Reservation>, EngineError> {
        Ok(Engine::due_reminders(self, now).await)
    }

    async fn mark_reminders_sent(&self, ids: &[Ulid]) -> Result<Vec<Ulid>, EngineError> {
        Engine::mark_reminders_sent(self, ids).await
    }
}
