use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::model::*;

use super::availability::{available_tables, busy_tables};
use super::{Engine, SharedCafeState};

impl Engine {
    /// Free tables for the party at `location_id`. An unknown cafe has no
    /// tables, so the answer is empty rather than an error.
    pub async fn find_available_tables(
        &self,
        cafe_id: CafeId,
        party_size: u32,
        location_id: LocationId,
        window: &ConflictWindow,
    ) -> Vec<Table> {
        let Some(cafe) = self.get_cafe(cafe_id) else {
            return Vec::new();
        };
        let guard = cafe.read().await;
        available_tables(&guard, party_size, location_id, window)
    }

    pub async fn find_busy_tables(
        &self,
        cafe_id: CafeId,
        party_size: u32,
        location_id: LocationId,
        window: &ConflictWindow,
    ) -> Vec<Table> {
        let Some(cafe) = self.get_cafe(cafe_id) else {
            return Vec::new();
        };
        let guard = cafe.read().await;
        busy_tables(&guard, party_size, location_id, window)
    }

    pub async fn locations(&self, cafe_id: CafeId) -> Vec<Location> {
        match self.get_cafe(cafe_id) {
            Some(cafe) => cafe.read().await.locations.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn occasions(&self, cafe_id: CafeId) -> Vec<Occasion> {
        match self.get_cafe(cafe_id) {
            Some(cafe) => cafe.read().await.occasions.values().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn tables(&self, cafe_id: CafeId) -> Vec<Table> {
        match self.get_cafe(cafe_id) {
            Some(cafe) => cafe.read().await.tables.values().copied().collect(),
            None => Vec::new(),
        }
    }

    pub async fn table(&self, cafe_id: CafeId, table_id: TableId) -> Option<Table> {
        let cafe = self.get_cafe(cafe_id)?;
        let guard = cafe.read().await;
        guard.tables.get(&table_id).copied()
    }

    pub async fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        let cafe = self.get_cafe(self.get_cafe_for_reservation(id)?)?;
        let guard = cafe.read().await;
        guard.reservations.iter().find(|r| r.id == *id).cloned()
    }

    /// Every reservation made by `user_id`, across cafes, earliest first.
    pub async fn user_reservations(&self, user_id: UserId) -> Vec<Reservation> {
        let mut out = Vec::new();
        for cafe in self.all_cafes() {
            let guard = cafe.read().await;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| r.user_id == Some(user_id))
                    .cloned(),
            );
        }
        out.sort_by_key(|r| r.at);
        out
    }

    /// Reservations whose reminder is due at `now` and has not been sent.
    pub async fn due_reminders(&self, now: NaiveDateTime) -> Vec<Reservation> {
        let mut out = Vec::new();
        for cafe in self.all_cafes() {
            let guard = cafe.read().await;
            // Anything starting at or before `now` can never be due.
            let start = guard.reservations.partition_point(|r| r.at <= now);
            out.extend(guard.reservations[start..].iter().filter(|r| r.is_due(now)).cloned());
        }
        out
    }

    pub fn reservation_count(&self) -> usize {
        self.reservation_to_cafe.len()
    }

    pub fn cafe_count(&self) -> usize {
        self.state.len()
    }

    fn all_cafes(&self) -> Vec<SharedCafeState> {
        self.state.iter().map(|e| e.value().clone()).collect()
    }
}
