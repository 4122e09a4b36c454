use std::collections::HashSet;

use crate::model::*;

use super::CafeState;

// ── Availability Algorithm ────────────────────────────────────────

/// Tables that seat the party at the location and are free for the whole
/// window, in table id order.
///
/// A table is taken when any of its reservations starts inside `window`; the
/// window already carries the reservation length on both sides, so this is
/// the full overlap test.
pub fn available_tables(
    cafe: &CafeState,
    party_size: u32,
    location_id: LocationId,
    window: &ConflictWindow,
) -> Vec<Table> {
    let taken = taken_tables(cafe, window);
    suitable(cafe, party_size, location_id)
        .filter(|t| !taken.contains(&t.id))
        .collect()
}

/// The complement of [`available_tables`]: suitable tables that do hold a
/// reservation inside `window`. Used by the front desk to free tables.
pub fn busy_tables(
    cafe: &CafeState,
    party_size: u32,
    location_id: LocationId,
    window: &ConflictWindow,
) -> Vec<Table> {
    let taken = taken_tables(cafe, window);
    suitable(cafe, party_size, location_id)
        .filter(|t| taken.contains(&t.id))
        .collect()
}

fn taken_tables(cafe: &CafeState, window: &ConflictWindow) -> HashSet<TableId> {
    cafe.reserved_within(window).map(|r| r.table_id).collect()
}

fn suitable(
    cafe: &CafeState,
    party_size: u32,
    location_id: LocationId,
) -> impl Iterator<Item = Table> + '_ {
    cafe.tables
        .values()
        .filter(move |t| t.capacity >= party_size && t.location_id == location_id)
        .copied()
}
