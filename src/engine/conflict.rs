use crate::model::*;

use super::CafeState;

/// First reservation already holding `table_id` inside `window`, if any.
pub fn conflicting_reservation<'a>(
    cafe: &'a CafeState,
    table_id: TableId,
    window: &ConflictWindow,
) -> Option<&'a Reservation> {
    cafe.reserved_within(window).find(|r| r.table_id == table_id)
}
