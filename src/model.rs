use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for wall-clock deadlines (flow expiry).
pub type Ms = i64;

pub type CafeId = i64;
pub type TableId = i64;
pub type LocationId = i64;
pub type OccasionId = i64;
pub type UserId = i64;

/// Occasion recorded for bookings made by the front desk.
pub const DEFAULT_OCCASION: OccasionId = 1;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    pub cafe_id: CafeId,
    pub capacity: u32,
    pub location_id: LocationId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
}

/// The kind of visit a booking is made for (birthday, business lunch...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occasion {
    pub id: OccasionId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub mobile: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub cafe_id: CafeId,
    pub table_id: TableId,
    pub occasion_id: OccasionId,
    /// `None` for anonymous bookings.
    pub user_id: Option<UserId>,
    pub party_size: u32,
    /// Walk-ins marked busy by the front desk carry no contact details.
    pub customer: Option<Customer>,
    pub description: Option<String>,
    pub at: NaiveDateTime,
    /// When to remind the customer. Walk-ins are never reminded.
    pub notify_at: Option<NaiveDateTime>,
    pub notified: bool,
}

impl Reservation {
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        !self.notified && self.at > now && self.notify_at.is_some_and(|n| n <= now)
    }
}

/// Symmetric window of booking times that clash with a booking at `at`.
///
/// Both bounds are inclusive, so the window spans `2 * interval - 1` minutes:
/// two bookings conflict exactly when they start less than `interval` minutes
/// apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictWindow {
    pub min: NaiveDateTime,
    pub max: NaiveDateTime,
}

impl ConflictWindow {
    pub fn around(at: NaiveDateTime, interval_minutes: u32) -> Self {
        let reach = chrono::Duration::minutes(i64::from(interval_minutes.saturating_sub(1)));
        Self {
            min: at - reach,
            max: at + reach,
        }
    }

    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.min <= t && t <= self.max
    }
}

/// In-progress booking selection, carried across the steps of one booking flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserChoice {
    pub cafe_id: CafeId,
    pub location_id: LocationId,
    pub party_size: u32,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`
    pub time: String,
    pub table_id: Option<TableId>,
    pub occasion_id: Option<OccasionId>,
    pub description: Option<String>,
}

/// Journal record format. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    LocationAdded {
        cafe_id: CafeId,
        location: Location,
    },
    OccasionAdded {
        cafe_id: CafeId,
        occasion: Occasion,
    },
    TableAdded {
        table: Table,
    },
    ReservationBooked {
        reservation: Reservation,
    },
    ReservationsFreed {
        cafe_id: CafeId,
        ids: Vec<Ulid>,
    },
    RemindersSent {
        cafe_id: CafeId,
        ids: Vec<Ulid>,
    },
}

impl Event {
    pub fn cafe_id(&self) -> CafeId {
        match self {
            Event::LocationAdded { cafe_id, .. }
            | Event::OccasionAdded { cafe_id, .. }
            | Event::ReservationsFreed { cafe_id, .. }
            | Event::RemindersSent { cafe_id, .. } => *cafe_id,
            Event::TableAdded { table } => table.cafe_id,
            Event::ReservationBooked { reservation } => reservation.cafe_id,
        }
    }
}

// ── Parsing ──────────────────────────────────────────────────────

pub fn parse_date(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
}

pub fn parse_time(s: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(s.trim(), TIME_FORMAT)
}

/// Combine a `YYYY-MM-DD` date and an `HH:MM` time into a timestamp with
/// seconds forced to zero.
pub fn parse_booking_time(date: &str, time: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    Ok(parse_date(date)?.and_time(parse_time(time)?))
}
