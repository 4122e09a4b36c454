use ulid::Ulid;

use crate::model::{CafeId, OccasionId, TableId};

#[derive(Debug)]
pub enum EngineError {
    CafeNotFound(CafeId),
    TableNotFound { cafe_id: CafeId, table_id: TableId },
    LocationNotFound { cafe_id: CafeId, location_id: i64 },
    OccasionNotFound { cafe_id: CafeId, occasion_id: OccasionId },
    EmptyParty,
    PartyDoesNotFit { table_id: TableId, capacity: u32, party_size: u32 },
    AlreadyExists(&'static str, i64),
    /// The table already holds this reservation inside the requested window.
    Conflict(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::CafeNotFound(id) => write!(f, "cafe not found: {id}"),
            EngineError::TableNotFound { cafe_id, table_id } => {
                write!(f, "table {table_id} not found in cafe {cafe_id}")
            }
            EngineError::LocationNotFound { cafe_id, location_id } => {
                write!(f, "location {location_id} not found in cafe {cafe_id}")
            }
            EngineError::OccasionNotFound { cafe_id, occasion_id } => {
                write!(f, "occasion {occasion_id} not found in cafe {cafe_id}")
            }
            EngineError::EmptyParty => write!(f, "party size must be at least 1"),
            EngineError::PartyDoesNotFit {
                table_id,
                capacity,
                party_size,
            } => write!(f, "party of {party_size} does not fit table {table_id} ({capacity} seats)"),
            EngineError::AlreadyExists(kind, id) => write!(f, "{kind} already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "table already booked by reservation {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
