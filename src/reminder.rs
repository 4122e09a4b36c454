use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::booking::ReservationService;
use crate::engine::Engine;
use crate::model::Reservation;
use crate::repo::ReservationRepo;

#[derive(Debug, PartialEq, Eq)]
pub enum NotifyError {
    /// Nobody was listening; this many reminders went nowhere.
    NoSubscribers(usize),
    Delivery(String),
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::NoSubscribers(n) => write!(f, "no reminder subscribers, {n} reminders dropped"),
            NotifyError::Delivery(e) => write!(f, "reminder delivery failed: {e}"),
        }
    }
}

impl std::error::Error for NotifyError {}

/// Delivers booking reminders. Called once per sweep with every reservation
/// that just became due; never called twice for the same reservation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_booking_reminders(&self, reservations: &[Reservation]) -> Result<(), NotifyError>;
}

/// Background task that hands due reminders to `notifier` every `every`.
pub async fn run_reminder_sweep<R: ReservationRepo>(
    service: Arc<ReservationService<R>>,
    notifier: Arc<dyn Notifier>,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match service.send_due_reminders(notifier.as_ref()).await {
            Ok(0) => {}
            Ok(n) => info!("sent {n} booking reminders"),
            Err(e) => error!("reminder sweep failed: {e}"),
        }
    }
}

/// Background task that drops booking flows nobody finished.
pub async fn run_flow_reaper<R: ReservationRepo>(service: Arc<ReservationService<R>>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let purged = service.purge_expired_flows();
        if purged > 0 {
            debug!("reaped {purged} expired booking flows");
        }
    }
}

/// Background task that compacts the journal once `threshold` appends piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "journal compacted"),
            Err(e) => error!("journal compaction failed: {e}"),
        }
    }
}
