use async_trait::async_trait;
use chrono::NaiveDateTime;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{CafeId, Reservation, TableId};
use crate::reminder::{NotifyError, Notifier};

const CHANNEL_CAPACITY: usize = 256;

/// What a reminder subscriber gets: enough to address and word the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderNotice {
    pub reservation_id: Ulid,
    pub cafe_id: CafeId,
    pub table_id: TableId,
    pub name: String,
    pub mobile: String,
    pub email: String,
    pub at: NaiveDateTime,
}

impl ReminderNotice {
    /// `None` for reservations without contact details.
    pub fn for_reservation(r: &Reservation) -> Option<Self> {
        let customer = r.customer.as_ref()?;
        Some(Self {
            reservation_id: r.id,
            cafe_id: r.cafe_id,
            table_id: r.table_id,
            name: customer.name.clone(),
            mobile: customer.mobile.clone(),
            email: customer.email.clone(),
            at: r.at,
        })
    }
}

/// Broadcast hub for reminder notices: one feed for everything plus one per
/// cafe for cafe-side listeners.
pub struct ReminderHub {
    all: broadcast::Sender<ReminderNotice>,
    cafes: DashMap<CafeId, broadcast::Sender<ReminderNotice>>,
}

impl Default for ReminderHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ReminderHub {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(CHANNEL_CAPACITY).0,
            cafes: DashMap::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReminderNotice> {
        self.all.subscribe()
    }

    /// Subscribe to one cafe's reminders. Creates the channel if needed.
    pub fn subscribe_cafe(&self, cafe_id: CafeId) -> broadcast::Receiver<ReminderNotice> {
        self.cafes
            .entry(cafe_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Send one notice. Returns whether anyone received it.
    pub fn send(&self, notice: ReminderNotice) -> bool {
        let mut delivered = false;
        if let Some(sender) = self.cafes.get(&notice.cafe_id) {
            delivered |= sender.send(notice.clone()).is_ok();
        }
        delivered |= self.all.send(notice).is_ok();
        delivered
    }
}

#[async_trait]
impl Notifier for ReminderHub {
    async fn send_booking_reminders(&self, reservations: &[Reservation]) -> Result<(), NotifyError> {
        let undelivered = reservations
            .iter()
            .filter_map(ReminderNotice::for_reservation)
            .filter(|notice| !self.send(notice.clone()))
            .count();
        if undelivered > 0 {
            return Err(NotifyError::NoSubscribers(undelivered));
        }
        Ok(())
    }
}

/// Drains the hub and logs each reminder as JSON. Stands in for a mailer.
pub async fn run_logging_mailer(mut rx: broadcast::Receiver<ReminderNotice>) {
    loop {
        match rx.recv().await {
            Ok(notice) => match serde_json::to_string(&notice) {
                Ok(json) => tracing::info!(target: "tablebook::mailer", "reminder {json}"),
                Err(e) => tracing::error!("reminder encoding failed: {e}"),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("mailer lagged, {n} reminders skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
