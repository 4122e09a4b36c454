use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::{debug, error, info};
use ulid::Ulid;

use crate::clock::Clock;
use crate::engine::EngineError;
use crate::flow::ChoiceStore;
use crate::form::{FieldErrors, FormValidator, Pattern};
use crate::model::*;
use crate::reminder::Notifier;
use crate::repo::ReservationRepo;
use crate::schedule::{SlotSchedule, Slots};

pub const FIELD_NAME: &str = "name";
pub const FIELD_MOBILE: &str = "mobile";
pub const FIELD_EMAIL: &str = "email";

#[derive(Debug)]
pub enum BookingError {
    /// Form or request fields failed validation; nothing was written.
    Invalid(FieldErrors),
    /// Date or time could not be parsed.
    Parse(String),
    /// The table was claimed by this reservation first.
    Conflict(Ulid),
    /// Unknown, closed or timed-out booking flow.
    FlowExpired,
    /// The flow has no table picked yet.
    FlowIncomplete,
    Store(EngineError),
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::Invalid(errors) => write!(f, "invalid booking: {errors}"),
            BookingError::Parse(msg) => write!(f, "invalid date or time: {msg}"),
            BookingError::Conflict(id) => {
                write!(f, "table was just booked by reservation {id}, pick another table")
            }
            BookingError::FlowExpired => write!(f, "booking flow expired or unknown"),
            BookingError::FlowIncomplete => write!(f, "no table picked for this booking"),
            BookingError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for BookingError {}

impl From<EngineError> for BookingError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Conflict(id) => BookingError::Conflict(id),
            other => BookingError::Store(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub schedule: SlotSchedule,
    /// Minutes between the reminder and the booking.
    pub notify_lead_minutes: u32,
    pub max_days_ahead: u32,
    pub max_party_size: u32,
    pub flow_ttl: Duration,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            schedule: SlotSchedule::default(),
            notify_lead_minutes: 60,
            max_days_ahead: 7,
            max_party_size: 8,
            flow_ttl: Duration::from_secs(30 * 60),
        }
    }
}

/// Everything the reservation page offers for one cafe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationOptions {
    pub today: NaiveDate,
    pub last_day: NaiveDate,
    pub times: Vec<String>,
    pub party_sizes: Vec<u32>,
    pub locations: Vec<Location>,
    pub occasions: Vec<Occasion>,
}

/// A flow that has been started: its id, what was asked for, and what is free.
#[derive(Debug, Clone)]
pub struct BookingFlow {
    pub id: Ulid,
    pub choice: UserChoice,
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserBooking {
    pub reservation: Reservation,
    /// Time left until the booking, set only when it is later today.
    pub starts_in: Option<chrono::Duration>,
}

pub struct ReservationService<R> {
    repo: Arc<R>,
    clock: Arc<dyn Clock>,
    flows: ChoiceStore,
    config: BookingConfig,
}

impl<R: ReservationRepo> ReservationService<R> {
    pub fn new(repo: Arc<R>, clock: Arc<dyn Clock>, config: BookingConfig) -> Self {
        Self {
            repo,
            clock,
            flows: ChoiceStore::new(config.flow_ttl),
            config,
        }
    }

    pub fn repo(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn config(&self) -> &BookingConfig {
        &self.config
    }

    /// Bookable start times for the time selector.
    pub fn slots(&self) -> Slots {
        self.config.schedule.slots()
    }

    /// Booking timestamp and the window of times that clash with it.
    pub fn window(&self, date: &str, time: &str) -> Result<(NaiveDateTime, ConflictWindow), BookingError> {
        let at = parse_booking_time(date, time)
            .map_err(|e| BookingError::Parse(format!("{date} {time}: {e}")))?;
        Ok((at, ConflictWindow::around(at, self.config.schedule.reservation_minutes())))
    }

    fn notify_at(&self, at: NaiveDateTime) -> NaiveDateTime {
        at - chrono::Duration::minutes(i64::from(self.config.notify_lead_minutes))
    }

    pub async fn get_available_tables(
        &self,
        cafe_id: CafeId,
        party_size: u32,
        location_id: LocationId,
        date: &str,
        time: &str,
    ) -> Result<Vec<Table>, BookingError> {
        check_party_size(party_size, self.config.max_party_size)?;
        let (_, window) = self.window(date, time)?;
        Ok(self
            .repo
            .find_available_tables(cafe_id, party_size, location_id, &window)
            .await?)
    }

    /// Tables holding a reservation around the requested time; the front desk
    /// frees them from this list.
    pub async fn get_busy_tables(
        &self,
        cafe_id: CafeId,
        party_size: u32,
        location_id: LocationId,
        date: &str,
        time: &str,
    ) -> Result<Vec<Table>, BookingError> {
        let (_, window) = self.window(date, time)?;
        Ok(self
            .repo
            .find_busy_tables(cafe_id, party_size, location_id, &window)
            .await?)
    }

    /// Validate the customer form and claim the chosen table.
    pub async fn book_table(
        &self,
        mut form: FormValidator,
        choice: &UserChoice,
        user_id: Option<UserId>,
    ) -> Result<Reservation, BookingError> {
        form.required(&[FIELD_NAME, FIELD_MOBILE, FIELD_EMAIL])
            .matches_pattern(FIELD_EMAIL, Pattern::Email)
            .min_length(FIELD_MOBILE, 11)
            .max_length(FIELD_MOBILE, 12)
            .max_length(FIELD_NAME, 50)
            .max_length(FIELD_EMAIL, 100);
        if !form.valid() {
            debug!(cafe_id = choice.cafe_id, "booking form rejected");
            return Err(BookingError::Invalid(form.into_errors()));
        }
        check_party_size(choice.party_size, self.config.max_party_size)?;
        let table_id = choice.table_id.ok_or(BookingError::FlowIncomplete)?;
        let (at, window) = self.window(&choice.date, &choice.time)?;

        let reservation = Reservation {
            id: Ulid::new(),
            cafe_id: choice.cafe_id,
            table_id,
            occasion_id: choice.occasion_id.unwrap_or(DEFAULT_OCCASION),
            user_id,
            party_size: choice.party_size,
            customer: Some(Customer {
                name: form.get(FIELD_NAME).to_string(),
                mobile: form.get(FIELD_MOBILE).to_string(),
                email: form.get(FIELD_EMAIL).to_string(),
            }),
            description: choice
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            at,
            notify_at: Some(self.notify_at(at)),
            notified: false,
        };
        self.claim(reservation, &window, "customer").await
    }

    /// Front-desk booking for a walk-in: no form, default occasion, no reminder.
    pub async fn book_table_manually(
        &self,
        choice: &UserChoice,
        user_id: Option<UserId>,
    ) -> Result<Reservation, BookingError> {
        let table_id = choice.table_id.ok_or(BookingError::FlowIncomplete)?;
        let (at, window) = self.window(&choice.date, &choice.time)?;
        let reservation = Reservation {
            id: Ulid::new(),
            cafe_id: choice.cafe_id,
            table_id,
            occasion_id: DEFAULT_OCCASION,
            user_id,
            party_size: choice.party_size,
            customer: None,
            description: None,
            at,
            notify_at: None,
            notified: false,
        };
        self.claim(reservation, &window, "walk_in").await
    }

    async fn claim(
        &self,
        reservation: Reservation,
        window: &ConflictWindow,
        kind: &'static str,
    ) -> Result<Reservation, BookingError> {
        self.repo.insert_reservation(reservation.clone(), window).await?;
        metrics::counter!(crate::observability::BOOKINGS_TOTAL, "kind" => kind).increment(1);
        info!(
            id = %reservation.id,
            cafe_id = reservation.cafe_id,
            table_id = reservation.table_id,
            at = %reservation.at,
            kind,
            "table booked"
        );
        Ok(reservation)
    }

    /// Remove every reservation of the chosen table around the typed time.
    pub async fn free_table_manually(&self, choice: &UserChoice) -> Result<Vec<Ulid>, BookingError> {
        let table_id = choice.table_id.ok_or(BookingError::FlowIncomplete)?;
        let (_, window) = self.window(&choice.date, &choice.time)?;
        let removed = self
            .repo
            .delete_reservations_in_window(choice.cafe_id, table_id, &window)
            .await?;
        info!(
            cafe_id = choice.cafe_id,
            table_id,
            removed = removed.len(),
            "table freed"
        );
        Ok(removed)
    }

    // ── Multi-step flow ──────────────────────────────────────────

    pub async fn start_booking(
        &self,
        cafe_id: CafeId,
        party_size: u32,
        location_id: LocationId,
        date: &str,
        time: &str,
    ) -> Result<BookingFlow, BookingError> {
        let tables = self
            .get_available_tables(cafe_id, party_size, location_id, date, time)
            .await?;
        let choice = UserChoice {
            cafe_id,
            location_id,
            party_size,
            date: date.trim().to_string(),
            time: time.trim().to_string(),
            ..UserChoice::default()
        };
        let id = self
            .flows
            .open(choice.clone(), self.flow_now())
            .ok_or(BookingError::Store(EngineError::LimitExceeded("too many open booking flows")))?;
        Ok(BookingFlow { id, choice, tables })
    }

    /// Record the table for a flow. The table must be at the flow's location
    /// and seat its party; availability is checked again on submit.
    pub async fn pick_table(
        &self,
        flow_id: &Ulid,
        table_id: TableId,
        occasion_id: OccasionId,
        description: Option<String>,
    ) -> Result<UserChoice, BookingError> {
        let choice = self
            .flows
            .get(flow_id, self.flow_now())
            .ok_or(BookingError::FlowExpired)?;
        let table = self.repo.table(choice.cafe_id, table_id).await?;
        let problem = match table {
            None => Some("Table does not exist"),
            Some(t) if t.location_id != choice.location_id => Some("Table is not at the chosen location"),
            Some(t) if t.capacity < choice.party_size => Some("Table is too small for the party"),
            Some(_) => None,
        };
        if let Some(message) = problem {
            let mut errors = FieldErrors::default();
            errors.add("table_id", message.to_string());
            return Err(BookingError::Invalid(errors));
        }

        self.flows
            .update(flow_id, self.flow_now(), |c| {
                c.table_id = Some(table_id);
                c.occasion_id = Some(occasion_id);
                c.description = description;
            })
            .ok_or(BookingError::FlowExpired)
    }

    /// Book the flow's choice. The flow is closed on success, kept on a form
    /// error, and has its table cleared when someone else got the table first.
    pub async fn submit(
        &self,
        flow_id: &Ulid,
        form: FormValidator,
        user_id: Option<UserId>,
    ) -> Result<Reservation, BookingError> {
        let choice = self
            .flows
            .get(flow_id, self.flow_now())
            .ok_or(BookingError::FlowExpired)?;
        match self.book_table(form, &choice, user_id).await {
            Ok(reservation) => {
                self.flows.close(flow_id);
                Ok(reservation)
            }
            Err(BookingError::Conflict(id)) => {
                self.flows.update(flow_id, self.flow_now(), |c| c.table_id = None);
                Err(BookingError::Conflict(id))
            }
            Err(e) => Err(e),
        }
    }

    pub fn flow(&self, flow_id: &Ulid) -> Option<UserChoice> {
        self.flows.get(flow_id, self.flow_now())
    }

    pub fn purge_expired_flows(&self) -> usize {
        self.flows.purge_expired(self.flow_now())
    }

    /// Flow deadlines follow the service clock.
    fn flow_now(&self) -> Ms {
        self.clock.now().and_utc().timestamp_millis()
    }

    // ── Read models ──────────────────────────────────────────────

    pub async fn user_bookings(&self, user_id: UserId) -> Result<Vec<UserBooking>, BookingError> {
        let now = self.clock.now();
        Ok(self
            .repo
            .user_reservations(user_id)
            .await?
            .into_iter()
            .map(|reservation| {
                let starts_in = (reservation.at.date() == now.date() && reservation.at > now)
                    .then(|| reservation.at - now);
                UserBooking {
                    reservation,
                    starts_in,
                }
            })
            .collect())
    }

    pub async fn reservation_options(&self, cafe_id: CafeId) -> Result<ReservationOptions, BookingError> {
        let today = self.clock.now().date();
        Ok(ReservationOptions {
            today,
            last_day: today + chrono::Days::new(u64::from(self.config.max_days_ahead)),
            times: self.slots().collect(),
            party_sizes: (1..=self.config.max_party_size).collect(),
            locations: self.repo.locations(cafe_id).await?,
            occasions: self.repo.occasions(cafe_id).await?,
        })
    }

    // ── Reminders ────────────────────────────────────────────────

    /// Mark every due reservation as reminded, then hand them to `notifier`.
    ///
    /// Marking comes first: a reminder may be lost if the notifier fails, but
    /// it is never sent twice. Returns how many reservations were marked.
    pub async fn send_due_reminders(&self, notifier: &dyn Notifier) -> Result<usize, BookingError> {
        let now = self.clock.now_minute();
        let due = self.repo.due_reminders(now).await?;
        if due.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Ulid> = due.iter().map(|r| r.id).collect();
        let marked = self.repo.mark_reminders_sent(&ids).await?;
        let batch: Vec<Reservation> = due
            .into_iter()
            .filter(|r| marked.contains(&r.id))
            .collect();
        if batch.is_empty() {
            return Ok(0);
        }

        metrics::counter!(crate::observability::REMINDERS_SENT_TOTAL).increment(batch.len() as u64);
        if let Err(e) = notifier.send_booking_reminders(&batch).await {
            error!(count = batch.len(), "reminder delivery failed: {e}");
        }
        Ok(batch.len())
    }
}

fn check_party_size(party_size: u32, max: u32) -> Result<(), BookingError> {
    if party_size == 0 || party_size > max {
        let mut errors = FieldErrors::default();
        errors.add("party_size", format!("Party size must be between 1 and {max}"));
        return Err(BookingError::Invalid(errors));
    }
    Ok(())
}
