use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::booking::BookingConfig;
use crate::schedule::{ScheduleError, SlotSchedule};

/// Server settings, read from `TABLEBOOK_*` environment variables.
/// Unset or unparseable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,

    pub reservation_interval: u32,
    pub slot_step: u32,
    pub opening_hour: u32,
    pub operating_hours: u32,
    pub notify_lead: u32,
    pub max_days_ahead: u32,
    pub max_party_size: u32,
    pub sweep_secs: u64,
    pub flow_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "tablebook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            reservation_interval: 90,
            slot_step: 15,
            opening_hour: 11,
            operating_hours: 15,
            notify_lead: 60,
            max_days_ahead: 7,
            max_party_size: 8,
            sweep_secs: 60,
            flow_ttl_secs: 30 * 60,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let parsed = |key: &str| lookup(&format!("TABLEBOOK_{key}"));
        fn or<T: FromStr>(value: Option<String>, default: T) -> T {
            value.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
        }

        Self {
            bind: parsed("BIND").unwrap_or(d.bind),
            port: or(parsed("PORT"), d.port),
            data_dir: parsed("DATA_DIR").map(PathBuf::from).unwrap_or(d.data_dir),
            password: parsed("PASSWORD").unwrap_or(d.password),
            max_connections: or(parsed("MAX_CONNECTIONS"), d.max_connections),
            compact_threshold: or(parsed("COMPACT_THRESHOLD"), d.compact_threshold),
            metrics_port: parsed("METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            tls_cert: parsed("TLS_CERT").map(PathBuf::from),
            tls_key: parsed("TLS_KEY").map(PathBuf::from),
            reservation_interval: or(parsed("RESERVATION_INTERVAL"), d.reservation_interval),
            slot_step: or(parsed("SLOT_STEP"), d.slot_step),
            opening_hour: or(parsed("OPENING_HOUR"), d.opening_hour),
            operating_hours: or(parsed("OPERATING_HOURS"), d.operating_hours),
            notify_lead: or(parsed("NOTIFY_LEAD"), d.notify_lead),
            max_days_ahead: or(parsed("MAX_DAYS_AHEAD"), d.max_days_ahead),
            max_party_size: or(parsed("MAX_PARTY_SIZE"), d.max_party_size),
            sweep_secs: or(parsed("SWEEP_SECS"), d.sweep_secs),
            flow_ttl_secs: or(parsed("FLOW_TTL_SECS"), d.flow_ttl_secs),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("tablebook.wal")
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_secs.max(1))
    }

    pub fn booking(&self) -> Result<BookingConfig, ScheduleError> {
        Ok(BookingConfig {
            schedule: SlotSchedule::new(
                self.opening_hour,
                self.operating_hours,
                self.slot_step,
                self.reservation_interval,
            )?,
            notify_lead_minutes: self.notify_lead,
            max_days_ahead: self.max_days_ahead,
            max_party_size: self.max_party_size,
            flow_ttl: Duration::from_secs(self.flow_ttl_secs),
        })
    }
}
