pub mod auth;
pub mod booking;
pub mod clock;
pub mod config;
pub mod engine;
pub mod flow;
pub mod form;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reminder;
pub mod repo;
pub mod schedule;
pub mod sql;
pub mod tls;
pub mod wal;
pub mod wire;
