//! # tickler-core
//!
//! Core logic for Tickler, a scheduled reminder mailer.
//!
//! This crate provides:
//! - The reminder queue (recipients, messages, delivery records) in `SQLite`
//! - The dispatch engine that delivers due reminders and records the outcome
//! - A fixed-cadence scheduler that never runs two scans at once
//! - An SMTP delivery transport built on `tickler-smtp`
//! - Configuration loading

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod dispatch;
mod error;
pub mod queue;
pub mod transport;

pub use config::{Config, SmtpSettings};
pub use dispatch::{DispatchEngine, Scan, ScanReport, Scheduler, SchedulerHandle, SchedulerStats};
pub use error::{Error, Result};
pub use queue::{
    CampaignSummary, DeliveryRecord, DeliveryState, DueDelivery, MessageContent, MessageId,
    MessageStore, NewCampaign, Recipient, RecipientDelivery, RecipientId, SqliteStore,
};
pub use transport::{DeliveryTransport, SmtpTransport, TransportError};
