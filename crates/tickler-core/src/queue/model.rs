//! Reminder domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Unique identifier for a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecipientId(pub i64);

impl std::fmt::Display for RecipientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Unique identifier for a message (one campaign).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Someone reminders are addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Identifier.
    pub id: RecipientId,
    /// Display name.
    pub name: String,
    /// Delivery address (email).
    pub address: String,
}

/// Content of a reminder, shared by every recipient of a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    /// Identifier.
    pub id: MessageId,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub body: String,
    /// Not-before time for delivery.
    pub scheduled_at: DateTime<Utc>,
}

impl MessageContent {
    /// Returns true once `now` has reached the scheduled time.
    #[must_use]
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }
}

/// Delivery state of one (recipient, message) pair.
///
/// Only `Pending -> Sent` and `Pending -> Failed` exist; both targets are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Waiting for its scheduled time or for the next scan.
    Pending,
    /// Accepted by the relay.
    Sent,
    /// The delivery attempt failed; never retried automatically.
    Failed,
}

impl DeliveryState {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Parses the storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptRecord`] for unknown values.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(Error::CorruptRecord(format!(
                "unknown delivery state {other:?}"
            ))),
        }
    }

    /// Returns true for `Sent` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Per-recipient delivery state of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Recipient half of the key.
    pub recipient_id: RecipientId,
    /// Message half of the key.
    pub message_id: MessageId,
    /// Current state.
    pub state: DeliveryState,
    /// Transport error text for failed deliveries.
    pub failure_reason: Option<String>,
    /// Time of the last transition, if any.
    pub updated_at: Option<DateTime<Utc>>,
}

/// A due delivery with everything needed to attempt it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueDelivery {
    /// Who receives it.
    pub recipient: Recipient,
    /// What is sent.
    pub message: MessageContent,
    /// Its delivery record (always `Pending` when fetched).
    pub record: DeliveryRecord,
}

/// A recipient together with its record for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientDelivery {
    /// The recipient.
    pub recipient: Recipient,
    /// Its record.
    pub record: DeliveryRecord,
}

/// Aggregate view of one campaign for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSummary {
    /// The message.
    pub message: MessageContent,
    /// Records still pending.
    pub pending: u32,
    /// Records that failed.
    pub failed: u32,
    /// Records that were sent.
    pub sent: u32,
}

impl CampaignSummary {
    /// Total number of recipients.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.pending + self.failed + self.sent
    }
}

/// Input for composing a campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCampaign {
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub body: String,
    /// Not-before time.
    pub scheduled_at: DateTime<Utc>,
    /// Selected recipients.
    pub recipients: Vec<RecipientId>,
}

impl NewCampaign {
    /// Checks the campaign and returns it with trimmed subject and
    /// de-duplicated recipients.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the subject is blank or no recipient
    /// is selected.
    pub fn normalized(mut self) -> Result<Self> {
        self.subject = self.subject.trim().to_string();
        if self.subject.is_empty() {
            return Err(Error::Validation("subject cannot be empty".into()));
        }
        if self.subject.contains(['\r', '\n']) {
            return Err(Error::Validation(
                "subject must be a single line".into(),
            ));
        }
        self.recipients.sort_unstable();
        self.recipients.dedup();
        if self.recipients.is_empty() {
            return Err(Error::Validation(
                "a campaign needs at least one recipient".into(),
            ));
        }
        Ok(self)
    }
}
