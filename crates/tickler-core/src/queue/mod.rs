//! The reminder queue: recipients, messages and per-recipient delivery
//! records, plus the narrow interface the dispatch engine needs from storage.

mod model;
mod repository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;

pub use model::{
    CampaignSummary, DeliveryRecord, DeliveryState, DueDelivery, MessageContent, MessageId,
    NewCampaign, Recipient, RecipientDelivery, RecipientId,
};
pub use repository::SqliteStore;

/// Storage operations used by the dispatch engine.
///
/// State writes are conditional on the record still being pending, so each
/// returns whether a transition happened. Calling them again on a terminal
/// record is a no-op that returns `Ok(false)`.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Pending records whose message is scheduled at or before `now`.
    async fn fetch_due(&self, now: DateTime<Utc>) -> Result<Vec<DueDelivery>>;

    /// Moves one pending record to `Sent`.
    async fn mark_sent(&self, recipient_id: RecipientId, message_id: MessageId) -> Result<bool>;

    /// Moves one pending record to `Failed`, keeping `reason`.
    async fn mark_failed(
        &self,
        recipient_id: RecipientId,
        message_id: MessageId,
        reason: &str,
    ) -> Result<bool>;
}
