//! `SQLite`-backed reminder queue.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::debug;

use super::MessageStore;
use super::model::{
    CampaignSummary, DeliveryRecord, DeliveryState, DueDelivery, MessageContent, MessageId,
    NewCampaign, Recipient, RecipientDelivery, RecipientId,
};
use crate::{Error, Result};

/// Repository for recipients, messages and their delivery records.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS recipients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                address TEXT NOT NULL UNIQUE
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject TEXT NOT NULL,
                body TEXT NOT NULL,
                scheduled_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS deliveries (
                recipient_id INTEGER NOT NULL REFERENCES recipients(id),
                message_id INTEGER NOT NULL REFERENCES messages(id),
                state TEXT NOT NULL DEFAULT 'pending',
                failure_reason TEXT,
                updated_at TEXT,
                PRIMARY KEY (recipient_id, message_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Due scan walks pending rows by schedule
        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_deliveries_state ON deliveries(state)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_messages_scheduled ON messages(scheduled_at)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Register a recipient.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a blank name, an invalid address or
    /// an address that is already registered.
    pub async fn add_recipient(&self, name: &str, address: &str) -> Result<RecipientId> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("recipient name cannot be empty".into()));
        }
        let address = tickler_smtp::Address::new(address)
            .map_err(|e| Error::Validation(e.to_string()))?;

        let result = sqlx::query(
            r"
            INSERT INTO recipients (name, address)
            VALUES (?, ?)
            ",
        )
        .bind(name)
        .bind(address.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(RecipientId(done.last_insert_rowid())),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(Error::Validation(
                format!("{address} is already a recipient"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// List all recipients ordered by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list_recipients(&self) -> Result<Vec<Recipient>> {
        let rows = sqlx::query(
            r"
            SELECT id, name, address
            FROM recipients
            ORDER BY name COLLATE NOCASE ASC, id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| Recipient {
                id: RecipientId(row.get("id")),
                name: row.get("name"),
                address: row.get("address"),
            })
            .collect())
    }

    /// Remove a recipient that has never been part of a campaign.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id and [`Error::Validation`]
    /// if delivery records reference the recipient.
    pub async fn remove_recipient(&self, id: RecipientId) -> Result<()> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) as count
            FROM deliveries
            WHERE recipient_id = ?
            ",
        )
        .bind(id.0)
        .fetch_one(&self.pool)
        .await?;
        let history: i64 = row.get("count");
        if history > 0 {
            return Err(Error::Validation(format!(
                "recipient {id} has delivery history and cannot be removed"
            )));
        }

        let done = sqlx::query("DELETE FROM recipients WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("recipient {id}")));
        }
        Ok(())
    }

    /// Insert a message and one pending record per recipient, atomically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an invalid campaign,
    /// [`Error::NotFound`] if a recipient does not exist, or a database error.
    /// Nothing is written on error.
    pub async fn create_campaign(&self, campaign: NewCampaign) -> Result<MessageId> {
        let campaign = campaign.normalized()?;
        let mut tx = self.pool.begin().await?;

        let done = sqlx::query(
            r"
            INSERT INTO messages (subject, body, scheduled_at)
            VALUES (?, ?, ?)
            ",
        )
        .bind(&campaign.subject)
        .bind(&campaign.body)
        .bind(to_db_time(campaign.scheduled_at))
        .execute(&mut *tx)
        .await?;
        let message_id = MessageId(done.last_insert_rowid());

        for recipient in &campaign.recipients {
            let exists = sqlx::query("SELECT 1 FROM recipients WHERE id = ?")
                .bind(recipient.0)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            if !exists {
                return Err(Error::NotFound(format!("recipient {recipient}")));
            }

            sqlx::query(
                r"
                INSERT INTO deliveries (recipient_id, message_id, state)
                VALUES (?, ?, 'pending')
                ",
            )
            .bind(recipient.0)
            .bind(message_id.0)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            "Created campaign {message_id} for {} recipients",
            campaign.recipients.len()
        );
        Ok(message_id)
    }

    /// Per-campaign delivery counts, newest schedule first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or a row is corrupt.
    pub async fn campaign_summaries(&self) -> Result<Vec<CampaignSummary>> {
        let rows = sqlx::query(
            r"
            SELECT m.id, m.subject, m.body, m.scheduled_at,
                   SUM(CASE WHEN d.state = 'pending' THEN 1 ELSE 0 END) AS pending,
                   SUM(CASE WHEN d.state = 'failed' THEN 1 ELSE 0 END) AS failed,
                   SUM(CASE WHEN d.state = 'sent' THEN 1 ELSE 0 END) AS sent
            FROM messages m
            LEFT JOIN deliveries d ON d.message_id = m.id
            GROUP BY m.id
            ORDER BY m.scheduled_at DESC, m.id DESC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(CampaignSummary {
                    message: message_from_row(row, "id")?,
                    pending: count(row, "pending"),
                    failed: count(row, "failed"),
                    sent: count(row, "sent"),
                })
            })
            .collect()
    }

    /// Look up one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or the row is corrupt.
    pub async fn message(&self, id: MessageId) -> Result<Option<MessageContent>> {
        let row = sqlx::query(
            r"
            SELECT id, subject, body, scheduled_at
            FROM messages
            WHERE id = ?
            ",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(|row| message_from_row(row, "id")).transpose()
    }

    /// Per-recipient delivery state of one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or a row is corrupt.
    pub async fn deliveries(&self, message_id: MessageId) -> Result<Vec<RecipientDelivery>> {
        let rows = sqlx::query(
            r"
            SELECT r.id AS recipient_id, r.name, r.address,
                   d.message_id, d.state, d.failure_reason, d.updated_at
            FROM deliveries d
            JOIN recipients r ON r.id = d.recipient_id
            WHERE d.message_id = ?
            ORDER BY r.name COLLATE NOCASE ASC, r.id ASC
            ",
        )
        .bind(message_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(RecipientDelivery {
                    recipient: recipient_from_row(row),
                    record: record_from_row(row)?,
                })
            })
            .collect()
    }

    /// Look up one delivery record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or the row is corrupt.
    pub async fn delivery(
        &self,
        recipient_id: RecipientId,
        message_id: MessageId,
    ) -> Result<Option<DeliveryRecord>> {
        let row = sqlx::query(
            r"
            SELECT recipient_id, message_id, state, failure_reason, updated_at
            FROM deliveries
            WHERE recipient_id = ? AND message_id = ?
            ",
        )
        .bind(recipient_id.0)
        .bind(message_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn transition(
        &self,
        recipient_id: RecipientId,
        message_id: MessageId,
        state: DeliveryState,
        reason: Option<&str>,
    ) -> Result<bool> {
        let done = sqlx::query(
            r"
            UPDATE deliveries
            SET state = ?, failure_reason = ?, updated_at = ?
            WHERE recipient_id = ? AND message_id = ? AND state = 'pending'
            ",
        )
        .bind(state.as_str())
        .bind(reason)
        .bind(to_db_time(Utc::now()))
        .bind(recipient_id.0)
        .bind(message_id.0)
        .execute(&self.pool)
        .await?;

        Ok(done.rows_affected() > 0)
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn fetch_due(&self, now: DateTime<Utc>) -> Result<Vec<DueDelivery>> {
        let rows = sqlx::query(
            r"
            SELECT r.id AS recipient_id, r.name, r.address,
                   m.id AS message_id, m.subject, m.body, m.scheduled_at,
                   d.state, d.failure_reason, d.updated_at
            FROM deliveries d
            JOIN messages m ON m.id = d.message_id
            JOIN recipients r ON r.id = d.recipient_id
            WHERE d.state = 'pending' AND m.scheduled_at <= ?
            ORDER BY m.scheduled_at ASC, m.id ASC, r.id ASC
            ",
        )
        .bind(to_db_time(now))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DueDelivery {
                    recipient: recipient_from_row(row),
                    message: message_from_row(row, "message_id")?,
                    record: record_from_row(row)?,
                })
            })
            .collect()
    }

    async fn mark_sent(&self, recipient_id: RecipientId, message_id: MessageId) -> Result<bool> {
        self.transition(recipient_id, message_id, DeliveryState::Sent, None)
            .await
    }

    async fn mark_failed(
        &self,
        recipient_id: RecipientId,
        message_id: MessageId,
        reason: &str,
    ) -> Result<bool> {
        self.transition(recipient_id, message_id, DeliveryState::Failed, Some(reason))
            .await
    }
}

/// Fixed-width UTC timestamps so that text comparison in SQL matches time order.
fn to_db_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_db_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::CorruptRecord(format!("bad timestamp {value:?}: {e}")))
}

fn count(row: &SqliteRow, column: &str) -> u32 {
    let value: Option<i64> = row.get(column);
    u32::try_from(value.unwrap_or(0)).unwrap_or(u32::MAX)
}

fn recipient_from_row(row: &SqliteRow) -> Recipient {
    Recipient {
        id: RecipientId(row.get("recipient_id")),
        name: row.get("name"),
        address: row.get("address"),
    }
}

fn message_from_row(row: &SqliteRow, id_column: &str) -> Result<MessageContent> {
    let scheduled_at: String = row.get("scheduled_at");
    Ok(MessageContent {
        id: MessageId(row.get(id_column)),
        subject: row.get("subject"),
        body: row.get("body"),
        scheduled_at: parse_db_time(&scheduled_at)?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<DeliveryRecord> {
    let state: String = row.get("state");
    let updated_at: Option<String> = row.get("updated_at");
    Ok(DeliveryRecord {
        recipient_id: RecipientId(row.get("recipient_id")),
        message_id: MessageId(row.get("message_id")),
        state: DeliveryState::parse(&state)?,
        failure_reason: row.get("failure_reason"),
        updated_at: updated_at.as_deref().map(parse_db_time).transpose()?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    async fn store_with(names: &[&str]) -> (SqliteStore, Vec<RecipientId>) {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut ids = Vec::new();
        for name in names {
            let address = format!("{}@example.com", name.to_lowercase());
            ids.push(store.add_recipient(name, &address).await.unwrap());
        }
        (store, ids)
    }

    fn campaign(subject: &str, scheduled_at: DateTime<Utc>, recipients: &[RecipientId]) -> NewCampaign {
        NewCampaign {
            subject: subject.into(),
            body: "Please pay your invoice.".into(),
            scheduled_at,
            recipients: recipients.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_add_and_list_recipients() {
        let (store, ids) = store_with(&["Bruno", "ana"]).await;
        assert_eq!(ids.len(), 2);

        let listed = store.list_recipients().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "ana");
        assert_eq!(listed[1].address, "bruno@example.com");
    }

    #[tokio::test]
    async fn test_duplicate_or_invalid_address_rejected() {
        let (store, _) = store_with(&["Ana"]).await;
        let dup = store.add_recipient("Other", "ana@example.com").await;
        assert!(matches!(dup, Err(Error::Validation(_))));

        let bad = store.add_recipient("Nobody", "not-an-address").await;
        assert!(matches!(bad, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_campaign_inserts_pending_records() {
        let (store, ids) = store_with(&["Ana", "Bruno", "Carla"]).await;
        let id = store
            .create_campaign(campaign("Invoice Due", at(9, 0, 0), &ids))
            .await
            .unwrap();

        let deliveries = store.deliveries(id).await.unwrap();
        assert_eq!(deliveries.len(), 3);
        assert!(
            deliveries
                .iter()
                .all(|d| d.record.state == DeliveryState::Pending && d.record.updated_at.is_none())
        );

        let message = store.message(id).await.unwrap().unwrap();
        assert_eq!(message.subject, "Invoice Due");
        assert_eq!(message.scheduled_at, at(9, 0, 0));
    }

    #[tokio::test]
    async fn test_create_campaign_with_unknown_recipient_writes_nothing() {
        let (store, ids) = store_with(&["Ana"]).await;
        let result = store
            .create_campaign(campaign("Invoice Due", at(9, 0, 0), &[ids[0], RecipientId(99)]))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(store.campaign_summaries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_due_uses_inclusive_schedule() {
        let (store, ids) = store_with(&["Ana"]).await;
        store
            .create_campaign(campaign("Now", at(9, 0, 0), &ids))
            .await
            .unwrap();
        store
            .create_campaign(campaign("Later", at(10, 0, 0), &ids))
            .await
            .unwrap();

        assert!(store.fetch_due(at(8, 59, 59)).await.unwrap().is_empty());

        let due = store.fetch_due(at(9, 0, 0)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].message.subject, "Now");
        assert_eq!(due[0].recipient.address, "ana@example.com");
        assert_eq!(due[0].record.state, DeliveryState::Pending);

        assert_eq!(store.fetch_due(at(10, 0, 0)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_terminal_records_are_not_fetched_again() {
        let (store, ids) = store_with(&["Ana", "Bruno"]).await;
        let id = store
            .create_campaign(campaign("Invoice Due", at(9, 0, 0), &ids))
            .await
            .unwrap();

        assert!(store.mark_sent(ids[0], id).await.unwrap());
        assert!(store.mark_failed(ids[1], id, "550 no such user").await.unwrap());

        assert!(store.fetch_due(at(12, 0, 0)).await.unwrap().is_empty());

        let failed = store.delivery(ids[1], id).await.unwrap().unwrap();
        assert_eq!(failed.state, DeliveryState::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("550 no such user"));
        assert!(failed.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_marks_are_idempotent_and_terminal() {
        let (store, ids) = store_with(&["Ana"]).await;
        let id = store
            .create_campaign(campaign("Invoice Due", at(9, 0, 0), &ids))
            .await
            .unwrap();

        assert!(store.mark_sent(ids[0], id).await.unwrap());
        assert!(!store.mark_sent(ids[0], id).await.unwrap());
        assert!(!store.mark_failed(ids[0], id, "late failure").await.unwrap());

        let record = store.delivery(ids[0], id).await.unwrap().unwrap();
        assert_eq!(record.state, DeliveryState::Sent);
        assert_eq!(record.failure_reason, None);
    }

    #[tokio::test]
    async fn test_second_failure_keeps_first_reason() {
        let (store, ids) = store_with(&["Ana"]).await;
        let id = store
            .create_campaign(campaign("Invoice Due", at(9, 0, 0), &ids))
            .await
            .unwrap();

        assert!(store.mark_failed(ids[0], id, "550 no such user").await.unwrap());
        let first = store.delivery(ids[0], id).await.unwrap().unwrap();

        assert!(!store.mark_failed(ids[0], id, "Timed out after 30s").await.unwrap());
        assert!(!store.mark_sent(ids[0], id).await.unwrap());

        let record = store.delivery(ids[0], id).await.unwrap().unwrap();
        assert_eq!(record.state, DeliveryState::Failed);
        assert_eq!(record.failure_reason.as_deref(), Some("550 no such user"));
        assert_eq!(record.updated_at, first.updated_at);
    }

    #[tokio::test]
    async fn test_mark_unknown_record_is_not_a_transition() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(!store.mark_sent(RecipientId(1), MessageId(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_campaign_summaries_newest_first_with_counts() {
        let (store, ids) = store_with(&["Ana", "Bruno", "Carla"]).await;
        let early = store
            .create_campaign(campaign("Early", at(9, 0, 0), &ids))
            .await
            .unwrap();
        store
            .create_campaign(campaign("Late", at(11, 0, 0), &ids[..1]))
            .await
            .unwrap();

        store.mark_sent(ids[0], early).await.unwrap();
        store.mark_sent(ids[1], early).await.unwrap();
        store.mark_failed(ids[2], early, "timeout").await.unwrap();

        let summaries = store.campaign_summaries().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].message.subject, "Late");
        assert_eq!(summaries[0].pending, 1);
        assert_eq!(summaries[1].message.subject, "Early");
        assert_eq!((summaries[1].pending, summaries[1].failed, summaries[1].sent), (0, 1, 2));
        assert_eq!(summaries[1].total(), 3);
    }

    #[tokio::test]
    async fn test_remove_recipient_only_without_history() {
        let (store, ids) = store_with(&["Ana", "Bruno"]).await;
        store
            .create_campaign(campaign("Invoice Due", at(9, 0, 0), &ids[..1]))
            .await
            .unwrap();

        let blocked = store.remove_recipient(ids[0]).await;
        assert!(matches!(blocked, Err(Error::Validation(_))));

        store.remove_recipient(ids[1]).await.unwrap();
        assert_eq!(store.list_recipients().await.unwrap().len(), 1);

        let missing = store.remove_recipient(ids[1]).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_db_time_is_fixed_width() {
        let whole = to_db_time(at(9, 0, 0));
        let fractional = to_db_time(at(9, 0, 0) + chrono::Duration::milliseconds(5));
        assert_eq!(whole, "2024-01-01T09:00:00.000000Z");
        assert_eq!(whole.len(), fractional.len());
        assert!(whole < fractional);
        assert_eq!(parse_db_time(&fractional).unwrap(), at(9, 0, 0) + chrono::Duration::milliseconds(5));
    }
}
