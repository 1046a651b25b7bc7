//! The reminder dispatch engine.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::queue::{DueDelivery, MessageStore};
use crate::transport::DeliveryTransport;

/// Outcome counts of one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Deliveries handed to the transport.
    pub attempted: usize,
    /// Deliveries the transport accepted.
    pub sent: usize,
    /// Deliveries the transport refused or timed out.
    pub failed: usize,
    /// Outcomes that could not be written back (records stay pending).
    pub write_errors: usize,
}

impl std::fmt::Display for ScanReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} attempted, {} sent, {} failed, {} write errors",
            self.attempted, self.sent, self.failed, self.write_errors
        )
    }
}

/// Something the scheduler can run on each tick.
#[async_trait]
pub trait Scan: Send + Sync + 'static {
    /// Runs one scan to completion. Errors are handled inside.
    async fn scan(&self) -> ScanReport;
}

/// Finds due deliveries, hands each to the transport and records the outcome.
#[derive(Clone)]
pub struct DispatchEngine {
    store: Arc<dyn MessageStore>,
    transport: Arc<dyn DeliveryTransport>,
}

impl std::fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchEngine").finish_non_exhaustive()
    }
}

impl DispatchEngine {
    /// Creates an engine over a store and a transport.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, transport: Arc<dyn DeliveryTransport>) -> Self {
        Self { store, transport }
    }

    /// Scans at the current time.
    ///
    /// # Errors
    ///
    /// Returns an error only if the due records cannot be fetched.
    pub async fn run_scan(&self) -> Result<ScanReport> {
        self.run_scan_at(Utc::now()).await
    }

    /// Scans as if the current time were `now`.
    ///
    /// Each due record is attempted once; transport failures mark the record
    /// failed and the scan carries on. A failed state write is logged and
    /// leaves the record pending for the next scan.
    ///
    /// # Errors
    ///
    /// Returns an error only if the due records cannot be fetched.
    pub async fn run_scan_at(&self, now: DateTime<Utc>) -> Result<ScanReport> {
        let due = self.store.fetch_due(now).await?;
        let mut report = ScanReport::default();
        if due.is_empty() {
            debug!("No due deliveries at {now}");
            return Ok(report);
        }

        info!("Dispatching {} due deliveries", due.len());
        for delivery in &due {
            self.dispatch_one(delivery, &mut report).await;
        }
        info!("Scan finished: {report}");
        Ok(report)
    }

    async fn dispatch_one(&self, delivery: &DueDelivery, report: &mut ScanReport) {
        let recipient = &delivery.recipient;
        let message = &delivery.message;
        report.attempted += 1;

        let outcome = self
            .transport
            .send(&recipient.address, &message.subject, &message.body)
            .await;

        let written = match outcome {
            Ok(()) => {
                report.sent += 1;
                debug!("Sent message {} to {}", message.id, recipient.address);
                self.store.mark_sent(recipient.id, message.id).await
            }
            Err(e) => {
                report.failed += 1;
                warn!(
                    "Delivery of message {} to {} failed: {e}",
                    message.id, recipient.address
                );
                self.store
                    .mark_failed(recipient.id, message.id, &e.to_string())
                    .await
            }
        };

        match written {
            Ok(true) => {}
            Ok(false) => warn!(
                "Delivery record ({}, {}) was no longer pending",
                recipient.id, message.id
            ),
            Err(e) => {
                report.write_errors += 1;
                error!(
                    "Could not record outcome for ({}, {}): {e}",
                    recipient.id, message.id
                );
            }
        }
    }
}

#[async_trait]
impl Scan for DispatchEngine {
    async fn scan(&self) -> ScanReport {
        match self.run_scan().await {
            Ok(report) => report,
            Err(e) => {
                error!("Scan aborted, could not fetch due deliveries: {e}");
                ScanReport::default()
            }
        }
    }
}
