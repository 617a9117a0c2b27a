//! Ticket notification, decoupled from the booking decision.
//!
//! The engine only enqueues a booking id after its transaction commits. A
//! background worker reloads the booking and hands it to the `Notifier` under
//! a timeout, retrying a bounded number of times. Failures end in the log and
//! never reach the caller that made the booking.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use boxoffice_models::{BookingStatus, BookingView};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Produces and delivers the ticket for a confirmed booking.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, ticket: &BookingView) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: Duration,
    pub queue_size: usize,
}

/// Longest pause between two delivery attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

impl DeliveryPolicy {
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Linear backoff after the given (1-based) failed attempt, capped at `MAX_BACKOFF`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        self.backoff
            .checked_mul(attempt)
            .map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF))
    }
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retries: 2,
            backoff: Duration::from_millis(500),
            queue_size: 256,
        }
    }
}

#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<i64>,
}

impl NotificationQueue {
    /// Starts the delivery worker. The worker exits once every queue handle
    /// has been dropped and the backlog is drained.
    pub fn spawn(pool: SqlitePool, notifier: Arc<dyn Notifier>, policy: DeliveryPolicy) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(policy.queue_size.max(1));
        let handle = tokio::spawn(run_worker(rx, pool, notifier, policy));
        (Self { tx }, handle)
    }

    /// Queues a booking for ticket delivery without waiting.
    pub fn enqueue(&self, booking_id: i64) {
        match self.tx.try_send(booking_id) {
            Ok(()) => debug!(booking_id, "Ticket queued"),
            Err(TrySendError::Full(_)) => {
                warn!(booking_id, "Notification queue full, ticket not sent")
            }
            Err(TrySendError::Closed(_)) => {
                warn!(booking_id, "Notification worker stopped, ticket not sent")
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<i64>,
    pool: SqlitePool,
    notifier: Arc<dyn Notifier>,
    policy: DeliveryPolicy,
) {
    while let Some(booking_id) = rx.recv().await {
        deliver(&pool, notifier.as_ref(), &policy, booking_id).await;
    }
    info!("Notification worker stopped");
}

async fn deliver(pool: &SqlitePool, notifier: &dyn Notifier, policy: &DeliveryPolicy, booking_id: i64) {
    let ticket = match boxoffice_db::get_booking_view(pool, booking_id).await {
        Ok(Some(ticket)) => ticket,
        Ok(None) => {
            warn!(booking_id, "Booking vanished before its ticket was sent");
            return;
        }
        Err(e) => {
            error!(booking_id, error = %e, "Could not load booking for ticket delivery");
            return;
        }
    };
    if ticket.status != BookingStatus::Confirmed {
        debug!(booking_id, status = %ticket.status, "Skipping ticket for unconfirmed booking");
        return;
    }

    let attempts = policy.attempts();
    for attempt in 1..=attempts {
        match tokio::time::timeout(policy.timeout, notifier.notify(&ticket)).await {
            Ok(Ok(())) => {
                info!(booking_id, attempt, "Ticket delivered");
                return;
            }
            Ok(Err(e)) => warn!(booking_id, attempt, error = %e, "Ticket delivery failed"),
            Err(_) => warn!(booking_id, attempt, "Ticket delivery timed out"),
        }
        if attempt < attempts {
            tokio::time::sleep(policy.backoff_after(attempt)).await;
        }
    }
    error!(booking_id, attempts, "Giving up on ticket delivery");
}
