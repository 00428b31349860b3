//! Pending-confirmation queue.
//!
//! A paid booking whose settlement could not be completed after exhausting
//! retries is parked here instead of being dropped. Entries are replayed by
//! [`BookingService::retry_pending_confirmations`](super::BookingService::retry_pending_confirmations)
//! and stay in the queue, resolved or not, as an audit trail.

use crate::metrics;
use chrono::{DateTime, Utc};
use ferry_core::environment::Clock;
use ferry_core::types::BookingId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Status of a parked confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingStatus {
    /// Waiting for replay
    Pending,
    /// Being replayed
    Processing,
    /// Replayed successfully
    Resolved,
    /// Given up on (the booking can no longer be confirmed)
    Discarded,
}

impl PendingStatus {
    /// Lower-case name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }
}

/// A confirmation that could not be completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingConfirmation {
    /// Entry identifier
    pub id: u64,
    /// The paid booking
    pub booking_id: BookingId,
    /// Last failure message
    pub error_message: String,
    /// Attempts made so far, replays included
    pub retry_count: u32,
    /// When the confirmation first failed
    pub first_failed_at: DateTime<Utc>,
    /// When the confirmation most recently failed
    pub last_failed_at: DateTime<Utc>,
    /// Current status
    pub status: PendingStatus,
    /// When the entry was resolved or discarded
    pub resolved_at: Option<DateTime<Utc>>,
    /// How it was resolved
    pub resolution_notes: Option<String>,
}

/// In-memory queue of confirmations awaiting replay
pub struct PendingConfirmationQueue {
    entries: Mutex<Vec<PendingConfirmation>>,
    clock: Arc<dyn Clock>,
}

impl PendingConfirmationQueue {
    /// Creates an empty queue
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            clock,
        }
    }

    /// Parks a booking; a booking already waiting has its failure updated instead
    ///
    /// Returns the entry id.
    pub async fn add_entry(&self, booking_id: BookingId, error_message: &str, retry_count: u32) -> u64 {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;

        let open = entries.iter_mut().find(|entry| {
            entry.booking_id == booking_id
                && matches!(entry.status, PendingStatus::Pending | PendingStatus::Processing)
        });
        let id = if let Some(entry) = open {
            entry.error_message = error_message.to_string();
            entry.retry_count += retry_count;
            entry.last_failed_at = now;
            entry.status = PendingStatus::Pending;
            entry.id
        } else {
            let id = u64::try_from(entries.len()).map_or(u64::MAX, |len| len.saturating_add(1));
            entries.push(PendingConfirmation {
                id,
                booking_id,
                error_message: error_message.to_string(),
                retry_count,
                first_failed_at: now,
                last_failed_at: now,
                status: PendingStatus::Pending,
                resolved_at: None,
                resolution_notes: None,
            });
            metrics::record_pending_confirmation();
            id
        };

        tracing::warn!(
            entry_id = id,
            booking_id = %booking_id,
            error = %error_message,
            "Confirmation parked for replay"
        );
        metrics::update_pending_confirmations(count_open(&entries));
        id
    }

    /// Entries waiting for replay, oldest first
    pub async fn list_pending(&self, limit: usize) -> Vec<PendingConfirmation> {
        self.list_by_status(PendingStatus::Pending, limit).await
    }

    /// Entries with `status`, oldest first
    pub async fn list_by_status(&self, status: PendingStatus, limit: usize) -> Vec<PendingConfirmation> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|entry| entry.status == status)
            .take(limit)
            .cloned()
            .collect()
    }

    /// The latest entry for a booking
    pub async fn get(&self, booking_id: BookingId) -> Option<PendingConfirmation> {
        self.entries
            .lock()
            .await
            .iter()
            .rev()
            .find(|entry| entry.booking_id == booking_id)
            .cloned()
    }

    /// Claims a pending entry for replay; `false` if it was not pending
    pub async fn mark_processing(&self, id: u64) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.iter_mut().find(|entry| entry.id == id) {
            Some(entry) if entry.status == PendingStatus::Pending => {
                entry.status = PendingStatus::Processing;
                true
            }
            _ => false,
        }
    }

    /// Closes a booking's open entry as resolved
    pub async fn mark_resolved(&self, booking_id: BookingId, notes: &str) {
        self.close(booking_id, PendingStatus::Resolved, notes).await;
    }

    /// Closes a booking's open entry as discarded
    pub async fn mark_discarded(&self, booking_id: BookingId, reason: &str) {
        self.close(booking_id, PendingStatus::Discarded, reason).await;
    }

    async fn close(&self, booking_id: BookingId, status: PendingStatus, notes: &str) {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let mut closed = false;
        for entry in entries.iter_mut().filter(|entry| {
            entry.booking_id == booking_id
                && matches!(entry.status, PendingStatus::Pending | PendingStatus::Processing)
        }) {
            entry.status = status;
            entry.resolved_at = Some(now);
            entry.resolution_notes = Some(notes.to_string());
            closed = true;
        }
        if closed {
            tracing::info!(booking_id = %booking_id, status = status.as_str(), "Pending confirmation closed");
            metrics::update_pending_confirmations(count_open(&entries));
        }
    }

    /// Number of entries waiting for replay
    pub async fn count_pending(&self) -> usize {
        count_open(&self.entries.lock().await)
    }
}

fn count_open(entries: &[PendingConfirmation]) -> usize {
    entries
        .iter()
        .filter(|entry| matches!(entry.status, PendingStatus::Pending | PendingStatus::Processing))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_testing::test_clock;

    #[tokio::test]
    async fn test_reparking_updates_the_open_entry() {
        let queue = PendingConfirmationQueue::new(Arc::new(test_clock()));
        let booking = BookingId::new();

        let first = queue.add_entry(booking, "store unavailable", 4).await;
        let second = queue.add_entry(booking, "store still unavailable", 4).await;

        assert_eq!(first, second);
        assert_eq!(queue.count_pending().await, 1);
        let entry = queue.get(booking).await;
        assert_eq!(entry.as_ref().map(|e| e.retry_count), Some(8));
        assert_eq!(entry.map(|e| e.error_message), Some("store still unavailable".to_string()));
    }

    #[tokio::test]
    async fn test_resolved_entries_leave_the_pending_list() {
        let queue = PendingConfirmationQueue::new(Arc::new(test_clock()));
        let booking = BookingId::new();
        let id = queue.add_entry(booking, "store unavailable", 1).await;

        assert!(queue.mark_processing(id).await);
        assert!(!queue.mark_processing(id).await);
        queue.mark_resolved(booking, "replayed").await;

        assert!(queue.list_pending(10).await.is_empty());
        assert_eq!(queue.list_by_status(PendingStatus::Resolved, 10).await.len(), 1);
        assert_eq!(queue.count_pending().await, 0);
    }
}
