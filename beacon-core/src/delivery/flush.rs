//! Flush engine: batch unsynced entries, transmit, reconcile
//!
//! One flush cycle:
//!
//! 1. Read every unsynced entry (insertion order).
//! 2. Partition by kind, keeping order within each group.
//! 3. Send each group to its per-kind endpoint; mark a group synced as soon
//!    as its own request succeeds.
//! 4. Send whatever is still unsynced to the consolidated batch endpoint in
//!    one request.
//! 5. Purge synced entries.
//!
//! Overlapping flushes are allowed. Both read the same unsynced set and may
//! both transmit it; mark and purge are idempotent, so the worst outcome is a
//! duplicate delivery, never a lost one.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::db::QueueHandle;
use crate::types::{EventKind, QueueEntry};

use super::batch::Group;
use super::{Endpoint, Transport};

/// What a single flush cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries read as unsynced at the start of the cycle
    pub attempted: usize,
    /// Entries covered by a successful transmission
    pub delivered: usize,
    /// Kinds whose per-kind request succeeded
    pub accepted_kinds: Vec<EventKind>,
    /// Kinds whose per-kind request failed
    pub failed_kinds: Vec<EventKind>,
    /// Whether the consolidated fallback was attempted, and its outcome
    pub fallback: Option<bool>,
    /// Entries physically deleted by the closing purge
    pub purged: usize,
}

impl FlushReport {
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Everything read at the start was delivered
    pub fn is_complete(&self) -> bool {
        self.delivered == self.attempted
    }
}

/// Drives flush cycles against a queue and a transport.
///
/// Cheap to clone; clones share the queue and transport, so a timer, a
/// visibility hook and the background worker can each hold one.
#[derive(Clone)]
pub struct FlushEngine {
    queue: QueueHandle,
    transport: Arc<dyn Transport>,
}

impl FlushEngine {
    pub fn new(queue: QueueHandle, transport: Arc<dyn Transport>) -> Self {
        Self { queue, transport }
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Attempt to deliver every unsynced entry. Never fails; anything not
    /// acknowledged stays unsynced for the next cycle.
    pub async fn flush(&self) -> FlushReport {
        let mut report = FlushReport::default();

        let entries = match self.queue.list_unsynced().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Flush skipped: could not read queue");
                return report;
            }
        };

        if entries.is_empty() {
            return report;
        }
        report.attempted = entries.len();

        let mut leftovers: Vec<&QueueEntry> = Vec::new();

        for (kind, group_entries) in partition_by_kind(&entries) {
            let group = Group::from_entries(group_entries.iter().copied());

            match self.transport.send(Endpoint::Kind(kind), &group.records).await {
                Ok(()) => {
                    report.delivered += group.len();
                    report.accepted_kinds.push(kind);
                    self.mark(&group).await;
                    tracing::debug!(kind = %kind, count = group.len(), "Delivered kind group");
                }
                Err(e) => {
                    report.failed_kinds.push(kind);
                    tracing::warn!(
                        kind = %kind,
                        count = group.len(),
                        error = %e,
                        "Per-kind delivery failed"
                    );
                    leftovers.extend(group_entries);
                }
            }
        }

        if !leftovers.is_empty() {
            // Restore queue order across the failed kinds
            leftovers.sort_by_key(|entry| entry.id);
            let group = Group::from_entries(leftovers);

            match self.transport.send(Endpoint::Batch, &group.records).await {
                Ok(()) => {
                    report.delivered += group.len();
                    report.fallback = Some(true);
                    self.mark(&group).await;
                    tracing::debug!(count = group.len(), "Delivered consolidated batch");
                }
                Err(e) => {
                    report.fallback = Some(false);
                    tracing::warn!(
                        count = group.len(),
                        error = %e,
                        "Consolidated delivery failed; entries stay queued"
                    );
                }
            }
        }

        match self.queue.purge_synced().await {
            Ok(purged) => report.purged = purged,
            Err(e) => tracing::warn!(error = %e, "Purge of synced entries failed"),
        }

        tracing::info!(
            attempted = report.attempted,
            delivered = report.delivered,
            purged = report.purged,
            "Flush complete"
        );

        report
    }

    /// Mark a delivered group. A failure here means a re-send next cycle,
    /// which at-least-once delivery tolerates.
    async fn mark(&self, group: &Group) {
        if let Err(e) = self.queue.mark_synced(group.ids.clone()).await {
            tracing::warn!(
                count = group.len(),
                error = %e,
                "Delivered entries could not be marked synced"
            );
        }
    }

    /// Fire-and-forget unload signal
    pub fn send_beacon(&self) {
        self.transport.send_beacon();
    }
}

/// Group entries by kind, keeping queue order inside each group
fn partition_by_kind(entries: &[QueueEntry]) -> BTreeMap<EventKind, Vec<&QueueEntry>> {
    let mut groups: BTreeMap<EventKind, Vec<&QueueEntry>> = BTreeMap::new();
    for entry in entries {
        groups.entry(entry.record.kind()).or_default().push(entry);
    }
    groups
}
