//! Deferred mutations gated on replication progress.
//!
//! Reconfiguration steps that must wait for a replica to physically catch up
//! (master hand-off, migration cut-over) are parked here as offset
//! conditions. A tick task re-evaluates pending entries against the offsets
//! storage nodes report in their pings and releases the deferred tasks into
//! the update queue once the candidate has caught the reference.
//!
//! Everything in this module is leader-local and volatile: on loss of
//! leadership the pending set and the offset map are wiped, and durable work
//! (the migrate register) is restaged by the next leader.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::proto::{BinlogOffset, Node, PartitionOffset};
use crate::store::UpdateOp;
use crate::updater::{UpdateHandle, UpdateTask};

/// `(table, partition, "ip:port")`.
pub type OffsetKey = (String, u32, String);

/// Latest write-ahead positions reported by storage nodes. Leader-local.
#[derive(Default)]
pub struct NodeOffsetMap {
    inner: Mutex<HashMap<OffsetKey, BinlogOffset>>,
}

impl NodeOffsetMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one ping's offset report into the map.
    pub fn update_from_ping(&self, node: &Node, offsets: &[PartitionOffset]) {
        let addr = node.addr();
        let mut inner = self.inner.lock().unwrap();
        for report in offsets {
            if let Some(offset) = &report.offset {
                inner.insert(
                    (report.table.clone(), report.partition, addr.clone()),
                    offset.clone(),
                );
            }
        }
    }

    pub fn get(&self, table: &str, partition: u32, addr: &str) -> Option<BinlogOffset> {
        self.inner
            .lock()
            .unwrap()
            .get(&(table.to_string(), partition, addr.to_string()))
            .cloned()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Wait for `candidate` to catch up with `reference` on one partition.
#[derive(Clone, Debug)]
pub struct OffsetCondition {
    pub table: String,
    pub partition: u32,
    pub reference: Node,
    pub candidate: Node,
}

impl OffsetCondition {
    /// `None` while either side has not reported yet.
    fn satisfied(&self, offsets: &NodeOffsetMap, gap_tolerance: u64) -> Option<bool> {
        let reference = offsets.get(&self.table, self.partition, &self.reference.addr())?;
        let candidate = offsets.get(&self.table, self.partition, &self.candidate.addr())?;
        let caught_up = candidate >= reference
            && reference.offset.saturating_sub(candidate.offset) <= gap_tolerance;
        Some(caught_up)
    }
}

/// Who parked the entry; CancelMigrate clears only migration entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionOrigin {
    MasterSwitch,
    Migration,
}

struct ConditionEntry {
    condition: OffsetCondition,
    tasks: Vec<UpdateTask>,
    origin: ConditionOrigin,
    since: Instant,
}

/// Pending offset-gated work, keyed by `(table, partition)`.
#[derive(Default)]
pub struct ConditionRegistry {
    entries: Mutex<HashMap<(String, u32), ConditionEntry>>,
}

impl ConditionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `tasks` until `condition` holds. Re-adding for the same
    /// `(table, partition)` replaces the previous entry.
    pub fn add(&self, condition: OffsetCondition, tasks: Vec<UpdateTask>, origin: ConditionOrigin) {
        let key = (condition.table.clone(), condition.partition);
        let entry = ConditionEntry {
            condition,
            tasks,
            origin,
            since: Instant::now(),
        };
        if self
            .entries
            .lock()
            .unwrap()
            .insert(key.clone(), entry)
            .is_some()
        {
            tracing::info!(table = %key.0, partition = key.1, "replaced pending offset condition");
        }
    }

    pub fn pending(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn migration_pending(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|entry| entry.origin == ConditionOrigin::Migration)
            .count()
    }

    /// Drop every entry (leadership lost).
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    /// Best-effort cancellation of migration-tagged entries.
    pub fn cancel_migration_entries(&self) {
        self.entries
            .lock()
            .unwrap()
            .retain(|_, entry| entry.origin != ConditionOrigin::Migration);
    }

    /// One evaluation pass. Returns the tasks to hand to the update queue:
    /// released entries fire their deferred tasks; entries pending longer
    /// than `timeout` are cancelled with a compensating `SetActive` so a
    /// stuck partition does not stay fenced forever.
    pub fn tick(
        &self,
        offsets: &NodeOffsetMap,
        gap_tolerance: u64,
        timeout: Duration,
    ) -> Vec<UpdateTask> {
        let mut due = Vec::new();
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|(table, partition), entry| {
            match entry.condition.satisfied(offsets, gap_tolerance) {
                Some(true) => {
                    tracing::info!(
                        table = %table,
                        partition = *partition,
                        candidate = %entry.condition.candidate.addr(),
                        "offset condition satisfied"
                    );
                    due.append(&mut entry.tasks);
                    false
                }
                Some(false) | None if entry.since.elapsed() > timeout => {
                    tracing::warn!(
                        table = %table,
                        partition = *partition,
                        candidate = %entry.condition.candidate.addr(),
                        waited_secs = entry.since.elapsed().as_secs(),
                        "offset condition timed out, cancelling"
                    );
                    due.push(UpdateTask::new(UpdateOp::SetActive {
                        table: table.clone(),
                        partition: *partition,
                    }));
                    false
                }
                _ => true,
            }
        });
        due
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, table: &str, partition: u32, age: Duration) {
        if let Some(entry) = self
            .entries
            .lock()
            .unwrap()
            .get_mut(&(table.to_string(), partition))
        {
            entry.since = Instant::now() - age;
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ConditionCronConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub offset_gap_tolerance: u64,
}

/// Spawn the periodic evaluation task.
pub fn spawn(
    registry: Arc<ConditionRegistry>,
    offsets: Arc<NodeOffsetMap>,
    updates: UpdateHandle,
    cfg: ConditionCronConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cfg.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let due = registry.tick(&offsets, cfg.offset_gap_tolerance, cfg.timeout);
            for task in due {
                updates.pending_update(task).await;
            }
        }
        tracing::debug!("condition cron stopped");
    })
}
