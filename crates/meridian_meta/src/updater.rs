//! Serial applier for topology mutation intents.
//!
//! Every mutation funnels through one worker so concurrent handlers never
//! race log writes against each other. The worker drains its queue in
//! contiguous batches, folds the batch into a single committed revision,
//! republishes the store, and only then acknowledges any migration items
//! whose RemoveSlave rode in the batch.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::migrate::MigrateRegister;
use crate::proto::RelocationItem;
use crate::store::{TopologyStore, UpdateOp};

/// Queue depth for pending tasks.
const UPDATE_QUEUE_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
pub struct UpdateTask {
    pub op: UpdateOp,
    /// Relocation to acknowledge once the op's revision commits.
    pub ack: Option<RelocationItem>,
}

impl UpdateTask {
    pub fn new(op: UpdateOp) -> Self {
        Self { op, ack: None }
    }

    pub fn with_ack(op: UpdateOp, item: RelocationItem) -> Self {
        Self {
            op,
            ack: Some(item),
        }
    }
}

/// Cloneable enqueue side of the applier.
#[derive(Clone)]
pub struct UpdateHandle {
    tx: mpsc::Sender<UpdateTask>,
}

impl UpdateHandle {
    /// FIFO enqueue. Tasks from one caller are applied in program order.
    pub async fn pending_update(&self, task: UpdateTask) {
        if self.tx.send(task).await.is_err() {
            tracing::warn!("update worker is gone, dropping task");
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct UpdaterConfig {
    /// Conflict retries (refresh + replay) before a batch is dropped.
    pub apply_max_retry: u32,
    /// Most tasks folded into one revision.
    pub batch_max: usize,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            apply_max_retry: 5,
            batch_max: 64,
        }
    }
}

/// Spawn the single applier worker.
pub fn spawn(
    store: Arc<TopologyStore>,
    register: Arc<MigrateRegister>,
    cfg: UpdaterConfig,
    shutdown: CancellationToken,
) -> (UpdateHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(UPDATE_QUEUE_CAPACITY);
    let handle = UpdateHandle { tx };
    let worker = tokio::spawn(async move {
        loop {
            let first = tokio::select! {
                _ = shutdown.cancelled() => break,
                maybe = rx.recv() => match maybe {
                    Some(task) => task,
                    None => break,
                },
            };
            let batch = collect_batch(first, &mut rx, cfg.batch_max);
            apply_batch(&store, &register, batch, cfg.apply_max_retry).await;
        }
        tracing::debug!("update worker stopped");
    });
    (handle, worker)
}

/// Pull whatever is already queued behind `first`, bounded by `batch_max`.
fn collect_batch(
    first: UpdateTask,
    rx: &mut mpsc::Receiver<UpdateTask>,
    batch_max: usize,
) -> Vec<UpdateTask> {
    let mut items = Vec::with_capacity(batch_max.max(1));
    items.push(first);
    while items.len() < batch_max {
        match rx.try_recv() {
            Ok(task) => items.push(task),
            Err(_) => break,
        }
    }
    items
}

async fn apply_batch(
    store: &TopologyStore,
    register: &MigrateRegister,
    batch: Vec<UpdateTask>,
    apply_max_retry: u32,
) {
    let ops: Vec<UpdateOp> = batch.iter().map(|task| task.op.clone()).collect();

    let mut attempt = 0;
    loop {
        match store.apply(&ops).await {
            Ok(Some(epoch)) => {
                if let Err(err) = store.refresh().await {
                    tracing::warn!(error = %err, "refresh after commit failed");
                }
                tracing::info!(epoch, tasks = batch.len(), "committed topology revision");
                break;
            }
            Ok(None) => {
                // Replayed or redundant ops; nothing new to commit.
                tracing::debug!(tasks = batch.len(), "update batch produced no change");
                break;
            }
            Err(err) if err.is_conflict() && attempt < apply_max_retry => {
                attempt += 1;
                tracing::warn!(attempt, "apply lost to a concurrent write, replaying batch");
                if let Err(err) = store.refresh().await {
                    tracing::warn!(error = %err, "refresh before replay failed");
                }
            }
            Err(err) => {
                // Dropped tasks are not re-enqueued here; their originators
                // (liveness scan, condition tick, migration sweep) regenerate.
                tracing::warn!(
                    error = %err,
                    dropped = batch.len(),
                    "dropping update batch after apply failure"
                );
                return;
            }
        }
    }

    for task in batch {
        if let Some(item) = task.ack {
            if let Err(err) = register.ack(&item).await {
                tracing::warn!(
                    table = %item.table,
                    partition = item.partition,
                    error = %err,
                    "migration ack failed"
                );
            }
        }
    }
}
