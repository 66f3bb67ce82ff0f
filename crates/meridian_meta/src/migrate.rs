//! Durable staging queue for partition relocations.
//!
//! A `MIGRATE` command can carry far more work than should ever be in flight
//! at once, so the full ordered plan is persisted under one log key and
//! drained in small staged batches. Items leave the queue only when their
//! relocation finishes (the RemoveSlave commit acks back) or the whole
//! migration is cancelled. The staging cursor is deliberately volatile: a new
//! leader reloads the queue from the log and restages from the front, and the
//! already-applied steps replay as no-ops.

use std::sync::Arc;

use prost::Message;
use tokio::sync::Mutex;

use crate::error::{MetaError, Result};
use crate::log::MetaLog;
use crate::proto::{self, RelocationItem, RelocationSet};

pub struct MigrateRegister {
    log: Arc<dyn MetaLog>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    items: Vec<RelocationItem>,
    /// Items handed out by `get_n` and not yet acked.
    staged: usize,
}

impl MigrateRegister {
    pub fn new(log: Arc<dyn MetaLog>) -> Self {
        Self {
            log,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Rebuild the queue from the log, resetting the staging cursor.
    pub async fn load(&self) -> Result<()> {
        let items = match self.log.get(proto::KEY_MIGRATE).await {
            Ok(bytes) => proto::decode_blob::<RelocationSet>(&bytes)?.items,
            Err(err) if err.is_not_found() => Vec::new(),
            Err(err) => return Err(err),
        };
        let mut inner = self.inner.lock().await;
        inner.items = items;
        inner.staged = 0;
        Ok(())
    }

    /// Begin a new migration. `AlreadyExists` while a previous one still has
    /// items queued.
    pub async fn init(&self, items: Vec<RelocationItem>) -> Result<()> {
        if items.is_empty() {
            return Err(MetaError::InvalidArgument("empty relocation list".into()));
        }
        let mut inner = self.inner.lock().await;
        if !inner.items.is_empty() {
            return Err(MetaError::AlreadyExists(format!(
                "migration in progress with {} items left",
                inner.items.len()
            )));
        }
        self.persist(&items).await?;
        inner.items = items;
        inner.staged = 0;
        Ok(())
    }

    /// Stage up to `n` next items without removing them. `NotFound` when the
    /// queue is empty; an empty vec when everything left is already staged.
    pub async fn get_n(&self, n: usize) -> Result<Vec<RelocationItem>> {
        let mut inner = self.inner.lock().await;
        if inner.items.is_empty() {
            return Err(MetaError::NotFound("no pending migration".into()));
        }
        let start = inner.staged;
        let end = (start + n).min(inner.items.len());
        let out = inner.items[start..end].to_vec();
        inner.staged = end;
        Ok(out)
    }

    /// Persistently drop a completed item from the head of the queue.
    pub async fn ack(&self, item: &RelocationItem) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let position = inner
            .items
            .iter()
            .position(|queued| queued == item)
            .ok_or_else(|| {
                MetaError::NotFound(format!(
                    "relocation {}:{} not queued",
                    item.table, item.partition
                ))
            })?;
        let mut remaining = inner.items.clone();
        remaining.remove(position);
        self.persist(&remaining).await?;
        inner.items = remaining;
        if position < inner.staged {
            inner.staged -= 1;
        }
        Ok(())
    }

    /// Drop the whole queue.
    pub async fn cancel(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.log.delete(proto::KEY_MIGRATE).await?;
        inner.items.clear();
        inner.staged = 0;
        Ok(())
    }

    pub async fn remaining(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    pub async fn staged(&self) -> usize {
        self.inner.lock().await.staged
    }

    async fn persist(&self, items: &[RelocationItem]) -> Result<()> {
        if items.is_empty() {
            self.log.delete(proto::KEY_MIGRATE).await
        } else {
            let set = RelocationSet {
                items: items.to_vec(),
            };
            self.log
                .set(proto::KEY_MIGRATE, set.encode_to_vec())
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemCluster;
    use crate::proto::Node;

    fn item(partition: u32) -> RelocationItem {
        RelocationItem {
            table: "t".to_string(),
            partition,
            left: Some(Node::new("10.0.0.1", 8001)),
            right: Some(Node::new("10.0.0.9", 8001)),
        }
    }

    fn register() -> (Arc<MemCluster>, MigrateRegister) {
        let cluster = MemCluster::new(vec![Node::new("127.0.0.1", 13221)]);
        let log: Arc<dyn MetaLog> = Arc::new(cluster.handle(0));
        (cluster, MigrateRegister::new(log))
    }

    #[tokio::test]
    async fn init_rejects_overlapping_migrations() {
        let (_cluster, register) = register();
        register.init(vec![item(0), item(1)]).await.unwrap();
        let err = register.init(vec![item(2)]).await.unwrap_err();
        assert!(matches!(err, MetaError::AlreadyExists(_)));

        register.cancel().await.unwrap();
        register.init(vec![item(2)]).await.unwrap();
    }

    #[tokio::test]
    async fn empty_init_is_invalid() {
        let (_cluster, register) = register();
        let err = register.init(Vec::new()).await.unwrap_err();
        assert!(matches!(err, MetaError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn staging_hands_out_in_order_without_removing() {
        let (_cluster, register) = register();
        register
            .init(vec![item(0), item(1), item(2)])
            .await
            .unwrap();

        assert_eq!(register.get_n(2).await.unwrap(), vec![item(0), item(1)]);
        assert_eq!(register.get_n(2).await.unwrap(), vec![item(2)]);
        assert!(register.get_n(2).await.unwrap().is_empty());
        assert_eq!(register.remaining().await, 3);
    }

    #[tokio::test]
    async fn acks_preserve_queue_order() {
        let (_cluster, register) = register();
        register
            .init(vec![item(0), item(1), item(2)])
            .await
            .unwrap();
        register.get_n(3).await.unwrap();

        register.ack(&item(0)).await.unwrap();
        register.ack(&item(1)).await.unwrap();
        assert_eq!(register.remaining().await, 1);
        assert_eq!(register.staged().await, 1);

        register.ack(&item(2)).await.unwrap();
        assert_eq!(register.remaining().await, 0);
        assert!(register.get_n(1).await.unwrap_err().is_not_found());

        let err = register.ack(&item(2)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn queue_is_reconstructable_from_the_log_alone() {
        let (cluster, register) = register();
        register
            .init(vec![item(0), item(1), item(2)])
            .await
            .unwrap();
        register.get_n(2).await.unwrap();
        register.ack(&item(0)).await.unwrap();

        // A fresh register (new leader) sees the two survivors, unstaged.
        let log: Arc<dyn MetaLog> = Arc::new(cluster.handle(0));
        let rebuilt = MigrateRegister::new(log);
        rebuilt.load().await.unwrap();
        assert_eq!(rebuilt.remaining().await, 2);
        assert_eq!(rebuilt.staged().await, 0);
        assert_eq!(rebuilt.get_n(8).await.unwrap(), vec![item(1), item(2)]);
    }

    #[tokio::test]
    async fn cancel_clears_the_log_key() {
        let (cluster, register) = register();
        register.init(vec![item(0)]).await.unwrap();
        assert!(cluster.raw_get(proto::KEY_MIGRATE).is_some());
        register.cancel().await.unwrap();
        assert!(cluster.raw_get(proto::KEY_MIGRATE).is_none());
        assert!(register.get_n(1).await.unwrap_err().is_not_found());
    }
}
