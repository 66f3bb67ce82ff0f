//! Epoch-versioned topology store over the replicated log.
//!
//! Readers get a consistent `(epoch, tables, nodes)` view without locking the
//! writers: the snapshot is replaced wholesale behind an `RwLock<Arc<..>>`
//! and the epoch counter is published last with release ordering, so any
//! reader that observes epoch E sees the maps of revision E.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use prost::Message;

use crate::error::{MetaError, Result};
use crate::log::MetaLog;
use crate::proto::{
    self, Node, NodeSet, NodeState, NodeStatus, Partition, PartitionState, Table, TableIndex,
};

/// One committed topology revision.
#[derive(Clone, Default)]
pub struct TopologySnapshot {
    pub epoch: u64,
    pub tables: BTreeMap<String, Table>,
    pub nodes: BTreeMap<String, NodeState>,
}

/// A single topology mutation intent, applied serially by the update worker.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateOp {
    UpNode {
        addr: String,
    },
    DownNode {
        addr: String,
    },
    AddSlave {
        addr: String,
        table: String,
        partition: u32,
    },
    RemoveSlave {
        addr: String,
        table: String,
        partition: u32,
    },
    SetMaster {
        addr: String,
        table: String,
        partition: u32,
    },
    SetStuck {
        table: String,
        partition: u32,
    },
    SetActive {
        table: String,
        partition: u32,
    },
    AddTable {
        table: Table,
    },
    DropTable {
        name: String,
    },
}

pub struct TopologyStore {
    log: Arc<dyn MetaLog>,
    snapshot: RwLock<Arc<TopologySnapshot>>,
    /// Published after the snapshot swap; lock-free read side.
    epoch: AtomicU64,
    liveness: Mutex<HashMap<String, Instant>>,
    node_alive_ttl: Duration,
}

impl TopologyStore {
    pub fn new(log: Arc<dyn MetaLog>, node_alive_ttl: Duration) -> Self {
        Self {
            log,
            snapshot: RwLock::new(Arc::new(TopologySnapshot::default())),
            epoch: AtomicU64::new(0),
            liveness: Mutex::new(HashMap::new()),
            node_alive_ttl,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> Arc<TopologySnapshot> {
        self.snapshot.read().unwrap().clone()
    }

    /// Reload topology from the log and publish it.
    ///
    /// `Incomplete` until the log has produced a first revision, `Corruption`
    /// on unparsable blobs. Idempotent.
    pub async fn refresh(&self) -> Result<()> {
        let epoch = match self.log.get(proto::KEY_EPOCH).await {
            Ok(bytes) => proto::decode_epoch(&bytes)?,
            Err(err) if err.is_not_found() => {
                return Err(MetaError::Incomplete(
                    "log holds no topology snapshot yet".to_string(),
                ))
            }
            Err(err) => return Err(err),
        };

        let nodes = match self.log.get(proto::KEY_NODES).await {
            Ok(bytes) => proto::decode_blob::<NodeSet>(&bytes)?,
            Err(err) if err.is_not_found() => NodeSet::default(),
            Err(err) => return Err(err),
        };

        let index = match self.log.get(proto::KEY_TABLES).await {
            Ok(bytes) => proto::decode_blob::<TableIndex>(&bytes)?,
            Err(err) if err.is_not_found() => TableIndex::default(),
            Err(err) => return Err(err),
        };

        let mut tables = BTreeMap::new();
        for name in &index.names {
            let bytes = self.log.get(&proto::table_key(name)).await.map_err(|err| {
                if err.is_not_found() {
                    MetaError::Corruption(format!("table {name} indexed but missing"))
                } else {
                    err
                }
            })?;
            tables.insert(name.clone(), proto::decode_blob::<Table>(&bytes)?);
        }

        let mut node_map = BTreeMap::new();
        for state in nodes.nodes {
            if let Some(node) = &state.node {
                node_map.insert(node.addr(), state.clone());
            }
        }

        let published = Arc::new(TopologySnapshot {
            epoch,
            tables,
            nodes: node_map,
        });
        *self.snapshot.write().unwrap() = published;
        self.epoch.store(epoch, Ordering::Release);
        Ok(())
    }

    pub fn table_meta(&self, table: &str) -> Result<Table> {
        self.snapshot()
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| MetaError::NotFound(format!("table {table}")))
    }

    pub fn table_list(&self) -> BTreeSet<String> {
        self.snapshot().tables.keys().cloned().collect()
    }

    pub fn partition_master(&self, table: &str, partition: u32) -> Result<Node> {
        let snapshot = self.snapshot();
        let table_meta = snapshot
            .tables
            .get(table)
            .ok_or_else(|| MetaError::NotFound(format!("table {table}")))?;
        table_meta
            .partitions
            .iter()
            .find(|p| p.id == partition)
            .and_then(|p| p.master().cloned())
            .ok_or_else(|| MetaError::NotFound(format!("partition {table}:{partition}")))
    }

    /// Every table in which `addr` appears in any replica set.
    pub fn tables_for_node(&self, addr: &str) -> BTreeSet<String> {
        let snapshot = self.snapshot();
        let mut out = BTreeSet::new();
        for (name, table) in &snapshot.tables {
            let serves = table
                .partitions
                .iter()
                .any(|p| p.replicas.iter().any(|r| r.addr() == addr));
            if serves {
                out.insert(name.clone());
            }
        }
        out
    }

    pub fn all_nodes(&self) -> BTreeMap<String, NodeState> {
        self.snapshot().nodes.clone()
    }

    /// Record a heartbeat. Returns `true` iff the node was previously unknown
    /// or DOWN, signalling the caller to enqueue an `UpNode`.
    pub fn update_node_alive(&self, addr: &str) -> bool {
        let was_tracked = self
            .liveness
            .lock()
            .unwrap()
            .insert(addr.to_string(), Instant::now())
            .is_some();
        let is_up = self
            .snapshot()
            .nodes
            .get(addr)
            .map(|state| state.status() == NodeStatus::Up)
            .unwrap_or(false);
        !was_tracked || !is_up
    }

    /// UP nodes whose last heartbeat is older than the TTL.
    pub fn fetch_expired_nodes(&self) -> BTreeSet<String> {
        let snapshot = self.snapshot();
        let liveness = self.liveness.lock().unwrap();
        let mut expired = BTreeSet::new();
        for (addr, state) in &snapshot.nodes {
            if state.status() != NodeStatus::Up {
                continue;
            }
            let fresh = liveness
                .get(addr)
                .map(|stamp| stamp.elapsed() <= self.node_alive_ttl)
                .unwrap_or(false);
            if !fresh {
                expired.insert(addr.clone());
            }
        }
        expired
    }

    /// Stamp every UP node as just-heard-from. Called on leader election so a
    /// new leader does not expire the whole fleet before its first pings.
    pub fn restore_node_alive(&self) {
        let snapshot = self.snapshot();
        let mut liveness = self.liveness.lock().unwrap();
        let now = Instant::now();
        for (addr, state) in &snapshot.nodes {
            if state.status() == NodeStatus::Up {
                liveness.insert(addr.clone(), now);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate_alive(&self, addr: &str, age: Duration) {
        self.liveness
            .lock()
            .unwrap()
            .insert(addr.to_string(), Instant::now() - age);
    }

    /// Seed revision zero on a log that has never committed one. Called by
    /// the first leader of a fresh ensemble so everyone's `refresh` can
    /// complete. Returns whether a seed was written.
    pub async fn bootstrap_if_empty(&self) -> Result<bool> {
        match self.log.get(proto::KEY_EPOCH).await {
            Ok(_) => Ok(false),
            Err(err) if err.is_not_found() => {
                self.log
                    .set(proto::KEY_TABLES, TableIndex::default().encode_to_vec())
                    .await?;
                self.log
                    .set(proto::KEY_NODES, NodeSet::default().encode_to_vec())
                    .await?;
                self.log
                    .set(proto::KEY_EPOCH, proto::encode_epoch(0))
                    .await?;
                tracing::info!("seeded empty topology at epoch 0");
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }

    /// Transform the current revision by `ops` and commit the result to the
    /// log as revision `epoch + 1`.
    ///
    /// Individual ops that no longer apply (say, a slave add against a table
    /// dropped earlier in the batch) are skipped at WARN; structural
    /// invariants are validated before anything is written. Returns the new
    /// epoch, or `None` when the batch produced no structural change and
    /// nothing was committed.
    pub async fn apply(&self, ops: &[UpdateOp]) -> Result<Option<u64>> {
        let base = self.snapshot();
        let mut working = WorkingRevision::new(&base);

        for op in ops {
            if let Err(err) = working.apply_op(op) {
                tracing::warn!(?op, error = %err, "skipping inapplicable update op");
            }
        }

        if !working.dirty() {
            return Ok(None);
        }
        working.validate()?;

        // The epoch key is the commit point: everything else lands first.
        for name in &working.dropped_tables {
            self.log.delete(&proto::table_key(name)).await?;
        }
        for name in &working.changed_tables {
            if let Some(table) = working.tables.get(name) {
                self.log
                    .set(&proto::table_key(name), table.encode_to_vec())
                    .await?;
            }
        }
        if working.index_changed {
            let index = TableIndex {
                names: working.tables.keys().cloned().collect(),
            };
            self.log
                .set(proto::KEY_TABLES, index.encode_to_vec())
                .await?;
        }
        if working.nodes_changed {
            let set = NodeSet {
                nodes: working.nodes.values().cloned().collect(),
            };
            self.log.set(proto::KEY_NODES, set.encode_to_vec()).await?;
        }
        let next_epoch = base.epoch + 1;
        self.log
            .set(proto::KEY_EPOCH, proto::encode_epoch(next_epoch))
            .await?;
        Ok(Some(next_epoch))
    }
}

/// Mutable copy of one revision while a batch is folded into it.
struct WorkingRevision {
    tables: BTreeMap<String, Table>,
    nodes: BTreeMap<String, NodeState>,
    changed_tables: BTreeSet<String>,
    dropped_tables: BTreeSet<String>,
    nodes_changed: bool,
    index_changed: bool,
}

impl WorkingRevision {
    fn new(base: &TopologySnapshot) -> Self {
        Self {
            tables: base.tables.clone(),
            nodes: base.nodes.clone(),
            changed_tables: BTreeSet::new(),
            dropped_tables: BTreeSet::new(),
            nodes_changed: false,
            index_changed: false,
        }
    }

    fn dirty(&self) -> bool {
        self.nodes_changed || self.index_changed || !self.changed_tables.is_empty()
    }

    fn partition_mut(&mut self, table: &str, partition: u32) -> Result<&mut Partition> {
        let table_meta = self
            .tables
            .get_mut(table)
            .ok_or_else(|| MetaError::NotFound(format!("table {table}")))?;
        table_meta
            .partitions
            .iter_mut()
            .find(|p| p.id == partition)
            .ok_or_else(|| MetaError::NotFound(format!("partition {table}:{partition}")))
    }

    fn apply_op(&mut self, op: &UpdateOp) -> Result<()> {
        match op {
            UpdateOp::UpNode { addr } => {
                let node = proto::parse_node_addr(addr)?;
                let entry = self
                    .nodes
                    .entry(addr.clone())
                    .or_insert_with(|| NodeState::new(node, NodeStatus::Down));
                if entry.status() != NodeStatus::Up {
                    entry.status = NodeStatus::Up as i32;
                    self.nodes_changed = true;
                }
            }
            UpdateOp::DownNode { addr } => {
                let entry = self
                    .nodes
                    .get_mut(addr)
                    .ok_or_else(|| MetaError::NotFound(format!("node {addr}")))?;
                if entry.status() != NodeStatus::Down {
                    entry.status = NodeStatus::Down as i32;
                    self.nodes_changed = true;
                }
            }
            UpdateOp::AddSlave {
                addr,
                table,
                partition,
            } => {
                if !self.nodes.contains_key(addr) {
                    return Err(MetaError::InvalidArgument(format!(
                        "node {addr} not registered"
                    )));
                }
                let node = proto::parse_node_addr(addr)?;
                let part = self.partition_mut(table, *partition)?;
                if part.replicas.iter().any(|r| r.addr() == *addr) {
                    return Ok(());
                }
                part.replicas.push(node);
                self.changed_tables.insert(table.clone());
            }
            UpdateOp::RemoveSlave {
                addr,
                table,
                partition,
            } => {
                let part = self.partition_mut(table, *partition)?;
                // Removing replica 0 hands mastership to the next replica;
                // migration cut-overs retire the old owner this way. A
                // partition never loses its last replica (validation below).
                let before = part.replicas.len();
                part.replicas.retain(|r| r.addr() != *addr);
                if part.replicas.len() != before {
                    self.changed_tables.insert(table.clone());
                }
            }
            UpdateOp::SetMaster {
                addr,
                table,
                partition,
            } => {
                let part = self.partition_mut(table, *partition)?;
                let index = part
                    .replicas
                    .iter()
                    .position(|r| r.addr() == *addr)
                    .ok_or_else(|| {
                        MetaError::NotFound(format!("replica {addr} in {table}:{partition}"))
                    })?;
                // Promotion also ends the stuck window opened before gating.
                if index != 0 {
                    part.replicas.swap(0, index);
                    part.state = PartitionState::Active as i32;
                    self.changed_tables.insert(table.clone());
                } else if part.state() != PartitionState::Active {
                    part.state = PartitionState::Active as i32;
                    self.changed_tables.insert(table.clone());
                }
            }
            UpdateOp::SetStuck { table, partition } => {
                let part = self.partition_mut(table, *partition)?;
                if part.state() != PartitionState::Stuck {
                    part.state = PartitionState::Stuck as i32;
                    self.changed_tables.insert(table.clone());
                }
            }
            UpdateOp::SetActive { table, partition } => {
                let part = self.partition_mut(table, *partition)?;
                if part.state() != PartitionState::Active {
                    part.state = PartitionState::Active as i32;
                    self.changed_tables.insert(table.clone());
                }
            }
            UpdateOp::AddTable { table } => {
                if self.tables.contains_key(&table.name) {
                    return Err(MetaError::AlreadyExists(format!("table {}", table.name)));
                }
                self.tables.insert(table.name.clone(), table.clone());
                self.changed_tables.insert(table.name.clone());
                self.index_changed = true;
            }
            UpdateOp::DropTable { name } => {
                if self.tables.remove(name).is_none() {
                    return Err(MetaError::NotFound(format!("table {name}")));
                }
                self.changed_tables.remove(name);
                self.dropped_tables.insert(name.clone());
                self.index_changed = true;
            }
        }
        Ok(())
    }

    /// Structural invariants checked before any write reaches the log.
    fn validate(&self) -> Result<()> {
        for (name, table) in &self.tables {
            for part in &table.partitions {
                if part.replicas.is_empty() {
                    return Err(MetaError::InvalidArgument(format!(
                        "partition {name}:{} has no master",
                        part.id
                    )));
                }
                let mut seen = BTreeSet::new();
                for replica in &part.replicas {
                    let addr = replica.addr();
                    if !seen.insert(addr.clone()) {
                        return Err(MetaError::InvalidArgument(format!(
                            "duplicate replica {addr} in {name}:{}",
                            part.id
                        )));
                    }
                    if !self.nodes.contains_key(&addr) {
                        return Err(MetaError::InvalidArgument(format!(
                            "replica {addr} in {name}:{} is not a registered node",
                            part.id
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemCluster;

    fn store_over_mem() -> (Arc<crate::log::MemCluster>, TopologyStore) {
        let cluster = MemCluster::new(vec![Node::new("127.0.0.1", 13221)]);
        let log: Arc<dyn MetaLog> = Arc::new(cluster.handle(0));
        let store = TopologyStore::new(log, Duration::from_secs(30));
        (cluster, store)
    }

    async fn commit(store: &TopologyStore, ops: &[UpdateOp]) -> Option<u64> {
        let epoch = store.apply(ops).await.unwrap();
        store.refresh().await.unwrap();
        epoch
    }

    fn up(addr: &str) -> UpdateOp {
        UpdateOp::UpNode {
            addr: addr.to_string(),
        }
    }

    fn three_node_table(name: &str) -> Table {
        Table {
            name: name.to_string(),
            partitions: vec![Partition {
                id: 0,
                state: PartitionState::Active as i32,
                replicas: vec![
                    Node::new("10.0.0.1", 8001),
                    Node::new("10.0.0.2", 8001),
                    Node::new("10.0.0.3", 8001),
                ],
            }],
        }
    }

    #[tokio::test]
    async fn refresh_before_first_commit_is_incomplete() {
        let (_cluster, store) = store_over_mem();
        assert!(store.refresh().await.unwrap_err().is_incomplete());
    }

    #[tokio::test]
    async fn up_node_is_idempotent_and_epoch_advances_once() {
        let (_cluster, store) = store_over_mem();

        assert_eq!(commit(&store, &[up("10.0.0.1:8001")]).await, Some(1));
        assert_eq!(store.epoch(), 1);
        assert_eq!(
            store.all_nodes().get("10.0.0.1:8001").unwrap().status(),
            NodeStatus::Up
        );

        // A second identical UpNode produces no new revision.
        assert_eq!(commit(&store, &[up("10.0.0.1:8001")]).await, None);
        assert_eq!(store.epoch(), 1);
    }

    #[tokio::test]
    async fn add_table_then_mutate_partition() {
        let (_cluster, store) = store_over_mem();
        commit(
            &store,
            &[up("10.0.0.1:8001"), up("10.0.0.2:8001"), up("10.0.0.3:8001")],
        )
        .await;
        commit(
            &store,
            &[UpdateOp::AddTable {
                table: three_node_table("orders"),
            }],
        )
        .await;
        assert_eq!(store.epoch(), 2);
        assert_eq!(
            store.partition_master("orders", 0).unwrap().addr(),
            "10.0.0.1:8001"
        );
        assert_eq!(
            store.tables_for_node("10.0.0.2:8001"),
            BTreeSet::from(["orders".to_string()])
        );

        // Promote a slave: it moves to index 0 and the old master stays on.
        commit(
            &store,
            &[UpdateOp::SetMaster {
                addr: "10.0.0.2:8001".to_string(),
                table: "orders".to_string(),
                partition: 0,
            }],
        )
        .await;
        let table = store.table_meta("orders").unwrap();
        let addrs: Vec<String> = table.partitions[0]
            .replicas
            .iter()
            .map(|r| r.addr())
            .collect();
        assert_eq!(addrs[0], "10.0.0.2:8001");
        assert_eq!(addrs.len(), 3);
        assert!(addrs.contains(&"10.0.0.1:8001".to_string()));
        assert_eq!(table.partitions[0].state(), PartitionState::Active);
    }

    #[tokio::test]
    async fn stuck_then_active_round_trip() {
        let (_cluster, store) = store_over_mem();
        commit(
            &store,
            &[up("10.0.0.1:8001"), up("10.0.0.2:8001"), up("10.0.0.3:8001")],
        )
        .await;
        commit(
            &store,
            &[UpdateOp::AddTable {
                table: three_node_table("t"),
            }],
        )
        .await;

        commit(
            &store,
            &[UpdateOp::SetStuck {
                table: "t".to_string(),
                partition: 0,
            }],
        )
        .await;
        assert_eq!(
            store.table_meta("t").unwrap().partitions[0].state(),
            PartitionState::Stuck
        );

        commit(
            &store,
            &[UpdateOp::SetActive {
                table: "t".to_string(),
                partition: 0,
            }],
        )
        .await;
        assert_eq!(
            store.table_meta("t").unwrap().partitions[0].state(),
            PartitionState::Active
        );
    }

    #[tokio::test]
    async fn drop_table_twice_is_a_single_revision() {
        let (_cluster, store) = store_over_mem();
        commit(
            &store,
            &[up("10.0.0.1:8001"), up("10.0.0.2:8001"), up("10.0.0.3:8001")],
        )
        .await;
        commit(
            &store,
            &[UpdateOp::AddTable {
                table: three_node_table("t"),
            }],
        )
        .await;
        let epoch_before = store.epoch();

        assert!(commit(
            &store,
            &[UpdateOp::DropTable {
                name: "t".to_string()
            }]
        )
        .await
        .is_some());
        assert_eq!(store.epoch(), epoch_before + 1);
        assert!(store.table_meta("t").unwrap_err().is_not_found());

        // Second drop: the op is inapplicable, nothing commits.
        assert!(commit(
            &store,
            &[UpdateOp::DropTable {
                name: "t".to_string()
            }]
        )
        .await
        .is_none());
        assert_eq!(store.epoch(), epoch_before + 1);
    }

    #[tokio::test]
    async fn removing_the_master_promotes_the_next_replica() {
        let (_cluster, store) = store_over_mem();
        commit(
            &store,
            &[up("10.0.0.1:8001"), up("10.0.0.2:8001"), up("10.0.0.3:8001")],
        )
        .await;
        commit(
            &store,
            &[UpdateOp::AddTable {
                table: three_node_table("t"),
            }],
        )
        .await;

        commit(
            &store,
            &[UpdateOp::RemoveSlave {
                addr: "10.0.0.1:8001".to_string(),
                table: "t".to_string(),
                partition: 0,
            }],
        )
        .await;
        let part = store.table_meta("t").unwrap().partitions[0].clone();
        assert_eq!(part.replicas.len(), 2);
        assert_eq!(part.master().unwrap().addr(), "10.0.0.2:8001");
    }

    #[tokio::test]
    async fn removing_the_last_replica_fails_validation() {
        let (_cluster, store) = store_over_mem();
        commit(&store, &[up("10.0.0.1:8001")]).await;
        commit(
            &store,
            &[UpdateOp::AddTable {
                table: Table {
                    name: "t".to_string(),
                    partitions: vec![Partition {
                        id: 0,
                        state: PartitionState::Active as i32,
                        replicas: vec![Node::new("10.0.0.1", 8001)],
                    }],
                },
            }],
        )
        .await;

        let err = store
            .apply(&[UpdateOp::RemoveSlave {
                addr: "10.0.0.1:8001".to_string(),
                table: "t".to_string(),
                partition: 0,
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, MetaError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn unregistered_replica_fails_validation() {
        let (_cluster, store) = store_over_mem();
        commit(&store, &[up("10.0.0.1:8001")]).await;
        let err = store
            .apply(&[UpdateOp::AddTable {
                table: three_node_table("t"),
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, MetaError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn liveness_expiry_and_restore() {
        let (_cluster, store) = store_over_mem();
        assert!(store.update_node_alive("10.0.0.1:8001"));
        commit(&store, &[up("10.0.0.1:8001")]).await;

        // Known and UP: further heartbeats are not UpNode triggers.
        assert!(!store.update_node_alive("10.0.0.1:8001"));

        store.backdate_alive("10.0.0.1:8001", Duration::from_secs(120));
        assert_eq!(
            store.fetch_expired_nodes(),
            BTreeSet::from(["10.0.0.1:8001".to_string()])
        );

        // Election-time restore stamps every UP node fresh.
        store.restore_node_alive();
        assert!(store.fetch_expired_nodes().is_empty());

        // A DOWN node never shows up as expired.
        commit(
            &store,
            &[UpdateOp::DownNode {
                addr: "10.0.0.1:8001".to_string(),
            }],
        )
        .await;
        store.backdate_alive("10.0.0.1:8001", Duration::from_secs(120));
        assert!(store.fetch_expired_nodes().is_empty());

        // And a heartbeat from it asks for an UpNode again.
        assert!(store.update_node_alive("10.0.0.1:8001"));
    }

    #[tokio::test]
    async fn conflict_from_log_surfaces_as_conflict() {
        let (cluster, store) = store_over_mem();
        cluster.inject_conflicts(1);
        let err = store.apply(&[up("10.0.0.1:8001")]).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn batch_coalesces_into_one_revision() {
        let (_cluster, store) = store_over_mem();
        commit(
            &store,
            &[
                up("10.0.0.1:8001"),
                up("10.0.0.2:8001"),
                up("10.0.0.3:8001"),
                up("10.0.0.4:8001"),
            ],
        )
        .await;
        assert_eq!(store.epoch(), 1);
        commit(
            &store,
            &[UpdateOp::AddTable {
                table: three_node_table("t"),
            }],
        )
        .await;

        // Three slave adds against the same revision: one commit, one epoch.
        let committed = commit(
            &store,
            &[
                UpdateOp::AddSlave {
                    addr: "10.0.0.4:8001".to_string(),
                    table: "t".to_string(),
                    partition: 0,
                },
                UpdateOp::SetStuck {
                    table: "t".to_string(),
                    partition: 0,
                },
                UpdateOp::SetActive {
                    table: "t".to_string(),
                    partition: 0,
                },
            ],
        )
        .await;
        assert_eq!(committed, Some(3));
        assert_eq!(store.epoch(), 3);
        let table = store.table_meta("t").unwrap();
        assert_eq!(table.partitions[0].replicas.len(), 4);
        assert_eq!(table.partitions[0].state(), PartitionState::Active);
    }
}
