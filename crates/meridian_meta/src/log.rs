//! Replicated-log boundary.
//!
//! Consensus itself is an external collaborator: the meta node only assumes a
//! linearizable key-value store with leader election. `MetaLog` is that
//! contract. `FjallLog` is the single-node engine used for stand-alone runs;
//! `MemLog` is an in-process ensemble with a settable leader, used by the
//! integration harness and embedders.
//!
//! Addresses reported by a log live in log-port space (base port plus
//! `META_PORT_SHIFT_LOG`); callers translate back to base-port space.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};

use crate::error::{MetaError, Result};
use crate::proto::Node;

#[async_trait]
pub trait MetaLog: Send + Sync + 'static {
    /// Read a key. `NotFound` if absent.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Linearizable write through the leader. `Conflict` when the write lost
    /// to a concurrent one, `Io` on engine failure.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Current leader in log-port space, if one is elected.
    async fn leader(&self) -> Option<Node>;

    /// All ensemble members in log-port space.
    async fn peers(&self) -> Vec<Node>;

    /// Engine status text for operator introspection.
    async fn status(&self) -> String;
}

/// Single-node log engine over a fjall keyspace at the data path. Always its
/// own leader.
pub struct FjallLog {
    keyspace: Keyspace,
    partition: PartitionHandle,
    local: Node,
    peers: Vec<Node>,
}

impl FjallLog {
    /// Open (or create) the engine under `path`. `local` and `peers` are
    /// log-port-space addresses.
    pub fn open(path: impl AsRef<Path>, local: Node, peers: Vec<Node>) -> Result<Self> {
        let keyspace = fjall::Config::new(path)
            .open()
            .map_err(|err| MetaError::Io(format!("open log keyspace: {err}")))?;
        let partition = keyspace
            .open_partition("meta", PartitionCreateOptions::default())
            .map_err(|err| MetaError::Io(format!("open log partition: {err}")))?;
        Ok(Self {
            keyspace,
            partition,
            local,
            peers,
        })
    }
}

#[async_trait]
impl MetaLog for FjallLog {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        match self.partition.get(key) {
            Ok(Some(value)) => Ok(value.to_vec()),
            Ok(None) => Err(MetaError::NotFound(format!("log key {key}"))),
            Err(err) => Err(MetaError::Io(format!("log get {key}: {err}"))),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.partition
            .insert(key, value)
            .map_err(|err| MetaError::Io(format!("log set {key}: {err}")))?;
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(|err| MetaError::Io(format!("log persist: {err}")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.partition
            .remove(key)
            .map_err(|err| MetaError::Io(format!("log delete {key}: {err}")))?;
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(|err| MetaError::Io(format!("log persist: {err}")))
    }

    async fn leader(&self) -> Option<Node> {
        Some(self.local.clone())
    }

    async fn peers(&self) -> Vec<Node> {
        if self.peers.is_empty() {
            vec![self.local.clone()]
        } else {
            self.peers.clone()
        }
    }

    async fn status(&self) -> String {
        format!(
            "engine=fjall local={} peers={} journal_disk={}",
            self.local.addr(),
            self.peers.len().max(1),
            self.keyspace.disk_space()
        )
    }
}

/// Shared state behind every `MemLog` handle of one in-process ensemble.
pub struct MemCluster {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    leader: Mutex<Option<usize>>,
    members: Vec<Node>,
    conflicts_to_inject: AtomicU32,
    io_failures_to_inject: AtomicU32,
}

impl MemCluster {
    /// Build an ensemble whose members live at the given log-port-space
    /// addresses. No leader until `set_leader`.
    pub fn new(members: Vec<Node>) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            leader: Mutex::new(None),
            members,
            conflicts_to_inject: AtomicU32::new(0),
            io_failures_to_inject: AtomicU32::new(0),
        })
    }

    pub fn handle(self: &Arc<Self>, member: usize) -> MemLog {
        assert!(member < self.members.len());
        MemLog {
            cluster: self.clone(),
        }
    }

    /// Elect the member at `index`, or demote everyone with `None`.
    pub fn set_leader(&self, index: Option<usize>) {
        *self.leader.lock().unwrap() = index;
    }

    /// Fail the next `n` writes with `Conflict`.
    pub fn inject_conflicts(&self, n: u32) {
        self.conflicts_to_inject.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` writes with `Io`.
    pub fn inject_io_failures(&self, n: u32) {
        self.io_failures_to_inject.store(n, Ordering::SeqCst);
    }

    pub fn raw_get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn take_injection(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// One member's handle onto a `MemCluster`.
#[derive(Clone)]
pub struct MemLog {
    cluster: Arc<MemCluster>,
}

#[async_trait]
impl MetaLog for MemLog {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.cluster
            .raw_get(key)
            .ok_or_else(|| MetaError::NotFound(format!("log key {key}")))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if MemCluster::take_injection(&self.cluster.conflicts_to_inject) {
            return Err(MetaError::Conflict(format!("log set {key}")));
        }
        if MemCluster::take_injection(&self.cluster.io_failures_to_inject) {
            return Err(MetaError::Io(format!("log set {key}")));
        }
        self.cluster
            .entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.cluster.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn leader(&self) -> Option<Node> {
        let leader = *self.cluster.leader.lock().unwrap();
        leader.map(|index| self.cluster.members[index].clone())
    }

    async fn peers(&self) -> Vec<Node> {
        self.cluster.members.clone()
    }

    async fn status(&self) -> String {
        let leader = *self.cluster.leader.lock().unwrap();
        format!(
            "engine=mem members={} leader={}",
            self.cluster.members.len(),
            leader.map_or_else(|| "none".to_string(), |i| i.to_string())
        )
    }
}
