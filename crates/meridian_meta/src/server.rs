//! The meta server context: command handlers, the top-level cron, and the
//! node lifecycle.
//!
//! There is no process-global instance; everything handlers touch hangs off
//! one `MetaServer` value threaded through the dispatcher. Lifecycle is
//! `start` (poll the log until a topology snapshot loads, then bind and spawn
//! the workers) and `stop` (cancel and drain).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::condition::{
    self, ConditionCronConfig, ConditionOrigin, ConditionRegistry, NodeOffsetMap, OffsetCondition,
};
use crate::error::{MetaError, Result};
use crate::leader::{LeaderTracker, LeaderView};
use crate::log::MetaLog;
use crate::migrate::MigrateRegister;
use crate::proto::{
    self, meta_cmd_response, ListMetaResponse, ListNodeResponse, ListTableResponse, MetaCmd,
    MetaCmdResponse, MetaStatusResponse, Node, PingRequest, PingResponse, PullRequest,
    PullResponse, Table, META_PORT_SHIFT_CMD, META_PORT_SHIFT_LOG,
};
use crate::rpc_service;
use crate::store::{TopologyStore, UpdateOp};
use crate::updater::{self, UpdateHandle, UpdateTask, UpdaterConfig};

/// The cron sleeps in this many slices per pass so shutdown is observed at
/// every boundary.
const CRON_WAIT_COUNT: u32 = 10;

/// Startup refresh attempts before giving up on the log.
const STARTUP_REFRESH_RETRY: u32 = 100;

/// Replicas per partition when placement offers enough nodes.
const DEFAULT_REPLICA_COUNT: usize = 3;

#[derive(Clone, Debug)]
pub struct MetaServerConfig {
    pub local_ip: String,
    /// Base port; commands bind at `base + META_PORT_SHIFT_CMD`.
    pub base_port: i32,
    pub node_alive_ttl: Duration,
    pub cron_interval: Duration,
    pub condition_interval: Duration,
    pub condition_timeout: Duration,
    pub offset_gap_tolerance: u64,
    /// Relocations staged per `process_migrate` pass.
    pub migrate_once_count: usize,
    /// `process_migrate` retries inside one MIGRATE command.
    pub migrate_init_retry: u32,
    pub updater: UpdaterConfig,
}

impl Default for MetaServerConfig {
    fn default() -> Self {
        Self {
            local_ip: "127.0.0.1".to_string(),
            base_port: 9221,
            node_alive_ttl: Duration::from_secs(60),
            cron_interval: Duration::from_millis(100),
            condition_interval: Duration::from_millis(100),
            condition_timeout: Duration::from_secs(600),
            offset_gap_tolerance: 50,
            migrate_once_count: 8,
            migrate_init_retry: 3,
            updater: UpdaterConfig::default(),
        }
    }
}

#[derive(Default)]
pub struct ServerStats {
    query_num: AtomicU64,
    last_query_num: AtomicU64,
    last_qps: AtomicU64,
    last_roll: Mutex<Option<Instant>>,
}

impl ServerStats {
    pub fn incr_query(&self) {
        self.query_num.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_queries(&self) -> u64 {
        self.query_num.load(Ordering::Relaxed)
    }

    pub fn last_qps(&self) -> u64 {
        self.last_qps.load(Ordering::Relaxed)
    }

    /// Recompute the last-interval query rate. Called from the cron.
    pub fn roll(&self) {
        let now = Instant::now();
        let mut last_roll = self.last_roll.lock().unwrap();
        let total = self.query_num.load(Ordering::Relaxed);
        if let Some(previous) = last_roll.replace(now) {
            let elapsed_ms = previous.elapsed().as_millis().max(1) as u64;
            let delta = total.saturating_sub(self.last_query_num.load(Ordering::Relaxed));
            self.last_qps
                .store(delta.saturating_mul(1000) / elapsed_ms, Ordering::Relaxed);
        }
        self.last_query_num.store(total, Ordering::Relaxed);
    }
}

#[derive(Serialize)]
struct MetaStatusInfo {
    role: String,
    epoch: u64,
    query_num: u64,
    last_qps: u64,
    pending_conditions: usize,
    migrate_remaining: usize,
    log: String,
}

pub struct MetaServer {
    config: MetaServerConfig,
    log: Arc<dyn MetaLog>,
    store: Arc<TopologyStore>,
    updates: UpdateHandle,
    registry: Arc<ConditionRegistry>,
    offsets: Arc<NodeOffsetMap>,
    register: Arc<MigrateRegister>,
    leader: LeaderTracker,
    stats: ServerStats,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MetaServer {
    /// Bring the node up: load topology (polling the log until it has a
    /// snapshot, seeding one if this node is the first leader of a fresh
    /// ensemble), then bind the command port and spawn the workers.
    pub async fn start(config: MetaServerConfig, log: Arc<dyn MetaLog>) -> Result<Arc<Self>> {
        let shutdown = CancellationToken::new();
        let store = Arc::new(TopologyStore::new(log.clone(), config.node_alive_ttl));
        let register = Arc::new(MigrateRegister::new(log.clone()));
        let offsets = Arc::new(NodeOffsetMap::new());
        let registry = Arc::new(ConditionRegistry::new());

        let (updates, updater_task) = updater::spawn(
            store.clone(),
            register.clone(),
            config.updater,
            shutdown.clone(),
        );
        let condition_task = condition::spawn(
            registry.clone(),
            offsets.clone(),
            updates.clone(),
            ConditionCronConfig {
                interval: config.condition_interval,
                timeout: config.condition_timeout,
                offset_gap_tolerance: config.offset_gap_tolerance,
            },
            shutdown.clone(),
        );

        let server = Arc::new(Self {
            config,
            log,
            store,
            updates,
            registry,
            offsets,
            register,
            leader: LeaderTracker::new(),
            stats: ServerStats::default(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        });

        server.wait_until_ready().await?;

        let cmd_addr = server.cmd_addr();
        let listener = TcpListener::bind((server.config.local_ip.as_str(), cmd_addr.port as u16))
            .await
            .map_err(|err| MetaError::Io(format!("bind {}: {err}", cmd_addr.addr())))?;
        let accept_task = tokio::spawn(rpc_service::serve(
            server.clone(),
            listener,
            server.shutdown.clone(),
        ));
        let cron_task = tokio::spawn(cron_loop(server.clone()));

        server
            .tasks
            .lock()
            .unwrap()
            .extend([updater_task, condition_task, accept_task, cron_task]);
        tracing::info!(
            cmd = %cmd_addr.addr(),
            epoch = server.store.epoch(),
            "meta server started"
        );
        Ok(server)
    }

    /// Cancel every worker and wait for them to drain.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("meta server stopped");
    }

    pub fn is_leader(&self) -> bool {
        self.leader.is_leader()
    }

    pub fn epoch(&self) -> u64 {
        self.store.epoch()
    }

    pub fn store(&self) -> &TopologyStore {
        &self.store
    }

    pub(crate) fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn cmd_addr(&self) -> Node {
        Node::new(
            self.config.local_ip.clone(),
            self.config.base_port + META_PORT_SHIFT_CMD,
        )
    }

    pub(crate) fn leader_hint(&self) -> Option<Node> {
        self.leader.leader_hint(&self.cmd_addr())
    }

    pub(crate) async fn redirect(&self, cmd: MetaCmd) -> Result<MetaCmdResponse> {
        self.leader.redirect_to_leader(cmd).await
    }

    /// Poll the log until a topology snapshot loads, with backoff. The first
    /// leader of a fresh ensemble seeds revision zero inside
    /// `refresh_leader`, which unblocks everyone else's refresh.
    async fn wait_until_ready(&self) -> Result<()> {
        let mut delay = Duration::from_millis(50);
        for attempt in 1..=STARTUP_REFRESH_RETRY {
            if let Err(err) = self.refresh_leader().await {
                tracing::warn!(error = %err, "startup leader refresh failed");
            }
            match self.store.refresh().await {
                Ok(()) => {
                    tracing::info!(attempt, epoch = self.store.epoch(), "topology loaded");
                    return Ok(());
                }
                Err(err) if err.is_incomplete() => {
                    tracing::info!(attempt, "log has no topology snapshot yet");
                }
                // Corruption or I/O at startup is fatal.
                Err(err) => return Err(err),
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    return Err(MetaError::Incomplete("shutdown during startup".into()))
                }
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(Duration::from_secs(1));
        }
        Err(MetaError::Incomplete(
            "log produced no topology snapshot".to_string(),
        ))
    }

    /// Re-resolve the log's leader and walk the role state machine.
    pub(crate) async fn refresh_leader(&self) -> Result<()> {
        let new_view = match self.log.leader().await {
            None => LeaderView::NoLeader,
            Some(log_node) => {
                let base_port = log_node.port - META_PORT_SHIFT_LOG;
                if log_node.ip == self.config.local_ip && base_port == self.config.base_port {
                    LeaderView::Leader
                } else {
                    LeaderView::Follower {
                        addr: Node::new(log_node.ip, base_port + META_PORT_SHIFT_CMD),
                    }
                }
            }
        };

        let old = self.leader.view();
        if old == new_view {
            // Same role; make sure a follower still has its warm connection.
            if let LeaderView::Follower { addr } = &new_view {
                self.leader.ensure_connection(addr).await;
            }
            return Ok(());
        }

        tracing::warn!(from = ?old, to = ?new_view, "leader changed");
        if old == LeaderView::Leader {
            // Offsets and pending conditions are leader-local, not
            // replicated; the next leader rebuilds from pings and the
            // persisted migrate register.
            self.registry.clear();
            self.offsets.clear();
        }
        self.leader.set_view(new_view.clone()).await;

        match new_view {
            LeaderView::Leader => {
                self.store.bootstrap_if_empty().await?;
                self.store.refresh().await?;
                self.store.restore_node_alive();
                self.register.load().await?;
                tracing::info!(epoch = self.store.epoch(), "assumed meta leadership");
            }
            LeaderView::Follower { addr } => {
                self.leader.ensure_connection(&addr).await;
            }
            LeaderView::NoLeader => {}
        }
        Ok(())
    }

    /// Enqueue `DownNode` for every UP node whose heartbeat lapsed.
    async fn check_node_alive(&self) {
        for addr in self.store.fetch_expired_nodes() {
            tracing::info!(node = %addr, "heartbeat expired, marking node down");
            self.updates
                .pending_update(UpdateTask::new(UpdateOp::DownNode { addr }))
                .await;
        }
    }

    /// Restage a persisted migration that has no staged work, which happens
    /// right after this node took leadership over a half-finished plan.
    async fn sweep_migration(&self) {
        if self.register.remaining().await == 0 || self.register.staged().await > 0 {
            return;
        }
        if self.registry.migration_pending() > 0 {
            return;
        }
        tracing::info!("resuming persisted migration");
        if let Err(err) = self.process_migrate().await {
            tracing::warn!(error = %err, "migration resume pass failed");
        }
    }

    pub(crate) async fn do_timing_task(&self) {
        if let Err(err) = self.refresh_leader().await {
            tracing::warn!(error = %err, "leader refresh failed");
        }

        // Followers learn committed revisions only by re-reading the log.
        if !self.leader.is_leader() {
            if let Err(err) = self.store.refresh().await {
                if !err.is_incomplete() {
                    tracing::warn!(error = %err, "topology refresh failed");
                }
            }
        }

        self.stats.roll();
        tracing::debug!(
            queries = self.stats.total_queries(),
            qps = self.stats.last_qps(),
            "cron pass"
        );

        if self.leader.is_leader() {
            self.check_node_alive().await;
            self.sweep_migration().await;
        }
    }

    pub(crate) async fn handle_ping(&self, req: PingRequest) -> Result<MetaCmdResponse> {
        let node = req
            .node
            .ok_or_else(|| MetaError::InvalidArgument("ping without node".to_string()))?;
        self.offsets.update_from_ping(&node, &req.offsets);

        let addr = node.addr();
        if self.store.update_node_alive(&addr) {
            tracing::info!(node = %addr, "heartbeat from new or downed node");
            self.updates
                .pending_update(UpdateTask::new(UpdateOp::UpNode { addr }))
                .await;
        }

        Ok(MetaCmdResponse::ok(meta_cmd_response::Payload::Ping(
            PingResponse {
                epoch: self.store.epoch(),
            },
        )))
    }

    pub(crate) async fn handle_pull(&self, req: PullRequest) -> Result<MetaCmdResponse> {
        let target = req
            .target
            .ok_or_else(|| MetaError::InvalidArgument("pull without target".to_string()))?;

        // One snapshot serves both the epoch and the table bodies, so the
        // pair is consistent without holding any lock.
        let snapshot = self.store.snapshot();
        let tables: Vec<Table> = match target {
            proto::pull_request::Target::Table(name) => {
                let table = snapshot
                    .tables
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| MetaError::NotFound(format!("table {name}")))?;
                vec![table]
            }
            proto::pull_request::Target::Node(addr) => snapshot
                .tables
                .values()
                .filter(|table| {
                    table
                        .partitions
                        .iter()
                        .any(|p| p.replicas.iter().any(|r| r.addr() == addr))
                })
                .cloned()
                .collect(),
        };

        Ok(MetaCmdResponse::ok(meta_cmd_response::Payload::Pull(
            PullResponse {
                epoch: snapshot.epoch,
                tables,
            },
        )))
    }

    pub(crate) async fn handle_init(&self, req: proto::InitRequest) -> Result<MetaCmdResponse> {
        if req.name.is_empty() {
            return Err(MetaError::InvalidArgument("empty table name".to_string()));
        }
        if req.partition_count == 0 {
            return Err(MetaError::InvalidArgument(
                "partition count must be positive".to_string(),
            ));
        }
        if req.placement.is_empty() {
            return Err(MetaError::InvalidArgument("empty placement".to_string()));
        }

        let snapshot = self.store.snapshot();
        if snapshot.tables.contains_key(&req.name) {
            return Err(MetaError::AlreadyExists(format!("table {}", req.name)));
        }
        let mut seen = std::collections::BTreeSet::new();
        for node in &req.placement {
            let addr = node.addr();
            if !seen.insert(addr.clone()) {
                return Err(MetaError::InvalidArgument(format!(
                    "node {addr} listed twice in placement"
                )));
            }
            if !snapshot.nodes.contains_key(&addr) {
                return Err(MetaError::InvalidArgument(format!(
                    "placement node {addr} is not registered"
                )));
            }
        }

        let table = build_table(&req.name, req.partition_count, &req.placement);
        self.updates
            .pending_update(UpdateTask::new(UpdateOp::AddTable { table }))
            .await;
        tracing::info!(table = %req.name, partitions = req.partition_count, "table init queued");
        Ok(MetaCmdResponse::ok_empty())
    }

    pub(crate) async fn handle_set_master(
        &self,
        req: proto::SetMasterRequest,
    ) -> Result<MetaCmdResponse> {
        let node = req
            .node
            .ok_or_else(|| MetaError::InvalidArgument("set_master without node".to_string()))?;
        let master = self.store.partition_master(&req.table, req.partition)?;
        if master.addr() == node.addr() {
            return Err(MetaError::InvalidArgument(format!(
                "{} is already the master of {}:{}",
                node.addr(),
                req.table,
                req.partition
            )));
        }
        let table_meta = self.store.table_meta(&req.table)?;
        let is_slave = table_meta
            .partitions
            .iter()
            .find(|p| p.id == req.partition)
            .map(|p| p.replicas.iter().any(|r| r.addr() == node.addr()))
            .unwrap_or(false);
        if !is_slave {
            return Err(MetaError::InvalidArgument(format!(
                "{} is not a slave of {}:{}",
                node.addr(),
                req.table,
                req.partition
            )));
        }

        // Fence the partition now; promote once the candidate has caught the
        // current master.
        self.updates
            .pending_update(UpdateTask::new(UpdateOp::SetStuck {
                table: req.table.clone(),
                partition: req.partition,
            }))
            .await;
        self.registry.add(
            OffsetCondition {
                table: req.table.clone(),
                partition: req.partition,
                reference: master,
                candidate: node.clone(),
            },
            vec![UpdateTask::new(UpdateOp::SetMaster {
                addr: node.addr(),
                table: req.table.clone(),
                partition: req.partition,
            })],
            ConditionOrigin::MasterSwitch,
        );
        tracing::info!(
            table = %req.table,
            partition = req.partition,
            candidate = %node.addr(),
            "master switch pending on catch-up"
        );
        Ok(MetaCmdResponse::ok_empty())
    }

    pub(crate) async fn handle_add_slave(
        &self,
        req: proto::AddSlaveRequest,
    ) -> Result<MetaCmdResponse> {
        let node = req
            .node
            .ok_or_else(|| MetaError::InvalidArgument("add_slave without node".to_string()))?;
        let addr = node.addr();
        let snapshot = self.store.snapshot();
        let table = snapshot
            .tables
            .get(&req.table)
            .ok_or_else(|| MetaError::NotFound(format!("table {}", req.table)))?;
        let partition = table
            .partitions
            .iter()
            .find(|p| p.id == req.partition)
            .ok_or_else(|| {
                MetaError::NotFound(format!("partition {}:{}", req.table, req.partition))
            })?;
        if !snapshot.nodes.contains_key(&addr) {
            return Err(MetaError::InvalidArgument(format!(
                "node {addr} is not registered"
            )));
        }
        if partition.replicas.iter().any(|r| r.addr() == addr) {
            // Already serving: nothing to queue.
            return Ok(MetaCmdResponse::ok_empty());
        }

        self.updates
            .pending_update(UpdateTask::new(UpdateOp::AddSlave {
                addr,
                table: req.table,
                partition: req.partition,
            }))
            .await;
        Ok(MetaCmdResponse::ok_empty())
    }

    pub(crate) async fn handle_remove_slave(
        &self,
        req: proto::RemoveSlaveRequest,
    ) -> Result<MetaCmdResponse> {
        let node = req
            .node
            .ok_or_else(|| MetaError::InvalidArgument("remove_slave without node".to_string()))?;
        let addr = node.addr();
        let master = self.store.partition_master(&req.table, req.partition)?;
        if master.addr() == addr {
            return Err(MetaError::InvalidArgument(format!(
                "{addr} is the master of {}:{}",
                req.table, req.partition
            )));
        }

        self.updates
            .pending_update(UpdateTask::new(UpdateOp::RemoveSlave {
                addr,
                table: req.table,
                partition: req.partition,
            }))
            .await;
        Ok(MetaCmdResponse::ok_empty())
    }

    pub(crate) async fn handle_list_table(&self) -> Result<MetaCmdResponse> {
        Ok(MetaCmdResponse::ok(meta_cmd_response::Payload::ListTable(
            ListTableResponse {
                names: self.store.table_list().into_iter().collect(),
            },
        )))
    }

    pub(crate) async fn handle_list_node(&self) -> Result<MetaCmdResponse> {
        Ok(MetaCmdResponse::ok(meta_cmd_response::Payload::ListNode(
            ListNodeResponse {
                nodes: self.store.all_nodes().into_values().collect(),
            },
        )))
    }

    /// Ensemble membership, reported in base-port space.
    pub(crate) async fn handle_list_meta(&self) -> Result<MetaCmdResponse> {
        let leader = self
            .log
            .leader()
            .await
            .map(|node| Node::new(node.ip, node.port - META_PORT_SHIFT_LOG));
        let mut followers = Vec::new();
        for peer in self.log.peers().await {
            let base = Node::new(peer.ip, peer.port - META_PORT_SHIFT_LOG);
            if Some(&base) != leader.as_ref() {
                followers.push(base);
            }
        }
        Ok(MetaCmdResponse::ok(meta_cmd_response::Payload::ListMeta(
            ListMetaResponse { leader, followers },
        )))
    }

    pub(crate) async fn handle_meta_status(&self) -> Result<MetaCmdResponse> {
        let role = match self.leader.view() {
            LeaderView::NoLeader => "no_leader",
            LeaderView::Leader => "leader",
            LeaderView::Follower { .. } => "follower",
        };
        let info = MetaStatusInfo {
            role: role.to_string(),
            epoch: self.store.epoch(),
            query_num: self.stats.total_queries(),
            last_qps: self.stats.last_qps(),
            pending_conditions: self.registry.pending(),
            migrate_remaining: self.register.remaining().await,
            log: self.log.status().await,
        };
        let status = serde_json::to_string_pretty(&info)
            .map_err(|err| MetaError::Corruption(format!("status encoding: {err}")))?;
        Ok(MetaCmdResponse::ok(meta_cmd_response::Payload::MetaStatus(
            MetaStatusResponse { status },
        )))
    }

    pub(crate) async fn handle_drop_table(
        &self,
        req: proto::DropTableRequest,
    ) -> Result<MetaCmdResponse> {
        if !self.store.table_list().contains(&req.name) {
            return Err(MetaError::NotFound(format!("table {}", req.name)));
        }
        self.updates
            .pending_update(UpdateTask::new(UpdateOp::DropTable { name: req.name }))
            .await;
        Ok(MetaCmdResponse::ok_empty())
    }

    pub(crate) async fn handle_migrate(
        &self,
        req: proto::MigrateRequest,
    ) -> Result<MetaCmdResponse> {
        if req.items.is_empty() {
            return Err(MetaError::InvalidArgument(
                "migration without relocations".to_string(),
            ));
        }
        let current = self.store.epoch();
        if req.epoch != current {
            return Err(MetaError::InvalidArgument(format!(
                "expired epoch {} (current {current})",
                req.epoch
            )));
        }
        for item in &req.items {
            if item.left.is_none() || item.right.is_none() {
                return Err(MetaError::InvalidArgument(format!(
                    "relocation {}:{} without endpoints",
                    item.table, item.partition
                )));
            }
        }

        self.register.init(req.items).await?;

        let mut result = self.process_migrate().await;
        let mut retry = self.config.migrate_init_retry;
        while result.as_ref().err().map_or(false, |e| e.is_incomplete()) && retry > 0 {
            retry -= 1;
            result = self.process_migrate().await;
        }
        result.map(|_| MetaCmdResponse::ok_empty())
    }

    /// Stage the next batch of relocations: add the target replica, fence the
    /// partition, and park the cut-over on the target catching up with the
    /// source. `Incomplete` when nothing could be staged.
    pub(crate) async fn process_migrate(&self) -> Result<()> {
        let items = match self.register.get_n(self.config.migrate_once_count).await {
            Ok(items) => items,
            Err(err) if err.is_not_found() => {
                tracing::info!("no migration to process");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        let mut staged = false;
        for item in items {
            let (Some(left), Some(right)) = (item.left.clone(), item.right.clone()) else {
                tracing::warn!(
                    table = %item.table,
                    partition = item.partition,
                    "skipping relocation without endpoints"
                );
                continue;
            };
            self.updates
                .pending_update(UpdateTask::new(UpdateOp::AddSlave {
                    addr: right.addr(),
                    table: item.table.clone(),
                    partition: item.partition,
                }))
                .await;
            self.updates
                .pending_update(UpdateTask::new(UpdateOp::SetStuck {
                    table: item.table.clone(),
                    partition: item.partition,
                }))
                .await;
            self.registry.add(
                OffsetCondition {
                    table: item.table.clone(),
                    partition: item.partition,
                    reference: left.clone(),
                    candidate: right.clone(),
                },
                vec![
                    UpdateTask::with_ack(
                        UpdateOp::RemoveSlave {
                            addr: left.addr(),
                            table: item.table.clone(),
                            partition: item.partition,
                        },
                        item.clone(),
                    ),
                    UpdateTask::new(UpdateOp::SetActive {
                        table: item.table.clone(),
                        partition: item.partition,
                    }),
                ],
                ConditionOrigin::Migration,
            );
            tracing::info!(
                table = %item.table,
                partition = item.partition,
                from = %left.addr(),
                to = %right.addr(),
                "relocation staged"
            );
            staged = true;
        }

        if !staged {
            return Err(MetaError::Incomplete("no relocation staged".to_string()));
        }
        Ok(())
    }

    pub(crate) async fn handle_cancel_migrate(&self) -> Result<MetaCmdResponse> {
        self.register.cancel().await?;
        self.registry.cancel_migration_entries();
        tracing::info!("migration cancelled");
        Ok(MetaCmdResponse::ok_empty())
    }
}

/// Round-robin placement: partition `i` is mastered by `placement[i % n]`
/// and followed by the next `rf - 1` nodes.
fn build_table(name: &str, partition_count: u32, placement: &[Node]) -> Table {
    let replica_count = DEFAULT_REPLICA_COUNT.min(placement.len());
    let partitions = (0..partition_count)
        .map(|id| {
            let replicas = (0..replica_count)
                .map(|offset| placement[(id as usize + offset) % placement.len()].clone())
                .collect();
            proto::Partition {
                id,
                state: proto::PartitionState::Active as i32,
                replicas,
            }
        })
        .collect();
    Table {
        name: name.to_string(),
        partitions,
    }
}

async fn cron_loop(server: Arc<MetaServer>) {
    loop {
        for _ in 0..CRON_WAIT_COUNT {
            tokio::select! {
                _ = server.shutdown.cancelled() => {
                    tracing::debug!("cron stopped");
                    return;
                }
                _ = tokio::time::sleep(server.config.cron_interval) => {}
            }
        }
        server.do_timing_task().await;
    }
}
