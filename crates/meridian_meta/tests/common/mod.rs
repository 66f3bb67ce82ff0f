//! Shared helpers for integration tests: an in-process meta ensemble over a
//! shared `MemCluster` log with a settable leader.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::{Duration, Instant};

use meridian_meta::log::{MemCluster, MetaLog};
use meridian_meta::proto::{
    BinlogOffset, Node, PartitionOffset, META_PORT_SHIFT_CMD, META_PORT_SHIFT_LOG,
};
use meridian_meta::updater::UpdaterConfig;
use meridian_meta::{MetaClient, MetaServer, MetaServerConfig};

/// Per-call client timeout.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for condition polling loops.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TestCluster {
    pub mem: Arc<MemCluster>,
    pub servers: Vec<Arc<MetaServer>>,
    pub bases: Vec<i32>,
}

impl TestCluster {
    /// Start `n` meta nodes over one shared in-process log, with member 0
    /// elected before anything comes up.
    pub async fn start(n: usize) -> Self {
        let bases: Vec<i32> = (0..n).map(|_| reserve_base_port()).collect();
        let members: Vec<Node> = bases
            .iter()
            .map(|base| Node::new("127.0.0.1", base + META_PORT_SHIFT_LOG))
            .collect();
        let mem = MemCluster::new(members);
        mem.set_leader(Some(0));

        let mut servers = Vec::new();
        for (index, base) in bases.iter().enumerate() {
            let log: Arc<dyn MetaLog> = Arc::new(mem.handle(index));
            let server = MetaServer::start(fast_config(*base), log)
                .await
                .expect("meta server start");
            servers.push(server);
        }
        Self {
            mem,
            servers,
            bases,
        }
    }

    pub fn cmd_addr(&self, index: usize) -> Node {
        Node::new("127.0.0.1", self.bases[index] + META_PORT_SHIFT_CMD)
    }

    pub async fn client(&self, index: usize) -> MetaClient {
        MetaClient::connect(self.cmd_addr(index), CLIENT_TIMEOUT)
            .await
            .expect("client connect")
    }

    /// Hand leadership to member `index` and wait for its server to notice.
    pub async fn elect(&self, index: usize) {
        self.mem.set_leader(Some(index));
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while !self.servers[index].is_leader() {
            assert!(
                Instant::now() < deadline,
                "server {index} never assumed leadership"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn stop(&self) {
        for server in &self.servers {
            server.stop().await;
        }
    }
}

fn fast_config(base_port: i32) -> MetaServerConfig {
    MetaServerConfig {
        local_ip: "127.0.0.1".to_string(),
        base_port,
        node_alive_ttl: Duration::from_secs(60),
        cron_interval: Duration::from_millis(5),
        condition_interval: Duration::from_millis(10),
        condition_timeout: Duration::from_secs(60),
        offset_gap_tolerance: 0,
        migrate_once_count: 4,
        migrate_init_retry: 3,
        updater: UpdaterConfig::default(),
    }
}

/// Grab an ephemeral port for the command listener and derive the base port
/// from it.
fn reserve_base_port() -> i32 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("reserve port");
    let port = listener.local_addr().expect("local addr").port();
    port as i32 - META_PORT_SHIFT_CMD
}

pub fn storage_node(last_octet: u8) -> Node {
    Node::new(format!("10.0.0.{last_octet}"), 8001)
}

pub fn offset_report(table: &str, partition: u32, filenum: u64, offset: u64) -> PartitionOffset {
    PartitionOffset {
        table: table.to_string(),
        partition,
        offset: Some(BinlogOffset::new(filenum, offset)),
    }
}

/// Ping each node once and wait until the topology lists them all UP.
pub async fn register_storage_nodes(client: &mut MetaClient, nodes: &[Node]) {
    for node in nodes {
        client.ping(node.clone(), Vec::new()).await.expect("ping");
    }
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        let listed = client.list_node().await.expect("list_node");
        let all_up = nodes.iter().all(|node| {
            listed.iter().any(|state| {
                state.node.as_ref().map(|n| n.addr()) == Some(node.addr())
                    && state.status() == meridian_meta::proto::NodeStatus::Up
            })
        });
        if all_up {
            return;
        }
        assert!(Instant::now() < deadline, "nodes never registered");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
