//! Protobuf messages for the meta command protocol and the blobs persisted in
//! the replicated log.
//!
//! The same message types serve both purposes: handlers keep `Table` /
//! `NodeSet` values in memory exactly as they are serialized, so a `Pull`
//! response is a byte-faithful view of the committed revision.

use prost::Message;

use crate::error::{MetaError, Result};

/// Shift from a node's base port to its client command port.
pub const META_PORT_SHIFT_CMD: i32 = 100;
/// Shift from a node's base port to the replicated-log internal port.
pub const META_PORT_SHIFT_LOG: i32 = 3000;

/// Well-known keys in the replicated log.
pub const KEY_NODES: &str = "nodes";
pub const KEY_TABLES: &str = "tables";
pub const KEY_MIGRATE: &str = "migrate";
pub const KEY_EPOCH: &str = "epoch";

/// Log key holding the serialized body of one table.
pub fn table_key(name: &str) -> String {
    format!("t_{name}")
}

#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct Node {
    #[prost(string, tag = "1")]
    pub ip: String,
    #[prost(int32, tag = "2")]
    pub port: i32,
}

impl Node {
    pub fn new(ip: impl Into<String>, port: i32) -> Self {
        Self { ip: ip.into(), port }
    }

    /// Canonical `"ip:port"` form used as a map key everywhere.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Parse a canonical `"ip:port"` address.
pub fn parse_node_addr(addr: &str) -> Result<Node> {
    let (ip, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| MetaError::Corruption(format!("bad node address: {addr}")))?;
    if ip.is_empty() {
        return Err(MetaError::Corruption(format!("bad node address: {addr}")));
    }
    let port: i32 = port
        .parse()
        .map_err(|_| MetaError::Corruption(format!("bad node address: {addr}")))?;
    Ok(Node::new(ip, port))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
#[repr(i32)]
pub enum NodeStatus {
    Up = 0,
    Down = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeState {
    #[prost(message, optional, tag = "1")]
    pub node: Option<Node>,
    #[prost(enumeration = "NodeStatus", tag = "2")]
    pub status: i32,
}

impl NodeState {
    pub fn new(node: Node, status: NodeStatus) -> Self {
        Self {
            node: Some(node),
            status: status as i32,
        }
    }
}

/// The persisted `nodes` blob: every storage node ever registered.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeSet {
    #[prost(message, repeated, tag = "1")]
    pub nodes: Vec<NodeState>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum PartitionState {
    Active = 0,
    Stuck = 1,
    Slowdown = 2,
}

/// One shard of a table. Replica 0 is the master.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Partition {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(enumeration = "PartitionState", tag = "2")]
    pub state: i32,
    #[prost(message, repeated, tag = "3")]
    pub replicas: Vec<Node>,
}

impl Partition {
    pub fn master(&self) -> Option<&Node> {
        self.replicas.first()
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Table {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub partitions: Vec<Partition>,
}

/// The persisted `tables` blob: just the list of table names; each body lives
/// under its own `t_<name>` key.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TableIndex {
    #[prost(string, repeated, tag = "1")]
    pub names: Vec<String>,
}

/// Position in a replica's write-ahead stream. Field order gives the
/// lexicographic `(filenum, offset)` comparison.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, ::prost::Message)]
pub struct BinlogOffset {
    #[prost(uint64, tag = "1")]
    pub filenum: u64,
    #[prost(uint64, tag = "2")]
    pub offset: u64,
}

impl BinlogOffset {
    pub fn new(filenum: u64, offset: u64) -> Self {
        Self { filenum, offset }
    }
}

/// Replication progress for one partition, as reported in a PING.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PartitionOffset {
    #[prost(string, tag = "1")]
    pub table: String,
    #[prost(uint32, tag = "2")]
    pub partition: u32,
    #[prost(message, optional, tag = "3")]
    pub offset: Option<BinlogOffset>,
}

/// One partition relocation intent: move ownership from `left` to `right`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RelocationItem {
    #[prost(string, tag = "1")]
    pub table: String,
    #[prost(uint32, tag = "2")]
    pub partition: u32,
    #[prost(message, optional, tag = "3")]
    pub left: Option<Node>,
    #[prost(message, optional, tag = "4")]
    pub right: Option<Node>,
}

/// The persisted `migrate` blob: the remaining relocation queue, in order.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RelocationSet {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<RelocationItem>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    NotFound = 1,
    Corruption = 2,
    InvalidArgument = 3,
    AlreadyExists = 4,
    Conflict = 5,
    Incomplete = 6,
    IoError = 7,
    Timeout = 8,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PingRequest {
    #[prost(message, optional, tag = "1")]
    pub node: Option<Node>,
    #[prost(message, repeated, tag = "2")]
    pub offsets: Vec<PartitionOffset>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PingResponse {
    #[prost(uint64, tag = "1")]
    pub epoch: u64,
}

pub mod pull_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Target {
        /// Snapshot of one named table.
        #[prost(string, tag = "1")]
        Table(String),
        /// Snapshot of every table a node (`"ip:port"`) participates in.
        #[prost(string, tag = "2")]
        Node(String),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PullRequest {
    #[prost(oneof = "pull_request::Target", tags = "1, 2")]
    pub target: Option<pull_request::Target>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PullResponse {
    #[prost(uint64, tag = "1")]
    pub epoch: u64,
    #[prost(message, repeated, tag = "2")]
    pub tables: Vec<Table>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InitRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint32, tag = "2")]
    pub partition_count: u32,
    #[prost(message, repeated, tag = "3")]
    pub placement: Vec<Node>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetMasterRequest {
    #[prost(message, optional, tag = "1")]
    pub node: Option<Node>,
    #[prost(string, tag = "2")]
    pub table: String,
    #[prost(uint32, tag = "3")]
    pub partition: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddSlaveRequest {
    #[prost(message, optional, tag = "1")]
    pub node: Option<Node>,
    #[prost(string, tag = "2")]
    pub table: String,
    #[prost(uint32, tag = "3")]
    pub partition: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoveSlaveRequest {
    #[prost(message, optional, tag = "1")]
    pub node: Option<Node>,
    #[prost(string, tag = "2")]
    pub table: String,
    #[prost(uint32, tag = "3")]
    pub partition: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListTableRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListTableResponse {
    #[prost(string, repeated, tag = "1")]
    pub names: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListNodeRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListNodeResponse {
    #[prost(message, repeated, tag = "1")]
    pub nodes: Vec<NodeState>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListMetaRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListMetaResponse {
    #[prost(message, optional, tag = "1")]
    pub leader: Option<Node>,
    #[prost(message, repeated, tag = "2")]
    pub followers: Vec<Node>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetaStatusRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetaStatusResponse {
    #[prost(string, tag = "1")]
    pub status: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DropTableRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MigrateRequest {
    #[prost(uint64, tag = "1")]
    pub epoch: u64,
    #[prost(message, repeated, tag = "2")]
    pub items: Vec<RelocationItem>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelMigrateRequest {}

pub mod meta_cmd {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        Ping(super::PingRequest),
        #[prost(message, tag = "2")]
        Pull(super::PullRequest),
        #[prost(message, tag = "3")]
        Init(super::InitRequest),
        #[prost(message, tag = "4")]
        SetMaster(super::SetMasterRequest),
        #[prost(message, tag = "5")]
        AddSlave(super::AddSlaveRequest),
        #[prost(message, tag = "6")]
        RemoveSlave(super::RemoveSlaveRequest),
        #[prost(message, tag = "7")]
        ListTable(super::ListTableRequest),
        #[prost(message, tag = "8")]
        ListNode(super::ListNodeRequest),
        #[prost(message, tag = "9")]
        ListMeta(super::ListMetaRequest),
        #[prost(message, tag = "10")]
        MetaStatus(super::MetaStatusRequest),
        #[prost(message, tag = "11")]
        DropTable(super::DropTableRequest),
        #[prost(message, tag = "12")]
        Migrate(super::MigrateRequest),
        #[prost(message, tag = "13")]
        CancelMigrate(super::CancelMigrateRequest),
    }
}

/// A client request: a tagged union over the command set.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetaCmd {
    #[prost(oneof = "meta_cmd::Payload", tags = "1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13")]
    pub payload: Option<meta_cmd::Payload>,
}

pub mod meta_cmd_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "4")]
        Ping(super::PingResponse),
        #[prost(message, tag = "5")]
        Pull(super::PullResponse),
        #[prost(message, tag = "6")]
        ListTable(super::ListTableResponse),
        #[prost(message, tag = "7")]
        ListNode(super::ListNodeResponse),
        #[prost(message, tag = "8")]
        ListMeta(super::ListMetaResponse),
        #[prost(message, tag = "9")]
        MetaStatus(super::MetaStatusResponse),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MetaCmdResponse {
    #[prost(enumeration = "StatusCode", tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub msg: String,
    /// Filled on follower rejections so the client can retry at the leader.
    #[prost(message, optional, tag = "3")]
    pub leader_hint: Option<Node>,
    #[prost(oneof = "meta_cmd_response::Payload", tags = "4, 5, 6, 7, 8, 9")]
    pub payload: Option<meta_cmd_response::Payload>,
}

impl MetaCmdResponse {
    pub fn ok(payload: meta_cmd_response::Payload) -> Self {
        Self {
            code: StatusCode::Ok as i32,
            msg: String::new(),
            leader_hint: None,
            payload: Some(payload),
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            code: StatusCode::Ok as i32,
            msg: String::new(),
            leader_hint: None,
            payload: None,
        }
    }

    pub fn from_error(err: &MetaError) -> Self {
        Self {
            code: err.code() as i32,
            msg: err.to_string(),
            leader_hint: None,
            payload: None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::try_from(self.code).unwrap_or(StatusCode::Corruption)
    }
}

/// Command flag consulted by the dispatcher before invoking a handler.
pub const FLAG_READ: u32 = 1;
pub const FLAG_WRITE: u32 = 1 << 1;
/// Followers forward flagged commands to the leader instead of rejecting.
pub const FLAG_REDIRECT: u32 = 1 << 2;

impl meta_cmd::Payload {
    pub fn flags(&self) -> u32 {
        use meta_cmd::Payload::*;
        match self {
            Ping(_) => FLAG_READ | FLAG_REDIRECT,
            Pull(_) => FLAG_READ,
            ListTable(_) | ListNode(_) | ListMeta(_) | MetaStatus(_) => FLAG_READ,
            Init(_) | SetMaster(_) | AddSlave(_) | RemoveSlave(_) | DropTable(_) | Migrate(_)
            | CancelMigrate(_) => FLAG_WRITE | FLAG_REDIRECT,
        }
    }

    pub fn name(&self) -> &'static str {
        use meta_cmd::Payload::*;
        match self {
            Ping(_) => "ping",
            Pull(_) => "pull",
            Init(_) => "init",
            SetMaster(_) => "set_master",
            AddSlave(_) => "add_slave",
            RemoveSlave(_) => "remove_slave",
            ListTable(_) => "list_table",
            ListNode(_) => "list_node",
            ListMeta(_) => "list_meta",
            MetaStatus(_) => "meta_status",
            DropTable(_) => "drop_table",
            Migrate(_) => "migrate",
            CancelMigrate(_) => "cancel_migrate",
        }
    }
}

/// Encode the `epoch` log value (big-endian u64).
pub fn encode_epoch(epoch: u64) -> Vec<u8> {
    epoch.to_be_bytes().to_vec()
}

/// Decode the `epoch` log value.
pub fn decode_epoch(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| MetaError::Corruption(format!("epoch value has {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

pub fn decode_blob<M: Message + Default>(bytes: &[u8]) -> Result<M> {
    M::decode(bytes).map_err(MetaError::from)
}
