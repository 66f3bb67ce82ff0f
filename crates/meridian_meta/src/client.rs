//! Client side of the meta command protocol: length-prefixed protobuf frames
//! over TCP, one in-flight request per connection.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use prost::Message;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::{MetaError, Result};
use crate::proto::{
    meta_cmd, meta_cmd_response, AddSlaveRequest, CancelMigrateRequest, DropTableRequest,
    InitRequest, ListMetaRequest, ListMetaResponse, ListNodeRequest, ListTableRequest, MetaCmd,
    MetaCmdResponse, MetaStatusRequest, MigrateRequest, Node, NodeState, PartitionOffset,
    PingRequest, PullRequest, PullResponse, RelocationItem, RemoveSlaveRequest, SetMasterRequest,
};

pub struct MetaClient {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    target: Node,
    timeout: Duration,
}

impl MetaClient {
    /// Connect to a meta node's command address.
    pub async fn connect(target: Node, timeout: Duration) -> Result<Self> {
        let addr = target.addr();
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| MetaError::Timeout(format!("connect to {addr}")))?
            .map_err(|err| MetaError::Io(format!("connect to {addr}: {err}")))?;
        Ok(Self {
            framed: Framed::new(stream, LengthDelimitedCodec::new()),
            target,
            timeout,
        })
    }

    pub fn target(&self) -> &Node {
        &self.target
    }

    /// One request/response exchange, send and receive each bounded by the
    /// configured timeout.
    pub async fn call(&mut self, cmd: MetaCmd) -> Result<MetaCmdResponse> {
        let addr = self.target.addr();
        tokio::time::timeout(
            self.timeout,
            self.framed.send(Bytes::from(cmd.encode_to_vec())),
        )
        .await
        .map_err(|_| MetaError::Timeout(format!("send to {addr}")))?
        .map_err(|err| MetaError::Io(format!("send to {addr}: {err}")))?;

        let frame = tokio::time::timeout(self.timeout, self.framed.next())
            .await
            .map_err(|_| MetaError::Timeout(format!("recv from {addr}")))?
            .ok_or_else(|| MetaError::Io(format!("connection to {addr} closed")))?
            .map_err(|err| MetaError::Io(format!("recv from {addr}: {err}")))?;
        Ok(MetaCmdResponse::decode(frame.freeze())?)
    }

    async fn call_payload(&mut self, payload: meta_cmd::Payload) -> Result<MetaCmdResponse> {
        let response = self
            .call(MetaCmd {
                payload: Some(payload),
            })
            .await?;
        match MetaError::from_wire(response.status_code(), &response.msg) {
            None => Ok(response),
            Some(err) => Err(err),
        }
    }

    pub async fn ping(&mut self, node: Node, offsets: Vec<PartitionOffset>) -> Result<u64> {
        let response = self
            .call_payload(meta_cmd::Payload::Ping(PingRequest {
                node: Some(node),
                offsets,
            }))
            .await?;
        match response.payload {
            Some(meta_cmd_response::Payload::Ping(ping)) => Ok(ping.epoch),
            _ => Err(MetaError::Corruption("ping response without body".into())),
        }
    }

    pub async fn pull_table(&mut self, table: &str) -> Result<PullResponse> {
        self.pull(crate::proto::pull_request::Target::Table(table.to_string()))
            .await
    }

    pub async fn pull_node(&mut self, addr: &str) -> Result<PullResponse> {
        self.pull(crate::proto::pull_request::Target::Node(addr.to_string()))
            .await
    }

    async fn pull(&mut self, target: crate::proto::pull_request::Target) -> Result<PullResponse> {
        let response = self
            .call_payload(meta_cmd::Payload::Pull(PullRequest {
                target: Some(target),
            }))
            .await?;
        match response.payload {
            Some(meta_cmd_response::Payload::Pull(pull)) => Ok(pull),
            _ => Err(MetaError::Corruption("pull response without body".into())),
        }
    }

    pub async fn init_table(
        &mut self,
        name: &str,
        partition_count: u32,
        placement: Vec<Node>,
    ) -> Result<()> {
        self.call_payload(meta_cmd::Payload::Init(InitRequest {
            name: name.to_string(),
            partition_count,
            placement,
        }))
        .await
        .map(|_| ())
    }

    pub async fn set_master(&mut self, node: Node, table: &str, partition: u32) -> Result<()> {
        self.call_payload(meta_cmd::Payload::SetMaster(SetMasterRequest {
            node: Some(node),
            table: table.to_string(),
            partition,
        }))
        .await
        .map(|_| ())
    }

    pub async fn add_slave(&mut self, node: Node, table: &str, partition: u32) -> Result<()> {
        self.call_payload(meta_cmd::Payload::AddSlave(AddSlaveRequest {
            node: Some(node),
            table: table.to_string(),
            partition,
        }))
        .await
        .map(|_| ())
    }

    pub async fn remove_slave(&mut self, node: Node, table: &str, partition: u32) -> Result<()> {
        self.call_payload(meta_cmd::Payload::RemoveSlave(RemoveSlaveRequest {
            node: Some(node),
            table: table.to_string(),
            partition,
        }))
        .await
        .map(|_| ())
    }

    pub async fn list_table(&mut self) -> Result<Vec<String>> {
        let response = self
            .call_payload(meta_cmd::Payload::ListTable(ListTableRequest {}))
            .await?;
        match response.payload {
            Some(meta_cmd_response::Payload::ListTable(list)) => Ok(list.names),
            _ => Err(MetaError::Corruption(
                "list_table response without body".into(),
            )),
        }
    }

    pub async fn list_node(&mut self) -> Result<Vec<NodeState>> {
        let response = self
            .call_payload(meta_cmd::Payload::ListNode(ListNodeRequest {}))
            .await?;
        match response.payload {
            Some(meta_cmd_response::Payload::ListNode(list)) => Ok(list.nodes),
            _ => Err(MetaError::Corruption(
                "list_node response without body".into(),
            )),
        }
    }

    pub async fn list_meta(&mut self) -> Result<ListMetaResponse> {
        let response = self
            .call_payload(meta_cmd::Payload::ListMeta(ListMetaRequest {}))
            .await?;
        match response.payload {
            Some(meta_cmd_response::Payload::ListMeta(list)) => Ok(list),
            _ => Err(MetaError::Corruption(
                "list_meta response without body".into(),
            )),
        }
    }

    pub async fn meta_status(&mut self) -> Result<String> {
        let response = self
            .call_payload(meta_cmd::Payload::MetaStatus(MetaStatusRequest {}))
            .await?;
        match response.payload {
            Some(meta_cmd_response::Payload::MetaStatus(status)) => Ok(status.status),
            _ => Err(MetaError::Corruption(
                "meta_status response without body".into(),
            )),
        }
    }

    pub async fn drop_table(&mut self, name: &str) -> Result<()> {
        self.call_payload(meta_cmd::Payload::DropTable(DropTableRequest {
            name: name.to_string(),
        }))
        .await
        .map(|_| ())
    }

    pub async fn migrate(&mut self, epoch: u64, items: Vec<RelocationItem>) -> Result<()> {
        self.call_payload(meta_cmd::Payload::Migrate(MigrateRequest { epoch, items }))
            .await
            .map(|_| ())
    }

    pub async fn cancel_migrate(&mut self) -> Result<()> {
        self.call_payload(meta_cmd::Payload::CancelMigrate(CancelMigrateRequest {}))
            .await
            .map(|_| ())
    }
}

impl std::fmt::Debug for MetaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaClient")
            .field("target", &self.target.addr())
            .field("timeout", &self.timeout)
            .finish()
    }
}
