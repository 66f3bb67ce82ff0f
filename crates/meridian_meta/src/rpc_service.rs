//! Command dispatcher: accepts client connections on the command port,
//! decodes length-prefixed protobuf frames, and routes each command by its
//! flag bits — forwarding redirectable commands to the leader when this node
//! is a follower — before invoking the matching handler.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use prost::Message;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use crate::error::MetaError;
use crate::proto::{meta_cmd, MetaCmd, MetaCmdResponse, FLAG_REDIRECT, FLAG_WRITE};
use crate::server::MetaServer;

/// Accept loop on the command port. Each connection gets its own task.
pub async fn serve(server: Arc<MetaServer>, listener: TcpListener, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_conn(server.clone(), stream, peer, shutdown.clone()));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
            }
        }
    }
    tracing::debug!("dispatcher stopped");
}

async fn handle_conn(
    server: Arc<MetaServer>,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: CancellationToken,
) {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = framed.next() => frame,
        };
        let Some(frame) = frame else { break };
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(%peer, error = %err, "connection read failed");
                break;
            }
        };
        let cmd = match MetaCmd::decode(frame.freeze()) {
            Ok(cmd) => cmd,
            Err(err) => {
                tracing::warn!(%peer, error = %err, "undecodable command frame");
                break;
            }
        };

        let response = dispatch(&server, cmd).await;
        if let Err(err) = framed.send(Bytes::from(response.encode_to_vec())).await {
            tracing::debug!(%peer, error = %err, "connection write failed");
            break;
        }
    }
}

/// Route one command: consult its flags, forward or reject on a follower,
/// then invoke the handler.
pub async fn dispatch(server: &MetaServer, cmd: MetaCmd) -> MetaCmdResponse {
    server.stats().incr_query();

    let Some(payload) = cmd.payload else {
        return MetaCmdResponse::from_error(&MetaError::InvalidArgument(
            "empty command".to_string(),
        ));
    };

    let flags = payload.flags();
    if !server.is_leader() {
        if flags & FLAG_REDIRECT != 0 {
            let name = payload.name();
            match server
                .redirect(MetaCmd {
                    payload: Some(payload),
                })
                .await
            {
                Ok(response) => return response,
                Err(err) => {
                    tracing::warn!(cmd = name, error = %err, "redirect to leader failed");
                    let mut response = MetaCmdResponse::from_error(&err);
                    response.leader_hint = server.leader_hint();
                    return response;
                }
            }
        }
        if flags & FLAG_WRITE != 0 {
            let mut response = MetaCmdResponse::from_error(&MetaError::InvalidArgument(
                "not the meta leader".to_string(),
            ));
            response.leader_hint = server.leader_hint();
            return response;
        }
        // Plain reads are served from this follower's last refresh.
    }

    let result = match payload {
        meta_cmd::Payload::Ping(req) => server.handle_ping(req).await,
        meta_cmd::Payload::Pull(req) => server.handle_pull(req).await,
        meta_cmd::Payload::Init(req) => server.handle_init(req).await,
        meta_cmd::Payload::SetMaster(req) => server.handle_set_master(req).await,
        meta_cmd::Payload::AddSlave(req) => server.handle_add_slave(req).await,
        meta_cmd::Payload::RemoveSlave(req) => server.handle_remove_slave(req).await,
        meta_cmd::Payload::ListTable(_) => server.handle_list_table().await,
        meta_cmd::Payload::ListNode(_) => server.handle_list_node().await,
        meta_cmd::Payload::ListMeta(_) => server.handle_list_meta().await,
        meta_cmd::Payload::MetaStatus(_) => server.handle_meta_status().await,
        meta_cmd::Payload::DropTable(req) => server.handle_drop_table(req).await,
        meta_cmd::Payload::Migrate(req) => server.handle_migrate(req).await,
        meta_cmd::Payload::CancelMigrate(_) => server.handle_cancel_migrate().await,
    };

    result.unwrap_or_else(|err| MetaCmdResponse::from_error(&err))
}
