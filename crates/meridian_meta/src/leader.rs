//! Leader tracking and follower write redirection.
//!
//! The role snapshot is copy-on-write: readers asking "am I leader?" hit an
//! atomic flag, and the full view is swapped wholesale under a short lock.
//! Only the redirect connection lives behind a mutex, and that mutex is never
//! held across I/O other than the redirected send/recv itself, which both
//! carry a one-second timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::client::MetaClient;
use crate::error::{MetaError, Result};
use crate::proto::{MetaCmd, MetaCmdResponse, Node};

/// Send/recv (and connect) bound for redirected commands.
pub const REDIRECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaderView {
    NoLeader,
    Leader,
    /// Current leader's command address.
    Follower { addr: Node },
}

pub struct LeaderTracker {
    view: RwLock<LeaderView>,
    is_leader: AtomicBool,
    conn: Mutex<Option<MetaClient>>,
}

impl Default for LeaderTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaderTracker {
    pub fn new() -> Self {
        Self {
            view: RwLock::new(LeaderView::NoLeader),
            is_leader: AtomicBool::new(false),
            conn: Mutex::new(None),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Acquire)
    }

    pub fn view(&self) -> LeaderView {
        self.view.read().unwrap().clone()
    }

    /// The leader's command address, whether that is us or a peer.
    pub fn leader_hint(&self, local_cmd_addr: &Node) -> Option<Node> {
        match self.view() {
            LeaderView::NoLeader => None,
            LeaderView::Leader => Some(local_cmd_addr.clone()),
            LeaderView::Follower { addr } => Some(addr),
        }
    }

    /// Publish a new role snapshot, dropping any existing redirect
    /// connection. The flag is stored after the view swap.
    pub async fn set_view(&self, view: LeaderView) {
        let leading = view == LeaderView::Leader;
        *self.conn.lock().await = None;
        *self.view.write().unwrap() = view;
        self.is_leader.store(leading, Ordering::Release);
    }

    /// Make sure a follower has a warm connection to `addr`. Failures are
    /// logged and retried by the next cron pass.
    pub async fn ensure_connection(&self, addr: &Node) {
        let mut conn = self.conn.lock().await;
        if conn.is_some() {
            return;
        }
        match MetaClient::connect(addr.clone(), REDIRECT_TIMEOUT).await {
            Ok(client) => {
                tracing::info!(leader = %addr.addr(), "connected to leader");
                *conn = Some(client);
            }
            Err(err) => {
                tracing::warn!(leader = %addr.addr(), error = %err, "leader connection failed");
            }
        }
    }

    /// Forward a write to the leader and relay its response. Only valid on a
    /// follower with a live connection.
    pub async fn redirect_to_leader(&self, cmd: MetaCmd) -> Result<MetaCmdResponse> {
        let mut conn = self.conn.lock().await;
        let client = conn
            .as_mut()
            .ok_or_else(|| MetaError::Corruption("no leader connection".to_string()))?;
        match client.call(cmd).await {
            Ok(response) => Ok(response),
            Err(err) => {
                tracing::warn!(
                    leader = %client.target().addr(),
                    error = %err,
                    "redirect to leader failed"
                );
                // Drop the broken connection; the cron reconnects.
                *conn = None;
                Err(err)
            }
        }
    }
}
