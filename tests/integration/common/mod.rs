//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use lanchat::files::DirFileStore;
use lanchat::store::{InMemoryStore, Message};
use lanchat::{ChatNode, NodeOptions};
use tempfile::TempDir;

pub type Node = ChatNode<InMemoryStore, DirFileStore>;

/// How long any condition may take to become true.
pub const WAIT: Duration = Duration::from_secs(10);

const POLL: Duration = Duration::from_millis(10);

/// A node plus the directory its received attachments land in.
pub struct Peer {
    pub node: Node,
    pub dir: TempDir,
}

/// Creates an unstarted node named `name`.
pub fn peer(name: &str) -> Peer {
    let dir = tempfile::tempdir().expect("tempdir");
    let options = NodeOptions {
        display_name: name.to_string(),
        connect_timeout: Duration::from_secs(5),
        ..NodeOptions::default()
    };
    let (node, _feed) = ChatNode::new(options, InMemoryStore::new(), DirFileStore::new(dir.path()));
    Peer { node, dir }
}

/// Starts a host on an OS-assigned loopback port.
pub async fn host(name: &str) -> (Peer, SocketAddr) {
    let peer = peer(name);
    let addr = peer
        .node
        .start_host("127.0.0.1:0".parse().expect("valid addr"))
        .await
        .expect("start host");
    (peer, addr)
}

/// Joins the host at `addr` and waits until the host has registered it.
pub async fn client(name: &str, host: &Node, addr: SocketAddr) -> Peer {
    let before = host.peer_count();
    let peer = peer(name);
    peer.node.join(addr).await.expect("join");
    wait_for_peers(host, before + 1).await;
    peer
}

/// Waits until `host` has exactly `n` registered clients.
pub async fn wait_for_peers(host: &Node, n: usize) {
    tokio::time::timeout(WAIT, async {
        while host.peer_count() != n {
            tokio::time::sleep(POLL).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("host never reached {n} peers"));
}

/// Waits until `node` stores a message matching `pred` and returns it.
pub async fn wait_for(node: &Node, what: &str, pred: impl Fn(&Message) -> bool) -> Message {
    tokio::time::timeout(WAIT, async {
        loop {
            let found = node
                .messages()
                .await
                .expect("messages")
                .into_iter()
                .find(|m| pred(m));
            if let Some(message) = found {
                return message;
            }
            tokio::time::sleep(POLL).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

/// Number of stored messages matching `pred`.
pub async fn count(node: &Node, pred: impl Fn(&Message) -> bool) -> usize {
    node.messages()
        .await
        .expect("messages")
        .iter()
        .filter(|m| pred(m))
        .count()
}

/// Sends `marker` from `from` and waits until `to` has it.
///
/// Frames travel through the host in order, so once the marker arrived
/// every frame sent before it has been applied too.
pub async fn sync_through(from: &Node, to: &Node, marker: &str) {
    from.send_text(marker).expect("send marker");
    wait_for(to, marker, |m| m.text == marker).await;
}
