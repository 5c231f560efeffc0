//! Integration tests for three-device convergence of likes, edits and
//! deletes.
//!
//! Run with: `cargo test --test convergence`

mod common;

use lanchat::store::DELETED_PLACEHOLDER;
use lanchat_proto::MessageIdentity;

use common::{Peer, client, host, sync_through, wait_for};

struct Room {
    host: Peer,
    alice: Peer,
    bob: Peer,
}

impl Room {
    async fn open() -> Self {
        let (host, addr) = host("Host").await;
        let alice = client("alice", &host.node, addr).await;
        let bob = client("bob", &host.node, addr).await;
        Self { host, alice, bob }
    }

    fn all(&self) -> [&Peer; 3] {
        [&self.host, &self.alice, &self.bob]
    }

    fn close(&self) {
        for peer in self.all() {
            peer.node.shutdown();
        }
    }
}

/// Waits until every device stores the message with `identity` in a state
/// accepted by `pred`.
async fn converge(
    room: &Room,
    identity: &MessageIdentity,
    what: &str,
    pred: impl Fn(&lanchat::store::Message) -> bool + Copy,
) {
    for peer in room.all() {
        wait_for(&peer.node, what, |m| &m.identity == identity && pred(m)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn text_reaches_everyone_with_one_identity() {
    let room = Room::open().await;

    room.alice.node.send_text("hi all").expect("send");
    let original = wait_for(&room.alice.node, "own text", |m| m.text == "hi all").await;
    converge(&room, &original.identity, "text", |m| m.text == "hi all").await;

    let at_bob = wait_for(&room.bob.node, "text", |m| m.text == "hi all").await;
    assert_eq!(at_bob.sender_name, "alice");
    assert!(!at_bob.sent_by_user);

    room.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn likes_converge_and_toggle_back() {
    let room = Room::open().await;

    room.alice.node.send_text("like this").expect("send");
    let original = wait_for(&room.alice.node, "own text", |m| m.text == "like this").await;
    let id = original.identity.clone();
    converge(&room, &id, "text", |_| true).await;

    let at_bob = wait_for(&room.bob.node, "text", |m| m.identity == id).await;
    room.bob.node.toggle_like(at_bob.id).expect("like");
    converge(&room, &id, "bob's like", |m| {
        m.like_count == 1 && m.liked_by.as_deref() == Some("bob")
    })
    .await;

    let at_host = wait_for(&room.host.node, "text", |m| m.identity == id).await;
    room.host.node.toggle_like(at_host.id).expect("like");
    converge(&room, &id, "two likes", |m| {
        m.like_count == 2 && m.liked_by_list() == vec!["bob", "Host"]
    })
    .await;

    // Bob toggles again: unlike.
    room.bob.node.toggle_like(at_bob.id).expect("unlike");
    converge(&room, &id, "bob's unlike", |m| {
        m.like_count == 1 && m.liked_by.as_deref() == Some("Host")
    })
    .await;

    // Nothing drifts once traffic settles.
    sync_through(&room.host.node, &room.bob.node, "settled").await;
    sync_through(&room.host.node, &room.alice.node, "settled").await;
    converge(&room, &id, "final likes", |m| m.like_count == 1).await;

    room.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn edit_then_delete_converge() {
    let room = Room::open().await;

    room.bob.node.send_text("typo").expect("send");
    let original = wait_for(&room.bob.node, "own text", |m| m.text == "typo").await;
    let id = original.identity.clone();
    converge(&room, &id, "text", |_| true).await;

    room.bob.node.edit(original.id, "fixed").expect("edit");
    converge(&room, &id, "edit", |m| m.edited && m.display_text() == "fixed").await;

    let at_host = wait_for(&room.host.node, "text", |m| m.identity == id).await;
    room.host.node.delete(at_host.id).expect("delete");
    converge(&room, &id, "delete", |m| {
        m.deleted && m.display_text() == DELETED_PLACEHOLDER
    })
    .await;

    // A like after the delete changes nothing anywhere.
    let at_alice = wait_for(&room.alice.node, "text", |m| m.identity == id).await;
    room.alice.node.toggle_like(at_alice.id).expect("like");
    sync_through(&room.alice.node, &room.bob.node, "after late like").await;
    sync_through(&room.alice.node, &room.host.node, "after late like 2").await;
    converge(&room, &id, "still deleted", |m| m.deleted && m.like_count == 0).await;

    room.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn messages_from_everyone_interleave_without_loss() {
    let room = Room::open().await;

    for i in 0..5 {
        room.host.node.send_text(format!("h{i}")).expect("send");
        room.alice.node.send_text(format!("a{i}")).expect("send");
        room.bob.node.send_text(format!("b{i}")).expect("send");
    }

    for peer in room.all() {
        for prefix in ["h", "a", "b"] {
            for i in 0..5 {
                let text = format!("{prefix}{i}");
                wait_for(&peer.node, &text, |m| m.text == text).await;
            }
        }
    }

    // Every device holds exactly one copy of each message.
    for peer in room.all() {
        let messages = peer.node.messages().await.expect("messages");
        let chat: Vec<_> = messages
            .iter()
            .filter(|m| m.text.len() == 2)
            .collect();
        assert_eq!(chat.len(), 15);
    }

    room.close();
}
