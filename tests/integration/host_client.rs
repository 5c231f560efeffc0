//! Integration tests for hosting, joining and text relay.
//!
//! Run with: `cargo test --test host_client`

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use lanchat::store::MessageStore;
use lanchat::transport::TransportError;
use lanchat_proto::MessageIdentity;

use common::{WAIT, client, count, host, peer, sync_through, wait_for, wait_for_peers};

type Lines = tokio::io::Lines<BufReader<OwnedReadHalf>>;

/// A bare TCP client that speaks the line protocol by hand.
async fn raw_client(addr: SocketAddr, name: &str) -> (Lines, OwnedWriteHalf) {
    let stream = TcpStream::connect(addr).await.expect("connect");
    let (read, mut write) = stream.into_split();
    write
        .write_all(format!("{name}\n").as_bytes())
        .await
        .expect("handshake");
    (BufReader::new(read).lines(), write)
}

/// Reads lines until one satisfies `pred`.
async fn read_until(lines: &mut Lines, pred: impl Fn(&str) -> bool) -> String {
    tokio::time::timeout(WAIT, async {
        loop {
            let line = lines.next_line().await.expect("read").expect("open");
            if pred(&line) {
                return line;
            }
        }
    })
    .await
    .expect("expected line never arrived")
}

// -----------------------------------------------------------------------
// Join and text in both directions
// -----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_and_host_exchange_text() {
    let (host, addr) = host("Host").await;
    let alice = client("alice", &host.node, addr).await;
    assert!(alice.node.status().connected());
    assert_eq!(host.node.peer_names(), vec!["alice"]);

    // Host stores the join notice.
    wait_for(&host.node, "join notice", |m| {
        m.sender_name == "alice" && m.text == "has joined the chat."
    })
    .await;

    alice.node.send_text("hello").expect("send");
    let at_host = wait_for(&host.node, "alice's text", |m| m.text == "hello").await;
    assert_eq!(at_host.sender_name, "alice");
    assert!(!at_host.sent_by_user);
    assert_eq!(at_host.identity.sender_prefix(), "alice");

    host.node.send_text("hi alice").expect("send");
    let at_alice = wait_for(&alice.node, "host's text", |m| m.text == "hi alice").await;
    assert_eq!(at_alice.sender_name, "Host");
    let at_origin = wait_for(&host.node, "own text", |m| m.text == "hi alice").await;
    assert_eq!(at_alice.identity, at_origin.identity);

    // Alice's own message came back from the host but was not stored twice.
    assert_eq!(count(&alice.node, |m| m.text == "hello").await, 1);
    let own = wait_for(&alice.node, "own text", |m| m.text == "hello").await;
    assert!(own.sent_by_user);
    assert_eq!(own.identity, at_host.identity);

    host.node.shutdown();
    alice.node.shutdown();
}

// -----------------------------------------------------------------------
// Hand-written frames against a real node
// -----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn raw_frames_are_relayed_and_likes_carry_actor() {
    let (host, addr) = host("Host").await;
    let c2 = client("C2", &host.node, addr).await;
    let (mut c1_lines, mut c1_write) = raw_client(addr, "C1").await;
    wait_for_peers(&host.node, 2).await;

    c1_write.write_all(b"MSG:u1:hello\n").await.expect("write");

    // C1 gets its own frame back with its name in front.
    let echoed = read_until(&mut c1_lines, |l| l.contains("MSG:u1")).await;
    assert_eq!(echoed, "C1: MSG:u1:hello");

    let at_c2 = wait_for(&c2.node, "C1's text", |m| m.identity.as_str() == "u1").await;
    assert_eq!(at_c2.sender_name, "C1");
    assert_eq!(at_c2.text, "hello");

    c2.node.toggle_like(at_c2.id).expect("like");

    let at_host = wait_for(&host.node, "like at host", |m| {
        m.identity.as_str() == "u1" && m.like_count == 1
    })
    .await;
    assert_eq!(at_host.liked_by.as_deref(), Some("C2"));

    let like = read_until(&mut c1_lines, |l| l.starts_with("LIKE:")).await;
    assert_eq!(like, "LIKE:u1:C2");

    // C2 ignores the echo of its own like.
    sync_through(&host.node, &c2.node, "after like").await;
    let at_c2 = c2
        .node
        .store()
        .find_by_identity(&MessageIdentity::new("u1"))
        .await
        .expect("store")
        .expect("message");
    assert_eq!(at_c2.like_count, 1);

    host.node.shutdown();
    c2.node.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn like_from_one_client_reaches_author_and_host_stores() {
    let (host, addr) = host("Host").await;
    let c1 = client("C1", &host.node, addr).await;
    let c2 = client("C2", &host.node, addr).await;

    c1.node.send_text("hello").expect("send");
    let original = wait_for(&c1.node, "own text", |m| m.text == "hello").await;
    let at_c2 = wait_for(&c2.node, "C1's text", |m| m.identity == original.identity).await;
    assert_eq!(at_c2.sender_name, "C1");
    let at_host = wait_for(&host.node, "C1's text", |m| m.identity == original.identity).await;
    assert_eq!(at_host.sender_name, "C1");

    c2.node.toggle_like(at_c2.id).expect("like");

    for node in [&host.node, &c1.node, &c2.node] {
        wait_for(node, "C2's like", |m| {
            m.identity == original.identity && m.like_count == 1
        })
        .await;
    }

    let at_c1 = c1
        .node
        .store()
        .find_by_identity(&original.identity)
        .await
        .expect("store")
        .expect("message");
    assert_eq!(at_c1.like_count, 1);
    assert_eq!(at_c1.liked_by_list(), vec!["C2"]);

    let at_host = host
        .node
        .store()
        .find_by_identity(&original.identity)
        .await
        .expect("store")
        .expect("message");
    assert_eq!(at_host.liked_by_list(), vec!["C2"]);

    host.node.shutdown();
    c1.node.shutdown();
    c2.node.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spoofed_like_actor_is_replaced() {
    let (host, addr) = host("Host").await;
    let (mut lines, mut write) = raw_client(addr, "mallory").await;
    wait_for_peers(&host.node, 1).await;

    host.node.send_text("like me").expect("send");
    let original = wait_for(&host.node, "host text", |m| m.text == "like me").await;
    read_until(&mut lines, |l| l.ends_with(":like me")).await;

    write
        .write_all(format!("LIKE:{}:Host\n", original.identity).as_bytes())
        .await
        .expect("write");

    let liked = wait_for(&host.node, "like", |m| m.like_count == 1).await;
    assert_eq!(liked.liked_by.as_deref(), Some("mallory"));

    host.node.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_handshake_gets_guest_name() {
    let (host, addr) = host("Host").await;
    let (_lines, _write) = raw_client(addr, "").await;
    wait_for_peers(&host.node, 1).await;

    let names = host.node.peer_names();
    assert!(names[0].starts_with("Guest-"), "got {names:?}");
    host.node.shutdown();
}

// -----------------------------------------------------------------------
// Failures and teardown
// -----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn joining_nothing_fails_and_stays_disconnected() {
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        listener.local_addr().expect("addr")
    };
    let lonely = peer("lonely");
    let result = lonely.node.join(addr).await;
    assert!(matches!(result, Err(TransportError::Connect { .. })));
    assert!(!lonely.node.status().connected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dead_client_is_pruned_and_others_keep_receiving() {
    let (host, addr) = host("Host").await;
    let alice = client("alice", &host.node, addr).await;
    let (lines, write) = raw_client(addr, "ghost").await;
    wait_for_peers(&host.node, 2).await;

    drop(lines);
    drop(write);
    wait_for_peers(&host.node, 1).await;

    host.node.send_text("still here").expect("send");
    wait_for(&alice.node, "text after prune", |m| m.text == "still here").await;

    host.node.shutdown();
    alice.node.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn host_shutdown_disconnects_clients() {
    let (host, addr) = host("Host").await;
    let alice = client("alice", &host.node, addr).await;
    let mut connected = alice.node.status().watch_connected();
    assert!(*connected.borrow_and_update());

    host.node.shutdown();
    assert_eq!(host.node.peer_count(), 0);

    tokio::time::timeout(Duration::from_secs(5), connected.wait_for(|c| !*c))
        .await
        .expect("client never noticed")
        .expect("status board dropped");

    // Idempotent.
    host.node.shutdown();
    alice.node.shutdown();
}
