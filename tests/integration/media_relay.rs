//! Integration tests for image and document relay.
//!
//! Run with: `cargo test --test media_relay`

mod common;

use std::path::PathBuf;

use lanchat::reconcile::IMAGE_LABEL;
use lanchat::store::MessageKind;

use common::{client, count, host, sync_through, wait_for};

fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| u8::try_from(i % 251).unwrap_or(0)).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn image_reaches_every_device_and_is_saved() {
    let (host, addr) = host("Host").await;
    let alice = client("alice", &host.node, addr).await;
    let bob = client("bob", &host.node, addr).await;

    let bytes = sample_bytes(10_000);
    alice
        .node
        .send_image(bytes.clone(), "sunset", PathBuf::from("/photos/sunset.jpg"))
        .expect("send image");

    let original = wait_for(&alice.node, "own image", |m| m.kind == MessageKind::Image).await;
    assert_eq!(original.text, "sunset");
    assert_eq!(original.file_path, Some(PathBuf::from("/photos/sunset.jpg")));
    assert!(original.sent_by_user);

    for peer in [&host, &bob] {
        let received = wait_for(&peer.node, "image", |m| m.identity == original.identity).await;
        assert_eq!(received.kind, MessageKind::Image);
        assert_eq!(received.sender_name, "alice");
        assert_eq!(received.text, "sunset");
        assert_eq!(received.file_size, 10_000);

        let path = received.file_path.expect("saved path");
        assert!(path.starts_with(peer.dir.path()));
        assert_eq!(tokio::fs::read(&path).await.expect("read saved"), bytes);
    }

    // The sender does not store its own image a second time.
    sync_through(&host.node, &alice.node, "after image").await;
    assert_eq!(count(&alice.node, |m| m.kind == MessageKind::Image).await, 1);

    host.node.shutdown();
    alice.node.shutdown();
    bob.node.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn document_keeps_name_and_size() {
    let (host, addr) = host("Host").await;
    let bob = client("bob", &host.node, addr).await;

    let bytes = b"quarterly numbers\n".to_vec();
    host.node
        .send_document(bytes.clone(), PathBuf::from("/docs/report.txt"))
        .expect("send doc");

    let received = wait_for(&bob.node, "document", |m| m.kind == MessageKind::Document).await;
    assert_eq!(received.sender_name, "Host");
    assert_eq!(received.text, "📎 report.txt");
    assert_eq!(received.file_name.as_deref(), Some("report.txt"));
    assert_eq!(received.file_size, bytes.len() as u64);

    let path = received.file_path.expect("saved path");
    assert!(path.starts_with(bob.dir.path().join("documents")));
    assert_eq!(tokio::fs::read(&path).await.expect("read saved"), bytes);

    host.node.shutdown();
    bob.node.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn uncaptioned_image_gets_label() {
    let (host, addr) = host("Host").await;
    let bob = client("bob", &host.node, addr).await;

    bob.node
        .send_image(sample_bytes(64), "", PathBuf::from("/tmp/x.jpg"))
        .expect("send image");

    let received = wait_for(&host.node, "image", |m| m.kind == MessageKind::Image).await;
    assert_eq!(received.text, IMAGE_LABEL);

    host.node.shutdown();
    bob.node.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn underscore_in_name_does_not_duplicate_own_media() {
    let (host, addr) = host("Host").await;
    let mary = client("mary_jane", &host.node, addr).await;

    mary.node
        .send_image(sample_bytes(32), "hello", PathBuf::from("/tmp/me.jpg"))
        .expect("send image");

    let at_host = wait_for(&host.node, "image", |m| m.kind == MessageKind::Image).await;
    assert_eq!(at_host.sender_name, "mary_jane");

    sync_through(&host.node, &mary.node, "after image").await;
    assert_eq!(count(&mary.node, |m| m.kind == MessageKind::Image).await, 1);

    host.node.shutdown();
    mary.node.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_attachment_is_not_sent() {
    let (host, addr) = host("Host").await;
    let bob = client("bob", &host.node, addr).await;

    bob.node
        .send_document(Vec::new(), PathBuf::from("/tmp/empty.txt"))
        .expect("submit");
    sync_through(&bob.node, &host.node, "after empty").await;
    assert_eq!(count(&host.node, |m| m.kind == MessageKind::Document).await, 0);
    assert_eq!(count(&bob.node, |m| m.kind == MessageKind::Document).await, 0);

    host.node.shutdown();
    bob.node.shutdown();
}
