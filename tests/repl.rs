//! Replication between two in-process stores: publish, pull, routes.

mod common;

use common::{eventually, open_store, start_listening};
use strata::engine::{SetOptions, Value};
use strata::DEFAULT_SPACE;

#[tokio::test]
async fn publish_forwards_mutations_to_subscriber() {
    let receiver = open_store();
    let receiver_addr = start_listening(&receiver.store).await;

    let sender = open_store();
    sender.store.publish(receiver_addr);

    let space = sender.store.default_space();
    for i in 0..50u32 {
        let key = format!("pub-{:03}", i);
        space
            .set(key.as_bytes(), Value::scalar(format!("v{}", i)), SetOptions::default())
            .unwrap();
    }
    space.remove(b"pub-000");

    let receiver_space = receiver.store.default_space();
    let replicated = eventually(250, || receiver_space.own_len() == 49).await;
    assert!(replicated, "subscriber never converged");
    assert_eq!(
        receiver_space.get(b"pub-001").unwrap(),
        Some(b"v1".to_vec())
    );
    assert_eq!(receiver_space.get(b"pub-000").unwrap(), None);

    // Sender-side counters.
    let sent = sender.store.repl_stats();
    assert_eq!(sent.insert_requests, 50);
    assert_eq!(sent.remove_requests, 1);
    assert!(sent.bytes_sent > 0);
    assert_eq!(sent.out_queue_size, 0);
    assert_eq!(sent.instructions_failed, 0);

    // Receiver-side counters: everything received, the remove of a
    // key that was already replicated applies too.
    let recv = receiver.store.repl_stats();
    assert_eq!(recv.key_add_recv, 50);
    assert_eq!(recv.key_add_recv_applied, 50);
    assert_eq!(recv.key_rem_recv, 1);
    assert!(recv.bytes_recv > 0);

    sender.store.stop().await;
    receiver.store.stop().await;
}

#[tokio::test]
async fn publish_preserves_space_and_ttl() {
    let receiver = open_store();
    let receiver_addr = start_listening(&receiver.store).await;

    let sender = open_store();
    sender.store.publish(receiver_addr);

    let other = sender.store.space("other").unwrap();
    other
        .set(
            b"with-ttl",
            Value::scalar("v"),
            SetOptions {
                ttl_secs: Some(600),
                ..Default::default()
            },
        )
        .unwrap();

    let converged = eventually(250, || {
        receiver
            .store
            .space("other")
            .map(|s| s.own_len() == 1)
            .unwrap_or(false)
    })
    .await;
    assert!(converged);

    let receiver_other = receiver.store.space("other").unwrap();
    match receiver_other.ttl(b"with-ttl") {
        strata::TtlState::Remaining(secs) => assert!(secs > 0 && secs <= 600),
        other => panic!("ttl not replicated: {:?}", other),
    }

    sender.store.stop().await;
    receiver.store.stop().await;
}

#[tokio::test]
async fn pull_populates_local_on_miss() {
    let source = open_store();
    let source_addr = start_listening(&source.store).await;
    source
        .store
        .default_space()
        .set(b"origin-key", Value::scalar("origin-value"), SetOptions::default())
        .unwrap();
    let source_size = source.store.default_space().own_len();

    let cache = open_store();
    cache.store.pull(source_addr);

    // Local miss turns into a wire fetch that populates the cache.
    let value = cache.store.get(DEFAULT_SPACE, b"origin-key").await.unwrap();
    assert_eq!(value, Some(b"origin-value".to_vec()));
    assert_eq!(cache.store.default_space().own_len(), 1);

    // Subsequent reads are local; the source is untouched.
    assert_eq!(
        cache
            .store
            .default_space()
            .get(b"origin-key")
            .unwrap(),
        Some(b"origin-value".to_vec())
    );
    assert_eq!(source.store.default_space().own_len(), source_size);

    let stats = cache.store.repl_stats();
    assert!(stats.pulls_attempted >= 1);
    assert_eq!(stats.keys_pulled, 1);

    // A miss on the source stays a miss here.
    assert_eq!(cache.store.get(DEFAULT_SPACE, b"ghost").await.unwrap(), None);
    assert_eq!(cache.store.default_space().own_len(), 1);

    cache.store.stop().await;
    source.store.stop().await;
}

#[tokio::test]
async fn routed_reads_prefer_remote_then_fall_back() {
    let remote = open_store();
    let remote_addr = start_listening(&remote.store).await;
    remote
        .store
        .default_space()
        .set(b"k", Value::scalar("remote-value"), SetOptions::default())
        .unwrap();

    let local = open_store();
    // Stale local copy that remote data should win over.
    local
        .store
        .default_space()
        .set(b"k", Value::scalar("local-stale"), SetOptions::default())
        .unwrap();
    for partition in 0..local.store.inner().router.partitions() {
        local.store.set_route(partition, remote_addr);
    }

    // Remote first.
    for _ in 0..5 {
        assert_eq!(
            local.store.get(DEFAULT_SPACE, b"k").await.unwrap(),
            Some(b"remote-value".to_vec())
        );
    }
    let stats = local.store.repl_stats();
    assert_eq!(stats.attempted_routes, 5);
    assert_eq!(stats.routes_succeeded, 5);
    assert_eq!(stats.request_errors, 0);

    // Kill the remote; reads keep answering from local data.
    remote.store.stop().await;
    assert_eq!(
        local.store.get(DEFAULT_SPACE, b"k").await.unwrap(),
        Some(b"local-stale".to_vec())
    );

    let stats = local.store.repl_stats();
    assert!(stats.attempted_routes > stats.routes_succeeded);
    assert!(stats.request_errors > 0);

    local.store.stop().await;
}

#[tokio::test]
async fn unreachable_publish_peer_never_blocks_writes() {
    let dead_addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let sender = open_store();
    sender.store.publish(dead_addr);

    let space = sender.store.default_space();
    for i in 0..20u32 {
        space
            .set(format!("k{}", i).as_bytes(), Value::scalar("v"), SetOptions::default())
            .unwrap();
    }
    // Local writes all landed regardless of the dead peer.
    assert_eq!(space.own_len(), 20);

    let failed = eventually(250, || sender.store.repl_stats().instructions_failed > 0).await;
    assert!(failed, "failures never surfaced in counters");

    sender.store.stop().await;
}
