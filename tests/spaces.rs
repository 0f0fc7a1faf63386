//! Space registry behavior: dependencies, merges, drops.

mod common;

use common::open_store;
use strata::engine::{SetOptions, Value};

#[tokio::test]
async fn dependency_makes_parent_keys_visible() {
    let t = open_store();
    let registry = t.store.registry();

    let dest = t.store.space("dest").unwrap();
    for key in ["a", "b", "c", "d"] {
        dest.set(
            key.as_bytes(),
            Value::scalar(format!("dest{}", key)),
            SetOptions::default(),
        )
        .unwrap();
    }

    let src = t.store.space("src").unwrap();
    registry.depends("src", "dest").unwrap();
    src.set(b"a", Value::scalar("srca"), SetOptions::default())
        .unwrap();

    // Parent value visible through the child.
    assert_eq!(src.get(b"c").unwrap(), Some(b"destc".to_vec()));
    // Child value shadows the parent.
    assert_eq!(src.get(b"a").unwrap(), Some(b"srca".to_vec()));

    // Removing in the child hides the key through the child; the
    // parent keeps its own copy.
    src.remove(b"c");
    assert_eq!(src.get(b"c").unwrap(), None);
    assert_eq!(dest.get(b"c").unwrap(), Some(b"destc".to_vec()));
    t.store.stop().await;
}

#[tokio::test]
async fn merge_moves_everything_src_wins() {
    let t = open_store();
    let registry = t.store.registry();
    let src = t.store.space("src").unwrap();
    let dest = t.store.space("dest").unwrap();

    dest.set(b"a", Value::scalar("desta"), SetOptions::default())
        .unwrap();
    dest.set(b"keep", Value::scalar("kept"), SetOptions::default())
        .unwrap();
    src.set(b"a", Value::scalar("srca"), SetOptions::default())
        .unwrap();
    src.set(b"only-src", Value::scalar("x"), SetOptions::default())
        .unwrap();

    registry.merge("src", "dest").unwrap();

    // Collision: src wins.
    assert_eq!(dest.get(b"a").unwrap(), Some(b"srca".to_vec()));
    assert_eq!(dest.get(b"only-src").unwrap(), Some(b"x".to_vec()));
    assert_eq!(dest.get(b"keep").unwrap(), Some(b"kept".to_vec()));

    // Source left logically empty but still registered.
    assert_eq!(src.own_len(), 0);
    assert!(registry.exists("src"));
    assert_eq!(src.get(b"only-src").unwrap(), None);
    t.store.stop().await;
}

#[tokio::test]
async fn sizes_include_dependency_chain() {
    let t = open_store();
    let registry = t.store.registry();
    let a = t.store.space("a").unwrap();
    let b = t.store.space("b").unwrap();

    for i in 1..1000u32 {
        a.set(
            format!("{}", i).as_bytes(),
            Value::scalar(format!("${}", i)),
            SetOptions::default(),
        )
        .unwrap();
    }
    for i in 1001..2000u32 {
        b.set(
            format!("{}", i).as_bytes(),
            Value::scalar(format!("${}", i)),
            SetOptions::default(),
        )
        .unwrap();
    }

    assert_eq!(a.len(), 999);
    assert_eq!(b.len(), 999);
    assert_eq!(b.get(b"5").unwrap(), None);

    registry.depends("b", "a").unwrap();

    // Reads and aggregates see through the edge.
    assert_eq!(b.get(b"5").unwrap(), Some(b"$5".to_vec()));
    assert_eq!(b.len(), 1998);
    assert_eq!(a.len(), 999);
    assert_eq!(b.count(b"0", Some(b"9999")).unwrap(), 1998);
    assert_eq!(b.range(b"0", Some(b"1000"), 100).unwrap().len(), 100);
    t.store.stop().await;
}

#[tokio::test]
async fn drop_rejected_until_edges_released() {
    let t = open_store();
    let registry = t.store.registry();
    registry.depends("b", "a").unwrap();

    let err = registry.drop_space("a").unwrap_err();
    assert!(matches!(
        err,
        strata::error::StrataError::DependencyViolation { .. }
    ));
    assert!(registry.exists("a"));

    registry.release("a", "b").unwrap();
    registry.drop_space("a").unwrap();
    registry.drop_space("b").unwrap();
    assert!(!registry.exists("a"));
    assert!(!registry.exists("b"));
    t.store.stop().await;
}

#[tokio::test]
async fn dropped_space_memory_is_freed() {
    let t = open_store();
    let space = t.store.space("scratch").unwrap();
    for i in 0..100u32 {
        space
            .set(
                format!("k{}", i).as_bytes(),
                Value::scalar("payload-payload"),
                SetOptions::default(),
            )
            .unwrap();
    }
    let before = t.store.stats().logical_allocated;
    assert!(before > 0);

    t.store.registry().drop_space("scratch").unwrap();
    let after = t.store.stats().logical_allocated;
    assert!(after < before);
    t.store.stop().await;
}

#[tokio::test]
async fn merge_carries_delete_shadows() {
    let t = open_store();
    let registry = t.store.registry();
    let dest = t.store.space("dest").unwrap();
    let src = t.store.space("src").unwrap();

    dest.set(b"c", Value::scalar("destc"), SetOptions::default())
        .unwrap();
    registry.depends("src", "dest").unwrap();
    // Removing through src shadows dest's key; the merge makes the
    // removal real on dest.
    src.remove(b"c");
    assert_eq!(src.get(b"c").unwrap(), None);
    assert_eq!(dest.get(b"c").unwrap(), Some(b"destc".to_vec()));

    registry.merge("src", "dest").unwrap();
    assert_eq!(dest.get(b"c").unwrap(), None);
    t.store.stop().await;
}

#[tokio::test]
async fn merge_preserves_dependency_reads_afterwards() {
    let t = open_store();
    let registry = t.store.registry();
    let dest = t.store.space("dest").unwrap();
    let src = t.store.space("src").unwrap();

    dest.set(b"shared", Value::scalar("old"), SetOptions::default())
        .unwrap();
    registry.depends("src", "dest").unwrap();
    src.set(b"shared", Value::scalar("new"), SetOptions::default())
        .unwrap();

    registry.merge("src", "dest").unwrap();
    assert_eq!(dest.get(b"shared").unwrap(), Some(b"new".to_vec()));
    // The (now empty) source still resolves through its edge.
    assert_eq!(src.get(b"shared").unwrap(), Some(b"new".to_vec()));
    t.store.stop().await;
}
