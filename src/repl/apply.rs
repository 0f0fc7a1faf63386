//! Inbound replication: apply instruction streams to local shards.
//!
//! Instructions from one connection apply in receipt order; nothing is
//! guaranteed across connections. Received and applied are counted
//! separately — a remove of an absent key is received but not applied.
//! A bad instruction is counted and skipped; the stream never halts on
//! one.

use crate::core::error::StrataResult;
use crate::engine::registry::SpaceRegistry;
use crate::repl::instruction::{read_frame, Instruction};
use crate::repl::stats::ReplStats;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Apply one instruction to the local shard set. Returns whether it
/// changed state (the "applied" counter), distinct from received.
pub fn apply_instruction(
    registry: &SpaceRegistry,
    instruction: Instruction,
) -> StrataResult<bool> {
    match instruction {
        Instruction::KeyAdd {
            space,
            key,
            value,
            expires_at,
        } => {
            let space = registry.open(&space)?;
            space.apply_add(&key, value, expires_at)
        }
        Instruction::KeyRemove { space, key } => {
            let space = registry.open(&space)?;
            Ok(space.apply_remove(&key))
        }
    }
}

/// Consume a replication stream until EOF or a transport error.
///
/// The caller has already stripped the magic preamble.
pub async fn run_inbound<R>(
    mut reader: R,
    registry: Arc<SpaceRegistry>,
    stats: Arc<ReplStats>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let (instruction, frame_len) = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::debug!("replication stream closed");
                return;
            }
            Err(e) => {
                // Peers disconnect for all sorts of reasons; a dead
                // connection is reported, not fatal.
                tracing::warn!(error = %e, "replication stream error");
                return;
            }
        };

        stats
            .bytes_recv
            .fetch_add(frame_len as u64, Ordering::Relaxed);
        let is_add = matches!(instruction, Instruction::KeyAdd { .. });
        if is_add {
            stats.key_add_recv.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.key_rem_recv.fetch_add(1, Ordering::Relaxed);
        }

        match apply_instruction(&registry, instruction) {
            Ok(true) => {
                if is_add {
                    stats.key_add_recv_applied.fetch_add(1, Ordering::Relaxed);
                } else {
                    stats.key_rem_recv_applied.fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok(false) => {
                // No-op locally (e.g. remove of an absent key):
                // received, not applied.
            }
            Err(e) => {
                stats.instructions_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "replication instruction failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::engine::stats::EngineStats;
    use crate::engine::tunables::Tunables;
    use crate::engine::value::ValueRepr;

    fn registry() -> Arc<SpaceRegistry> {
        let stats = Arc::new(EngineStats::new());
        let tunables = Arc::new(Tunables::from_config(&Config::default()));
        Arc::new(SpaceRegistry::new(4, stats, tunables))
    }

    #[test]
    fn test_apply_add_then_remove() {
        let registry = registry();
        let applied = apply_instruction(
            &registry,
            Instruction::KeyAdd {
                space: "s".to_string(),
                key: b"k".to_vec(),
                value: ValueRepr::Scalar(b"v".to_vec()),
                expires_at: None,
            },
        )
        .unwrap();
        assert!(applied);
        assert_eq!(
            registry.open("s").unwrap().get(b"k").unwrap(),
            Some(b"v".to_vec())
        );

        let applied = apply_instruction(
            &registry,
            Instruction::KeyRemove {
                space: "s".to_string(),
                key: b"k".to_vec(),
            },
        )
        .unwrap();
        assert!(applied);
    }

    #[test]
    fn test_remove_absent_is_noop_not_error() {
        let registry = registry();
        let applied = apply_instruction(
            &registry,
            Instruction::KeyRemove {
                space: "s".to_string(),
                key: b"ghost".to_vec(),
            },
        )
        .unwrap();
        assert!(!applied);
    }

    #[tokio::test]
    async fn test_run_inbound_counts_received_vs_applied() {
        let registry = registry();
        let stats = Arc::new(ReplStats::new());

        let mut stream = Vec::new();
        stream.extend_from_slice(
            &Instruction::KeyAdd {
                space: "s".to_string(),
                key: b"a".to_vec(),
                value: ValueRepr::Scalar(b"1".to_vec()),
                expires_at: None,
            }
            .encode_frame()
            .unwrap(),
        );
        stream.extend_from_slice(
            &Instruction::KeyRemove {
                space: "s".to_string(),
                key: b"absent".to_vec(),
            }
            .encode_frame()
            .unwrap(),
        );

        run_inbound(
            std::io::Cursor::new(stream),
            Arc::clone(&registry),
            Arc::clone(&stats),
        )
        .await;

        let snap = stats.snapshot();
        assert_eq!(snap.key_add_recv, 1);
        assert_eq!(snap.key_add_recv_applied, 1);
        assert_eq!(snap.key_rem_recv, 1);
        assert_eq!(snap.key_rem_recv_applied, 0);
        assert!(snap.bytes_recv > 0);
    }

    #[tokio::test]
    async fn test_bad_frame_ends_stream_quietly() {
        let registry = registry();
        let stats = Arc::new(ReplStats::new());
        let garbage = vec![9u8, 0, 0, 0, 1, 2, 3]; // truncated payload
        run_inbound(
            std::io::Cursor::new(garbage),
            Arc::clone(&registry),
            Arc::clone(&stats),
        )
        .await;
        assert_eq!(stats.snapshot().key_add_recv, 0);
    }
}
