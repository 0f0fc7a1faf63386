//! INFO, STATS, and OPS rendering.

use crate::resp::{Command, RespError, RespValue};
use crate::server::dispatch::SessionState;
use crate::store::StoreInner;
use std::fmt::Write as _;
use std::sync::Arc;

/// INFO [SERVER] or INFO SHARD <n>.
pub fn info_command(
    inner: &Arc<StoreInner>,
    session: &SessionState,
    cmd: &Command,
) -> RespValue {
    match cmd.arg_str(0).map(|s| s.to_ascii_uppercase()) {
        None => RespValue::bulk_string(render_server_info(inner)),
        Some(section) if section == "SERVER" => {
            RespValue::bulk_string(render_server_info(inner))
        }
        Some(section) if section == "SHARD" => {
            let Some(index) = cmd.arg_int(1).filter(|n| *n >= 0) else {
                return RespValue::err("value is not an integer or out of range");
            };
            render_shard_info(inner, &session.space, index as usize)
        }
        Some(other) => RespValue::err(format!("unknown INFO section '{}'", other)),
    }
}

fn render_server_info(inner: &Arc<StoreInner>) -> String {
    let stats = inner.stats.snapshot();
    let repl = inner.repl_stats.snapshot();
    let mut out = String::new();

    let _ = writeln!(out, "# Server");
    let _ = writeln!(out, "version:{}", env!("CARGO_PKG_VERSION"));
    let _ = writeln!(out, "uptime_seconds:{}", inner.started_at.elapsed().as_secs());
    let _ = writeln!(out, "shard_count:{}", inner.registry.shard_count());

    let _ = writeln!(out, "\n# Memory");
    for (name, value) in stats.fields() {
        let _ = writeln!(out, "{}:{}", name, value);
    }
    let _ = writeln!(
        out,
        "max_memory_bytes:{}",
        inner.registry.tunables().max_memory_bytes()
    );
    let _ = writeln!(
        out,
        "eviction_policy:{}",
        inner.registry.tunables().policy()
    );

    let _ = writeln!(out, "\n# Replication");
    let _ = writeln!(out, "publish_peers:{}", inner.publisher.peer_count());
    let _ = writeln!(
        out,
        "pull_source:{}",
        inner
            .puller
            .read()
            .as_ref()
            .map(|p| p.addr().to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    let _ = writeln!(out, "routes:{}", inner.router.route_count());
    for (name, value) in repl.fields() {
        let _ = writeln!(out, "{}:{}", name, value);
    }

    let _ = writeln!(out, "\n# Spaces");
    for space in inner.registry.spaces() {
        let deps = space.dependency_names();
        let _ = writeln!(
            out,
            "space:{} keys={} deps={}",
            space.name(),
            space.own_len(),
            if deps.is_empty() {
                "-".to_string()
            } else {
                deps.join(",")
            }
        );
    }

    out
}

fn render_shard_info(inner: &Arc<StoreInner>, space_name: &str, index: usize) -> RespValue {
    let space = match inner.registry.open(space_name) {
        Ok(space) => space,
        Err(e) => return RespValue::from(&e),
    };
    let Some(shard) = space.shard(index) else {
        return RespValue::Error(RespError::generic(format!(
            "shard index out of range: {} (shard count {})",
            index,
            space.shard_count()
        )));
    };

    let (live, total) = shard.entry_counts();
    let (used, capacity) = shard.fragmentation();
    let mut out = String::new();
    let _ = writeln!(out, "# Shard");
    let _ = writeln!(out, "space:{}", space.name());
    let _ = writeln!(out, "index:{}", index);
    let _ = writeln!(out, "live_entries:{}", live);
    let _ = writeln!(out, "total_entries:{}", total);
    let _ = writeln!(out, "used_bytes:{}", shard.used_bytes());
    let _ = writeln!(out, "payload_bytes:{}", used);
    let _ = writeln!(out, "capacity_bytes:{}", capacity);
    RespValue::bulk_string(out)
}

/// STATS: memory-governance counters as a flat name/value array.
pub fn stats_command(inner: &Arc<StoreInner>) -> RespValue {
    let stats = inner.stats.snapshot();
    let repl = inner.repl_stats.snapshot();
    let mut replies = Vec::new();
    for (name, value) in stats.fields().into_iter().chain(repl.fields()) {
        replies.push(RespValue::bulk_string(name));
        replies.push(RespValue::bulk_string(value.to_string()));
    }
    RespValue::Array(replies)
}

/// OPS: operation counters as a flat name/value array.
pub fn ops_command(inner: &Arc<StoreInner>) -> RespValue {
    let stats = inner.stats.snapshot();
    let mut replies = Vec::new();
    for (name, value) in stats.op_fields() {
        replies.push(RespValue::bulk_string(name));
        replies.push(RespValue::bulk_string(value.to_string()));
    }
    RespValue::Array(replies)
}
