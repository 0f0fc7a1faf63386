//! Command dispatch.
//!
//! Every wire command resolves here against a session's current space
//! (or a `space:`-prefixed override). `pipe:`-prefixed commands queue
//! into a deferred-apply context; `pipe:apply` runs the batch and
//! returns all replies, and any non-pipe command flushes the batch
//! first.

use crate::core::error::StrataError;
use crate::engine::registry::DEFAULT_SPACE;
use crate::engine::shard::{ListEnd, SetOptions, TtlState};
use crate::engine::space::{OptionToggle, Space};
use crate::engine::value::Value;
use crate::resp::{Command, RespError, RespValue};
use crate::store::StoreInner;
use std::sync::Arc;

/// Per-connection state.
pub struct SessionState {
    pub id: u64,
    pub name: Option<String>,
    pub space: String,
    pipe: Vec<Command>,
    max_pipe: usize,
}

impl SessionState {
    pub fn new(id: u64, max_pipe: usize) -> Self {
        Self {
            id,
            name: None,
            space: DEFAULT_SPACE.to_string(),
            pipe: Vec::new(),
            max_pipe,
        }
    }

    pub fn pipe_depth(&self) -> usize {
        self.pipe.len()
    }
}

/// Execute a command, handling `space:` and `pipe:` prefixes.
pub async fn execute(
    inner: &Arc<StoreInner>,
    session: &mut SessionState,
    cmd: Command,
) -> RespValue {
    if let Some((prefix, rest)) = cmd.name.split_once(':') {
        if prefix.eq_ignore_ascii_case("pipe") {
            if rest.eq_ignore_ascii_case("apply") {
                let replies = flush_pipe(inner, session).await;
                return RespValue::Array(replies);
            }
            if session.pipe.len() >= session.max_pipe {
                return RespValue::err("pipeline depth exceeded");
            }
            session.pipe.push(Command::new(rest.to_string(), cmd.args));
            return RespValue::simple("QUEUED");
        }

        // Cross-space addressing without a USE switch.
        let space_name = prefix.to_string();
        let _ = flush_pipe(inner, session).await;
        let inner_cmd = Command::new(rest.to_string(), cmd.args);
        return execute_plain(inner, session, &space_name, inner_cmd).await;
    }

    if !session.pipe.is_empty() {
        let _ = flush_pipe(inner, session).await;
    }
    let space_name = session.space.clone();
    execute_plain(inner, session, &space_name, cmd).await
}

/// Apply the deferred batch in order, returning every reply.
async fn flush_pipe(inner: &Arc<StoreInner>, session: &mut SessionState) -> Vec<RespValue> {
    let queued = std::mem::take(&mut session.pipe);
    let mut replies = Vec::with_capacity(queued.len());
    for cmd in queued {
        let space_name = session.space.clone();
        replies.push(execute_plain(inner, session, &space_name, cmd).await);
    }
    replies
}

fn err(e: StrataError) -> RespValue {
    RespValue::from(&e)
}

fn arity(cmd: &Command) -> RespValue {
    RespValue::Error(RespError::wrong_arity(&cmd.name))
}

fn int_err() -> RespValue {
    RespValue::err("value is not an integer or out of range")
}

fn open_space(inner: &Arc<StoreInner>, name: &str) -> Result<Arc<Space>, RespValue> {
    inner.registry.open(name).map_err(|e| err(e))
}

/// Render a stored value for the wire.
fn render_value(value: Value) -> RespValue {
    match value {
        Value::Scalar(b) => RespValue::bulk(b),
        Value::List(items) => RespValue::Array(
            items
                .into_iter()
                .map(RespValue::bulk)
                .collect(),
        ),
        Value::Sorted(set) => RespValue::Array(
            set.pairs()
                .into_iter()
                .flat_map(|(score, member)| {
                    [
                        RespValue::bulk(member),
                        RespValue::bulk_string(format_score(score)),
                    ]
                })
                .collect(),
        ),
    }
}

fn format_score(score: f64) -> String {
    if score == score.trunc() && score.is_finite() {
        format!("{}", score as i64)
    } else {
        format!("{}", score)
    }
}

fn parse_score_bound(s: &str) -> Option<f64> {
    match s {
        "-inf" => Some(f64::NEG_INFINITY),
        "+inf" | "inf" => Some(f64::INFINITY),
        _ => s.parse().ok(),
    }
}

async fn execute_plain(
    inner: &Arc<StoreInner>,
    session: &mut SessionState,
    space_name: &str,
    cmd: Command,
) -> RespValue {
    let name = cmd.name.to_ascii_uppercase();
    match name.as_str() {
        "PING" => match cmd.argc() {
            0 => RespValue::pong(),
            1 => RespValue::Bulk(cmd.args[0].clone()),
            _ => arity(&cmd),
        },

        // ----------------------------------------------------------
        // Scalars
        // ----------------------------------------------------------
        "GET" => {
            let Some(key) = cmd.arg(0) else { return arity(&cmd) };
            if cmd.argc() != 1 {
                return arity(&cmd);
            }
            match inner.get_routed(space_name, key).await {
                Ok(Some(value)) => RespValue::bulk(value),
                Ok(None) => RespValue::Null,
                Err(e) => err(e),
            }
        }
        "SET" => {
            let (Some(key), Some(value)) = (cmd.arg(0), cmd.arg(1)) else {
                return arity(&cmd);
            };
            let mut opts = SetOptions::default();
            let mut i = 2;
            while i < cmd.argc() {
                let Some(option) = cmd.arg_str(i) else {
                    return RespValue::Error(RespError::syntax());
                };
                match option.to_ascii_uppercase().as_str() {
                    "EX" => {
                        i += 1;
                        let Some(secs) = cmd.arg_int(i).filter(|s| *s > 0) else {
                            return RespValue::err("invalid expire time in 'set' command");
                        };
                        opts.ttl_secs = Some(secs as u64);
                    }
                    "PX" => {
                        i += 1;
                        let Some(ms) = cmd.arg_int(i).filter(|s| *s > 0) else {
                            return RespValue::err("invalid expire time in 'set' command");
                        };
                        opts.ttl_secs = Some(((ms as u64) + 999) / 1000);
                    }
                    "NX" => opts.if_absent = true,
                    "KEEPTTL" => opts.keep_ttl = true,
                    _ => return RespValue::Error(RespError::syntax()),
                }
                i += 1;
            }
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            match space.set(key, Value::Scalar(value.to_vec()), opts) {
                Ok(outcome) if outcome.inserted => RespValue::ok(),
                Ok(_) => RespValue::Null, // NX condition not met
                Err(e) => err(e),
            }
        }
        "ADD" => {
            let (Some(key), Some(value)) = (cmd.arg(0), cmd.arg(1)) else {
                return arity(&cmd);
            };
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            let opts = SetOptions {
                if_absent: true,
                ..Default::default()
            };
            match space.set(key, Value::Scalar(value.to_vec()), opts) {
                Ok(outcome) => RespValue::integer(if outcome.inserted { 1 } else { 0 }),
                Err(e) => err(e),
            }
        }
        "REM" | "DEL" => {
            if cmd.argc() == 0 {
                return arity(&cmd);
            }
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            let removed = cmd.args.iter().filter(|key| space.remove(key)).count();
            RespValue::integer(removed as i64)
        }
        "EXISTS" => {
            if cmd.argc() == 0 {
                return arity(&cmd);
            }
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            let found = cmd.args.iter().filter(|key| space.exists(key)).count();
            RespValue::integer(found as i64)
        }
        "APPEND" | "PREPEND" => {
            let (Some(key), Some(value)) = (cmd.arg(0), cmd.arg(1)) else {
                return arity(&cmd);
            };
            let end = if name == "APPEND" {
                ListEnd::Back
            } else {
                ListEnd::Front
            };
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            match space.splice(key, value, end) {
                Ok(len) => RespValue::integer(len as i64),
                Err(e) => err(e),
            }
        }
        "INCR" | "DECR" => {
            let Some(key) = cmd.arg(0) else { return arity(&cmd) };
            let delta = if name == "INCR" { 1 } else { -1 };
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            match space.incr_by(key, delta) {
                Ok(next) => RespValue::integer(next),
                Err(e) => err(e),
            }
        }
        "INCRBY" | "DECRBY" => {
            let Some(key) = cmd.arg(0) else { return arity(&cmd) };
            let Some(delta) = cmd.arg_int(1) else {
                return int_err();
            };
            let delta = if name == "DECRBY" { -delta } else { delta };
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            match space.incr_by(key, delta) {
                Ok(next) => RespValue::integer(next),
                Err(e) => err(e),
            }
        }
        "MGET" => {
            if cmd.argc() == 0 {
                return arity(&cmd);
            }
            let mut replies = Vec::with_capacity(cmd.argc());
            for key in &cmd.args {
                match inner.get_routed(space_name, key).await {
                    Ok(Some(value)) => replies.push(RespValue::bulk(value)),
                    Ok(None) => replies.push(RespValue::Null),
                    Err(_) => replies.push(RespValue::Null),
                }
            }
            RespValue::Array(replies)
        }
        "MSET" => {
            if cmd.argc() == 0 || cmd.argc() % 2 != 0 {
                return arity(&cmd);
            }
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            for pair in cmd.args.chunks(2) {
                if let Err(e) =
                    space.set(&pair[0], Value::Scalar(pair[1].to_vec()), SetOptions::default())
                {
                    return err(e);
                }
            }
            RespValue::ok()
        }

        // ----------------------------------------------------------
        // Expiry
        // ----------------------------------------------------------
        "EXPIRE" => {
            let Some(key) = cmd.arg(0) else { return arity(&cmd) };
            let Some(secs) = cmd.arg_int(1).filter(|s| *s >= 0) else {
                return int_err();
            };
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            RespValue::integer(if space.expire(key, secs as u64) { 1 } else { 0 })
        }
        "TTL" => {
            let Some(key) = cmd.arg(0) else { return arity(&cmd) };
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            match space.ttl(key) {
                TtlState::NotFound => RespValue::integer(-2),
                TtlState::NoExpiry => RespValue::integer(-1),
                TtlState::Remaining(secs) => RespValue::integer(secs as i64),
            }
        }

        // ----------------------------------------------------------
        // Ordered scans
        // ----------------------------------------------------------
        "RANGE" => {
            let (Some(begin), Some(end)) = (cmd.arg(0), cmd.arg(1)) else {
                return arity(&cmd);
            };
            let Some(limit) = cmd.arg_int(2).filter(|n| *n >= 0) else {
                return int_err();
            };
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            let end = if end.is_empty() { None } else { Some(end.as_ref()) };
            match space.range(begin, end, limit as usize) {
                Ok(entries) => RespValue::Array(
                    entries
                        .into_iter()
                        .map(|(key, _)| RespValue::bulk(key))
                        .collect(),
                ),
                Err(e) => err(e),
            }
        }
        "COUNT" => {
            let (Some(begin), Some(end)) = (cmd.arg(0), cmd.arg(1)) else {
                return arity(&cmd);
            };
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            let end = if end.is_empty() { None } else { Some(end.as_ref()) };
            match space.count(begin, end) {
                Ok(count) => RespValue::integer(count as i64),
                Err(e) => err(e),
            }
        }
        "KEYS" => {
            let Some(pattern) = cmd.arg(0) else { return arity(&cmd) };
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            match space.keys_matching(pattern) {
                Ok(keys) => {
                    RespValue::Array(keys.into_iter().map(RespValue::bulk).collect())
                }
                Err(e) => err(e),
            }
        }
        "VALUES" => {
            let Some(pattern) = cmd.arg(0) else { return arity(&cmd) };
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            match space.values_matching(pattern) {
                Ok(entries) => RespValue::Array(
                    entries
                        .into_iter()
                        .map(|(_, value)| render_value(value))
                        .collect(),
                ),
                Err(e) => err(e),
            }
        }
        "MIN" | "MAX" => {
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            let result = if name == "MIN" {
                space.min_key()
            } else {
                space.max_key()
            };
            match result {
                Ok(Some(key)) => RespValue::bulk(key),
                Ok(None) => RespValue::Null,
                Err(e) => err(e),
            }
        }
        "LB" => {
            let Some(key) = cmd.arg(0) else { return arity(&cmd) };
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            match space.lower_bound(key) {
                Ok(Some(found)) => RespValue::bulk(found),
                Ok(None) => RespValue::Null,
                Err(e) => err(e),
            }
        }
        "DBSIZE" | "SIZE" => {
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            RespValue::integer(space.len() as i64)
        }

        // ----------------------------------------------------------
        // Lists
        // ----------------------------------------------------------
        "LPUSH" | "RPUSH" => {
            if cmd.argc() < 2 {
                return arity(&cmd);
            }
            let key = cmd.args[0].clone();
            let values: Vec<Vec<u8>> = cmd.args[1..].iter().map(|v| v.to_vec()).collect();
            let end = if name == "LPUSH" {
                ListEnd::Front
            } else {
                ListEnd::Back
            };
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            match space.list_push(&key, values, end) {
                Ok(len) => RespValue::integer(len as i64),
                Err(e) => err(e),
            }
        }
        "LPOP" | "RPOP" => {
            let Some(key) = cmd.arg(0) else { return arity(&cmd) };
            let counted = cmd.argc() > 1;
            let count = if counted {
                match cmd.arg_int(1).filter(|n| *n >= 0) {
                    Some(n) => n as usize,
                    None => return int_err(),
                }
            } else {
                1
            };
            let end = if name == "LPOP" {
                ListEnd::Front
            } else {
                ListEnd::Back
            };
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            match space.list_pop(key, count, end) {
                Ok(popped) if counted => {
                    RespValue::Array(popped.into_iter().map(RespValue::bulk).collect())
                }
                Ok(mut popped) => match popped.pop() {
                    Some(value) => RespValue::bulk(value),
                    None => RespValue::Null,
                },
                Err(e) => err(e),
            }
        }
        "BLPOP" | "BRPOP" => {
            if cmd.argc() < 2 {
                return arity(&cmd);
            }
            let Some(timeout_secs) = cmd.arg_float(cmd.argc() - 1).filter(|t| *t >= 0.0) else {
                return RespValue::err("timeout is not a float or out of range");
            };
            let keys: Vec<Vec<u8>> = cmd.args[..cmd.argc() - 1]
                .iter()
                .map(|k| k.to_vec())
                .collect();
            let end = if name == "BLPOP" {
                ListEnd::Front
            } else {
                ListEnd::Back
            };
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            let timeout = crate::core::time::pop_timeout(timeout_secs);
            match space.blocking_pop(&keys, end, timeout).await {
                Ok(Some((key, value))) => {
                    RespValue::Array(vec![RespValue::bulk(key), RespValue::bulk(value)])
                }
                Ok(None) => RespValue::Null,
                Err(e) => err(e),
            }
        }
        "LLEN" => {
            let Some(key) = cmd.arg(0) else { return arity(&cmd) };
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            match space.list_len(key) {
                Ok(len) => RespValue::integer(len as i64),
                Err(e) => err(e),
            }
        }
        "LFRONT" | "LBACK" => {
            let Some(key) = cmd.arg(0) else { return arity(&cmd) };
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            let result = if name == "LFRONT" {
                space.list_front(key)
            } else {
                space.list_back(key)
            };
            match result {
                Ok(Some(value)) => RespValue::bulk(value),
                Ok(None) => RespValue::Null,
                Err(e) => err(e),
            }
        }

        // ----------------------------------------------------------
        // Ordered sets
        // ----------------------------------------------------------
        "ZADD" => {
            if cmd.argc() < 3 || (cmd.argc() - 1) % 2 != 0 {
                return arity(&cmd);
            }
            let key = cmd.args[0].clone();
            let mut pairs = Vec::with_capacity((cmd.argc() - 1) / 2);
            let mut i = 1;
            while i < cmd.argc() {
                let Some(score) = cmd.arg_str(i).and_then(parse_score_bound) else {
                    return RespValue::err("value is not a valid float");
                };
                let Some(member) = cmd.arg(i + 1) else {
                    return arity(&cmd);
                };
                pairs.push((score, member.to_vec()));
                i += 2;
            }
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            match space.sorted_add(&key, pairs) {
                Ok(added) => RespValue::integer(added as i64),
                Err(e) => err(e),
            }
        }
        "ZRANGEBYSCORE" => {
            let Some(key) = cmd.arg(0) else { return arity(&cmd) };
            let (Some(min), Some(max)) = (
                cmd.arg_str(1).and_then(parse_score_bound),
                cmd.arg_str(2).and_then(parse_score_bound),
            ) else {
                return RespValue::err("min or max is not a float");
            };
            let with_scores = cmd
                .arg_str(3)
                .is_some_and(|s| s.eq_ignore_ascii_case("WITHSCORES"));
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            match space.sorted_range_by_score(key, min, max) {
                Ok(hits) => {
                    let mut replies = Vec::new();
                    for (score, member) in hits {
                        replies.push(RespValue::bulk(member));
                        if with_scores {
                            replies.push(RespValue::bulk_string(format_score(score)));
                        }
                    }
                    RespValue::Array(replies)
                }
                Err(e) => err(e),
            }
        }
        "ZCARD" => {
            let Some(key) = cmd.arg(0) else { return arity(&cmd) };
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            match space.sorted_card(key) {
                Ok(card) => RespValue::integer(card as i64),
                Err(e) => err(e),
            }
        }

        // ----------------------------------------------------------
        // Spaces
        // ----------------------------------------------------------
        "USE" => {
            let Some(target) = cmd.arg_str(0) else { return arity(&cmd) };
            match inner.registry.open(target) {
                Ok(_) => {
                    session.space = target.to_string();
                    RespValue::ok()
                }
                Err(e) => err(e),
            }
        }
        "SPACES" => spaces_command(inner, session, &cmd).await,

        // ----------------------------------------------------------
        // Admin
        // ----------------------------------------------------------
        "CONFIG" => config_command(inner, &cmd),
        "INFO" => super::info::info_command(inner, session, &cmd),
        "STATS" => super::info::stats_command(inner),
        "OPS" => super::info::ops_command(inner),
        "CLEAR" | "FLUSHDB" => {
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            space.clear();
            RespValue::ok()
        }
        "CLEARALL" | "FLUSHALL" => {
            inner.registry.clear_all();
            RespValue::ok()
        }
        "SAVE" => {
            let space = match open_space(inner, space_name) {
                Ok(space) => space,
                Err(reply) => return reply,
            };
            match crate::snapshot::save_space(&inner.data_dir, &space) {
                Ok(_) => RespValue::ok(),
                Err(e) => err(e),
            }
        }
        "SAVEALL" => match crate::snapshot::save_all(&inner.data_dir, &inner.registry) {
            Ok(_) => RespValue::ok(),
            Err(e) => err(e),
        },
        "CLIENT" => client_command(session, &cmd),
        "QUIT" => RespValue::ok(),

        _ => RespValue::Error(RespError::unknown_command(&cmd.name)),
    }
}

async fn spaces_command(
    inner: &Arc<StoreInner>,
    session: &mut SessionState,
    cmd: &Command,
) -> RespValue {
    if cmd.argc() == 0 {
        return RespValue::Array(
            inner
                .registry
                .names()
                .into_iter()
                .map(RespValue::bulk_string)
                .collect(),
        );
    }

    let Some(sub) = cmd.arg_str(0) else {
        return RespValue::Error(RespError::syntax());
    };
    match sub.to_ascii_uppercase().as_str() {
        "EXIST" => {
            let Some(name) = cmd.arg_str(1) else {
                return arity(cmd);
            };
            RespValue::integer(if inner.registry.exists(name) { 1 } else { 0 })
        }
        "DEPENDS" => {
            // SPACES DEPENDS <child> ON <parent>
            let (Some(child), Some(on), Some(parent)) =
                (cmd.arg_str(1), cmd.arg_str(2), cmd.arg_str(3))
            else {
                return arity(cmd);
            };
            if !on.eq_ignore_ascii_case("ON") {
                return RespValue::Error(RespError::syntax());
            }
            match inner.registry.depends(child, parent) {
                Ok(()) => RespValue::ok(),
                Err(e) => err(e),
            }
        }
        "DEPENDANTS" => {
            let Some(name) = cmd.arg_str(1) else {
                return arity(cmd);
            };
            RespValue::Array(
                inner
                    .registry
                    .dependents_of(name)
                    .into_iter()
                    .map(RespValue::bulk_string)
                    .collect(),
            )
        }
        "MERGE" => {
            // SPACES MERGE <src> INTO <dest>
            let (Some(src), Some(into), Some(dest)) =
                (cmd.arg_str(1), cmd.arg_str(2), cmd.arg_str(3))
            else {
                return arity(cmd);
            };
            if !into.eq_ignore_ascii_case("INTO") {
                return RespValue::Error(RespError::syntax());
            }
            match inner.registry.merge(src, dest) {
                Ok(()) => RespValue::ok(),
                Err(e) => err(e),
            }
        }
        "RELEASE" => {
            // SPACES RELEASE <parent> FROM <child>
            let (Some(parent), Some(from), Some(child)) =
                (cmd.arg_str(1), cmd.arg_str(2), cmd.arg_str(3))
            else {
                return arity(cmd);
            };
            if !from.eq_ignore_ascii_case("FROM") {
                return RespValue::Error(RespError::syntax());
            }
            match inner.registry.release(parent, child) {
                Ok(()) => RespValue::ok(),
                Err(e) => err(e),
            }
        }
        "DROP" => {
            let Some(name) = cmd.arg_str(1) else {
                return arity(cmd);
            };
            match inner.registry.drop_space(name) {
                Ok(()) => {
                    if session.space == name {
                        session.space = DEFAULT_SPACE.to_string();
                    }
                    RespValue::ok()
                }
                Err(e) => err(e),
            }
        }
        "OPTION" => {
            let space = match inner.registry.open(&session.space) {
                Ok(space) => space,
                Err(e) => return err(e),
            };
            option_command(&space, cmd)
        }
        _ => RespValue::Error(RespError::syntax()),
    }
}

/// SPACES OPTION GET|SET {ORDERED,LRU,RANDOM} [ON|OFF|VOLATILE]
fn option_command(space: &Arc<Space>, cmd: &Command) -> RespValue {
    let (Some(action), Some(option)) = (cmd.arg_str(1), cmd.arg_str(2)) else {
        return arity(cmd);
    };
    let option = option.to_ascii_uppercase();
    match action.to_ascii_uppercase().as_str() {
        "GET" => {
            let options = space.options();
            let value = match option.as_str() {
                "ORDERED" => {
                    if options.ordered {
                        "ON".to_string()
                    } else {
                        "OFF".to_string()
                    }
                }
                "LRU" => options.lru.as_str().to_string(),
                "RANDOM" => options.random.as_str().to_string(),
                _ => return RespValue::Error(RespError::syntax()),
            };
            RespValue::bulk_string(value)
        }
        "SET" => {
            let Some(value) = cmd.arg_str(3) else {
                return arity(cmd);
            };
            let Some(toggle) = OptionToggle::parse(value) else {
                return RespValue::Error(RespError::syntax());
            };
            match option.as_str() {
                "ORDERED" => match toggle {
                    OptionToggle::On => space.set_ordered(true),
                    OptionToggle::Off => space.set_ordered(false),
                    OptionToggle::Volatile => return RespValue::Error(RespError::syntax()),
                },
                "LRU" => space.set_lru(toggle),
                "RANDOM" => space.set_random(toggle),
                _ => return RespValue::Error(RespError::syntax()),
            }
            RespValue::ok()
        }
        _ => RespValue::Error(RespError::syntax()),
    }
}

fn config_command(inner: &Arc<StoreInner>, cmd: &Command) -> RespValue {
    let Some(action) = cmd.arg_str(0) else {
        return arity(cmd);
    };
    let tunables = inner.registry.tunables();
    match action.to_ascii_uppercase().as_str() {
        "GET" => {
            let Some(pattern) = cmd.arg_str(1) else {
                return arity(cmd);
            };
            if pattern == "*" {
                let mut replies = Vec::new();
                for (name, value) in tunables.entries() {
                    replies.push(RespValue::bulk_string(name));
                    replies.push(RespValue::bulk_string(value));
                }
                return RespValue::Array(replies);
            }
            match tunables.get(pattern) {
                Some(value) => RespValue::Array(vec![
                    RespValue::bulk_string(pattern),
                    RespValue::bulk_string(value),
                ]),
                None => RespValue::Array(Vec::new()),
            }
        }
        "SET" => {
            let (Some(name), Some(value)) = (cmd.arg_str(1), cmd.arg_str(2)) else {
                return arity(cmd);
            };
            match tunables.set(name, value) {
                Ok(()) => RespValue::ok(),
                Err(e) => err(e),
            }
        }
        _ => RespValue::Error(RespError::syntax()),
    }
}

fn client_command(session: &mut SessionState, cmd: &Command) -> RespValue {
    let Some(sub) = cmd.arg_str(0) else {
        return arity(cmd);
    };
    match sub.to_ascii_uppercase().as_str() {
        "INFO" => RespValue::bulk_string(format!(
            "id={} name={} space={} pipe_depth={}",
            session.id,
            session.name.as_deref().unwrap_or(""),
            session.space,
            session.pipe_depth(),
        )),
        "SETNAME" => {
            let Some(name) = cmd.arg_str(1) else {
                return arity(cmd);
            };
            session.name = Some(name.to_string());
            RespValue::ok()
        }
        "GETNAME" => RespValue::bulk_string(session.name.as_deref().unwrap_or("")),
        _ => RespValue::Error(RespError::syntax()),
    }
}
