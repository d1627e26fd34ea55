//! # Coordination Store
//!
//! The external key-value service that holds every piece of cross-instance
//! state: cooldown flags, job-slot counters and sets, rate-limit windows and
//! mirrored health counters. Worker instances share no memory, so this store is
//! the single source of truth.
//!
//! ## Architecture
//!
//! - **Commands**: a closed set of Redis-style commands ([`StoreCommand`])
//! - **Pipelines**: commands batched in one round trip; each command is atomic,
//!   the batch as a whole is not
//! - **Backends**: [`InMemoryCoordinationStore`] (tests, single process) and
//!   [`RestCoordinationStore`] (Redis-over-HTTPS REST API)
//! - **Namespacing**: every key is built by [`StoreKeys`] under one prefix
//!
//! ## Usage
//!
//! ```rust
//! use workguard_core::clock::SystemClock;
//! use workguard_core::store::{CoordinationStore, InMemoryCoordinationStore, StoreCommand};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryCoordinationStore::new(SystemClock::shared());
//! let replies = store
//!     .pipeline(vec![
//!         StoreCommand::incr("workguard:jobs:active_count"),
//!         StoreCommand::expire("workguard:jobs:active_count", 300),
//!     ])
//!     .await?;
//! assert_eq!(replies[0].clone().into_int("INCR")?, 1);
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod rest;

use crate::errors::{StoreError, StoreResult};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

pub use memory::InMemoryCoordinationStore;
pub use rest::RestCoordinationStore;

/// Default key prefix for every key written by this crate
pub const DEFAULT_NAMESPACE: &str = "workguard";

/// A single coordination-store command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    Get { key: String },
    Set { key: String, value: String },
    SetEx { key: String, value: String, ttl_secs: u64 },
    Del { key: String },
    Exists { key: String },
    Incr { key: String },
    Decr { key: String },
    Expire { key: String, ttl_secs: u64 },
    PExpire { key: String, ttl_millis: u64 },
    ZAdd { key: String, score: i64, member: String },
    ZRem { key: String, member: String },
    ZRemRangeByScore { key: String, min: i64, max: i64 },
    ZCard { key: String },
    ZCount { key: String, min: i64, max: i64 },
    SAdd { key: String, member: String },
    SRem { key: String, member: String },
    SMembers { key: String },
}

impl StoreCommand {
    pub fn get(key: impl Into<String>) -> Self {
        StoreCommand::Get { key: key.into() }
    }

    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        StoreCommand::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn set_ex(key: impl Into<String>, value: impl Into<String>, ttl_secs: u64) -> Self {
        StoreCommand::SetEx {
            key: key.into(),
            value: value.into(),
            ttl_secs,
        }
    }

    pub fn del(key: impl Into<String>) -> Self {
        StoreCommand::Del { key: key.into() }
    }

    pub fn exists(key: impl Into<String>) -> Self {
        StoreCommand::Exists { key: key.into() }
    }

    pub fn incr(key: impl Into<String>) -> Self {
        StoreCommand::Incr { key: key.into() }
    }

    pub fn decr(key: impl Into<String>) -> Self {
        StoreCommand::Decr { key: key.into() }
    }

    pub fn expire(key: impl Into<String>, ttl_secs: u64) -> Self {
        StoreCommand::Expire {
            key: key.into(),
            ttl_secs,
        }
    }

    pub fn pexpire(key: impl Into<String>, ttl_millis: u64) -> Self {
        StoreCommand::PExpire {
            key: key.into(),
            ttl_millis,
        }
    }

    pub fn zadd(key: impl Into<String>, score: i64, member: impl Into<String>) -> Self {
        StoreCommand::ZAdd {
            key: key.into(),
            score,
            member: member.into(),
        }
    }

    pub fn zrem(key: impl Into<String>, member: impl Into<String>) -> Self {
        StoreCommand::ZRem {
            key: key.into(),
            member: member.into(),
        }
    }

    pub fn zremrangebyscore(key: impl Into<String>, min: i64, max: i64) -> Self {
        StoreCommand::ZRemRangeByScore {
            key: key.into(),
            min,
            max,
        }
    }

    pub fn zcard(key: impl Into<String>) -> Self {
        StoreCommand::ZCard { key: key.into() }
    }

    pub fn zcount(key: impl Into<String>, min: i64, max: i64) -> Self {
        StoreCommand::ZCount {
            key: key.into(),
            min,
            max,
        }
    }

    pub fn sadd(key: impl Into<String>, member: impl Into<String>) -> Self {
        StoreCommand::SAdd {
            key: key.into(),
            member: member.into(),
        }
    }

    pub fn srem(key: impl Into<String>, member: impl Into<String>) -> Self {
        StoreCommand::SRem {
            key: key.into(),
            member: member.into(),
        }
    }

    pub fn smembers(key: impl Into<String>) -> Self {
        StoreCommand::SMembers { key: key.into() }
    }

    /// Wire name of the command
    pub fn name(&self) -> &'static str {
        match self {
            StoreCommand::Get { .. } => "GET",
            StoreCommand::Set { .. } => "SET",
            StoreCommand::SetEx { .. } => "SETEX",
            StoreCommand::Del { .. } => "DEL",
            StoreCommand::Exists { .. } => "EXISTS",
            StoreCommand::Incr { .. } => "INCR",
            StoreCommand::Decr { .. } => "DECR",
            StoreCommand::Expire { .. } => "EXPIRE",
            StoreCommand::PExpire { .. } => "PEXPIRE",
            StoreCommand::ZAdd { .. } => "ZADD",
            StoreCommand::ZRem { .. } => "ZREM",
            StoreCommand::ZRemRangeByScore { .. } => "ZREMRANGEBYSCORE",
            StoreCommand::ZCard { .. } => "ZCARD",
            StoreCommand::ZCount { .. } => "ZCOUNT",
            StoreCommand::SAdd { .. } => "SADD",
            StoreCommand::SRem { .. } => "SREM",
            StoreCommand::SMembers { .. } => "SMEMBERS",
        }
    }

    /// Key the command operates on
    pub fn key(&self) -> &str {
        match self {
            StoreCommand::Get { key }
            | StoreCommand::Set { key, .. }
            | StoreCommand::SetEx { key, .. }
            | StoreCommand::Del { key }
            | StoreCommand::Exists { key }
            | StoreCommand::Incr { key }
            | StoreCommand::Decr { key }
            | StoreCommand::Expire { key, .. }
            | StoreCommand::PExpire { key, .. }
            | StoreCommand::ZAdd { key, .. }
            | StoreCommand::ZRem { key, .. }
            | StoreCommand::ZRemRangeByScore { key, .. }
            | StoreCommand::ZCard { key }
            | StoreCommand::ZCount { key, .. }
            | StoreCommand::SAdd { key, .. }
            | StoreCommand::SRem { key, .. }
            | StoreCommand::SMembers { key } => key,
        }
    }

    /// Command as a flat argument vector (`["SETEX", key, ttl, value]`)
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![self.name().to_string(), self.key().to_string()];
        match self {
            StoreCommand::Set { value, .. } => args.push(value.clone()),
            StoreCommand::SetEx {
                value, ttl_secs, ..
            } => {
                args.push(ttl_secs.to_string());
                args.push(value.clone());
            }
            StoreCommand::Expire { ttl_secs, .. } => args.push(ttl_secs.to_string()),
            StoreCommand::PExpire { ttl_millis, .. } => args.push(ttl_millis.to_string()),
            StoreCommand::ZAdd { score, member, .. } => {
                args.push(score.to_string());
                args.push(member.clone());
            }
            StoreCommand::ZRemRangeByScore { min, max, .. }
            | StoreCommand::ZCount { min, max, .. } => {
                args.push(min.to_string());
                args.push(max.to_string());
            }
            StoreCommand::ZRem { member, .. }
            | StoreCommand::SAdd { member, .. }
            | StoreCommand::SRem { member, .. } => args.push(member.clone()),
            _ => {}
        }
        args
    }
}

/// Reply to a single command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreReply {
    Nil,
    Ok,
    Int(i64),
    Text(String),
    List(Vec<String>),
}

impl StoreReply {
    /// Integer reply; numeric text (e.g. a counter read with GET) is parsed
    pub fn into_int(self, command: &str) -> StoreResult<i64> {
        match self {
            StoreReply::Int(value) => Ok(value),
            StoreReply::Nil => Ok(0),
            StoreReply::Text(text) => {
                text.trim()
                    .parse::<i64>()
                    .map_err(|_| StoreError::UnexpectedReply {
                        command: command.to_string(),
                        reply: text,
                    })
            }
            other => Err(StoreError::UnexpectedReply {
                command: command.to_string(),
                reply: format!("{other:?}"),
            }),
        }
    }

    pub fn into_opt_string(self, command: &str) -> StoreResult<Option<String>> {
        match self {
            StoreReply::Nil => Ok(None),
            StoreReply::Text(text) => Ok(Some(text)),
            StoreReply::Int(value) => Ok(Some(value.to_string())),
            other => Err(StoreError::UnexpectedReply {
                command: command.to_string(),
                reply: format!("{other:?}"),
            }),
        }
    }

    pub fn into_list(self, command: &str) -> StoreResult<Vec<String>> {
        match self {
            StoreReply::List(items) => Ok(items),
            StoreReply::Nil => Ok(Vec::new()),
            other => Err(StoreError::UnexpectedReply {
                command: command.to_string(),
                reply: format!("{other:?}"),
            }),
        }
    }
}

/// Shared key-value coordination service
#[async_trait]
pub trait CoordinationStore: Send + Sync + Debug {
    /// Backend name for logging
    fn backend_name(&self) -> &'static str;

    async fn execute(&self, command: StoreCommand) -> StoreResult<StoreReply>;

    /// Send several commands in one round trip. Replies come back in order.
    async fn pipeline(&self, commands: Vec<StoreCommand>) -> StoreResult<Vec<StoreReply>> {
        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            replies.push(self.execute(command).await?);
        }
        Ok(replies)
    }
}

pub type SharedStore = Arc<dyn CoordinationStore>;

/// Key layout under the namespace prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    namespace: String,
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl StoreKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn backpressure_state(&self) -> String {
        format!("{}:backpressure:state", self.namespace)
    }

    pub fn active_job_count(&self) -> String {
        format!("{}:jobs:active_count", self.namespace)
    }

    pub fn active_job_ids(&self) -> String {
        format!("{}:jobs:active_ids", self.namespace)
    }

    /// Per-slot crash-recovery key, `slot_key` is `{job_type}:{job_id}`
    pub fn job_slot(&self, slot_key: &str) -> String {
        format!("{}:job:{}", self.namespace, slot_key)
    }

    pub fn rate_limit(&self, identifier: &str) -> String {
        format!("{}:ratelimit:{}", self.namespace, identifier)
    }

    pub fn metric(&self, name: &str) -> String {
        format!("{}:metrics:{}", self.namespace, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_args_layout() {
        assert_eq!(
            StoreCommand::set_ex("k", "v", 30).to_args(),
            vec!["SETEX", "k", "30", "v"]
        );
        assert_eq!(
            StoreCommand::zadd("window", 1_000, "nonce").to_args(),
            vec!["ZADD", "window", "1000", "nonce"]
        );
        assert_eq!(
            StoreCommand::zremrangebyscore("window", 0, 500).to_args(),
            vec!["ZREMRANGEBYSCORE", "window", "0", "500"]
        );
        assert_eq!(StoreCommand::smembers("ids").to_args(), vec!["SMEMBERS", "ids"]);
    }

    #[test]
    fn test_reply_conversions() {
        assert_eq!(StoreReply::Text("42".into()).into_int("GET").unwrap(), 42);
        assert_eq!(StoreReply::Nil.into_int("GET").unwrap(), 0);
        assert!(StoreReply::Text("abc".into()).into_int("GET").is_err());
        assert_eq!(StoreReply::Nil.into_opt_string("GET").unwrap(), None);
        assert!(StoreReply::Int(1).into_list("SMEMBERS").is_err());
    }

    #[test]
    fn test_key_layout() {
        let keys = StoreKeys::new("corpus");
        assert_eq!(keys.backpressure_state(), "corpus:backpressure:state");
        assert_eq!(keys.job_slot("annotate:42"), "corpus:job:annotate:42");
        assert_eq!(keys.rate_limit("user-7"), "corpus:ratelimit:user-7");
        assert_eq!(keys.metric("error_count"), "corpus:metrics:error_count");
    }
}
