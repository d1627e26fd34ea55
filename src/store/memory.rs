//! # In-Memory Coordination Store
//!
//! Process-local implementation of the full command set with Redis-compatible
//! TTL semantics. Expiry is lazy: an expired key is purged the next time any
//! command touches it. Time comes from the injected [`Clock`](crate::clock::Clock),
//! so tests fast-forward TTLs with a `MockClock` instead of sleeping.
//!
//! A pipeline runs under a single lock, so it is atomic here even though the
//! trait does not promise that.

use super::{CoordinationStore, StoreCommand, StoreReply};
use crate::clock::SharedClock;
use crate::errors::{StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Set(BTreeSet<String>),
    /// member -> score
    SortedSet(BTreeMap<String, i64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<i64>,
}

#[derive(Debug)]
pub struct InMemoryCoordinationStore {
    clock: SharedClock,
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
    commands_executed: AtomicU64,
}

impl InMemoryCoordinationStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            commands_executed: AtomicU64::new(0),
        }
    }

    /// Simulate an outage: every call fails with a connection error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Total commands applied (pipelines count each command)
    pub fn commands_executed(&self) -> u64 {
        self.commands_executed.load(Ordering::Relaxed)
    }

    /// Remaining TTL in milliseconds; `None` for missing keys or keys without expiry
    pub fn pttl(&self, key: &str) -> Option<i64> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        purge_if_expired(&mut entries, key, now);
        entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at - now)
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| !is_expired(entry, now));
        entries.len()
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn apply(
        &self,
        entries: &mut HashMap<String, Entry>,
        command: StoreCommand,
        now: i64,
    ) -> StoreResult<StoreReply> {
        self.commands_executed.fetch_add(1, Ordering::Relaxed);
        let name = command.name();
        purge_if_expired(entries, command.key(), now);

        match command {
            StoreCommand::Get { key } => match entries.get(&key) {
                None => Ok(StoreReply::Nil),
                Some(Entry {
                    value: Value::Text(text),
                    ..
                }) => Ok(StoreReply::Text(text.clone())),
                Some(_) => Err(wrong_type(name)),
            },
            StoreCommand::Set { key, value } => {
                entries.insert(
                    key,
                    Entry {
                        value: Value::Text(value),
                        expires_at: None,
                    },
                );
                Ok(StoreReply::Ok)
            }
            StoreCommand::SetEx {
                key,
                value,
                ttl_secs,
            } => {
                if ttl_secs == 0 {
                    return Err(StoreError::Command {
                        command: name.to_string(),
                        reason: "invalid expire time".to_string(),
                    });
                }
                entries.insert(
                    key,
                    Entry {
                        value: Value::Text(value),
                        expires_at: Some(now + (ttl_secs as i64) * 1_000),
                    },
                );
                Ok(StoreReply::Ok)
            }
            StoreCommand::Del { key } => Ok(StoreReply::Int(
                entries.remove(&key).map_or(0, |_| 1),
            )),
            StoreCommand::Exists { key } => {
                Ok(StoreReply::Int(i64::from(entries.contains_key(&key))))
            }
            StoreCommand::Incr { key } => add_to_counter(entries, key, 1, name),
            StoreCommand::Decr { key } => add_to_counter(entries, key, -1, name),
            StoreCommand::Expire { key, ttl_secs } => {
                Ok(set_expiry(entries, &key, now, (ttl_secs as i64) * 1_000))
            }
            StoreCommand::PExpire { key, ttl_millis } => {
                Ok(set_expiry(entries, &key, now, ttl_millis as i64))
            }
            StoreCommand::ZAdd { key, score, member } => {
                let entry = entries.entry(key).or_insert_with(|| Entry {
                    value: Value::SortedSet(BTreeMap::new()),
                    expires_at: None,
                });
                match &mut entry.value {
                    Value::SortedSet(zset) => {
                        Ok(StoreReply::Int(i64::from(zset.insert(member, score).is_none())))
                    }
                    _ => Err(wrong_type(name)),
                }
            }
            StoreCommand::ZRem { key, member } => {
                let removed = match entries.get_mut(&key) {
                    None => 0,
                    Some(Entry {
                        value: Value::SortedSet(zset),
                        ..
                    }) => i64::from(zset.remove(&member).is_some()),
                    Some(_) => return Err(wrong_type(name)),
                };
                drop_if_empty(entries, &key);
                Ok(StoreReply::Int(removed))
            }
            StoreCommand::ZRemRangeByScore { key, min, max } => {
                let removed = match entries.get_mut(&key) {
                    None => 0,
                    Some(Entry {
                        value: Value::SortedSet(zset),
                        ..
                    }) => {
                        let before = zset.len();
                        zset.retain(|_, score| *score < min || *score > max);
                        (before - zset.len()) as i64
                    }
                    Some(_) => return Err(wrong_type(name)),
                };
                drop_if_empty(entries, &key);
                Ok(StoreReply::Int(removed))
            }
            StoreCommand::ZCard { key } => match entries.get(&key) {
                None => Ok(StoreReply::Int(0)),
                Some(Entry {
                    value: Value::SortedSet(zset),
                    ..
                }) => Ok(StoreReply::Int(zset.len() as i64)),
                Some(_) => Err(wrong_type(name)),
            },
            StoreCommand::ZCount { key, min, max } => match entries.get(&key) {
                None => Ok(StoreReply::Int(0)),
                Some(Entry {
                    value: Value::SortedSet(zset),
                    ..
                }) => Ok(StoreReply::Int(
                    zset.values()
                        .filter(|score| **score >= min && **score <= max)
                        .count() as i64,
                )),
                Some(_) => Err(wrong_type(name)),
            },
            StoreCommand::SAdd { key, member } => {
                let entry = entries.entry(key).or_insert_with(|| Entry {
                    value: Value::Set(BTreeSet::new()),
                    expires_at: None,
                });
                match &mut entry.value {
                    Value::Set(set) => Ok(StoreReply::Int(i64::from(set.insert(member)))),
                    _ => Err(wrong_type(name)),
                }
            }
            StoreCommand::SRem { key, member } => {
                let removed = match entries.get_mut(&key) {
                    None => 0,
                    Some(Entry {
                        value: Value::Set(set),
                        ..
                    }) => i64::from(set.remove(&member)),
                    Some(_) => return Err(wrong_type(name)),
                };
                drop_if_empty(entries, &key);
                Ok(StoreReply::Int(removed))
            }
            StoreCommand::SMembers { key } => match entries.get(&key) {
                None => Ok(StoreReply::List(Vec::new())),
                Some(Entry {
                    value: Value::Set(set),
                    ..
                }) => Ok(StoreReply::List(set.iter().cloned().collect())),
                Some(_) => Err(wrong_type(name)),
            },
        }
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn execute(&self, command: StoreCommand) -> StoreResult<StoreReply> {
        self.check_available()?;
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        self.apply(&mut entries, command, now)
    }

    async fn pipeline(&self, commands: Vec<StoreCommand>) -> StoreResult<Vec<StoreReply>> {
        self.check_available()?;
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();
        commands
            .into_iter()
            .map(|command| self.apply(&mut entries, command, now))
            .collect()
    }
}

fn is_expired(entry: &Entry, now: i64) -> bool {
    entry.expires_at.is_some_and(|at| at <= now)
}

fn purge_if_expired(entries: &mut HashMap<String, Entry>, key: &str, now: i64) {
    if entries.get(key).is_some_and(|entry| is_expired(entry, now)) {
        entries.remove(key);
    }
}

fn drop_if_empty(entries: &mut HashMap<String, Entry>, key: &str) {
    let empty = match entries.get(key) {
        Some(Entry {
            value: Value::Set(set),
            ..
        }) => set.is_empty(),
        Some(Entry {
            value: Value::SortedSet(zset),
            ..
        }) => zset.is_empty(),
        _ => false,
    };
    if empty {
        entries.remove(key);
    }
}

fn set_expiry(entries: &mut HashMap<String, Entry>, key: &str, now: i64, ttl_millis: i64) -> StoreReply {
    if ttl_millis <= 0 {
        return StoreReply::Int(entries.remove(key).map_or(0, |_| 1));
    }
    match entries.get_mut(key) {
        Some(entry) => {
            entry.expires_at = Some(now + ttl_millis);
            StoreReply::Int(1)
        }
        None => StoreReply::Int(0),
    }
}

fn add_to_counter(
    entries: &mut HashMap<String, Entry>,
    key: String,
    delta: i64,
    name: &str,
) -> StoreResult<StoreReply> {
    let entry = entries.entry(key).or_insert_with(|| Entry {
        value: Value::Text("0".to_string()),
        expires_at: None,
    });
    match &mut entry.value {
        Value::Text(text) => {
            let current = text.parse::<i64>().map_err(|_| StoreError::Command {
                command: name.to_string(),
                reason: "value is not an integer or out of range".to_string(),
            })?;
            let next = current + delta;
            *text = next.to_string();
            Ok(StoreReply::Int(next))
        }
        _ => Err(wrong_type(name)),
    }
}

fn wrong_type(command: &str) -> StoreError {
    StoreError::Command {
        command: command.to_string(),
        reason: "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use std::time::Duration;

    fn store() -> (std::sync::Arc<MockClock>, InMemoryCoordinationStore) {
        let clock = MockClock::shared();
        let store = InMemoryCoordinationStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_counter_keeps_ttl_across_increments() {
        let (clock, store) = store();
        store.execute(StoreCommand::incr("c")).await.unwrap();
        store.execute(StoreCommand::expire("c", 10)).await.unwrap();
        let reply = store.execute(StoreCommand::incr("c")).await.unwrap();
        assert_eq!(reply, StoreReply::Int(2));
        assert_eq!(store.pttl("c"), Some(10_000));

        clock.advance(Duration::from_secs(10));
        assert_eq!(store.execute(StoreCommand::get("c")).await.unwrap(), StoreReply::Nil);
    }

    #[tokio::test]
    async fn test_setex_expires_lazily() {
        let (clock, store) = store();
        store
            .execute(StoreCommand::set_ex("flag", "on", 5))
            .await
            .unwrap();
        clock.advance(Duration::from_millis(4_999));
        assert_eq!(
            store.execute(StoreCommand::get("flag")).await.unwrap(),
            StoreReply::Text("on".into())
        );
        clock.advance(Duration::from_millis(1));
        assert_eq!(
            store.execute(StoreCommand::exists("flag")).await.unwrap(),
            StoreReply::Int(0)
        );
    }

    #[tokio::test]
    async fn test_sorted_set_window_operations() {
        let (_clock, store) = store();
        for (score, member) in [(100, "a"), (200, "b"), (300, "c")] {
            store
                .execute(StoreCommand::zadd("w", score, member))
                .await
                .unwrap();
        }
        let removed = store
            .execute(StoreCommand::zremrangebyscore("w", 0, 150))
            .await
            .unwrap();
        assert_eq!(removed, StoreReply::Int(1));
        assert_eq!(
            store.execute(StoreCommand::zcount("w", 250, 400)).await.unwrap(),
            StoreReply::Int(1)
        );
        assert_eq!(
            store.execute(StoreCommand::zcard("w")).await.unwrap(),
            StoreReply::Int(2)
        );
    }

    #[tokio::test]
    async fn test_set_membership_and_empty_cleanup() {
        let (_clock, store) = store();
        store.execute(StoreCommand::sadd("s", "x")).await.unwrap();
        assert_eq!(
            store.execute(StoreCommand::sadd("s", "x")).await.unwrap(),
            StoreReply::Int(0)
        );
        store.execute(StoreCommand::srem("s", "x")).await.unwrap();
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_type_is_command_error() {
        let (_clock, store) = store();
        store.execute(StoreCommand::sadd("s", "x")).await.unwrap();
        let err = store.execute(StoreCommand::incr("s")).await.unwrap_err();
        assert!(!err.is_unavailable());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let (_clock, store) = store();
        store.set_unavailable(true);
        let err = store
            .pipeline(vec![StoreCommand::incr("c")])
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(store.commands_executed(), 0);
    }
}
