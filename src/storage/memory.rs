use crate::error::BackendError;
use crate::storage::backend::{BackendResult, KvBackend, ScoredMember};
use async_trait::async_trait;
use im::{HashMap, OrdSet};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: OrdSet<(i64, String)>,
}

impl SortedSet {
    fn upsert(&mut self, member: &str, score: i64) -> bool {
        let previous = self.scores.insert(member.to_string(), score);
        if let Some(old) = previous {
            self.ordered.remove(&(old, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
        previous.is_none()
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.scores.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Value(Vec<u8>),
    Set(OrdSet<String>),
    Sorted(SortedSet),
}

impl Entry {
    fn kind(&self) -> &'static str {
        match self {
            Entry::Value(_) => "string",
            Entry::Set(_) => "set",
            Entry::Sorted(_) => "sorted set",
        }
    }
}

/// In-process [`KvBackend`] over persistent `im` collections. Writes can be
/// made to fail on demand to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: RwLock<HashMap<String, Entry>>,
    write_budget: Mutex<Option<u64>>,
    unavailable: AtomicBool,
    writes: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `writes` more write calls succeed, then fails every write until
    /// [`MemoryBackend::heal`] is called.
    pub fn fail_writes_after(&self, writes: u64) {
        *self.write_budget.lock() = Some(writes);
    }

    /// Fails every call, reads included.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        *self.write_budget.lock() = None;
        self.unavailable.store(false, Ordering::SeqCst);
    }

    /// Successful write calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Every live key, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn check_read(&self) -> BackendResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("backend marked unavailable".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> BackendResult<()> {
        self.check_read()?;
        let mut budget = self.write_budget.lock();
        match budget.as_mut() {
            Some(0) => Err(BackendError::Unavailable("injected write failure".into())),
            Some(remaining) => {
                *remaining -= 1;
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => {
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    fn with_set<R>(
        &self,
        key: &str,
        create: bool,
        f: impl FnOnce(&mut OrdSet<String>) -> R,
    ) -> BackendResult<Option<R>> {
        let mut data = self.data.write();
        let mut set = match data.get(key) {
            Some(Entry::Set(set)) => set.clone(),
            Some(other) => {
                tracing::debug!(key, found = other.kind(), "set operation on non-set key");
                return Err(BackendError::WrongType {
                    key: key.to_string(),
                    expected: "set",
                });
            }
            None if create => OrdSet::new(),
            None => return Ok(None),
        };
        let out = f(&mut set);
        if set.is_empty() {
            data.remove(key);
        } else {
            data.insert(key.to_string(), Entry::Set(set));
        }
        Ok(Some(out))
    }

    fn with_sorted<R>(
        &self,
        key: &str,
        create: bool,
        f: impl FnOnce(&mut SortedSet) -> R,
    ) -> BackendResult<Option<R>> {
        let mut data = self.data.write();
        let mut zset = match data.get(key) {
            Some(Entry::Sorted(zset)) => zset.clone(),
            Some(_) => {
                return Err(BackendError::WrongType {
                    key: key.to_string(),
                    expected: "sorted set",
                });
            }
            None if create => SortedSet::default(),
            None => return Ok(None),
        };
        let out = f(&mut zset);
        if zset.scores.is_empty() {
            data.remove(key);
        } else {
            data.insert(key.to_string(), Entry::Sorted(zset));
        }
        Ok(Some(out))
    }

    fn read_sorted(&self, key: &str) -> BackendResult<Option<SortedSet>> {
        match self.data.read().get(key) {
            Some(Entry::Sorted(zset)) => Ok(Some(zset.clone())),
            Some(_) => Err(BackendError::WrongType {
                key: key.to_string(),
                expected: "sorted set",
            }),
            None => Ok(None),
        }
    }
}

fn resolve_rank(position: i64, len: usize) -> i64 {
    if position < 0 {
        len as i64 + position
    } else {
        position
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn ping(&self) -> BackendResult<()> {
        self.check_read()
    }

    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        self.check_read()?;
        match self.data.read().get(key) {
            Some(Entry::Value(bytes)) => Ok(Some(bytes.clone())),
            Some(_) => Err(BackendError::WrongType {
                key: key.to_string(),
                expected: "string",
            }),
            None => Ok(None),
        }
    }

    async fn mget(&self, keys: &[String]) -> BackendResult<Vec<Option<Vec<u8>>>> {
        self.check_read()?;
        let data = self.data.read();
        Ok(keys
            .iter()
            .map(|key| match data.get(key) {
                Some(Entry::Value(bytes)) => Some(bytes.clone()),
                _ => None,
            })
            .collect())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> BackendResult<()> {
        self.check_write()?;
        self.data
            .write()
            .insert(key.to_string(), Entry::Value(value));
        Ok(())
    }

    async fn mset(&self, entries: Vec<(String, Vec<u8>)>) -> BackendResult<()> {
        self.check_write()?;
        let mut data = self.data.write();
        for (key, value) in entries {
            data.insert(key, Entry::Value(value));
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> BackendResult<u64> {
        self.check_write()?;
        let mut data = self.data.write();
        Ok(keys.iter().filter(|key| data.remove(*key).is_some()).count() as u64)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> BackendResult<i64> {
        self.check_write()?;
        let mut data = self.data.write();
        let current = match data.get(key) {
            Some(Entry::Value(bytes)) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| BackendError::Rejected {
                    key: key.to_string(),
                    message: "value is not an integer".into(),
                })?,
            Some(_) => {
                return Err(BackendError::WrongType {
                    key: key.to_string(),
                    expected: "string",
                });
            }
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| BackendError::Rejected {
                key: key.to_string(),
                message: "increment overflows".into(),
            })?;
        data.insert(key.to_string(), Entry::Value(next.to_string().into_bytes()));
        Ok(next)
    }

    async fn sadd(&self, key: &str, members: &[String]) -> BackendResult<u64> {
        self.check_write()?;
        if members.is_empty() {
            return Ok(0);
        }
        let added = self.with_set(key, true, |set| {
            members
                .iter()
                .filter(|m| set.insert((*m).clone()).is_none())
                .count() as u64
        })?;
        Ok(added.unwrap_or(0))
    }

    async fn srem(&self, key: &str, members: &[String]) -> BackendResult<u64> {
        self.check_write()?;
        let removed = self.with_set(key, false, |set| {
            members
                .iter()
                .filter(|m| set.remove(*m).is_some())
                .count() as u64
        })?;
        Ok(removed.unwrap_or(0))
    }

    async fn smembers(&self, key: &str) -> BackendResult<Vec<String>> {
        self.check_read()?;
        match self.data.read().get(key) {
            Some(Entry::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(BackendError::WrongType {
                key: key.to_string(),
                expected: "set",
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn zadd(&self, key: &str, entries: &[ScoredMember]) -> BackendResult<u64> {
        self.check_write()?;
        if entries.is_empty() {
            return Ok(0);
        }
        let added = self.with_sorted(key, true, |zset| {
            entries
                .iter()
                .filter(|e| zset.upsert(&e.member, e.score))
                .count() as u64
        })?;
        Ok(added.unwrap_or(0))
    }

    async fn zrem(&self, key: &str, members: &[String]) -> BackendResult<u64> {
        self.check_write()?;
        let removed = self.with_sorted(key, false, |zset| {
            members.iter().filter(|m| zset.remove(m)).count() as u64
        })?;
        Ok(removed.unwrap_or(0))
    }

    async fn zcard(&self, key: &str) -> BackendResult<u64> {
        self.check_read()?;
        Ok(self.read_sorted(key)?.map_or(0, |z| z.len() as u64))
    }

    async fn zrank(&self, key: &str, member: &str) -> BackendResult<Option<u64>> {
        self.check_read()?;
        let Some(zset) = self.read_sorted(key)? else {
            return Ok(None);
        };
        let Some(score) = zset.scores.get(member).copied() else {
            return Ok(None);
        };
        let rank = zset
            .ordered
            .iter()
            .take_while(|(s, m)| (*s, m.as_str()) < (score, member))
            .count();
        Ok(Some(rank as u64))
    }

    async fn zrange_by_rank(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> BackendResult<Vec<String>> {
        self.check_read()?;
        let Some(zset) = self.read_sorted(key)? else {
            return Ok(Vec::new());
        };
        let len = zset.len();
        let start = resolve_rank(start, len).max(0);
        let stop = resolve_rank(stop, len).min(len as i64 - 1);
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(zset
            .ordered
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|(_, member)| member.clone())
            .collect())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> BackendResult<Vec<ScoredMember>> {
        self.check_read()?;
        if min > max {
            return Ok(Vec::new());
        }
        let Some(zset) = self.read_sorted(key)? else {
            return Ok(Vec::new());
        };
        Ok(zset
            .ordered
            .range((min, String::new())..)
            .take_while(|(score, _)| *score <= max)
            .map(|(score, member)| ScoredMember::new(member.clone(), *score))
            .collect())
    }
}
