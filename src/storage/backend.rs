use crate::error::BackendError;
use async_trait::async_trait;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// A sorted-set member together with its score. Scores are signed 64-bit so
/// nanosecond timestamps order exactly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScoredMember {
    pub score: i64,
    pub member: String,
}

impl ScoredMember {
    pub fn new(member: impl Into<String>, score: i64) -> Self {
        Self {
            score,
            member: member.into(),
        }
    }
}

/// The key-value capabilities the store consumes. Every call is atomic per
/// key; nothing spans keys transactionally. Sets and sorted sets that become
/// empty cease to exist.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn ping(&self) -> BackendResult<()>;

    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>>;

    /// Values in the order of `keys`.
    async fn mget(&self, keys: &[String]) -> BackendResult<Vec<Option<Vec<u8>>>>;

    async fn set(&self, key: &str, value: Vec<u8>) -> BackendResult<()>;

    async fn mset(&self, entries: Vec<(String, Vec<u8>)>) -> BackendResult<()>;

    /// Removes keys of any kind. Returns how many existed.
    async fn del(&self, keys: &[String]) -> BackendResult<u64>;

    /// Atomically adds `delta` to the integer at `key` (absent counts as 0)
    /// and returns the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> BackendResult<i64>;

    async fn sadd(&self, key: &str, members: &[String]) -> BackendResult<u64>;

    async fn srem(&self, key: &str, members: &[String]) -> BackendResult<u64>;

    async fn smembers(&self, key: &str) -> BackendResult<Vec<String>>;

    /// Adds members or updates the score of existing ones. Returns how many
    /// members were new.
    async fn zadd(&self, key: &str, entries: &[ScoredMember]) -> BackendResult<u64>;

    async fn zrem(&self, key: &str, members: &[String]) -> BackendResult<u64>;

    async fn zcard(&self, key: &str) -> BackendResult<u64>;

    /// Zero-based ascending rank of `member`.
    async fn zrank(&self, key: &str, member: &str) -> BackendResult<Option<u64>>;

    /// Members with ranks in `start..=stop`, ascending. Negative positions
    /// count from the end (`-1` is the last member).
    async fn zrange_by_rank(&self, key: &str, start: i64, stop: i64)
    -> BackendResult<Vec<String>>;

    /// Members with `min <= score <= max`, ascending by score then member.
    async fn zrange_by_score(&self, key: &str, min: i64, max: i64)
    -> BackendResult<Vec<ScoredMember>>;
}
