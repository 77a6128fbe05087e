//! The timeline cache (component B): Redis sorted sets holding, per owner,
//! the most recent `post_id`s pushed to that owner's home timeline.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use timeline_core::domain::TimelineEntry;
use timeline_core::error::{ServiceError, ServiceResult};
use tokio::sync::Mutex;

/// `ZADD` every entry then trim to the top `cap` by score, atomically, so
/// concurrent fan-out writers can never interleave past the cap (spec.md
/// §4.B, §5). Trimming is conditional on cardinality rather than a fixed
/// negative rank offset, so a timeline under the cap is never touched.
const ADD_AND_TRIM_SCRIPT: &str = r#"
local key = KEYS[1]
local cap = tonumber(ARGV[1])
for i = 2, #ARGV, 2 do
    redis.call('ZADD', key, ARGV[i], ARGV[i + 1])
end
local count = redis.call('ZCARD', key)
if count > cap then
    redis.call('ZREMRANGEBYRANK', key, 0, count - cap - 1)
end
return redis.call('ZCARD', key)
"#;

fn timeline_key(owner_id: i64) -> String {
    format!("timeline:{owner_id}")
}

/// Redis breaks sorted-set score ties lexicographically by member, not
/// numerically. Zero-padding `post_id` (always non-negative, `BIGSERIAL`)
/// to a fixed width makes lexical order agree with numeric order, so a
/// same-millisecond tie evicts the lower `post_id` first — matching
/// [`TimelineEntry::cmp_for_read`] (spec.md §3, §4.B).
fn member_for(post_id: i64) -> String {
    format!("{post_id:020}")
}

#[async_trait]
pub trait Cache: Send + Sync {
    /// Inserts `entry` into `owner_id`'s timeline, trimming it to `cap`.
    async fn add(&self, owner_id: i64, entry: TimelineEntry, cap: i64) -> ServiceResult<()>;

    /// Same as [`Cache::add`] but for a batch of entries written in one
    /// round trip — the shape a fan-out chunk write takes.
    async fn add_many(
        &self,
        owner_id: i64,
        entries: &[TimelineEntry],
        cap: i64,
    ) -> ServiceResult<()>;

    /// Returns up to `limit` entries starting at `offset`, ordered by score
    /// descending. Tie-break ordering among equal scores is *not*
    /// guaranteed here — callers that need the exact tie-break rule
    /// (spec.md §4.G: lower `post_id` sorts last) re-sort with
    /// [`TimelineEntry::cmp_for_read`] after merging with any pulled posts.
    async fn range(&self, owner_id: i64, offset: i64, limit: i64) -> ServiceResult<Vec<TimelineEntry>>;

    /// Drops the entire cached timeline for `owner_id`.
    async fn invalidate(&self, owner_id: i64) -> ServiceResult<()>;

    /// Writes the same `entry` into every owner in `owner_ids` as one
    /// batched round trip — the shape a fan-out worker's per-chunk write
    /// takes (spec.md §4.F.d): one entry, many followers, one cache call.
    async fn fanout_add(&self, owner_ids: &[i64], entry: TimelineEntry, cap: i64) -> ServiceResult<()>;

    /// Cheap liveness probe used by the health endpoint; never errors.
    async fn available(&self) -> bool;
}

/// Redis-backed implementation of [`Cache`].
#[derive(Clone)]
pub struct RedisCache {
    conn: Arc<Mutex<ConnectionManager>>,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> ServiceResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| ServiceError::Unavailable(format!("invalid redis url: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| ServiceError::Unavailable(format!("failed to connect to redis: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(manager)),
        })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn add(&self, owner_id: i64, entry: TimelineEntry, cap: i64) -> ServiceResult<()> {
        self.add_many(owner_id, std::slice::from_ref(&entry), cap).await
    }

    async fn add_many(
        &self,
        owner_id: i64,
        entries: &[TimelineEntry],
        cap: i64,
    ) -> ServiceResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let key = timeline_key(owner_id);
        let mut conn = self.conn.lock().await;

        let mut script = redis::Script::new(ADD_AND_TRIM_SCRIPT).prepare_invoke();
        script.key(&key).arg(cap);
        for entry in entries {
            script.arg(entry.score as f64).arg(member_for(entry.post_id));
        }
        script
            .invoke_async::<_, i64>(&mut *conn)
            .await
            .map_err(ServiceError::from)?;
        Ok(())
    }

    async fn range(&self, owner_id: i64, offset: i64, limit: i64) -> ServiceResult<Vec<TimelineEntry>> {
        let key = timeline_key(owner_id);
        let mut conn = self.conn.lock().await;
        let stop = offset + limit - 1;
        let raw: Vec<(String, f64)> = conn
            .zrevrange_withscores(&key, offset as isize, stop as isize)
            .await
            .map_err(ServiceError::from)?;

        raw.into_iter()
            .map(|(member, score)| {
                member
                    .parse::<i64>()
                    .map(|post_id| TimelineEntry {
                        post_id,
                        score: score as i64,
                    })
                    .map_err(|e| ServiceError::Internal(format!("corrupt timeline member: {e}")))
            })
            .collect()
    }

    async fn invalidate(&self, owner_id: i64) -> ServiceResult<()> {
        let key = timeline_key(owner_id);
        let mut conn = self.conn.lock().await;
        let _: () = conn.del(&key).await.map_err(ServiceError::from)?;
        Ok(())
    }

    async fn fanout_add(&self, owner_ids: &[i64], entry: TimelineEntry, cap: i64) -> ServiceResult<()> {
        if owner_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().await;
        let mut pipe = redis::pipe();
        for owner_id in owner_ids {
            let key = timeline_key(*owner_id);
            pipe.cmd("EVAL")
                .arg(ADD_AND_TRIM_SCRIPT)
                .arg(1)
                .arg(key)
                .arg(cap)
                .arg(entry.score as f64)
                .arg(member_for(entry.post_id));
        }
        pipe.query_async::<_, Vec<i64>>(&mut *conn)
            .await
            .map_err(ServiceError::from)?;
        Ok(())
    }

    async fn available(&self) -> bool {
        let mut conn = self.conn.lock().await;
        redis::cmd("PING")
            .query_async::<_, String>(&mut *conn)
            .await
            .is_ok()
    }
}
