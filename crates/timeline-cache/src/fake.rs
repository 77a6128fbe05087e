//! An in-process fake of [`Cache`], used by the service and worker test
//! suites so the invariants in spec.md §8 can be exercised without Redis.

use crate::cache::Cache;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use timeline_core::domain::TimelineEntry;
use timeline_core::error::ServiceResult;

#[derive(Default)]
pub struct FakeCache {
    timelines: Mutex<HashMap<i64, HashMap<i64, i64>>>,
}

impl FakeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: the raw contents of an owner's cached timeline.
    pub fn contents(&self, owner_id: i64) -> Vec<TimelineEntry> {
        let timelines = self.timelines.lock().unwrap();
        let mut entries: Vec<TimelineEntry> = timelines
            .get(&owner_id)
            .map(|members| {
                members
                    .iter()
                    .map(|(&post_id, &score)| TimelineEntry { post_id, score })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(TimelineEntry::cmp_for_read);
        entries
    }
}

#[async_trait]
impl Cache for FakeCache {
    async fn add(&self, owner_id: i64, entry: TimelineEntry, cap: i64) -> ServiceResult<()> {
        self.add_many(owner_id, std::slice::from_ref(&entry), cap).await
    }

    async fn add_many(
        &self,
        owner_id: i64,
        entries: &[TimelineEntry],
        cap: i64,
    ) -> ServiceResult<()> {
        let mut timelines = self.timelines.lock().unwrap();
        let members = timelines.entry(owner_id).or_default();
        for entry in entries {
            members.insert(entry.post_id, entry.score);
        }

        if members.len() as i64 > cap {
            let mut sorted: Vec<(i64, i64)> = members.iter().map(|(&k, &v)| (k, v)).collect();
            sorted.sort_by(|a, b| {
                TimelineEntry::cmp_for_read(
                    &TimelineEntry { post_id: a.0, score: a.1 },
                    &TimelineEntry { post_id: b.0, score: b.1 },
                )
            });
            sorted.truncate(cap as usize);
            *members = sorted.into_iter().collect();
        }
        Ok(())
    }

    async fn range(&self, owner_id: i64, offset: i64, limit: i64) -> ServiceResult<Vec<TimelineEntry>> {
        let entries = self.contents(owner_id);
        Ok(entries
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn invalidate(&self, owner_id: i64) -> ServiceResult<()> {
        self.timelines.lock().unwrap().remove(&owner_id);
        Ok(())
    }

    async fn fanout_add(&self, owner_ids: &[i64], entry: TimelineEntry, cap: i64) -> ServiceResult<()> {
        for owner_id in owner_ids {
            self.add(*owner_id, entry, cap).await?;
        }
        Ok(())
    }

    async fn available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_many_trims_to_cap() {
        let cache = FakeCache::new();
        let entries: Vec<TimelineEntry> = (0..10)
            .map(|i| TimelineEntry { post_id: i, score: i * 10 })
            .collect();
        cache.add_many(1, &entries, 3).await.unwrap();
        let result = cache.range(1, 0, 100).await.unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].post_id, 9);
        assert_eq!(result[2].post_id, 7);
    }

    #[tokio::test]
    async fn add_is_idempotent_for_same_post_id() {
        let cache = FakeCache::new();
        let entry = TimelineEntry { post_id: 1, score: 100 };
        cache.add(7, entry, 1000).await.unwrap();
        cache.add(7, entry, 1000).await.unwrap();
        let result = cache.range(7, 0, 100).await.unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn fanout_add_writes_same_entry_to_every_owner() {
        let cache = FakeCache::new();
        let entry = TimelineEntry { post_id: 42, score: 100 };
        cache.fanout_add(&[1, 2, 3], entry, 1000).await.unwrap();
        for owner in [1, 2, 3] {
            let result = cache.range(owner, 0, 10).await.unwrap();
            assert_eq!(result, vec![entry]);
        }
    }

    #[tokio::test]
    async fn invalidate_clears_timeline() {
        let cache = FakeCache::new();
        cache
            .add(1, TimelineEntry { post_id: 1, score: 1 }, 10)
            .await
            .unwrap();
        cache.invalidate(1).await.unwrap();
        assert!(cache.range(1, 0, 10).await.unwrap().is_empty());
    }
}
