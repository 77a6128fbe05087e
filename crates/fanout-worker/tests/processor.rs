//! End-to-end tests for the fan-out worker's batch processing, exercised
//! entirely against the in-process fakes (spec.md §8).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::{EventBus, FakeEventBus};
use fanout_worker::{run_once, Outcome, WorkerContext};
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use timeline_cache::{Cache, FakeCache};
use timeline_core::domain::{Post, TimelineEntry, User};
use timeline_core::error::{ServiceError, ServiceResult};
use timeline_store::{FakeStore, Store};

/// Wraps a [`FakeStore`] but fails every `get_user_by_id` call with a
/// transient error, to exercise the worker's nack-on-transient-failure path.
struct FlakyAuthorLookupStore {
    inner: Arc<FakeStore>,
}

#[async_trait]
impl Store for FlakyAuthorLookupStore {
    async fn create_user(&self, username: &str, email: &str) -> ServiceResult<User> {
        self.inner.create_user(username, email).await
    }
    async fn get_user_by_id(&self, _user_id: i64) -> ServiceResult<User> {
        Err(ServiceError::Unavailable("database pool exhausted".to_string()))
    }
    async fn get_user_by_username(&self, username: &str) -> ServiceResult<User> {
        self.inner.get_user_by_username(username).await
    }
    async fn get_user_by_email(&self, email: &str) -> ServiceResult<User> {
        self.inner.get_user_by_email(email).await
    }
    async fn create_post(&self, author_id: i64, content: &str) -> ServiceResult<Post> {
        self.inner.create_post(author_id, content).await
    }
    async fn add_follow(&self, follower_id: i64, following_id: i64) -> ServiceResult<()> {
        self.inner.add_follow(follower_id, following_id).await
    }
    async fn remove_follow(&self, follower_id: i64, following_id: i64) -> ServiceResult<()> {
        self.inner.remove_follow(follower_id, following_id).await
    }
    fn followers_of(&self, user_id: i64) -> BoxStream<'static, ServiceResult<i64>> {
        self.inner.followers_of(user_id)
    }
    async fn followed_celebrities_of(&self, user_id: i64) -> ServiceResult<Vec<i64>> {
        self.inner.followed_celebrities_of(user_id).await
    }
    async fn recent_posts_by_authors(
        &self,
        author_ids: &[i64],
        since: DateTime<Utc>,
        limit: i64,
    ) -> ServiceResult<Vec<Post>> {
        self.inner.recent_posts_by_authors(author_ids, since, limit).await
    }
    async fn get_posts(&self, post_ids: &[i64]) -> ServiceResult<Vec<Post>> {
        self.inner.get_posts(post_ids).await
    }
    async fn get_users(&self, user_ids: &[i64]) -> ServiceResult<Vec<User>> {
        self.inner.get_users(user_ids).await
    }
    async fn followed_user_ids(&self, user_id: i64) -> ServiceResult<Vec<i64>> {
        self.inner.followed_user_ids(user_id).await
    }
    async fn counts(&self) -> ServiceResult<(i64, i64, i64)> {
        self.inner.counts().await
    }
    async fn is_healthy(&self) -> bool {
        self.inner.is_healthy().await
    }
}

const CELEBRITY_THRESHOLD: i64 = 3;
const TIMELINE_CAP: i64 = 1000;

fn post_created_payload(post_id: i64, author_id: i64, created_at_ms: i64) -> serde_json::Value {
    serde_json::json!({
        "post_id": post_id,
        "author_id": author_id,
        "is_celebrity_at_emit": false,
        "created_at_ms": created_at_ms,
    })
}

fn new_ctx(store: Arc<FakeStore>, cache: Arc<FakeCache>, bus: Arc<FakeEventBus>) -> WorkerContext {
    WorkerContext {
        store,
        cache,
        bus,
        timeline_cap: TIMELINE_CAP,
        follower_chunk: 2,
        worker_concurrency: 4,
    }
}

#[tokio::test]
async fn fans_out_post_to_every_follower_cache() {
    let store = Arc::new(FakeStore::new(CELEBRITY_THRESHOLD));
    let cache = Arc::new(FakeCache::new());
    let bus = Arc::new(FakeEventBus::default());

    let author = store.create_user("author", "author@example.com").await.unwrap();
    let mut followers = Vec::new();
    for i in 0..5 {
        let follower = store
            .create_user(&format!("follower{i}"), &format!("follower{i}@example.com"))
            .await
            .unwrap();
        store.add_follow(follower.user_id, author.user_id).await.unwrap();
        followers.push(follower.user_id);
    }
    let post = store.create_post(author.user_id, "hello").await.unwrap();

    bus.publish(post_created_payload(post.post_id, author.user_id, post.created_at_ms))
        .await
        .unwrap();

    let ctx = new_ctx(store, cache.clone(), bus.clone());
    let processed = run_once(&ctx, 10, 0).await;
    assert_eq!(processed, 1);
    assert_eq!(bus.pending_count(), 0, "message should have been acked");

    for follower_id in followers {
        let entries = cache.contents(follower_id);
        assert_eq!(entries, vec![TimelineEntry { post_id: post.post_id, score: post.created_at_ms }]);
    }
}

#[tokio::test]
async fn malformed_payload_is_poisoned_and_acked() {
    let store = Arc::new(FakeStore::new(CELEBRITY_THRESHOLD));
    let cache = Arc::new(FakeCache::new());
    let bus = Arc::new(FakeEventBus::default());

    bus.publish(serde_json::json!({"garbage": true})).await.unwrap();

    let ctx = new_ctx(store, cache, bus.clone());
    let processed = run_once(&ctx, 10, 0).await;
    assert_eq!(processed, 1);
    assert_eq!(bus.pending_count(), 0, "poisoned message must still be acked, not redelivered");
    assert_eq!(bus.dead_letter_count(), 0);
}

#[tokio::test]
async fn celebrity_author_is_skipped_at_process_time() {
    let store = Arc::new(FakeStore::new(CELEBRITY_THRESHOLD));
    let cache = Arc::new(FakeCache::new());
    let bus = Arc::new(FakeEventBus::default());

    let celeb = store.create_user("celeb", "celeb@example.com").await.unwrap();
    let mut followers = Vec::new();
    for i in 0..(CELEBRITY_THRESHOLD as usize) {
        let follower = store
            .create_user(&format!("f{i}"), &format!("f{i}@example.com"))
            .await
            .unwrap();
        store.add_follow(follower.user_id, celeb.user_id).await.unwrap();
        followers.push(follower.user_id);
    }
    // By now celeb.follower_count == CELEBRITY_THRESHOLD, so is_celebrity flipped
    // true synchronously with the last add_follow, before the event is processed.
    let post = store.create_post(celeb.user_id, "i'm famous now").await.unwrap();
    bus.publish(post_created_payload(post.post_id, celeb.user_id, post.created_at_ms))
        .await
        .unwrap();

    let ctx = new_ctx(store, cache.clone(), bus.clone());
    let processed = run_once(&ctx, 10, 0).await;
    assert_eq!(processed, 1);
    assert_eq!(bus.pending_count(), 0);

    for follower_id in followers {
        assert!(cache.contents(follower_id).is_empty(), "celebrity posts must not be pushed");
    }
}

#[tokio::test]
async fn unknown_author_is_skipped_not_nacked() {
    let store = Arc::new(FakeStore::new(CELEBRITY_THRESHOLD));
    let cache = Arc::new(FakeCache::new());
    let bus = Arc::new(FakeEventBus::default());

    bus.publish(post_created_payload(999, 424242, 1)).await.unwrap();

    let ctx = new_ctx(store, cache, bus.clone());
    let processed = run_once(&ctx, 10, 0).await;
    assert_eq!(processed, 1);
    assert_eq!(bus.pending_count(), 0);
}

#[tokio::test]
async fn transient_author_lookup_error_is_nacked_not_dropped() {
    let inner = Arc::new(FakeStore::new(CELEBRITY_THRESHOLD));
    let author = inner.create_user("author", "author@example.com").await.unwrap();
    let follower = inner.create_user("follower", "follower@example.com").await.unwrap();
    inner.add_follow(follower.user_id, author.user_id).await.unwrap();
    let post = inner.create_post(author.user_id, "hi").await.unwrap();

    let store = Arc::new(FlakyAuthorLookupStore { inner: inner.clone() });
    let cache = Arc::new(FakeCache::new());
    let bus = Arc::new(FakeEventBus::default());

    bus.publish(post_created_payload(post.post_id, author.user_id, post.created_at_ms))
        .await
        .unwrap();

    let ctx = WorkerContext {
        store,
        cache: cache.clone(),
        bus: bus.clone(),
        timeline_cap: TIMELINE_CAP,
        follower_chunk: 2,
        worker_concurrency: 4,
    };
    let processed = run_once(&ctx, 10, 0).await;
    assert_eq!(processed, 1);
    assert_eq!(
        bus.pending_count(),
        1,
        "a transient author lookup error must leave the message unacked for redelivery, not drop it"
    );
    assert!(
        cache.contents(follower.user_id).is_empty(),
        "no fan-out should have happened while the lookup was failing"
    );
}

#[tokio::test]
async fn redelivered_event_is_idempotent_in_cache() {
    let store = Arc::new(FakeStore::new(CELEBRITY_THRESHOLD));
    let cache = Arc::new(FakeCache::new());
    let bus = Arc::new(FakeEventBus::new(Duration::from_millis(10), 5));

    let author = store.create_user("author", "author@example.com").await.unwrap();
    let follower = store.create_user("follower", "follower@example.com").await.unwrap();
    store.add_follow(follower.user_id, author.user_id).await.unwrap();
    let post = store.create_post(author.user_id, "hi").await.unwrap();

    bus.publish(post_created_payload(post.post_id, author.user_id, post.created_at_ms))
        .await
        .unwrap();

    let ctx = new_ctx(store, cache.clone(), bus.clone());

    // First delivery processes and fans out, but we don't ack it ourselves here;
    // run_once acks internally on success, so simulate redelivery by publishing
    // the same payload again (at-least-once semantics: the bus may reattempt
    // after a crash between fan-out and ack).
    run_once(&ctx, 10, 0).await;
    bus.publish(post_created_payload(post.post_id, author.user_id, post.created_at_ms))
        .await
        .unwrap();
    run_once(&ctx, 10, 0).await;

    let entries = cache.contents(follower.user_id);
    assert_eq!(entries.len(), 1, "ZADD on the same post_id is idempotent, not duplicated");
}

#[tokio::test]
async fn no_messages_returns_zero_without_blocking() {
    let store = Arc::new(FakeStore::new(CELEBRITY_THRESHOLD));
    let cache = Arc::new(FakeCache::new());
    let bus = Arc::new(FakeEventBus::default());

    let ctx = new_ctx(store, cache, bus);
    let processed = run_once(&ctx, 10, 0).await;
    assert_eq!(processed, 0);
}

#[allow(dead_code)]
fn assert_outcome_is_acked(outcome: Outcome) {
    assert_eq!(outcome, Outcome::Acked);
}
