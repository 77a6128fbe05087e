//! An in-process fake of [`Store`], used by the service and worker test
//! suites so the invariants in spec.md §8 can be exercised without
//! PostgreSQL.

use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use std::collections::HashMap;
use std::sync::Mutex;
use timeline_core::domain::{is_celebrity, Post, User};
use timeline_core::error::{ServiceError, ServiceResult};

#[derive(Default)]
struct Inner {
    next_user_id: i64,
    next_post_id: i64,
    users: HashMap<i64, User>,
    usernames: HashMap<String, i64>,
    emails: HashMap<String, i64>,
    posts: HashMap<i64, Post>,
    edges: std::collections::HashSet<(i64, i64)>,
    clock_ms: i64,
}

pub struct FakeStore {
    inner: Mutex<Inner>,
    celebrity_threshold: i64,
}

impl FakeStore {
    pub fn new(celebrity_threshold: i64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_user_id: 1,
                next_post_id: 1,
                clock_ms: 0,
                ..Default::default()
            }),
            celebrity_threshold,
        }
    }

    /// Test helper: seed a user with a given follower count, bypassing the
    /// follow-edge bookkeeping, to exercise celebrity-threshold boundaries.
    pub fn seed_user_with_followers(&self, username: &str, follower_count: i64) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let user_id = inner.next_user_id;
        inner.next_user_id += 1;
        let user = User {
            user_id,
            username: username.to_string(),
            follower_count,
            following_count: 0,
            is_celebrity: is_celebrity(follower_count, self.celebrity_threshold),
        };
        inner.usernames.insert(username.to_string(), user_id);
        inner.emails.insert(format!("{username}@example.com"), user_id);
        inner.users.insert(user_id, user);
        user_id
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn create_user(&self, username: &str, email: &str) -> ServiceResult<User> {
        let mut inner = self.inner.lock().unwrap();
        if inner.usernames.contains_key(username) || inner.emails.contains_key(email) {
            return Err(ServiceError::Conflict("username or email taken".to_string()));
        }
        let user_id = inner.next_user_id;
        inner.next_user_id += 1;
        let user = User {
            user_id,
            username: username.to_string(),
            follower_count: 0,
            following_count: 0,
            is_celebrity: false,
        };
        inner.usernames.insert(username.to_string(), user_id);
        inner.emails.insert(email.to_string(), user_id);
        inner.users.insert(user_id, user.clone());
        Ok(user)
    }

    async fn get_user_by_id(&self, user_id: i64) -> ServiceResult<User> {
        self.inner
            .lock()
            .unwrap()
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("user {user_id} not found")))
    }

    async fn get_user_by_username(&self, username: &str) -> ServiceResult<User> {
        let inner = self.inner.lock().unwrap();
        let user_id = inner
            .usernames
            .get(username)
            .copied()
            .ok_or_else(|| ServiceError::NotFound(format!("user {username} not found")))?;
        Ok(inner.users.get(&user_id).cloned().unwrap())
    }

    async fn get_user_by_email(&self, email: &str) -> ServiceResult<User> {
        let inner = self.inner.lock().unwrap();
        let user_id = inner
            .emails
            .get(email)
            .copied()
            .ok_or_else(|| ServiceError::NotFound(format!("user with email {email} not found")))?;
        Ok(inner.users.get(&user_id).cloned().unwrap())
    }

    async fn create_post(&self, author_id: i64, content: &str) -> ServiceResult<Post> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.users.contains_key(&author_id) {
            return Err(ServiceError::NotFound(format!("user {author_id} not found")));
        }
        let post_id = inner.next_post_id;
        inner.next_post_id += 1;
        inner.clock_ms += 1;
        let post = Post {
            post_id,
            author_id,
            content: content.to_string(),
            created_at_ms: inner.clock_ms,
        };
        inner.posts.insert(post_id, post.clone());
        Ok(post)
    }

    async fn add_follow(&self, follower_id: i64, following_id: i64) -> ServiceResult<()> {
        if follower_id == following_id {
            return Err(ServiceError::InvalidArgument(
                "a user cannot follow itself".to_string(),
            ));
        }
        let mut inner = self.inner.lock().unwrap();
        if !inner.users.contains_key(&follower_id) || !inner.users.contains_key(&following_id) {
            return Err(ServiceError::NotFound("user not found".to_string()));
        }
        if !inner.edges.insert((follower_id, following_id)) {
            return Err(ServiceError::Conflict("already following".to_string()));
        }

        let threshold = self.celebrity_threshold;
        if let Some(following) = inner.users.get_mut(&following_id) {
            following.follower_count += 1;
            following.is_celebrity = is_celebrity(following.follower_count, threshold);
        }
        if let Some(follower) = inner.users.get_mut(&follower_id) {
            follower.following_count += 1;
        }
        Ok(())
    }

    async fn remove_follow(&self, follower_id: i64, following_id: i64) -> ServiceResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.edges.remove(&(follower_id, following_id)) {
            return Err(ServiceError::NotFound("follow edge not found".to_string()));
        }

        let threshold = self.celebrity_threshold;
        if let Some(following) = inner.users.get_mut(&following_id) {
            following.follower_count = (following.follower_count - 1).max(0);
            following.is_celebrity = is_celebrity(following.follower_count, threshold);
        }
        if let Some(follower) = inner.users.get_mut(&follower_id) {
            follower.following_count = (follower.following_count - 1).max(0);
        }
        Ok(())
    }

    fn followers_of(&self, user_id: i64) -> BoxStream<'static, ServiceResult<i64>> {
        let inner = self.inner.lock().unwrap();
        let followers: Vec<i64> = inner
            .edges
            .iter()
            .filter(|(_, following)| *following == user_id)
            .map(|(follower, _)| *follower)
            .collect();
        Box::pin(stream::iter(followers.into_iter().map(Ok)))
    }

    async fn followed_celebrities_of(&self, user_id: i64) -> ServiceResult<Vec<i64>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .edges
            .iter()
            .filter(|(follower, _)| *follower == user_id)
            .filter_map(|(_, following)| {
                inner
                    .users
                    .get(following)
                    .filter(|u| u.is_celebrity)
                    .map(|u| u.user_id)
            })
            .collect())
    }

    async fn recent_posts_by_authors(
        &self,
        author_ids: &[i64],
        since: DateTime<Utc>,
        limit: i64,
    ) -> ServiceResult<Vec<Post>> {
        let inner = self.inner.lock().unwrap();
        let since_ms = since.timestamp_millis();
        let mut posts: Vec<Post> = inner
            .posts
            .values()
            .filter(|p| author_ids.contains(&p.author_id) && p.created_at_ms >= since_ms)
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        posts.truncate(limit.max(0) as usize);
        Ok(posts)
    }

    async fn get_posts(&self, post_ids: &[i64]) -> ServiceResult<Vec<Post>> {
        let inner = self.inner.lock().unwrap();
        Ok(post_ids.iter().filter_map(|id| inner.posts.get(id).cloned()).collect())
    }

    async fn get_users(&self, user_ids: &[i64]) -> ServiceResult<Vec<User>> {
        let inner = self.inner.lock().unwrap();
        Ok(user_ids.iter().filter_map(|id| inner.users.get(id).cloned()).collect())
    }

    async fn followed_user_ids(&self, user_id: i64) -> ServiceResult<Vec<i64>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .edges
            .iter()
            .filter(|(follower, _)| *follower == user_id)
            .map(|(_, following)| *following)
            .collect())
    }

    async fn counts(&self) -> ServiceResult<(i64, i64, i64)> {
        let inner = self.inner.lock().unwrap();
        let celebrity_count = inner.users.values().filter(|u| u.is_celebrity).count() as i64;
        Ok((
            inner.users.len() as i64,
            inner.posts.len() as i64,
            celebrity_count,
        ))
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn follow_then_unfollow_restores_counters() {
        let store = FakeStore::new(100_000);
        let a = store.create_user("a", "a@example.com").await.unwrap();
        let b = store.create_user("b", "b@example.com").await.unwrap();

        store.add_follow(a.user_id, b.user_id).await.unwrap();
        assert_eq!(store.get_user_by_id(b.user_id).await.unwrap().follower_count, 1);

        store.remove_follow(a.user_id, b.user_id).await.unwrap();
        let refreshed = store.get_user_by_id(b.user_id).await.unwrap();
        assert_eq!(refreshed.follower_count, 0);
        assert_eq!(
            store.get_user_by_id(a.user_id).await.unwrap().following_count,
            0
        );
    }

    #[tokio::test]
    async fn self_follow_rejected() {
        let store = FakeStore::new(100_000);
        let a = store.create_user("a", "a@example.com").await.unwrap();
        let err = store.add_follow(a.user_id, a.user_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn duplicate_follow_conflicts() {
        let store = FakeStore::new(100_000);
        let a = store.create_user("a", "a@example.com").await.unwrap();
        let b = store.create_user("b", "b@example.com").await.unwrap();
        store.add_follow(a.user_id, b.user_id).await.unwrap();
        let err = store.add_follow(a.user_id, b.user_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn celebrity_flip_is_synchronous_with_follow() {
        let store = FakeStore::new(2);
        let celeb = store.create_user("celeb", "celeb@example.com").await.unwrap();
        let f1 = store.create_user("f1", "f1@example.com").await.unwrap();
        let f2 = store.create_user("f2", "f2@example.com").await.unwrap();

        store.add_follow(f1.user_id, celeb.user_id).await.unwrap();
        assert!(!store.get_user_by_id(celeb.user_id).await.unwrap().is_celebrity);

        store.add_follow(f2.user_id, celeb.user_id).await.unwrap();
        assert!(store.get_user_by_id(celeb.user_id).await.unwrap().is_celebrity);
    }
}
