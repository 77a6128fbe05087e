//! The durable store (component A): system of record for users, posts,
//! and follow edges, with denormalized follower/following counters.

use async_stream::try_stream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::TryStreamExt;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use timeline_core::domain::{is_celebrity, to_score_ms, Post, User};
use timeline_core::error::{ServiceError, ServiceResult};

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_user(&self, username: &str, email: &str) -> ServiceResult<User>;
    async fn get_user_by_id(&self, user_id: i64) -> ServiceResult<User>;
    async fn get_user_by_username(&self, username: &str) -> ServiceResult<User>;
    async fn get_user_by_email(&self, email: &str) -> ServiceResult<User>;

    async fn create_post(&self, author_id: i64, content: &str) -> ServiceResult<Post>;

    async fn add_follow(&self, follower_id: i64, following_id: i64) -> ServiceResult<()>;
    async fn remove_follow(&self, follower_id: i64, following_id: i64) -> ServiceResult<()>;

    /// Lazy, unbounded-safe enumeration of `user_id`s following `user_id`.
    fn followers_of(&self, user_id: i64) -> BoxStream<'static, ServiceResult<i64>>;

    async fn followed_celebrities_of(&self, user_id: i64) -> ServiceResult<Vec<i64>>;

    async fn recent_posts_by_authors(
        &self,
        author_ids: &[i64],
        since: DateTime<Utc>,
        limit: i64,
    ) -> ServiceResult<Vec<Post>>;

    async fn get_posts(&self, post_ids: &[i64]) -> ServiceResult<Vec<Post>>;

    async fn get_users(&self, user_ids: &[i64]) -> ServiceResult<Vec<User>>;

    async fn followed_user_ids(&self, user_id: i64) -> ServiceResult<Vec<i64>>;

    async fn counts(&self) -> ServiceResult<(i64, i64, i64)>;

    /// Cheap liveness probe used by the health endpoint.
    async fn is_healthy(&self) -> bool;
}

fn row_to_user(row: PgRow) -> User {
    User {
        user_id: row.get("user_id"),
        username: row.get("username"),
        follower_count: row.get("follower_count"),
        following_count: row.get("following_count"),
        is_celebrity: row.get("is_celebrity"),
    }
}

fn row_to_post(row: PgRow) -> Post {
    let created_at: DateTime<Utc> = row.get("created_at");
    Post {
        post_id: row.get("post_id"),
        author_id: row.get("author_id"),
        content: row.get("content"),
        created_at_ms: to_score_ms(created_at),
    }
}

/// PostgreSQL-backed implementation of [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    celebrity_threshold: i64,
}

impl PgStore {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        connect_timeout_secs: u64,
        acquire_timeout_secs: u64,
        celebrity_threshold: i64,
    ) -> ServiceResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(std::time::Duration::from_secs(acquire_timeout_secs))
            .test_before_acquire(true)
            .connect(database_url)
            .await
            .map_err(|e| ServiceError::Unavailable(format!("failed to connect to database: {e}")))?;

        // `acquire_timeout` bounds waiting for a free connection, not the
        // initial handshake, so verify connectivity with an explicit probe
        // under its own timeout.
        match tokio::time::timeout(
            std::time::Duration::from_secs(connect_timeout_secs),
            sqlx::query("SELECT 1").execute(&pool),
        )
        .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(ServiceError::Unavailable(format!(
                    "database connection verification failed: {e}"
                )))
            }
            Err(_) => {
                return Err(ServiceError::Unavailable(format!(
                    "database connection verification timed out after {connect_timeout_secs}s"
                )))
            }
        }

        Ok(Self {
            pool,
            celebrity_threshold,
        })
    }

    pub async fn migrate(&self) -> ServiceResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ServiceError::Internal(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, username: &str, email: &str) -> ServiceResult<User> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (username, email)
            VALUES ($1, $2)
            RETURNING user_id, username, follower_count, following_count, is_celebrity
            "#,
        )
        .bind(username)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(row_to_user(row))
    }

    async fn get_user_by_id(&self, user_id: i64) -> ServiceResult<User> {
        let row = sqlx::query(
            "SELECT user_id, username, follower_count, following_count, is_celebrity FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row_to_user(row))
    }

    async fn get_user_by_username(&self, username: &str) -> ServiceResult<User> {
        let row = sqlx::query(
            "SELECT user_id, username, follower_count, following_count, is_celebrity FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(row_to_user(row))
    }

    async fn get_user_by_email(&self, email: &str) -> ServiceResult<User> {
        let row = sqlx::query(
            "SELECT user_id, username, follower_count, following_count, is_celebrity FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(row_to_user(row))
    }

    async fn create_post(&self, author_id: i64, content: &str) -> ServiceResult<Post> {
        let row = sqlx::query(
            r#"
            INSERT INTO posts (author_id, content)
            VALUES ($1, $2)
            RETURNING post_id, author_id, content, created_at
            "#,
        )
        .bind(author_id)
        .bind(content)
        .fetch_one(&self.pool)
        .await?;
        Ok(row_to_post(row))
    }

    async fn add_follow(&self, follower_id: i64, following_id: i64) -> ServiceResult<()> {
        if follower_id == following_id {
            return Err(ServiceError::InvalidArgument(
                "a user cannot follow itself".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO follow_edges (follower_id, following_id) VALUES ($1, $2)",
        )
        .bind(follower_id)
        .bind(following_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                ServiceError::Conflict("already following".to_string())
            }
            _ => ServiceError::from(e),
        })?;

        let new_follower_count: i64 = sqlx::query_scalar(
            "UPDATE users SET follower_count = follower_count + 1 WHERE user_id = $1 RETURNING follower_count",
        )
        .bind(following_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET is_celebrity = $2 WHERE user_id = $1")
            .bind(following_id)
            .bind(is_celebrity(new_follower_count, self.celebrity_threshold))
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE users SET following_count = following_count + 1 WHERE user_id = $1")
            .bind(follower_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn remove_follow(&self, follower_id: i64, following_id: i64) -> ServiceResult<()> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            "DELETE FROM follow_edges WHERE follower_id = $1 AND following_id = $2",
        )
        .bind(follower_id)
        .bind(following_id)
        .execute(&mut *tx)
        .await?;

        if deleted.rows_affected() == 0 {
            return Err(ServiceError::NotFound("follow edge not found".to_string()));
        }

        let new_follower_count: i64 = sqlx::query_scalar(
            "UPDATE users SET follower_count = GREATEST(follower_count - 1, 0) WHERE user_id = $1 RETURNING follower_count",
        )
        .bind(following_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET is_celebrity = $2 WHERE user_id = $1")
            .bind(following_id)
            .bind(is_celebrity(new_follower_count, self.celebrity_threshold))
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE users SET following_count = GREATEST(following_count - 1, 0) WHERE user_id = $1",
        )
        .bind(follower_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    fn followers_of(&self, user_id: i64) -> BoxStream<'static, ServiceResult<i64>> {
        let pool = self.pool.clone();
        Box::pin(try_stream! {
            let mut rows = sqlx::query_scalar::<_, i64>(
                "SELECT follower_id FROM follow_edges WHERE following_id = $1",
            )
            .bind(user_id)
            .fetch(&pool);

            while let Some(follower_id) = rows.try_next().await? {
                yield follower_id;
            }
        })
    }

    async fn followed_celebrities_of(&self, user_id: i64) -> ServiceResult<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT u.user_id
            FROM follow_edges fe
            JOIN users u ON u.user_id = fe.following_id
            WHERE fe.follower_id = $1 AND u.is_celebrity = TRUE
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn recent_posts_by_authors(
        &self,
        author_ids: &[i64],
        since: DateTime<Utc>,
        limit: i64,
    ) -> ServiceResult<Vec<Post>> {
        if author_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT post_id, author_id, content, created_at
            FROM posts
            WHERE author_id = ANY($1) AND created_at >= $2
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(author_ids)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_post).collect())
    }

    async fn get_posts(&self, post_ids: &[i64]) -> ServiceResult<Vec<Post>> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT post_id, author_id, content, created_at FROM posts WHERE post_id = ANY($1)",
        )
        .bind(post_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_post).collect())
    }

    async fn get_users(&self, user_ids: &[i64]) -> ServiceResult<Vec<User>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT user_id, username, follower_count, following_count, is_celebrity FROM users WHERE user_id = ANY($1)",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_user).collect())
    }

    async fn followed_user_ids(&self, user_id: i64) -> ServiceResult<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT following_id FROM follow_edges WHERE follower_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn counts(&self) -> ServiceResult<(i64, i64, i64)> {
        let total_users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        let total_posts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await?;
        let celebrity_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_celebrity = TRUE")
                .fetch_one(&self.pool)
                .await?;
        Ok((total_users, total_posts, celebrity_count))
    }

    async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
