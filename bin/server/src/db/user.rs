//! Postgres repository for local users.

use async_trait::async_trait;
use fleetdesk_core::UserId;
use fleetdesk_oauth::{
    LocalUser, NewLocalUser, NewThirdLink, StorageError, UserRepository, UserThirdLink,
};
use sqlx::{FromRow, PgPool};

use super::link::LinkRow;
use super::storage_error;

/// Row type for user queries.
#[derive(FromRow)]
pub(crate) struct UserRow {
    id: i64,
    username: String,
    email: Option<String>,
    nickname: Option<String>,
    group_id: i64,
}

impl From<UserRow> for LocalUser {
    fn from(row: UserRow) -> Self {
        Self {
            id: UserId::new(row.id),
            username: row.username,
            email: row.email,
            nickname: row.nickname,
            group_id: row.group_id,
        }
    }
}

/// Repository for user operations.
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    /// Creates a new user repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: UserId) -> Result<Option<LocalUser>, StorageError> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, username, email, nickname, group_id
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.map(LocalUser::from))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<LocalUser>, StorageError> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, username, email, nickname, group_id
            FROM users
            WHERE LOWER(email) = LOWER($1)
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(row.map(LocalUser::from))
    }

    async fn username_exists(&self, username: &str) -> Result<bool, StorageError> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE username = $1)")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)
    }

    async fn create_with_link(
        &self,
        user: &NewLocalUser,
        link: &NewThirdLink,
    ) -> Result<(LocalUser, UserThirdLink), StorageError> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let user_row: UserRow = sqlx::query_as(
            r#"
            INSERT INTO users (username, email, nickname, group_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, email, nickname, group_id
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.nickname)
        .bind(user.group_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_error)?;

        let link_row: LinkRow = sqlx::query_as(
            r#"
            INSERT INTO user_thirds (user_id, op, third_type, open_id, name, email)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, op, third_type, open_id, name, email, created_at
            "#,
        )
        .bind(user_row.id)
        .bind(&link.provider_id)
        .bind(link.provider_kind.as_str())
        .bind(&link.external_id)
        .bind(&link.third_name)
        .bind(&link.third_email)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_error)?;

        tx.commit().await.map_err(storage_error)?;

        Ok((LocalUser::from(user_row), link_row.try_into_link()?))
    }
}
