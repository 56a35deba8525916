//! Postgres repository for third-party links (`user_thirds`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetdesk_core::{ThirdLinkId, UserId};
use fleetdesk_oauth::{LinkRepository, NewThirdLink, ProviderKind, StorageError, UserThirdLink};
use sqlx::{FromRow, PgPool};

use super::storage_error;

/// Row type for link queries.
#[derive(FromRow)]
pub(crate) struct LinkRow {
    id: i64,
    user_id: i64,
    op: String,
    third_type: String,
    open_id: String,
    name: Option<String>,
    email: Option<String>,
    created_at: DateTime<Utc>,
}

impl LinkRow {
    pub(crate) fn try_into_link(self) -> Result<UserThirdLink, StorageError> {
        let provider_kind: ProviderKind =
            self.third_type
                .parse()
                .map_err(|e: String| StorageError::Database {
                    details: format!("link {}: {e}", self.id),
                })?;
        Ok(UserThirdLink {
            id: ThirdLinkId::new(self.id),
            user_id: UserId::new(self.user_id),
            provider_id: self.op,
            provider_kind,
            external_id: self.open_id,
            third_name: self.name,
            third_email: self.email,
            created_at: self.created_at,
        })
    }
}

const LINK_COLUMNS: &str = "id, user_id, op, third_type, open_id, name, email, created_at";

/// Repository for link operations.
#[derive(Clone)]
pub struct PgLinkRepository {
    pool: PgPool,
}

impl PgLinkRepository {
    /// Creates a new link repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LinkRepository for PgLinkRepository {
    async fn find_by_provider_external_id(
        &self,
        provider_id: &str,
        external_id: &str,
    ) -> Result<Option<UserThirdLink>, StorageError> {
        let row: Option<LinkRow> = sqlx::query_as(&format!(
            "SELECT {LINK_COLUMNS} FROM user_thirds WHERE op = $1 AND open_id = $2"
        ))
        .bind(provider_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(LinkRow::try_into_link).transpose()
    }

    async fn find_by_user_provider(
        &self,
        user_id: UserId,
        provider_id: &str,
    ) -> Result<Option<UserThirdLink>, StorageError> {
        let row: Option<LinkRow> = sqlx::query_as(&format!(
            "SELECT {LINK_COLUMNS} FROM user_thirds WHERE user_id = $1 AND op = $2"
        ))
        .bind(user_id.get())
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(LinkRow::try_into_link).transpose()
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<UserThirdLink>, StorageError> {
        let rows: Vec<LinkRow> = sqlx::query_as(&format!(
            "SELECT {LINK_COLUMNS} FROM user_thirds WHERE user_id = $1 ORDER BY id"
        ))
        .bind(user_id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(LinkRow::try_into_link).collect()
    }

    async fn create(
        &self,
        user_id: UserId,
        link: &NewThirdLink,
    ) -> Result<UserThirdLink, StorageError> {
        let row: LinkRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO user_thirds (user_id, op, third_type, open_id, name, email)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {LINK_COLUMNS}
            "#
        ))
        .bind(user_id.get())
        .bind(&link.provider_id)
        .bind(link.provider_kind.as_str())
        .bind(&link.external_id)
        .bind(&link.third_name)
        .bind(&link.third_email)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;

        row.try_into_link()
    }

    async fn delete(&self, id: ThirdLinkId) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM user_thirds WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(result.rows_affected() > 0)
    }
}
