//! Bearer tokens and login logs.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use fleetdesk_core::{UserId, UserTokenId};
use fleetdesk_oauth::DeviceContext;
use rand::RngCore;
use sqlx::PgPool;

/// Login log type recorded for OAuth sign-ins.
pub const LOGIN_TYPE_OAUTH: &str = "oauth";

/// A freshly issued bearer token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub id: UserTokenId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Login log row, built from the device context captured at begin-auth.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginLogEntry {
    pub client: String,
    pub device_id: String,
    pub uuid: String,
    pub ip: String,
    pub platform: String,
}

impl LoginLogEntry {
    pub fn from_device(device: Option<&DeviceContext>, ip: impl Into<String>) -> Self {
        let device = device.cloned().unwrap_or_default();
        Self {
            client: device.client,
            device_id: device.device_id,
            uuid: device.uuid,
            ip: ip.into(),
            platform: device.os,
        }
    }
}

/// Repository for token operations.
#[derive(Clone)]
pub struct TokenRepository {
    pool: PgPool,
}

impl TokenRepository {
    /// Creates a new token repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Issues a token for `user_id` and records the login, in one transaction.
    pub async fn issue(
        &self,
        user_id: UserId,
        entry: &LoginLogEntry,
        lifetime: Duration,
    ) -> Result<IssuedToken, sqlx::Error> {
        let token = generate_token();
        let expires_at = Utc::now() + lifetime;

        let mut tx = self.pool.begin().await?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO user_tokens (user_id, token, device_id, device_uuid, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(user_id.get())
        .bind(&token)
        .bind(&entry.device_id)
        .bind(&entry.uuid)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO login_logs (user_id, client, device_id, uuid, ip, type, platform)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(user_id.get())
        .bind(&entry.client)
        .bind(&entry.device_id)
        .bind(&entry.uuid)
        .bind(&entry.ip)
        .bind(LOGIN_TYPE_OAUTH)
        .bind(&entry.platform)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(IssuedToken {
            id: UserTokenId::new(id),
            token,
            expires_at,
        })
    }

    /// Returns the owner of an unexpired token.
    pub async fn find_user(&self, token: &str) -> Result<Option<UserId>, sqlx::Error> {
        let user_id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT user_id
            FROM user_tokens
            WHERE token = $1 AND expires_at > NOW()
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user_id.map(UserId::new))
    }

    /// Deletes expired tokens.
    pub async fn delete_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM user_tokens
            WHERE expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

/// Generates an opaque bearer token from 32 random bytes.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
