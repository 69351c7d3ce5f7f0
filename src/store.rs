use std::collections::HashMap;

use async_mutex::Mutex;
use async_trait::async_trait;
use chrono::Utc;
use slog::o;
use sqlx::PgPool;

use crate::crypto;
use crate::error::{Error, Result};
use crate::models::Identity;

/// One record per spotify user, keyed by their spotify id.
/// Each operation touches a single record atomically.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Create the user's record or overwrite both of its tokens
    async fn upsert(
        &self,
        external_user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<Identity>;

    async fn find_by_id(&self, external_user_id: &str) -> Result<Option<Identity>>;

    /// Overwrite the tokens of a user that is still logged in.
    /// Returns `None`, writing nothing, if the user is unknown or logged out.
    async fn replace_active_tokens(
        &self,
        external_user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<Option<Identity>>;

    /// Forget the user's spotify tokens but keep the record.
    /// Returns `Error::NotFound` if there's no such user.
    async fn clear_tokens(&self, external_user_id: &str) -> Result<()>;
}

pub struct MemoryIdentityStore {
    identities: Mutex<HashMap<String, Identity>>,
}

impl Default for MemoryIdentityStore {
    fn default() -> Self {
        Self {
            identities: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn upsert(
        &self,
        external_user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<Identity> {
        let now = Utc::now();
        let mut identities = self.identities.lock().await;
        let identity = identities
            .entry(external_user_id.to_string())
            .or_insert_with(|| Identity {
                external_user_id: external_user_id.to_string(),
                access_token: None,
                refresh_token: None,
                created: now,
                modified: now,
            });
        identity.access_token = Some(access_token.to_string());
        identity.refresh_token = refresh_token.map(|t| t.to_string());
        identity.modified = now;
        Ok(identity.clone())
    }

    async fn find_by_id(&self, external_user_id: &str) -> Result<Option<Identity>> {
        Ok(self.identities.lock().await.get(external_user_id).cloned())
    }

    async fn replace_active_tokens(
        &self,
        external_user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<Option<Identity>> {
        let mut identities = self.identities.lock().await;
        let identity = match identities.get_mut(external_user_id) {
            Some(identity) if identity.access_token.is_some() => identity,
            _ => return Ok(None),
        };
        identity.access_token = Some(access_token.to_string());
        identity.refresh_token = refresh_token.map(|t| t.to_string());
        identity.modified = Utc::now();
        Ok(Some(identity.clone()))
    }

    async fn clear_tokens(&self, external_user_id: &str) -> Result<()> {
        let mut identities = self.identities.lock().await;
        let identity = identities
            .get_mut(external_user_id)
            .ok_or_else(|| Error::NotFound(format!("no identity {}", external_user_id)))?;
        identity.access_token = None;
        identity.refresh_token = None;
        identity.modified = Utc::now();
        Ok(())
    }
}

#[derive(sqlx::FromRow, Debug)]
struct IdentityRow {
    external_user_id: String,
    // spotify tokens are AES_256_GCM encrypted with the
    // application key and the nonce generated when the
    // value was encrypted, both hex encoded.
    access_token: Option<String>,
    access_nonce: Option<String>,
    refresh_token: Option<String>,
    refresh_nonce: Option<String>,
    created: chrono::DateTime<chrono::Utc>,
    modified: chrono::DateTime<chrono::Utc>,
}

fn seal(value: Option<&str>, key: &[u8]) -> Result<(Option<String>, Option<String>)> {
    match value {
        None => Ok((None, None)),
        Some(v) => {
            let enc = crypto::encrypt(v, key)?;
            Ok((Some(enc.value), Some(enc.nonce)))
        }
    }
}

fn open(value: Option<String>, nonce: Option<String>, key: &[u8]) -> Result<Option<String>> {
    match (value, nonce) {
        (Some(value), Some(nonce)) => {
            Ok(Some(crypto::decrypt(&crypto::Enc { value, nonce }, key)?))
        }
        _ => Ok(None),
    }
}

pub struct PgIdentityStore {
    pool: PgPool,
    enc_key: Vec<u8>,
    log: slog::Logger,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool, enc_key: Vec<u8>, log: &slog::Logger) -> Self {
        Self {
            pool,
            enc_key,
            log: log.new(o!("component" => "identity_store")),
        }
    }

    fn to_identity(&self, row: IdentityRow) -> Result<Identity> {
        Ok(Identity {
            access_token: open(row.access_token, row.access_nonce, &self.enc_key)?,
            refresh_token: open(row.refresh_token, row.refresh_nonce, &self.enc_key)?,
            external_user_id: row.external_user_id,
            created: row.created,
            modified: row.modified,
        })
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn upsert(
        &self,
        external_user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<Identity> {
        let (access_token, access_nonce) = seal(Some(access_token), &self.enc_key)?;
        let (refresh_token, refresh_nonce) = seal(refresh_token, &self.enc_key)?;
        let row = sqlx::query_as::<_, IdentityRow>(
            "
            insert into
            identities (
                external_user_id,
                access_token, access_nonce,
                refresh_token, refresh_nonce
            )
            values ($1, $2, $3, $4, $5)
            on conflict (external_user_id) do update set
            access_token = excluded.access_token, access_nonce = excluded.access_nonce,
            refresh_token = excluded.refresh_token, refresh_nonce = excluded.refresh_nonce,
            modified = now()
            returning *
            ",
        )
        .bind(external_user_id)
        .bind(access_token)
        .bind(access_nonce)
        .bind(refresh_token)
        .bind(refresh_nonce)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| se!("error upserting identity {:?}", e))?;
        slog::debug!(self.log, "upserted identity"; "user" => external_user_id, "is_new" => row.created == row.modified);
        self.to_identity(row)
    }

    async fn find_by_id(&self, external_user_id: &str) -> Result<Option<Identity>> {
        let row = sqlx::query_as::<_, IdentityRow>(
            "select * from identities where external_user_id = $1",
        )
        .bind(external_user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| self.to_identity(r)).transpose()
    }

    async fn replace_active_tokens(
        &self,
        external_user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<Option<Identity>> {
        let (access_token, access_nonce) = seal(Some(access_token), &self.enc_key)?;
        let (refresh_token, refresh_nonce) = seal(refresh_token, &self.enc_key)?;
        let row = sqlx::query_as::<_, IdentityRow>(
            "
            update identities
                set access_token = $2, access_nonce = $3,
                    refresh_token = $4, refresh_nonce = $5,
                    modified = now()
                where external_user_id = $1 and access_token is not null
                returning *
            ",
        )
        .bind(external_user_id)
        .bind(access_token)
        .bind(access_nonce)
        .bind(refresh_token)
        .bind(refresh_nonce)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| se!("error replacing identity tokens {:?}", e))?;
        row.map(|r| self.to_identity(r)).transpose()
    }

    async fn clear_tokens(&self, external_user_id: &str) -> Result<()> {
        let done = sqlx::query(
            "
            update identities
                set access_token = null, access_nonce = null,
                    refresh_token = null, refresh_nonce = null,
                    modified = now()
                where external_user_id = $1
            ",
        )
        .bind(external_user_id)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(Error::NotFound(format!("no identity {}", external_user_id)));
        }
        Ok(())
    }
}
