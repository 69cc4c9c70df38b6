//! Cross-signing keys and the signature graph.
//!
//! Both tables cache data that can be re-fetched and re-verified from the
//! homeserver, so write failures here are logged rather than returned.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{ColumnIndex, Decode, Encode, Executor, IntoArguments, Row, Type};

use mx_proto::{CrossSigner, CrossSigningUsage, SigningKey, TofuSigningKey, UserId};

use crate::{db::CryptoStore, dialect::Dialect, error::StoreError};

impl<DB> CryptoStore<DB>
where
    DB: Dialect,
    for<'c> &'c mut DB::Connection: Executor<'c, Database = DB>,
    for<'q> DB::Arguments<'q>: IntoArguments<'q, DB>,
    for<'r> &'r str: ColumnIndex<DB::Row>,
    for<'q> String: Encode<'q, DB> + Decode<'q, DB> + Type<DB>,
    for<'q> Vec<u8>: Encode<'q, DB> + Decode<'q, DB> + Type<DB>,
    for<'q> i64: Encode<'q, DB> + Decode<'q, DB> + Type<DB>,
    for<'q> bool: Encode<'q, DB> + Decode<'q, DB> + Type<DB>,
    for<'q> DateTime<Utc>: Encode<'q, DB> + Decode<'q, DB> + Type<DB>,
{
    /// Record the current key for `(user_id, usage)`. The first key ever
    /// stored for the pair is kept as `first_seen_key`.
    pub async fn put_cross_signing_key(&self, user_id: &UserId, usage: CrossSigningUsage, key: &SigningKey) {
        let result = sqlx::query(
            "INSERT INTO crypto_cross_signing_keys (user_id, usage, key, first_seen_key) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id, usage) DO UPDATE SET key = excluded.key",
        )
        .bind(user_id.as_str().to_owned())
        .bind(usage.as_str().to_owned())
        .bind(key.as_str().to_owned())
        .bind(key.as_str().to_owned())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!("Failed to store cross-signing key {user_id}/{key}/{usage}: {e}");
        }
    }

    pub async fn get_cross_signing_keys(
        &self,
        user_id: &UserId,
    ) -> Result<HashMap<CrossSigningUsage, TofuSigningKey>, StoreError> {
        let rows = sqlx::query("SELECT usage, key, first_seen_key FROM crypto_cross_signing_keys WHERE user_id = $1")
            .bind(user_id.as_str().to_owned())
            .fetch_all(&self.pool)
            .await?;

        let mut keys = HashMap::with_capacity(rows.len());
        for row in &rows {
            let usage: CrossSigningUsage = row.try_get::<String, _>("usage")?.parse()?;
            let key = TofuSigningKey {
                key: SigningKey::from(row.try_get::<String, _>("key")?),
                first: SigningKey::from(row.try_get::<String, _>("first_seen_key")?),
            };
            keys.insert(usage, key);
        }
        Ok(keys)
    }

    /// Record that `signer` signed `target`, replacing an older signature over
    /// the same edge.
    pub async fn put_signature(&self, target: &CrossSigner, signer: &CrossSigner, signature: &str) {
        let result = sqlx::query(
            "INSERT INTO crypto_cross_signing_signatures \
             (signed_user_id, signed_key, signer_user_id, signer_key, signature) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (signed_user_id, signed_key, signer_user_id, signer_key) \
             DO UPDATE SET signature = excluded.signature",
        )
        .bind(target.user_id.as_str().to_owned())
        .bind(target.key.as_str().to_owned())
        .bind(signer.user_id.as_str().to_owned())
        .bind(signer.key.as_str().to_owned())
        .bind(signature.to_owned())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!(
                "Failed to store signature from {}/{} for {}/{}: {e}",
                signer.user_id,
                signer.key,
                target.user_id,
                target.key
            );
        }
    }

    pub async fn is_key_signed_by(&self, target: &CrossSigner, signer: &CrossSigner) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT 1 FROM crypto_cross_signing_signatures \
             WHERE signed_user_id = $1 AND signed_key = $2 AND signer_user_id = $3 AND signer_key = $4",
        )
        .bind(target.user_id.as_str().to_owned())
        .bind(target.key.as_str().to_owned())
        .bind(signer.user_id.as_str().to_owned())
        .bind(signer.key.as_str().to_owned())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Delete every signature made by `signer`, typically after its key was
    /// replaced. Returns the number of signatures removed, or `None` if the
    /// delete failed.
    pub async fn drop_signatures_by_key(&self, signer: &CrossSigner) -> Option<u64> {
        let result = sqlx::query(
            "DELETE FROM crypto_cross_signing_signatures WHERE signer_user_id = $1 AND signer_key = $2",
        )
        .bind(signer.user_id.as_str().to_owned())
        .bind(signer.key.as_str().to_owned())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Some(DB::rows_affected(&done)),
            Err(e) => {
                tracing::error!(
                    "Failed to drop old signatures made by replaced key {}/{}: {e}",
                    signer.user_id,
                    signer.key
                );
                None
            }
        }
    }
}
