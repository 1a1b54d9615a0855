use std::time::Duration;

use super::schema::Database;
use super::types::StorageError;

impl Database {
    // ========================================================================
    // Key/Value Operations
    // ========================================================================

    /// Get the value stored under `key`.
    ///
    /// Expired entries read as `None` and are deleted on the way out.
    pub async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row: Option<(String, i64)> = sqlx::query_as(
            r#"
            SELECT value, expires_at IS NOT NULL AND expires_at <= datetime('now')
            FROM kv WHERE key = ?
        "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;

        match row {
            Some((_, expired)) if expired != 0 => {
                tracing::debug!(key = %key, "Evicting expired record");
                self.delete(key).await?;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    /// Store `value` under `key` (UPSERT), optionally expiring after `ttl`.
    pub async fn put(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        // SQLite date modifier; resolution is one second, never below it
        let modifier = ttl.map(|ttl| format!("+{} seconds", ttl.as_secs().max(1)));

        sqlx::query(
            r#"
            INSERT INTO kv (key, value, expires_at, updated_at)
            VALUES (?, ?, CASE WHEN ? IS NULL THEN NULL ELSE datetime('now', ?) END, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(value)
        .bind(&modifier)
        .bind(&modifier)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;

        Ok(())
    }

    /// Remove `key`. Returns whether a record existed.
    pub async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every expired record. Returns the number removed.
    pub async fn evict_expired(&self) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= datetime('now')",
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let db = test_db().await;
        assert_eq!(db.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let db = test_db().await;
        db.put("stats", "{}", None).await.unwrap();
        assert_eq!(db.get("stats").await.unwrap().as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let db = test_db().await;
        db.put("k", "one", None).await.unwrap();
        db.put("k", "two", None).await.unwrap();
        assert_eq!(db.get("k").await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_delete() {
        let db = test_db().await;
        db.put("k", "v", None).await.unwrap();
        assert!(db.delete("k").await.unwrap());
        assert!(!db.delete("k").await.unwrap());
        assert_eq!(db.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_in_future_is_readable() {
        let db = test_db().await;
        db.put("k", "v", Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        assert_eq!(db.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_expired_record_reads_as_absent_and_is_evicted() {
        let db = test_db().await;
        sqlx::query(
            "INSERT INTO kv (key, value, expires_at) VALUES ('old', 'v', datetime('now', '-1 hour'))",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        assert_eq!(db.get("old").await.unwrap(), None);

        let remaining: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kv")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(remaining.0, 0);
    }

    #[tokio::test]
    async fn test_put_without_ttl_clears_previous_expiry() {
        let db = test_db().await;
        db.put("k", "v", Some(Duration::from_secs(60))).await.unwrap();
        db.put("k", "v2", None).await.unwrap();

        let row: (Option<String>,) = sqlx::query_as("SELECT expires_at FROM kv WHERE key = 'k'")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(row.0, None);
    }

    #[tokio::test]
    async fn test_evict_expired() {
        let db = test_db().await;
        db.put("fresh", "v", None).await.unwrap();
        sqlx::query(
            "INSERT INTO kv (key, value, expires_at) VALUES ('stale', 'v', datetime('now', '-1 minute'))",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        assert_eq!(db.evict_expired().await.unwrap(), 1);
        assert_eq!(db.get("fresh").await.unwrap().as_deref(), Some("v"));
    }
}
