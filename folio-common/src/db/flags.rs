//! Durable key-value flag storage
//!
//! Thin wrapper over the settings table for state that must survive process
//! restarts (migration bookkeeping). Each accessor is a single statement so
//! concurrent readers never observe a half-written flag.

use crate::Result;
use sqlx::SqlitePool;

/// Persistent key-value store backed by the settings table
#[derive(Clone)]
pub struct FlagStore {
    pool: SqlitePool,
}

impl FlagStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Read a flag value, `None` when the key is absent or NULL
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value.flatten())
    }

    /// Write a flag value, creating or overwriting the key
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove a flag entirely
    pub async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Read a boolean flag; absent keys read as false
    pub async fn get_bool(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.as_deref() == Some("true"))
    }

    /// Write a boolean flag
    pub async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set(key, if value { "true" } else { "false" }).await
    }

    /// Read an integer flag; absent or unparseable keys read as the default
    pub async fn get_i64_or(&self, key: &str, default: i64) -> Result<i64> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(default))
    }

    /// Write an integer flag
    pub async fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.set(key, &value.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::init_schema;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_flags() -> FlagStore {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        init_schema(&pool).await.unwrap();
        FlagStore::new(pool)
    }

    #[tokio::test]
    async fn test_get_absent_key() {
        let flags = setup_flags().await;
        assert_eq!(flags.get("nonexistent").await.unwrap(), None);
        assert!(!flags.get_bool("nonexistent").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let flags = setup_flags().await;
        flags.set("k", "one").await.unwrap();
        flags.set("k", "two").await.unwrap();
        assert_eq!(flags.get("k").await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_remove() {
        let flags = setup_flags().await;
        flags.set_bool("gone", true).await.unwrap();
        flags.remove("gone").await.unwrap();
        assert_eq!(flags.get("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_i64_round_trip_and_default() {
        let flags = setup_flags().await;
        assert_eq!(flags.get_i64_or("attempts", 0).await.unwrap(), 0);
        flags.set_i64("attempts", 2).await.unwrap();
        assert_eq!(flags.get_i64_or("attempts", 0).await.unwrap(), 2);

        flags.set("attempts", "not-a-number").await.unwrap();
        assert_eq!(flags.get_i64_or("attempts", 7).await.unwrap(), 7);
    }
}
