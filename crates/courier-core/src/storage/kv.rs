//! JSON document helpers over the `kv_store` table.

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{Executor, Sqlite};

use crate::error::Result;

/// Reads and decodes the document stored under `key`.
pub(crate) async fn get<'e, E, T>(executor: E, key: &str) -> Result<Option<T>>
where
    E: Executor<'e, Database = Sqlite>,
    T: DeserializeOwned,
{
    let raw: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?1")
        .bind(key)
        .fetch_optional(executor)
        .await?;

    match raw {
        Some(value) => Ok(Some(serde_json::from_str(&value)?)),
        None => Ok(None),
    }
}

/// Encodes `value` and upserts it under `key`.
pub(crate) async fn put<'e, E, T>(executor: E, key: &str, value: &T) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
    T: Serialize + ?Sized,
{
    let encoded = serde_json::to_string(value)?;

    sqlx::query(
        r"
        INSERT INTO kv_store (key, value, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        ",
    )
    .bind(key)
    .bind(encoded)
    .bind(Utc::now().timestamp_millis())
    .execute(executor)
    .await?;

    Ok(())
}

/// Removes the document stored under `key`.
pub(crate) async fn delete<'e, E>(executor: E, key: &str) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("DELETE FROM kv_store WHERE key = ?1").bind(key).execute(executor).await?;
    Ok(())
}
