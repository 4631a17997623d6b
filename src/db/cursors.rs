//! Consumer cursor store, one row per named consumer.

use sqlx::PgPool;

/// Last acknowledged event id for `name`, 0 if the consumer has never acked.
pub async fn get_cursor(pool: &PgPool, name: &str) -> Result<i64, sqlx::Error> {
    let id: Option<i64> = sqlx::query_scalar("SELECT id FROM cursors WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    Ok(id.unwrap_or(0))
}

/// Advance the cursor for `name`. Acking id N acknowledges all prior ids,
/// and the cursor never moves backwards.
pub async fn set_cursor(pool: &PgPool, name: &str, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO cursors (name, id)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE
        SET id = GREATEST(cursors.id, EXCLUDED.id), updated_at = NOW()
        "#,
    )
    .bind(name)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}
