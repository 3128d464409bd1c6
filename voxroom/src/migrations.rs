use anyhow::Result;
use sqlx::PgPool;
use tracing::{error, info};

/// Apply the embedded schema migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrator = sqlx::migrate!("../migrations");

    if migrations_already_applied(pool, &migrator).await {
        info!("Database schema is up to date");
        return Ok(());
    }

    info!("Running database migrations...");
    migrator.run(pool).await.map_err(|e| {
        error!("Failed to run migrations: {}", e);
        anyhow::anyhow!("Migration failed: {e}")
    })?;
    info!("Migrations completed");
    Ok(())
}

/// Compare the embedded migrations against the `_sqlx_migrations` table
async fn migrations_already_applied(pool: &PgPool, migrator: &sqlx::migrate::Migrator) -> bool {
    let applied: Vec<(i64,)> = match sqlx::query_as(
        "SELECT version FROM _sqlx_migrations WHERE success ORDER BY version",
    )
    .fetch_all(pool)
    .await
    {
        Ok(rows) => rows,
        Err(_) => return false, // table may not exist yet
    };

    let applied_versions: std::collections::HashSet<i64> =
        applied.into_iter().map(|(v,)| v).collect();

    migrator
        .iter()
        .all(|m| applied_versions.contains(&m.version))
}
