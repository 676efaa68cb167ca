use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{Drosse, DrosseId, DrosseMap};

/// Durable copy of the drosse registry.
///
/// The registry is always written as a whole: `save_drosses` replaces the
/// previous snapshot inside a single transaction, so readers never observe
/// a half-written registry.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // every in-memory connection is its own database
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        }
        .connect_with(connect_options)
        .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn list_drosses(&self) -> Result<DrosseMap> {
        let rows = sqlx::query("SELECT uuid, body FROM drosses ORDER BY uuid")
            .fetch_all(&self.pool)
            .await
            .context("failed to read persisted drosses")?;

        let mut drosses = DrosseMap::new();
        for row in rows {
            let uuid: String = row.try_get("uuid")?;
            let body: String = row.try_get("body")?;
            let drosse: Drosse = serde_json::from_str(&body)
                .with_context(|| format!("corrupt persisted drosse '{uuid}'"))?;
            drosses.insert(DrosseId(uuid), drosse);
        }
        Ok(drosses)
    }

    pub async fn find_drosse(&self, uuid: &DrosseId) -> Result<Option<Drosse>> {
        let row = sqlx::query("SELECT body FROM drosses WHERE uuid = ?")
            .bind(uuid.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let body: String = row.get(0);
            serde_json::from_str(&body)
                .with_context(|| format!("corrupt persisted drosse '{uuid}'"))
        })
        .transpose()
    }

    pub async fn save_drosses(&self, drosses: &DrosseMap) -> Result<()> {
        let saved_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM drosses")
            .execute(&mut *tx)
            .await
            .context("failed to clear previous drosse snapshot")?;

        for (uuid, drosse) in drosses {
            let body = serde_json::to_string(drosse)?;
            sqlx::query("INSERT INTO drosses (uuid, body, updated_at) VALUES (?, ?, ?)")
                .bind(uuid.as_str())
                .bind(body)
                .bind(saved_at)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("failed to persist drosse '{uuid}'"))?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.contains(":memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
