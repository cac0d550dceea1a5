use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, migrate::MigrateDatabase};
use tracing::info;

use crate::error::ScrapeError;
use crate::models::{Product, ProductId, StoredProduct};
use crate::traits::ProductStore;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self, ScrapeError> {
        // Create database file if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating database {}", db_url);
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePool::connect(db_url).await?;
        Self::migrate(pool).await
    }

    /// A private database living as long as the returned handle
    pub async fn in_memory() -> Result<Self, ScrapeError> {
        // every connection to :memory: is its own database, so keep exactly one alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, ScrapeError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;

        info!("Database initialized successfully");
        Ok(Self { pool })
    }

    /// Every raw payload stored under `source`
    pub async fn stored_products(&self, source: &str) -> Result<Vec<StoredProduct>, ScrapeError> {
        let rows = sqlx::query(
            "SELECT id, source, raw, fetched_at FROM products WHERE source = ? ORDER BY id",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<StoredProduct, ScrapeError> {
                Ok(StoredProduct {
                    id: row.try_get("id")?,
                    source: row.try_get("source")?,
                    raw: row.try_get("raw")?,
                    fetched_at: row.try_get("fetched_at")?,
                })
            })
            .collect()
    }

    /// Content hash of the payload each stored nutrition row was computed from
    pub async fn nutrition_hashes(&self, source: &str) -> Result<HashMap<String, String>, ScrapeError> {
        let rows = sqlx::query("SELECT id, content_hash FROM nutrition WHERE source = ?")
            .bind(source)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| -> Result<(String, String), ScrapeError> {
                Ok((row.try_get("id")?, row.try_get("content_hash")?))
            })
            .collect()
    }

    /// Insert or replace the normalized figures for a product
    pub async fn save_nutrition(&self, product: &Product) -> Result<(), ScrapeError> {
        let comp = &product.per_composition;
        let serving = &product.per_serving;

        sqlx::query(
            r"
            INSERT INTO nutrition (
                id, source, name, content_hash,
                per_comp_label, per_comp_size, per_comp_carbs, per_comp_protein, per_comp_fat, per_comp_kcal,
                per_serving_label, per_serving_size, per_serving_carbs, per_serving_protein, per_serving_fat, per_serving_kcal,
                normalized_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id, source) DO UPDATE SET
                name = excluded.name,
                content_hash = excluded.content_hash,
                per_comp_label = excluded.per_comp_label,
                per_comp_size = excluded.per_comp_size,
                per_comp_carbs = excluded.per_comp_carbs,
                per_comp_protein = excluded.per_comp_protein,
                per_comp_fat = excluded.per_comp_fat,
                per_comp_kcal = excluded.per_comp_kcal,
                per_serving_label = excluded.per_serving_label,
                per_serving_size = excluded.per_serving_size,
                per_serving_carbs = excluded.per_serving_carbs,
                per_serving_protein = excluded.per_serving_protein,
                per_serving_fat = excluded.per_serving_fat,
                per_serving_kcal = excluded.per_serving_kcal,
                normalized_at = excluded.normalized_at
            ",
        )
        .bind(&product.source.id)
        .bind(&product.source.name)
        .bind(&product.name)
        .bind(&product.content_hash)
        .bind(&comp.per)
        .bind(comp.size_grams)
        .bind(comp.carbs_grams)
        .bind(comp.protein_grams)
        .bind(comp.fat_grams)
        .bind(comp.kcal)
        .bind(&serving.per)
        .bind(serving.size_grams)
        .bind(serving.carbs_grams)
        .bind(serving.protein_grams)
        .bind(serving.fat_grams)
        .bind(serving.kcal)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ProductStore for Database {
    async fn existing_ids(&self, ids: &[String], source: &str) -> Result<Vec<String>, ScrapeError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = QueryBuilder::<Sqlite>::new("SELECT id FROM products WHERE source = ");
        query.push_bind(source);
        query.push(" AND id IN (");
        let mut placeholders = query.separated(", ");
        for id in ids {
            placeholders.push_bind(id.as_str());
        }
        placeholders.push_unseparated(")");

        let rows = query.build().fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|row| row.try_get::<String, _>("id").map_err(ScrapeError::from))
            .collect()
    }

    async fn insert(&self, id: &ProductId, source: &str, raw: &str) -> Result<u64, ScrapeError> {
        let result = sqlx::query(
            r"
            INSERT INTO products (id, source, raw, fetched_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (id, source) DO NOTHING
            ",
        )
        .bind(id.as_str())
        .bind(source)
        .bind(raw)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
