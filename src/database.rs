use crate::error::ProductError;
use crate::products::{NewProduct, Product, ProductRepository};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, Connection, Pool, Postgres, Row};
use std::time::Duration;

/// PostgreSQL connection pool type alias.
pub type DbPool = Pool<Postgres>;

const MAX_CONNECT_ATTEMPTS: u32 = 10;

/// Connect with retries and exponential backoff, then make sure the
/// `products` table exists.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<DbPool> {
    log::info!("🔍 Connecting to database (max_connections={})", max_connections);

    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 1..=MAX_CONNECT_ATTEMPTS {
        match PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                log::info!(
                    "✅ Connected to database (attempt {}/{}).",
                    attempt,
                    MAX_CONNECT_ATTEMPTS
                );
                if let Err(e) = ensure_schema(&pool).await {
                    last_err = Some(e);
                } else {
                    return Ok(pool);
                }
            }
            Err(e) => {
                last_err = Some(e.into());
            }
        }
        // Backoff with cap
        let delay_ms = (1u64 << attempt.min(6)) * 200; // 400ms, 800ms, ... capped at 12.8s
        log::warn!(
            "DB connect/init attempt {}/{} failed. Retrying in {} ms...",
            attempt,
            MAX_CONNECT_ATTEMPTS,
            delay_ms
        );
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Unknown DB connection error")))
}

/// Idempotent creation of the `products` table.
pub async fn ensure_schema(pool: &DbPool) -> Result<()> {
    const SCHEMA_LOCK_ID: i64 = 0x50524F4455435453; // "PRODUCTS"

    let mut conn = pool.acquire().await?;
    let mut tx = conn.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_ID)
        .execute(tx.as_mut())
        .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS products (
            id BIGSERIAL PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            price INTEGER NOT NULL,
            description VARCHAR(1000),
            stock INTEGER NOT NULL
        )",
    )
    .execute(tx.as_mut())
    .await
    .context("failed to create products table")?;

    tx.commit().await?;
    log::info!("✅ Database schema ready.");
    Ok(())
}

fn product_from_row(row: &PgRow) -> Result<Product> {
    Ok(Product {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        price: row.try_get("price")?,
        description: row.try_get("description")?,
        stock: row.try_get("stock")?,
    })
}

/// [`ProductRepository`] over the `products` table.
#[derive(Debug, Clone)]
pub struct PgProductRepository {
    pool: DbPool,
}

impl PgProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("count")?)
    }
}

#[async_trait]
impl ProductRepository for PgProductRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Product>> {
        let start = std::time::Instant::now();
        let row = sqlx::query(
            "SELECT id, name, price, description, stock FROM products WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load product {}", id))?;
        log::debug!("find_by_id({}) took {:?}", id, start.elapsed());

        row.as_ref().map(product_from_row).transpose()
    }

    async fn find_all(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query("SELECT id, name, price, description, stock FROM products ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("failed to load products")?;
        rows.iter().map(product_from_row).collect()
    }

    async fn save(&self, product: NewProduct) -> Result<Product> {
        let row = sqlx::query(
            "INSERT INTO products (name, price, description, stock)
             VALUES ($1, $2, $3, $4)
             RETURNING id, name, price, description, stock",
        )
        .bind(&product.name)
        .bind(product.price)
        .bind(&product.description)
        .bind(product.stock)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert product")?;
        product_from_row(&row)
    }

    async fn update(&self, product: &Product) -> Result<()> {
        let result = sqlx::query(
            "UPDATE products SET name = $2, price = $3, description = $4, stock = $5 WHERE id = $1",
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(product.price)
        .bind(&product.description)
        .bind(product.stock)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to update product {}", product.id))?;

        if result.rows_affected() == 0 {
            return Err(ProductError::NotFound(product.id).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::products::seed_products;

    #[tokio::test]
    #[ignore] // Requires database connection (DATABASE_URL)
    async fn test_pg_repository_roundtrip() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = connect(&url, 2).await.expect("Failed to connect to database");
        let repository = PgProductRepository::new(pool);

        let before = repository.count().await.unwrap();
        seed_products(&repository, 3).await.unwrap();
        assert_eq!(repository.count().await.unwrap(), before + 3);

        let all = repository.find_all().await.unwrap();
        let mut last = all.last().cloned().unwrap();
        last.decrease_stock(10).unwrap();
        repository.update(&last).await.unwrap();

        let reloaded = repository.find_by_id(last.id).await.unwrap().unwrap();
        assert_eq!(reloaded.stock, 990);
    }
}
