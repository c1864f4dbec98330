// Product domain: entity, response DTO and repository abstraction

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::info;

use crate::error::ProductError;

/// Stored product row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: i32,
    pub description: Option<String>,
    pub stock: i32,
}

impl Product {
    /// Remove `quantity` units from stock. No concurrency control here; the
    /// caller writes the product back through the repository.
    pub fn decrease_stock(&mut self, quantity: i32) -> Result<(), ProductError> {
        if self.stock < quantity {
            return Err(ProductError::InsufficientStock {
                requested: quantity,
                available: self.stock,
            });
        }
        self.stock -= quantity;
        Ok(())
    }
}

/// Product to be inserted; the repository assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub name: String,
    pub price: i32,
    pub description: Option<String>,
    pub stock: i32,
}

/// What lookups hand back to callers (and what the cache stores).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductResponse {
    pub id: i64,
    pub name: String,
    pub price: i32,
    pub description: Option<String>,
    pub stock: i32,
}

impl From<&Product> for ProductResponse {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id,
            name: product.name.clone(),
            price: product.price,
            description: product.description.clone(),
            stock: product.stock,
        }
    }
}

/// Backing store for products (PostgreSQL or in-memory).
#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<Product>>;

    async fn find_all(&self) -> Result<Vec<Product>>;

    async fn save(&self, product: NewProduct) -> Result<Product>;

    /// Overwrite an existing product. Fails with `ProductError::NotFound` if absent.
    async fn update(&self, product: &Product) -> Result<()>;
}

/// DashMap-backed repository with sequential ids starting at 1.
#[derive(Debug)]
pub struct InMemoryProductRepository {
    products: DashMap<i64, Product>,
    next_id: AtomicI64,
}

impl InMemoryProductRepository {
    pub fn new() -> Self {
        Self {
            products: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

impl Default for InMemoryProductRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Product>> {
        Ok(self.products.get(&id).map(|p| p.value().clone()))
    }

    async fn find_all(&self) -> Result<Vec<Product>> {
        let mut all: Vec<Product> = self.products.iter().map(|p| p.value().clone()).collect();
        all.sort_by_key(|p| p.id);
        Ok(all)
    }

    async fn save(&self, product: NewProduct) -> Result<Product> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let saved = Product {
            id,
            name: product.name,
            price: product.price,
            description: product.description,
            stock: product.stock,
        };
        self.products.insert(id, saved.clone());
        Ok(saved)
    }

    async fn update(&self, product: &Product) -> Result<()> {
        match self.products.get_mut(&product.id) {
            Some(mut existing) => {
                *existing = product.clone();
                Ok(())
            }
            None => Err(ProductError::NotFound(product.id).into()),
        }
    }
}

/// Insert `count` demo products: "Product i", price i * 1000, stock 1000.
pub async fn seed_products(repository: &dyn ProductRepository, count: usize) -> Result<usize> {
    info!("Seeding {} products...", count);
    for i in 1..=count {
        repository
            .save(NewProduct {
                name: format!("Product {}", i),
                price: (i as i32) * 1000,
                description: Some(format!("Product description {}", i)),
                stock: 1000,
            })
            .await?;
    }
    info!("Seeded {} products", count);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrease_stock() {
        let mut product = Product {
            id: 1,
            name: "Product 1".into(),
            price: 1000,
            description: None,
            stock: 5,
        };

        product.decrease_stock(3).unwrap();
        assert_eq!(product.stock, 2);

        assert_eq!(
            product.decrease_stock(3),
            Err(ProductError::InsufficientStock {
                requested: 3,
                available: 2
            })
        );
        assert_eq!(product.stock, 2);
    }

    #[tokio::test]
    async fn test_seed_and_find() {
        let repository = InMemoryProductRepository::new();
        seed_products(&repository, 100).await.unwrap();
        assert_eq!(repository.len(), 100);

        let p42 = repository.find_by_id(42).await.unwrap().unwrap();
        assert_eq!(p42.name, "Product 42");
        assert_eq!(p42.price, 42_000);
        assert_eq!(p42.stock, 1000);
        assert_eq!(p42.description.as_deref(), Some("Product description 42"));

        assert!(repository.find_by_id(101).await.unwrap().is_none());

        let all = repository.find_all().await.unwrap();
        assert_eq!(all.first().map(|p| p.id), Some(1));
        assert_eq!(all.last().map(|p| p.id), Some(100));
    }

    #[tokio::test]
    async fn test_update_missing_product() {
        let repository = InMemoryProductRepository::new();
        let ghost = Product {
            id: 9,
            name: "ghost".into(),
            price: 1,
            description: None,
            stock: 0,
        };
        let err = repository.update(&ghost).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ProductError>(),
            Some(&ProductError::NotFound(9))
        );
    }

    #[test]
    fn test_response_serializes() {
        let product = Product {
            id: 3,
            name: "Product 3".into(),
            price: 3000,
            description: None,
            stock: 10,
        };
        let json = serde_json::to_value(ProductResponse::from(&product)).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["price"], 3000);
        assert!(json["description"].is_null());
    }
}
