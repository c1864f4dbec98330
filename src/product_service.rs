// Product lookup services: direct (uncached) path and read-through cached path

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::cache::{CacheConfig, ReadThroughCache};
use crate::cache_metrics::CacheObserver;
use crate::error::{CacheError, ProductError};
use crate::latency::SimulatedLatency;
use crate::metrics;
use crate::products::{NewProduct, ProductRepository, ProductResponse};

/// Direct repository access. Every lookup pays the backing-store cost.
pub struct ProductService {
    repository: Arc<dyn ProductRepository>,
    latency: SimulatedLatency,
}

impl ProductService {
    pub fn new(repository: Arc<dyn ProductRepository>, latency: SimulatedLatency) -> Self {
        Self {
            repository,
            latency,
        }
    }

    pub fn repository(&self) -> &Arc<dyn ProductRepository> {
        &self.repository
    }

    /// Look up one product, then wait for the simulated processing time.
    pub async fn get_product(&self, id: i64) -> Result<ProductResponse> {
        debug!(product_id = id, "loading product from repository");
        let product = self
            .repository
            .find_by_id(id)
            .await
            .with_context(|| format!("repository lookup failed for product {}", id))?
            .ok_or(ProductError::NotFound(id))?;

        self.latency.wait().await;

        Ok(ProductResponse::from(&product))
    }

    pub async fn get_all_products(&self) -> Result<Vec<ProductResponse>> {
        debug!("loading all products from repository");
        let products = self.repository.find_all().await?;
        Ok(products.iter().map(ProductResponse::from).collect())
    }

    pub async fn create_product(
        &self,
        name: &str,
        price: i32,
        description: Option<&str>,
        stock: i32,
    ) -> Result<ProductResponse> {
        let saved = self
            .repository
            .save(NewProduct {
                name: name.to_string(),
                price,
                description: description.map(str::to_string),
                stock,
            })
            .await
            .context("failed to save product")?;
        info!(product_id = saved.id, "product created");
        Ok(ProductResponse::from(&saved))
    }

    /// Read-modify-write without concurrency control.
    pub async fn decrease_stock(&self, id: i64, quantity: i32) -> Result<ProductResponse> {
        let mut product = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or(ProductError::NotFound(id))?;
        product.decrease_stock(quantity)?;
        self.repository.update(&product).await?;
        Ok(ProductResponse::from(&product))
    }
}

/// Cached product lookups layered over [`ProductService`].
///
/// Cache keys are `product::{id}`. The loader is exactly the uncached
/// `ProductService::get_product`, so the two paths return identical data and
/// differ only in how often they reach the repository.
pub struct ProductCacheService {
    service: Arc<ProductService>,
    cache: ReadThroughCache<ProductResponse>,
}

impl ProductCacheService {
    pub fn new(
        service: Arc<ProductService>,
        config: CacheConfig,
        observer: Arc<dyn CacheObserver>,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            service,
            cache: ReadThroughCache::with_observer(config, observer)?,
        })
    }

    pub fn cache_key(id: i64) -> String {
        format!("product::{}", id)
    }

    pub fn cache(&self) -> &ReadThroughCache<ProductResponse> {
        &self.cache
    }

    pub async fn get_product_with_cache(&self, id: i64) -> Result<Arc<ProductResponse>, CacheError> {
        let start = Instant::now();
        let service = Arc::clone(&self.service);
        let product = self
            .cache
            .get(&Self::cache_key(id), move |_key| async move {
                info!(product_id = id, "cache miss, loading product");
                service.get_product(id).await
            })
            .await?;
        metrics::record_product_lookup("cached", start.elapsed());
        Ok(product)
    }

    /// Bypasses the cache entirely.
    pub async fn get_product_without_cache(&self, id: i64) -> Result<ProductResponse> {
        let start = Instant::now();
        let product = self.service.get_product(id).await?;
        metrics::record_product_lookup("uncached", start.elapsed());
        Ok(product)
    }

    /// Write through the repository and drop the cached copy.
    pub async fn decrease_stock(&self, id: i64, quantity: i32) -> Result<ProductResponse> {
        let updated = self.service.decrease_stock(id, quantity).await?;
        self.evict_product(id);
        Ok(updated)
    }

    pub fn evict_product(&self, id: i64) {
        self.cache.invalidate(&Self::cache_key(id));
    }

    pub fn evict_all(&self) {
        info!(cache = self.cache.name(), "evicting all cached products");
        self.cache.invalidate_all();
    }
}

/// Extract the domain error behind a failed lookup, if there is one.
pub fn product_error(error: &CacheError) -> Option<&ProductError> {
    error.loader_cause()?.downcast_ref::<ProductError>()
}
