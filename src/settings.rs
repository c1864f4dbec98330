use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::latency::SimulatedLatency;

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "default_cache_name")]
    pub name: String,
    /// TTL applied to cached products
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
}

fn default_cache_name() -> String {
    "product".to_string()
}
fn default_ttl_seconds() -> u64 {
    300 // 5 minutos
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            name: default_cache_name(),
            ttl_seconds: default_ttl_seconds(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig::new(self.name.clone(), self.ttl())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackingStore {
    /// Artificial delay added to every repository lookup (DB query stand-in)
    #[serde(default = "default_simulated_latency_ms")]
    pub simulated_latency_ms: u64,
    #[serde(default)]
    pub jitter_ms: u64,
    /// Products created at startup by the in-memory repository
    #[serde(default = "default_seed_products")]
    pub seed_products: usize,
}

fn default_simulated_latency_ms() -> u64 {
    50
}
fn default_seed_products() -> usize {
    100
}

impl Default for BackingStore {
    fn default() -> Self {
        Self {
            simulated_latency_ms: default_simulated_latency_ms(),
            jitter_ms: 0,
            seed_products: default_seed_products(),
        }
    }
}

impl BackingStore {
    pub fn latency(&self) -> SimulatedLatency {
        SimulatedLatency::from_millis(self.simulated_latency_ms, self.jitter_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Benchmark {
    #[serde(default = "default_requests")]
    pub requests: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Product ids 1..=distinct_keys are requested round-robin
    #[serde(default = "default_distinct_keys")]
    pub distinct_keys: usize,
}

fn default_requests() -> usize {
    2000
}
fn default_concurrency() -> usize {
    64
}
fn default_distinct_keys() -> usize {
    10
}

impl Default for Benchmark {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            concurrency: default_concurrency(),
            distinct_keys: default_distinct_keys(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    /// When set, products are read from PostgreSQL instead of memory
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub backing_store: BackingStore,
    #[serde(default)]
    pub benchmark: Benchmark,
    #[serde(default)]
    pub database: Database,
}

impl Settings {
    /// Load `Config.toml` (optional) from the working directory, then apply
    /// environment overrides.
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("Config.toml").required(false))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides(|name| env::var(name).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Load an explicit settings file (no environment overrides).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from(path.as_ref().to_path_buf()))
            .build()?;

        let settings: Self = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Environment variable overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ttl) = parse_env(&lookup, "CACHE_TTL_SECONDS") {
            self.cache.ttl_seconds = ttl;
        }
        if let Some(latency) = parse_env(&lookup, "CACHE_SIMULATED_LATENCY_MS") {
            self.backing_store.simulated_latency_ms = latency;
        }
        if let Some(seed) = parse_env(&lookup, "CACHE_SEED_PRODUCTS") {
            self.backing_store.seed_products = seed;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            let trimmed = url.trim();
            if !trimmed.is_empty() {
                self.database.url = Some(trimmed.to_string());
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.ttl_seconds == 0 {
            return Err(ConfigError::Message(
                "cache.ttl_seconds must be greater than zero".to_string(),
            ));
        }
        if self.benchmark.distinct_keys == 0 {
            return Err(ConfigError::Message(
                "benchmark.distinct_keys must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<F, T>(lookup: &F, name: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            eprintln!("Ignoring {}: cannot parse '{}'", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.cache.ttl(), Duration::from_secs(300));
        assert_eq!(settings.cache.name, "product");
        assert_eq!(
            settings.backing_store.latency(),
            SimulatedLatency::Fixed(Duration::from_millis(50))
        );
        assert_eq!(settings.backing_store.seed_products, 100);
        assert!(settings.database.url.is_none());
    }

    #[test]
    fn test_from_file_with_partial_sections() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "[cache]\nttl_seconds = 5\n\n[backing_store]\nsimulated_latency_ms = 0\n"
        )
        .unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.cache.ttl_seconds, 5);
        assert_eq!(settings.cache.name, "product");
        assert_eq!(settings.backing_store.latency(), SimulatedLatency::None);
        assert_eq!(settings.benchmark.concurrency, 64);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "[cache]\nttl_seconds = 0\n").unwrap();

        assert!(Settings::from_file(file.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CACHE_TTL_SECONDS", "30"),
            ("CACHE_SIMULATED_LATENCY_MS", "not-a-number"),
            ("DATABASE_URL", " postgres://localhost/products "),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings.apply_env_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(settings.cache.ttl_seconds, 30);
        assert_eq!(settings.backing_store.simulated_latency_ms, 50);
        assert_eq!(
            settings.database.url.as_deref(),
            Some("postgres://localhost/products")
        );
    }
}
