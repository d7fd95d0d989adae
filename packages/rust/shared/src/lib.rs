//! Shared types, error model, and configuration for CatalogSync.
//!
//! This crate is the foundation depended on by all other CatalogSync crates.
//! It provides:
//! - [`CatalogSyncError`]: the unified error type
//! - Domain types ([`Product`], [`Variant`], [`Image`], [`DocId`], [`VendorJob`])
//! - Configuration ([`AppConfig`] and its sections, config loading)
//! - [`retry_with_backoff`] for external calls

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, EnrichmentConfig, GeneratorConfig, ImportConfig, RetryPolicy, SchedulerConfig,
    StorageConfig, VendorsConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, resolve_api_key, validate_config,
};
pub use error::{CatalogSyncError, Result};
pub use retry::retry_with_backoff;
pub use types::{
    DescriptionUpdate, DocId, Image, JobPhase, OptionValue, Product, ProductData, ProductInfo,
    ProductOption, Variant, VariantAttributes, VendorJob,
};
