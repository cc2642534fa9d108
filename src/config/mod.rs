//! Configuration module for School-Sweep
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every section has defaults, so a file only needs the keys it overrides.
//!
//! # Example
//!
//! ```no_run
//! use school_sweep::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Max concurrency: {}", config.crawler.max_concurrency);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    AutoscaleConfig, CacheConfig, Config, CrawlerConfig, FingerprintStrategy, HeaderWeights,
    ProxyTierConfig, SessionConfig, SiteConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::validate;
