//! Configuration module for PagePull
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use pagepull::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("pagepull.toml")).unwrap();
//! println!("Mirroring {} with {} workers", config.site.url, config.crawler.workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlerConfig, FilterConfig, OutputConfig, RobotsUnreachable, SiteConfig,
    UserAgentConfig,
};

// Re-export parser functions
pub use parser::{load_config, load_validated, parse_config};
pub use validation::validate;
