use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// The seed URL may be left empty in the file when it is supplied on the command
/// line, so validation of the full configuration is left to the caller once all
/// overrides have been applied.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use pagepull::config::load_config;
///
/// let config = load_config(Path::new("pagepull.toml")).unwrap();
/// println!("Workers: {}", config.crawler.workers);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses configuration from TOML text without validating it
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    Ok(config)
}

/// Loads a configuration file and validates it as a complete run configuration
pub fn load_validated(path: &Path) -> Result<Config, ConfigError> {
    let config = load_config(path)?;
    validate(&config)?;
    Ok(config)
}
