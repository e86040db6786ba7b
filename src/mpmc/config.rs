use serde::Deserialize;

use super::errors::ConfigError;

/// Runtime configuration.
///
/// ```toml
/// max_capacity = 1024
/// seed = 7
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Largest capacity `Runtime::channel` accepts. `None` means unbounded.
    pub max_capacity: Option<usize>,
    /// Seeds every select's random start, making branch choice reproducible.
    pub seed: Option<u64>,
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Config, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}
