//! Client configuration from the environment.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use invisible_core::ExchangeConfig;

const DEFAULT_CACHE_PATH: &str = "./invisible-cache";

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Directory of the sled key cache.
    pub cache_path: PathBuf,
    /// JSON file overriding the default exchange parameters.
    pub exchange_config_path: Option<PathBuf>,
    /// Rescan note keys when the settlement service reports an unknown note.
    pub recover_on_missing_note: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            exchange_config_path: None,
            recover_on_missing_note: true,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, reading `.env` first.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let cache_path = env::var("INVISIBLE_CACHE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CACHE_PATH));

        let exchange_config_path = env::var("INVISIBLE_EXCHANGE_CONFIG").ok().map(PathBuf::from);

        let recover_on_missing_note = match env::var("INVISIBLE_RECOVER_ON_MISSING_NOTE") {
            Ok(raw) => raw
                .parse::<bool>()
                .with_context(|| format!("INVISIBLE_RECOVER_ON_MISSING_NOTE={raw:?} is not a bool"))?,
            Err(_) => true,
        };

        Ok(Self {
            cache_path,
            exchange_config_path,
            recover_on_missing_note,
        })
    }

    /// Exchange parameters: the configured file, or the built-in defaults.
    pub fn exchange_config(&self) -> Result<ExchangeConfig> {
        match &self.exchange_config_path {
            Some(path) => ExchangeConfig::from_json_file(path)
                .with_context(|| format!("loading exchange config from {}", path.display())),
            None => Ok(ExchangeConfig::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uses_builtin_exchange() {
        let config = ClientConfig::default();
        assert!(config.recover_on_missing_note);
        assert_eq!(config.cache_path, PathBuf::from(DEFAULT_CACHE_PATH));
        let exchange = config.exchange_config().expect("defaults");
        assert_eq!(exchange, ExchangeConfig::default());
    }

    #[test]
    fn test_missing_exchange_file_has_context() {
        let config = ClientConfig {
            exchange_config_path: Some(PathBuf::from("/nonexistent/exchange.json")),
            ..Default::default()
        };
        let err = config.exchange_config().expect_err("should fail");
        assert!(format!("{err:#}").contains("loading exchange config"));
    }
}
