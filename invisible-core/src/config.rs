//! Exchange parameters: dust thresholds, markets, collateral and chain ids.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};

/// Asset ids used by the exchange.
pub mod known_tokens {
    pub const BTC: u32 = 12345;
    pub const ETH: u32 = 54321;
    pub const USDC: u32 = 55555;
}

/// Chain ids embedded in the high bits of deposit ids.
pub mod known_chains {
    pub const ETH_MAINNET: u64 = 9090909;
    pub const STARKNET: u64 = 7878787;
    pub const ZKSYNC: u64 = 5656565;
}

/// Base and quote asset of a spot market.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotMarket {
    pub base: u32,
    pub quote: u32,
}

/// Static exchange parameters the order builders depend on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Amounts at or below this are not worth a refund note.
    pub dust_amounts: BTreeMap<u32, u64>,
    /// Token every perpetual position is margined in.
    pub collateral_token: u32,
    /// Spot market id to its asset pair.
    pub spot_markets: BTreeMap<u32, SpotMarket>,
    /// Perpetual market id to its synthetic asset.
    pub perp_markets: BTreeMap<u32, u32>,
    /// Chain name to the id deposits encode.
    pub chain_ids: BTreeMap<String, u64>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        use known_tokens::*;

        Self {
            dust_amounts: BTreeMap::from([(BTC, 2_500), (ETH, 25_000), (USDC, 50_000)]),
            collateral_token: USDC,
            spot_markets: BTreeMap::from([
                (11, SpotMarket { base: BTC, quote: USDC }),
                (12, SpotMarket { base: ETH, quote: USDC }),
            ]),
            perp_markets: BTreeMap::from([(21, BTC), (22, ETH)]),
            chain_ids: BTreeMap::from([
                ("ETH Mainnet".to_string(), known_chains::ETH_MAINNET),
                ("Starknet".to_string(), known_chains::STARKNET),
                ("ZkSync".to_string(), known_chains::ZKSYNC),
            ]),
        }
    }
}

impl ExchangeConfig {
    /// Parse a JSON document; absent sections keep their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Overrides {
            dust_amounts: Option<BTreeMap<u32, u64>>,
            collateral_token: Option<u32>,
            spot_markets: Option<BTreeMap<u32, SpotMarket>>,
            perp_markets: Option<BTreeMap<u32, u32>>,
            chain_ids: Option<BTreeMap<String, u64>>,
        }

        let overrides: Overrides = serde_json::from_str(raw)?;
        let mut config = Self::default();
        if let Some(dust) = overrides.dust_amounts {
            config.dust_amounts = dust;
        }
        if let Some(token) = overrides.collateral_token {
            config.collateral_token = token;
        }
        if let Some(markets) = overrides.spot_markets {
            config.spot_markets = markets;
        }
        if let Some(markets) = overrides.perp_markets {
            config.perp_markets = markets;
        }
        if let Some(chains) = overrides.chain_ids {
            config.chain_ids = chains;
        }
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| WalletError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Dust threshold for a token; zero when unconfigured.
    pub fn dust(&self, token: u32) -> u64 {
        self.dust_amounts.get(&token).copied().unwrap_or(0)
    }

    /// Tokens that can be held as notes.
    pub fn assets(&self) -> Vec<u32> {
        self.dust_amounts.keys().copied().collect()
    }

    /// Base tokens of every spot market, the keys order tabs derive under.
    pub fn tab_tokens(&self) -> Vec<u32> {
        let mut tokens: Vec<u32> = self.spot_markets.values().map(|m| m.base).collect();
        tokens.sort_unstable();
        tokens.dedup();
        tokens
    }

    /// Synthetic tokens of every perpetual market.
    pub fn synthetic_tokens(&self) -> Vec<u32> {
        self.perp_markets.values().copied().collect()
    }

    pub fn spot_market(&self, market_id: u32) -> Option<SpotMarket> {
        self.spot_markets.get(&market_id).copied()
    }

    /// Market id trading `base` against `quote`.
    pub fn spot_market_id(&self, base: u32, quote: u32) -> Option<u32> {
        self.spot_markets
            .iter()
            .find(|(_, m)| m.base == base && m.quote == quote)
            .map(|(id, _)| *id)
    }

    pub fn is_known_chain(&self, chain_id: u64) -> bool {
        self.chain_ids.values().any(|id| *id == chain_id)
    }

    pub fn is_synthetic(&self, token: u32) -> bool {
        self.perp_market_id(token).is_some()
    }

    /// Perpetual market id of a synthetic asset.
    pub fn perp_market_id(&self, synthetic_token: u32) -> Option<u32> {
        self.perp_markets
            .iter()
            .find(|(_, t)| **t == synthetic_token)
            .map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExchangeConfig::default();
        assert_eq!(config.dust(known_tokens::BTC), 2_500);
        assert_eq!(config.dust(known_tokens::USDC), 50_000);
        assert_eq!(config.dust(1), 0);
        assert_eq!(config.spot_market_id(known_tokens::ETH, known_tokens::USDC), Some(12));
        assert!(config.is_known_chain(known_chains::STARKNET));
        assert!(!config.is_known_chain(1));
    }

    #[test]
    fn test_recovery_token_sets() {
        let config = ExchangeConfig::default();
        assert_eq!(config.assets(), vec![known_tokens::BTC, known_tokens::ETH, known_tokens::USDC]);
        assert_eq!(config.tab_tokens(), vec![known_tokens::BTC, known_tokens::ETH]);
        assert_eq!(config.synthetic_tokens(), vec![known_tokens::BTC, known_tokens::ETH]);
        assert_eq!(config.perp_market_id(known_tokens::ETH), Some(22));
    }

    #[test]
    fn test_partial_overrides() {
        let config = ExchangeConfig::from_json_str(r#"{"dust_amounts": {"12345": 1}}"#)
            .expect("should parse");
        assert_eq!(config.dust(known_tokens::BTC), 1);
        assert_eq!(config.dust(known_tokens::ETH), 0);
        assert_eq!(config.collateral_token, known_tokens::USDC);
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let result = ExchangeConfig::from_json_str("{not json");
        assert!(matches!(result, Err(WalletError::Config(_))));
    }
}
