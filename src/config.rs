//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (RPC endpoint, signer key, marketplace API key) are referenced
//! by env-var name in the config and resolved at runtime via `std::env::var`.

use alloy_primitives::{Address, U256};
use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::marketplace::AcquisitionTarget;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub chain: ChainConfig,
    pub storage: StorageConfig,
    pub token: TokenConfig,
    pub tax: TaxConfig,
    pub listings: ListingsConfig,
    pub acquisition: AcquisitionConfig,
    pub buyback: BuybackConfig,
    pub marketplace: MarketplaceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// Fixed tick interval.
    pub loop_interval_secs: u64,
    /// Optional pause after any step that performed an action.
    pub cooldown_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub rpc_url_env: String,
    pub chain_id: u64,
    pub private_key_env: String,
}

impl ChainConfig {
    pub fn rpc_url(&self) -> Result<String> {
        AppConfig::resolve_env(&self.rpc_url_env)
    }

    pub fn private_key(&self) -> Result<SecretString> {
        Ok(SecretString::new(AppConfig::resolve_env(
            &self.private_key_env,
        )?))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub db_path: String,
    /// One-time import source when no durable store exists yet.
    pub legacy_snapshot: String,
}

/// The monitored transfer-tax token.
#[derive(Debug, Deserialize, Clone)]
pub struct TokenConfig {
    pub address: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TaxConfig {
    pub enabled: bool,
    /// Max blocks per log request.
    pub max_block_span: u64,
    /// Pause between sub-range requests.
    pub throttle_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListingsConfig {
    pub max_checked_per_tick: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AcquisitionConfig {
    /// Exact-asset target (requires `token_id`).
    pub collection: Option<String>,
    pub token_id: Option<String>,
    /// Collection-level "best available" target.
    pub collection_slug: Option<String>,
    /// Exchange verifier contract (order validation entry point).
    pub exchange: String,
    /// Transfer conduit operator.
    pub conduit: String,
    pub markup_bps: u64,
    pub relist_duration_secs: u64,
}

impl AcquisitionConfig {
    /// Resolve the configured target, if any. An exact asset takes
    /// precedence over a collection slug.
    pub fn target(&self) -> Result<Option<AcquisitionTarget>> {
        match (&self.collection, &self.token_id) {
            (Some(collection), Some(token_id)) => Ok(Some(AcquisitionTarget::Token {
                collection: parse_address(collection, "acquisition.collection")?,
                token_id: parse_wei(token_id, "acquisition.token_id")?,
            })),
            (Some(_), None) | (None, Some(_)) => anyhow::bail!(
                "acquisition target needs both collection and token_id (or a collection_slug)"
            ),
            (None, None) => Ok(self
                .collection_slug
                .as_ref()
                .map(|slug| AcquisitionTarget::Collection { slug: slug.clone() })),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuybackConfig {
    /// Max native value converted per invocation; absent = full pool.
    pub chunk_wei: Option<String>,
}

impl BuybackConfig {
    pub fn chunk(&self) -> Result<Option<U256>> {
        self.chunk_wei
            .as_deref()
            .map(|value| parse_wei(value, "buyback.chunk_wei"))
            .transpose()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketplaceConfig {
    pub api_url: String,
    pub api_key_env: String,
}

impl MarketplaceConfig {
    pub fn api_key(&self) -> Result<SecretString> {
        Ok(SecretString::new(AppConfig::resolve_env(&self.api_key_env)?))
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

/// Parse a 20-byte hex address from config.
pub fn parse_address(value: &str, what: &str) -> Result<Address> {
    value
        .parse::<Address>()
        .with_context(|| format!("Invalid address for {what}: {value:?}"))
}

/// Parse a non-negative decimal integer from config.
pub fn parse_wei(value: &str, what: &str) -> Result<U256> {
    U256::from_str_radix(value, 10)
        .with_context(|| format!("Invalid decimal integer for {what}: {value:?}"))
}
