//! Service configuration.
//!
//! Every setting can come from the environment (after `.env` loading) or the
//! command line; flags take precedence.

use crate::scrapers::alchemy::DEFAULT_BASE_URL;
use crate::stats::AggregatorConfig;
use anyhow::{bail, Result};
use clap::{builder::BoolishValueParser, ArgAction, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SOURCE_CONTRACT: &str = "0x251b5f14a825c537ff788604ea1b58e49b70726f";
pub const DEFAULT_DERIVED_CONTRACT: &str = "0x521f9c7505005cfa19a8e5786a9c3c9c9f5e6f42";

#[derive(Parser, Debug, Clone)]
#[command(name = "burn-stats")]
#[command(about = "Serves burn statistics for a source/derived NFT collection pair")]
pub struct Config {
    /// Upstream metadata provider API key
    #[arg(long, env = "ALCHEMY_API_KEY", hide_env_values = true)]
    pub alchemy_api_key: Option<String>,

    /// Older name for the API key, read when ALCHEMY_API_KEY is unset
    #[arg(
        long,
        env = "NEXT_PUBLIC_ALCHEMY_API_KEY",
        hide_env_values = true,
        hide = true
    )]
    pub next_public_alchemy_api_key: Option<String>,

    /// Provider base URL; the key is appended as the last path segment
    #[arg(long, env = "ALCHEMY_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub alchemy_base_url: String,

    /// Contract whose tokens record burn order
    #[arg(long, env = "SOURCE_CONTRACT", default_value = DEFAULT_SOURCE_CONTRACT)]
    pub source_contract: String,

    /// Contract of the derived collection
    #[arg(long, env = "DERIVED_CONTRACT", default_value = DEFAULT_DERIVED_CONTRACT)]
    pub derived_contract: String,

    /// Total derived population, used for the remaining count
    #[arg(long, env = "COLLECTION_SIZE", default_value_t = 1112)]
    pub collection_size: u32,

    /// CSV of original trait assignments
    #[arg(long, env = "REFERENCE_DATASET_PATH", default_value = "wizards.csv")]
    pub reference_dataset_path: PathBuf,

    /// Result cache lifetime in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value_t = 300)]
    pub cache_ttl_secs: u64,

    /// Per-request timeout for provider calls in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Background refresh period in seconds (0 disables)
    #[arg(long, env = "REFRESH_INTERVAL_SECS", default_value_t = 0)]
    pub refresh_interval_secs: u64,

    /// Run one aggregation pass before serving
    #[arg(
        long,
        env = "WARM_ON_START",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub warm_on_start: bool,

    /// Honour `?refresh=true` on the statistics endpoint
    #[arg(
        long,
        env = "ALLOW_FORCE_REFRESH",
        default_value_t = false,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub allow_force_refresh: bool,

    /// Listen address
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind_addr: SocketAddr,
}

impl Config {
    /// Parses flags and environment, then validates.
    pub fn load() -> Result<Self> {
        let config = Self::try_parse()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.api_key()?;
        if self.http_timeout_secs == 0 {
            bail!("HTTP_TIMEOUT_SECS must be greater than zero");
        }
        if self.source_contract.trim().is_empty() || self.derived_contract.trim().is_empty() {
            bail!("contract addresses must not be blank");
        }
        Ok(())
    }

    /// The provider key, preferring `ALCHEMY_API_KEY` over the older alias.
    pub fn api_key(&self) -> Result<&str> {
        [&self.alchemy_api_key, &self.next_public_alchemy_api_key]
            .into_iter()
            .flatten()
            .map(|key| key.trim())
            .find(|key| !key.is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "ALCHEMY_API_KEY is not set (NEXT_PUBLIC_ALCHEMY_API_KEY is also accepted)"
                )
            })
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// `None` when background refresh is disabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            source_contract: self.source_contract.trim().to_string(),
            derived_contract: self.derived_contract.trim().to_string(),
            collection_size: self.collection_size,
            reference_path: self.reference_dataset_path.clone(),
        }
    }
}
