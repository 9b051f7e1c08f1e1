//! Indexer configuration.
//!
//! Loaded from a JSON document. Only the deployment addresses are required;
//! every other field has a default.
//!
//! ```
//! use aminals_indexer::config::IndexerConfig;
//!
//! let config = IndexerConfig::from_json_str(r#"{
//!     "deployment": {
//!         "factory": "0x00000000000000000000000000000000000000f1",
//!         "auction": "0x00000000000000000000000000000000000000a1",
//!         "geneNft": "0x00000000000000000000000000000000000000e1"
//!     }
//! }"#).unwrap();
//!
//! assert!(config.dedupe_events);
//! assert_eq!(config.chain_read_timeout_ms, 5000);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use aminals_store::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Contract addresses of one game deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub factory: Address,
    pub auction: Address,
    pub gene_nft: Address,
}

/// Indexer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub deployment: Deployment,

    /// Upper bound for a single chain read call
    #[serde(default = "default_chain_read_timeout_ms")]
    pub chain_read_timeout_ms: u64,

    /// Skip events whose (tx hash, log index) was already applied
    #[serde(default = "default_true")]
    pub dedupe_events: bool,

    /// Blocks behind the newest applied event for which positions are kept
    /// for dedupe (0 = keep every position)
    #[serde(default)]
    pub dedupe_window_blocks: u64,

    /// Change journal entries kept in memory (0 = journal disabled)
    #[serde(default = "default_journal_capacity")]
    pub journal_capacity: usize,

    /// Default tracing filter when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_chain_read_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_journal_capacity() -> usize {
    10_000
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl IndexerConfig {
    /// Configuration for `deployment` with every other field defaulted.
    pub fn new(deployment: Deployment) -> Self {
        Self {
            deployment,
            chain_read_timeout_ms: default_chain_read_timeout_ms(),
            dedupe_events: true,
            dedupe_window_blocks: 0,
            journal_capacity: default_journal_capacity(),
            log_filter: default_log_filter(),
        }
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: IndexerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: PathBuf::from(path),
            source,
        })?;
        let config = Self::from_json_str(&contents)?;
        tracing::debug!(path = %path.display(), "loaded indexer config");
        Ok(config)
    }

    /// Reject configurations the indexer cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.deployment;
        for (name, address) in [
            ("factory", d.factory),
            ("auction", d.auction),
            ("geneNft", d.gene_nft),
        ] {
            if address.is_zero() {
                return Err(ConfigError::Invalid {
                    details: format!("deployment.{name} must not be the zero address"),
                });
            }
        }
        if d.factory == d.auction || d.factory == d.gene_nft || d.auction == d.gene_nft {
            return Err(ConfigError::Invalid {
                details: "deployment contracts must be distinct".to_string(),
            });
        }
        if self.chain_read_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                details: "chain_read_timeout_ms must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn chain_read_timeout(&self) -> Duration {
        Duration::from_millis(self.chain_read_timeout_ms)
    }
}
