//! # Configuration Options
//!
//! This module defines configuration options.
//!
//! This module is base for `cli` module and not dependent on it. Therefore,
//! this module can be used independently.
//!
//! ## Configuration File
//!
//! Configuration options can be read from a TOML file. File contents are
//! described in `BridgeConfig` struct.

use crate::errors::BridgeError;
use crate::types::ChainId;
use alloy::primitives::{Address, B256};
use bitcoin::Network;
use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;
use std::{fs::File, io::Read, path::PathBuf};

pub mod env;

/// Configuration options for the coordinator and the key generation tool.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Host of the HTTP action surface.
    pub host: String,
    /// Port of the HTTP action surface.
    pub port: u16,
    /// Bitcoin network of the custody wallet.
    pub network: Network,

    /// EVM chain id of the watched chain.
    pub chain_id: ChainId,
    /// JSON-RPC URL of the watched chain.
    pub evm_rpc_url: String,
    /// JSON-RPC URL of the chain hosting the settlement (wrapped token) contract.
    pub settlement_rpc_url: String,
    /// Address of the settlement contract that emits burn events.
    pub settlement_contract_address: Address,

    /// Keep transfers in process memory instead of PostgreSQL.
    #[serde(default)]
    pub use_memory_store: bool,
    /// PostgreSQL database host address.
    pub db_host: String,
    /// PostgreSQL database port.
    pub db_port: usize,
    /// PostgreSQL database user name.
    pub db_user: String,
    /// PostgreSQL database user password.
    pub db_password: SecretString,
    /// PostgreSQL database name.
    pub db_name: String,

    /// GraphQL endpoint listing registered operators.
    pub subgraph_url: String,
    /// Path or http(s) URL of the JSON document mapping operator addresses
    /// to their public key shares.
    pub node_public_keys_source: String,
    /// Number of registry members used for key generation. All registered
    /// members are used if not set.
    pub committee_size: Option<usize>,

    /// Esplora compatible API base, e.g. `https://mempool.space/testnet/api`.
    pub esplora_url: String,

    /// Base URL of the user service that hands out deposit addresses.
    pub user_feed_url: Option<String>,
    /// CREATE2 factory deploying per-user deposit contracts.
    pub deposit_factory_address: Option<Address>,
    /// keccak256 of the deposit contract init code.
    pub deposit_init_code_hash: Option<B256>,

    /// JSON file holding the active threshold keys.
    pub key_store_path: PathBuf,

    #[serde(default)]
    pub observer: ObserverConfig,
    #[serde(default)]
    pub finalizer: FinalizerConfig,
    #[serde(default)]
    pub signing: SigningConfig,

    /// Seconds between operator registry refreshes.
    #[serde(default = "default_registry_refresh_secs")]
    pub registry_refresh_secs: u64,
    /// Fixed backoff after a transient upstream error in a polling loop.
    #[serde(default = "default_transient_retry_delay_secs")]
    pub transient_retry_delay_secs: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ObserverConfig {
    /// Number of blocks fetched together.
    pub batch_block_size: u64,
    /// Minimum wall-clock time spent on one batch.
    pub min_batch_duration_secs: u64,
    /// Sleep between polls when the chain head has not moved.
    pub poll_delay_secs: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            batch_block_size: 3,
            min_batch_duration_secs: 10,
            poll_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FinalizerConfig {
    /// Number of distinct pending block numbers checked together.
    pub batch_size: usize,
    pub poll_delay_secs: u64,
}

impl Default for FinalizerConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            poll_delay_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SigningConfig {
    /// Timeout for one signing round across the whole committee subset.
    pub timeout_secs: u64,
    /// Nonces requested from every member at startup.
    pub nonce_preallocation: usize,
    /// Ceiling on candidate selections while looking for an even aggregate nonce.
    pub nonce_max_attempts: usize,
    /// Ceiling on key generation reruns while looking for a normalized key.
    pub dkg_max_attempts: usize,
    /// Flat fee paid by every withdrawal, in satoshis.
    pub withdrawal_fee_sats: u64,
    /// How long a member may take to answer the single-nonce liveness probe.
    #[serde(default = "default_liveness_timeout_secs")]
    pub liveness_timeout_secs: u64,
    /// Timeout for one complete key generation run.
    #[serde(default = "default_dkg_timeout_secs")]
    pub dkg_timeout_secs: u64,
}

fn default_liveness_timeout_secs() -> u64 {
    5
}

fn default_dkg_timeout_secs() -> u64 {
    50
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 50,
            nonce_preallocation: 30,
            nonce_max_attempts: 16,
            dkg_max_attempts: 10,
            withdrawal_fee_sats: 3000,
            liveness_timeout_secs: default_liveness_timeout_secs(),
            dkg_timeout_secs: default_dkg_timeout_secs(),
        }
    }
}

fn default_registry_refresh_secs() -> u64 {
    60
}

fn default_transient_retry_delay_secs() -> u64 {
    5
}

impl BridgeConfig {
    /// Read contents of a TOML file and generate a `BridgeConfig`.
    pub fn try_parse_file(path: PathBuf) -> Result<Self, BridgeError> {
        let mut contents = String::new();

        let mut file = match File::open(path.clone()) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!("Error while opening file {}: {}", path.display(), e);
                return Err(BridgeError::ConfigError(e.to_string()));
            }
        };

        if let Err(e) = file.read_to_string(&mut contents) {
            tracing::error!("Error while reading file {}: {}", path.display(), e);
            return Err(BridgeError::ConfigError(e.to_string()));
        }

        tracing::trace!("Using configuration file: {}", path.display());

        BridgeConfig::try_parse_from(contents)
    }

    /// Try to parse a `BridgeConfig` from given TOML formatted string and
    /// generate a `BridgeConfig`.
    pub fn try_parse_from(input: String) -> Result<Self, BridgeError> {
        let config = match toml::from_str::<BridgeConfig>(&input) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("Error while parsing config: {}", e);
                return Err(BridgeError::ConfigError(e.to_string()));
            }
        };
        config.validate()?;

        Ok(config)
    }

    /// Rejects values that would make the pipeline spin or stall.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.observer.batch_block_size == 0 {
            return Err(BridgeError::ConfigError(
                "observer.batch_block_size must be positive".into(),
            ));
        }
        if self.finalizer.batch_size == 0 {
            return Err(BridgeError::ConfigError(
                "finalizer.batch_size must be positive".into(),
            ));
        }
        if self.signing.nonce_max_attempts == 0 || self.signing.dkg_max_attempts == 0 {
            return Err(BridgeError::ConfigError(
                "signing attempt ceilings must be positive".into(),
            ));
        }
        let provisioning = [
            self.user_feed_url.is_some(),
            self.deposit_factory_address.is_some(),
            self.deposit_init_code_hash.is_some(),
        ];
        if provisioning.iter().any(|set| *set) && !provisioning.iter().all(|set| *set) {
            return Err(BridgeError::ConfigError(
                "user_feed_url, deposit_factory_address and deposit_init_code_hash must be set together"
                    .into(),
            ));
        }

        Ok(())
    }

    pub fn signing_timeout(&self) -> Duration {
        Duration::from_secs(self.signing.timeout_secs)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.signing.liveness_timeout_secs)
    }

    pub fn dkg_timeout(&self) -> Duration {
        Duration::from_secs(self.signing.dkg_timeout_secs)
    }

    pub fn min_batch_duration(&self) -> Duration {
        Duration::from_secs(self.observer.min_batch_duration_secs)
    }

    pub fn transient_retry_delay(&self) -> Duration {
        Duration::from_secs(self.transient_retry_delay_secs)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            network: Network::Regtest,

            chain_id: 11155111,
            evm_rpc_url: "http://127.0.0.1:8545".to_string(),
            settlement_rpc_url: "http://127.0.0.1:8545".to_string(),
            settlement_contract_address: Address::ZERO,

            use_memory_store: true,
            db_host: "127.0.0.1".to_string(),
            db_port: 5432,
            db_user: "zbridge".to_string(),
            db_password: "zbridge".to_string().into(),
            db_name: "zbridge".to_string(),

            subgraph_url: "http://127.0.0.1:8000/subgraphs/name/operators".to_string(),
            node_public_keys_source: "nodes_public_keys.json".to_string(),
            committee_size: None,

            esplora_url: "http://127.0.0.1:3002".to_string(),

            user_feed_url: None,
            deposit_factory_address: None,
            deposit_init_code_hash: None,

            key_store_path: PathBuf::from("dkgs.json"),

            observer: ObserverConfig::default(),
            finalizer: FinalizerConfig::default(),
            signing: SigningConfig::default(),

            registry_refresh_secs: default_registry_refresh_secs(),
            transient_retry_delay_secs: default_transient_retry_delay_secs(),
        }
    }
}
