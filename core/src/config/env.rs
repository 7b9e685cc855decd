//! # Environment Variable Support For [`BridgeConfig`]

use super::{BridgeConfig, FinalizerConfig, ObserverConfig, SigningConfig};
use crate::errors::BridgeError;
use std::{path::PathBuf, str::FromStr};

pub(crate) fn read_string_from_env(env_var: &'static str) -> Result<String, BridgeError> {
    std::env::var(env_var).map_err(|e| BridgeError::EnvVarNotSet(e, env_var))
}

pub(crate) fn read_string_from_env_then_parse<T: FromStr>(
    env_var: &'static str,
) -> Result<T, BridgeError>
where
    <T as FromStr>::Err: std::fmt::Debug,
{
    read_string_from_env(env_var)?
        .parse::<T>()
        .map_err(|e| BridgeError::EnvVarMalformed(env_var, format!("{:?}", e)))
}

fn read_optional<T: FromStr>(env_var: &'static str) -> Result<Option<T>, BridgeError>
where
    <T as FromStr>::Err: std::fmt::Debug,
{
    match read_string_from_env_then_parse::<T>(env_var) {
        Ok(value) => Ok(Some(value)),
        Err(BridgeError::EnvVarNotSet(_, _)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn read_or<T: FromStr>(env_var: &'static str, default: T) -> Result<T, BridgeError>
where
    <T as FromStr>::Err: std::fmt::Debug,
{
    Ok(read_optional(env_var)?.unwrap_or(default))
}

impl BridgeConfig {
    /// Builds the whole configuration from environment variables. Returns
    /// [`BridgeError::EnvVarNotSet`] if any required variable is missing, so
    /// callers can fall back to a configuration file.
    pub fn from_env() -> Result<Self, BridgeError> {
        let observer_defaults = ObserverConfig::default();
        let finalizer_defaults = FinalizerConfig::default();
        let signing_defaults = SigningConfig::default();

        let config = BridgeConfig {
            host: read_string_from_env("HOST")?,
            port: read_string_from_env_then_parse::<u16>("PORT")?,
            network: read_string_from_env_then_parse("BITCOIN_NETWORK")?,
            chain_id: read_string_from_env_then_parse("CHAIN_ID")?,
            evm_rpc_url: read_string_from_env("EVM_RPC_URL")?,
            settlement_rpc_url: read_string_from_env("SETTLEMENT_RPC_URL")?,
            settlement_contract_address: read_string_from_env_then_parse(
                "SETTLEMENT_CONTRACT_ADDRESS",
            )?,
            use_memory_store: read_or("USE_MEMORY_STORE", false)?,
            db_host: read_string_from_env("DB_HOST")?,
            db_port: read_string_from_env_then_parse("DB_PORT")?,
            db_user: read_string_from_env("DB_USER")?,
            db_password: read_string_from_env("DB_PASSWORD")?.into(),
            db_name: read_string_from_env("DB_NAME")?,
            subgraph_url: read_string_from_env("SUBGRAPH_URL")?,
            node_public_keys_source: read_string_from_env("NODES_PUBLIC_KEYS_SOURCE")?,
            committee_size: read_optional("COMMITTEE_SIZE")?,
            esplora_url: read_string_from_env("ESPLORA_URL")?,
            user_feed_url: read_optional("USER_FEED_URL")?,
            deposit_factory_address: read_optional("DEPOSIT_FACTORY_ADDRESS")?,
            deposit_init_code_hash: read_optional("DEPOSIT_INIT_CODE_HASH")?,
            key_store_path: read_string_from_env_then_parse::<PathBuf>("KEY_STORE_PATH")?,
            observer: ObserverConfig {
                batch_block_size: read_or(
                    "BATCH_BLOCK_NUMBER_SIZE",
                    observer_defaults.batch_block_size,
                )?,
                min_batch_duration_secs: read_or(
                    "MAX_DELAY_PER_BLOCK_BATCH",
                    observer_defaults.min_batch_duration_secs,
                )?,
                poll_delay_secs: read_or(
                    "OBSERVER_POLL_DELAY_SECS",
                    observer_defaults.poll_delay_secs,
                )?,
            },
            finalizer: FinalizerConfig {
                batch_size: read_or("FINALIZER_BATCH_SIZE", finalizer_defaults.batch_size)?,
                poll_delay_secs: read_or(
                    "FINALIZER_POLL_DELAY_SECS",
                    finalizer_defaults.poll_delay_secs,
                )?,
            },
            signing: SigningConfig {
                timeout_secs: read_or("SIGNING_TIMEOUT_SECS", signing_defaults.timeout_secs)?,
                nonce_preallocation: read_or(
                    "NONCE_PREALLOCATION",
                    signing_defaults.nonce_preallocation,
                )?,
                nonce_max_attempts: read_or(
                    "NONCE_MAX_ATTEMPTS",
                    signing_defaults.nonce_max_attempts,
                )?,
                dkg_max_attempts: read_or("DKG_MAX_ATTEMPTS", signing_defaults.dkg_max_attempts)?,
                withdrawal_fee_sats: read_or(
                    "WITHDRAWAL_FEE_SATS",
                    signing_defaults.withdrawal_fee_sats,
                )?,
                liveness_timeout_secs: read_or(
                    "LIVENESS_TIMEOUT_SECS",
                    signing_defaults.liveness_timeout_secs,
                )?,
                dkg_timeout_secs: read_or("DKG_TIMEOUT_SECS", signing_defaults.dkg_timeout_secs)?,
            },
            registry_refresh_secs: read_or("REGISTRY_REFRESH_SECS", 60)?,
            transient_retry_delay_secs: read_or("TRANSIENT_RETRY_DELAY_SECS", 5)?,
        };
        config.validate()?;

        Ok(config)
    }
}
