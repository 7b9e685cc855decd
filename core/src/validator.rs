//! # Member-Side Validation
//!
//! What a committee member checks before contributing a partial signature:
//! the caller must be allow-listed for the endpoint, and the action must
//! reproduce the exact digest it asks to sign from authoritative data.

use crate::builder::withdrawal::BurnWithdrawal;
use crate::builder::{build_mint_message, TransactionBuilder};
use crate::constants::NODE_ENDPOINT_PATHS;
use crate::database::TransferStore;
use crate::errors::BridgeError;
use crate::settlement::SettlementReader;
use crate::signer::SignPayload;
use crate::types::{ChainId, TransferStatus};
use crate::wallet::Utxo;
use alloy::primitives::{Address, TxHash, B256, U256};
use bitcoin::{Network, OutPoint, TapSighash};
use bitcoin::hashes::Hash;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Source IPs a signing node accepts, each with the endpoints it may call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerAllowList {
    allowed: HashMap<IpAddr, HashSet<String>>,
}

impl CallerAllowList {
    /// Every IP gets access to all signing node endpoints.
    pub fn from_ips(ips: impl IntoIterator<Item = IpAddr>) -> Self {
        let paths: HashSet<String> = NODE_ENDPOINT_PATHS.iter().map(|p| p.to_string()).collect();
        Self {
            allowed: ips.into_iter().map(|ip| (ip, paths.clone())).collect(),
        }
    }

    /// Reads a JSON array of IP strings.
    pub fn load(path: &Path) -> Result<Self, BridgeError> {
        let contents = std::fs::read_to_string(path)?;
        let ips: Vec<String> = serde_json::from_str(&contents)?;
        let ips = ips
            .iter()
            .map(|ip| {
                IpAddr::from_str(ip)
                    .map_err(|e| BridgeError::ConfigError(format!("invalid caller IP {ip}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::from_ips(ips))
    }

    pub fn is_allowed(&self, caller: &IpAddr, path: &str) -> bool {
        self.allowed
            .get(caller)
            .is_some_and(|paths| paths.contains(path))
    }

    pub fn check(&self, caller: &IpAddr, path: &str) -> Result<(), BridgeError> {
        if self.is_allowed(caller, path) {
            Ok(())
        } else {
            Err(BridgeError::CallerNotAllowed(caller.to_string(), path.to_string()))
        }
    }
}

/// Parameters a member signs with once the action checks out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignParams {
    TxDigest(B256),
    Mint { tx: TxHash, amount: U256, to: Address },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAction {
    pub params: SignParams,
    pub hash: B256,
}

fn digest_b256(sighash: &TapSighash) -> B256 {
    B256::from(sighash.to_byte_array())
}

fn invalid(message: impl Into<String>) -> BridgeError {
    BridgeError::ValidationFailed(message.into())
}

#[derive(Debug, Clone)]
pub struct ActionValidator {
    chain_id: ChainId,
    network: Network,
    custody_address: bitcoin::Address,
    store: Arc<dyn TransferStore>,
    settlement: Arc<dyn SettlementReader>,
    builder: Arc<dyn TransactionBuilder>,
}

impl ActionValidator {
    pub fn new(
        chain_id: ChainId,
        network: Network,
        custody_address: bitcoin::Address,
        store: Arc<dyn TransferStore>,
        settlement: Arc<dyn SettlementReader>,
        builder: Arc<dyn TransactionBuilder>,
    ) -> Self {
        Self {
            chain_id,
            network,
            custody_address,
            store,
            settlement,
            builder,
        }
    }

    fn parse_address(&self, address: &str) -> Result<bitcoin::Address, BridgeError> {
        bitcoin::Address::from_str(address)
            .map_err(|e| invalid(format!("address {address}: {e}")))?
            .require_network(self.network)
            .map_err(|e| invalid(format!("address {address}: {e}")))
    }

    fn require_digest(digests: &[TapSighash], hash: B256) -> Result<ValidatedAction, BridgeError> {
        if digests.iter().any(|d| digest_b256(d) == hash) {
            Ok(ValidatedAction {
                params: SignParams::TxDigest(hash),
                hash,
            })
        } else {
            Err(invalid(format!("{hash} is not a digest of the rebuilt transaction")))
        }
    }

    #[tracing::instrument(skip(self), err(level = tracing::Level::WARN))]
    pub async fn validate(&self, payload: &SignPayload) -> Result<ValidatedAction, BridgeError> {
        match payload {
            SignPayload::SimpleWithdraw {
                from,
                fee,
                utxos,
                send_amount,
                to,
                hash,
            } => {
                let from = self.parse_address(from)?;
                let to = self.parse_address(to)?;
                let rebuilt = self
                    .builder
                    .build_withdrawal(&from, utxos, &to, *send_amount, *fee)?;
                Self::require_digest(&rebuilt.sighashes, *hash)
            }
            SignPayload::BurnWithdraw {
                utxos,
                burn_tx_hash,
                hash,
                fee,
            } => self.validate_burn(utxos, *burn_tx_hash, *hash, *fee).await,
            SignPayload::Mint {
                tx,
                bitcoin_address,
                amount,
                to,
                hash,
            } => {
                self.parse_address(bitcoin_address)?;
                let transfer = self
                    .store
                    .get_transfer(self.chain_id, *tx)
                    .await?
                    .ok_or_else(|| invalid(format!("transfer {tx} is unknown")))?;
                if transfer.status != TransferStatus::Finalized {
                    return Err(invalid(format!(
                        "transfer {tx} is {}, not FINALIZED",
                        transfer.status
                    )));
                }

                let expected = build_mint_message(
                    transfer.tx_hash,
                    transfer.value,
                    transfer.destination_address,
                );
                if expected != *hash
                    || transfer.value != *amount
                    || transfer.destination_address != *to
                {
                    return Err(invalid(format!("mint request for {tx} does not match the transfer")));
                }

                Ok(ValidatedAction {
                    params: SignParams::Mint {
                        tx: transfer.tx_hash,
                        amount: transfer.value,
                        to: transfer.destination_address,
                    },
                    hash: expected,
                })
            }
        }
    }

    async fn validate_burn(
        &self,
        utxos: &[Utxo],
        burn_tx_hash: TxHash,
        hash: B256,
        fee: u64,
    ) -> Result<ValidatedAction, BridgeError> {
        let burn = match self.settlement.get_burn(burn_tx_hash).await {
            Ok(burn) => burn,
            Err(BridgeError::BurnNotFound(tx)) => {
                return Err(invalid(format!("no burn event in {tx}")));
            }
            Err(e) => return Err(e),
        };

        let rebuilt = self.builder.build_burn_withdrawal(
            &self.custody_address,
            utxos,
            &BurnWithdrawal {
                to: &burn.destination,
                amount: burn.amount,
                fee,
                single_spend: OutPoint::new(burn.single_spend_txid, 0),
                burner: burn.burner.into_array(),
            },
        )?;
        Self::require_digest(&rebuilt.sighashes, hash)
    }
}
