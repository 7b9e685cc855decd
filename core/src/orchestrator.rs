//! # Signing Orchestrator
//!
//! Drives signing rounds across a key's committee and turns their results
//! into mint attestations and broadcast withdrawals.
//!
//! A round is all-or-nothing: every member must answer within the signing
//! timeout, otherwise nothing is aggregated. A withdrawal runs one round per
//! input, in input order, and is only broadcast once every input carries a
//! witness.

use crate::builder::withdrawal::{BurnWithdrawal, UnsignedWithdrawal};
use crate::builder::{build_mint_message, TransactionBuilder};
use crate::database::TransferStore;
use crate::errors::BridgeError;
use crate::frost::{aggregate_nonce, combine_partial_signatures, SECP};
use crate::keys::KeyStore;
use crate::nonce_pool::NoncePool;
use crate::registry::OperatorRegistry;
use crate::settlement::SettlementReader;
use crate::signer::{SignPayload, SignRequest, SignStatus, SignatureResult, SigningNetwork};
use crate::types::{
    ChainId, KeyPurpose, NodeId, NonceRecord, PublicNonce, SigningKey, TransferStatus,
};
use crate::utils::timed_try_join_all;
use crate::wallet::{select_utxos, BitcoinWallet, Utxo};
use alloy::primitives::{TxHash, B256};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{schnorr, Message};
use bitcoin::{taproot, Network, OutPoint, TapSighashType, Transaction, Txid, Witness};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Collaborators and settings of a [`SigningOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorParams {
    pub chain_id: ChainId,
    pub network: Network,
    pub signing_timeout: Duration,
    pub withdrawal_fee: u64,
    /// Nonces fetched from every member when a pool runs dry.
    pub nonce_refill: usize,
}

#[derive(Debug)]
pub struct SigningOrchestrator {
    params: OrchestratorParams,
    registry: Arc<OperatorRegistry>,
    keys: Arc<KeyStore>,
    nonces: Arc<NoncePool>,
    signers: Arc<dyn SigningNetwork>,
    store: Arc<dyn TransferStore>,
    wallet: Arc<dyn BitcoinWallet>,
    settlement: Arc<dyn SettlementReader>,
    builder: Arc<dyn TransactionBuilder>,
}

impl SigningOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: OrchestratorParams,
        registry: Arc<OperatorRegistry>,
        keys: Arc<KeyStore>,
        nonces: Arc<NoncePool>,
        signers: Arc<dyn SigningNetwork>,
        store: Arc<dyn TransferStore>,
        wallet: Arc<dyn BitcoinWallet>,
        settlement: Arc<dyn SettlementReader>,
        builder: Arc<dyn TransactionBuilder>,
    ) -> Self {
        Self {
            params,
            registry,
            keys,
            nonces,
            signers,
            store,
            wallet,
            settlement,
            builder,
        }
    }

    /// Allocates `count` nonces per member for every active key.
    pub async fn preallocate_nonces(&self, count: usize) -> Result<(), BridgeError> {
        for key in self.keys.active().await {
            let members = self.registry.lookup_all(&key.committee).await?;
            self.nonces.allocate(&members, key.purpose, count).await?;
            tracing::info!(
                "Allocated {count} {} nonces for {} members",
                key.purpose,
                members.len()
            );
        }

        Ok(())
    }

    async fn select_nonces(
        &self,
        key: &SigningKey,
        party: &[NodeId],
        digest: B256,
    ) -> Result<BTreeMap<NodeId, NonceRecord>, BridgeError> {
        match self.nonces.select(party, key.purpose, digest.as_slice()).await {
            Err(BridgeError::InsufficientNonces { node, purpose }) => {
                tracing::info!("{purpose} nonces of {node} ran out, refilling");
                let members = self.registry.lookup_all(party).await?;
                self.nonces
                    .allocate(&members, purpose, self.params.nonce_refill)
                    .await?;
                self.nonces.select(party, key.purpose, digest.as_slice()).await
            }
            other => other,
        }
    }

    /// Runs one signing round of `payload` with every member of `party`.
    #[tracing::instrument(skip(self, key, party, payload), fields(purpose = %key.purpose, digest = %payload.hash()), err(level = tracing::Level::ERROR))]
    pub async fn sign(
        &self,
        key: &SigningKey,
        party: &[NodeId],
        payload: SignPayload,
    ) -> Result<SignatureResult, BridgeError> {
        let members = self.registry.lookup_all(party).await?;
        let digest = payload.hash();
        let nonces = self.select_nonces(key, party, digest).await?;

        let request = SignRequest {
            key_id: key.key_id.clone(),
            key_type: key.purpose.key_type().to_string(),
            public_key: key.public_key,
            party: party.to_vec(),
            nonces,
            payload,
        };

        let shares = timed_try_join_all(
            self.params.signing_timeout,
            "Signing round",
            members
                .iter()
                .map(|node| self.signers.request_partial_signature(node, &request)),
        )
        .await?;

        let commitments: BTreeMap<NodeId, PublicNonce> = request
            .nonces
            .iter()
            .map(|(node, record)| (*node, record.public_part))
            .collect();

        Ok(SignatureResult {
            result: SignStatus::Successful,
            public_nonce: aggregate_nonce(digest.as_slice(), &commitments)?,
            signature: combine_partial_signatures(&shares)?,
            message: digest,
        })
    }

    /// Attests a finalized deposit for minting on the settlement chain.
    ///
    /// Members decide whether the transfer is mintable. The outcome is
    /// recorded on the transfer unless the round failed for another reason.
    #[tracing::instrument(skip(self), err(level = tracing::Level::ERROR))]
    pub async fn mint(
        &self,
        tx_hash: TxHash,
        bitcoin_address: &str,
    ) -> Result<SignatureResult, BridgeError> {
        let chain_id = self.params.chain_id;
        let key = self.keys.get(KeyPurpose::EthAttestation).await?;
        let transfer = self
            .store
            .get_transfer(chain_id, tx_hash)
            .await?
            .ok_or(BridgeError::TransferNotFound(chain_id, tx_hash))?;

        let payload = SignPayload::Mint {
            tx: tx_hash,
            bitcoin_address: bitcoin_address.to_string(),
            amount: transfer.value,
            to: transfer.destination_address,
            hash: build_mint_message(tx_hash, transfer.value, transfer.destination_address),
        };

        match self.sign(&key, &key.committee, payload).await {
            Ok(result) => {
                self.store
                    .transition(chain_id, tx_hash, TransferStatus::Finalized, TransferStatus::Verified)
                    .await?;
                Ok(result)
            }
            Err(e) if e.is_validation_failure() => {
                self.store
                    .transition(chain_id, tx_hash, TransferStatus::Finalized, TransferStatus::Rejected)
                    .await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn parse_address(&self, address: &str) -> Result<bitcoin::Address, BridgeError> {
        bitcoin::Address::from_str(address)?
            .require_network(self.params.network)
            .map_err(|e| BridgeError::ValidationFailed(format!("address {address}: {e}")))
    }

    /// Pays `amount` sats from the custody address to `to`.
    #[tracing::instrument(skip(self), err(level = tracing::Level::ERROR))]
    pub async fn send(&self, to: &str, amount: u64) -> Result<Txid, BridgeError> {
        let key = self.keys.get(KeyPurpose::BtcCustody).await?;
        let from = key.taproot_address(self.params.network);
        let to = self.parse_address(to)?;
        let fee = self.params.withdrawal_fee;

        let utxos = self.wallet.utxos(&from, amount.saturating_add(fee)).await?;
        let unsigned = self
            .builder
            .build_withdrawal(&from, &utxos, &to, amount, fee)?;

        let payload = SignPayload::SimpleWithdraw {
            from: from.to_string(),
            fee,
            utxos,
            send_amount: amount,
            to: to.to_string(),
            hash: B256::ZERO,
        };
        self.sign_and_broadcast(&key, unsigned, payload).await
    }

    /// Releases the bitcoin locked by a burn on the settlement chain.
    #[tracing::instrument(skip(self), err(level = tracing::Level::ERROR))]
    pub async fn burn(&self, burn_tx_hash: TxHash) -> Result<Txid, BridgeError> {
        let key = self.keys.get(KeyPurpose::BtcCustody).await?;
        let from = key.taproot_address(self.params.network);
        let fee = self.params.withdrawal_fee;
        let burn = self.settlement.get_burn(burn_tx_hash).await?;

        let single_spend = OutPoint::new(burn.single_spend_txid, 0);
        let (single, rest): (Vec<Utxo>, Vec<Utxo>) = self
            .wallet
            .list_utxos(&from)
            .await?
            .into_iter()
            .partition(|utxo| OutPoint::new(utxo.txid, utxo.vout) == single_spend);
        let Some(single) = single.first().copied() else {
            return Err(BridgeError::ValidationFailed(format!(
                "single-spend output {single_spend} of burn {burn_tx_hash} is not spendable"
            )));
        };

        let needed = burn.amount.saturating_add(fee).saturating_sub(single.value);
        let mut utxos = vec![single];
        utxos.extend(select_utxos(&from, &rest, needed)?);

        let unsigned = self.builder.build_burn_withdrawal(
            &from,
            &utxos,
            &BurnWithdrawal {
                to: &burn.destination,
                amount: burn.amount,
                fee,
                single_spend,
                burner: burn.burner.into_array(),
            },
        )?;

        let payload = SignPayload::BurnWithdraw {
            utxos,
            burn_tx_hash,
            hash: B256::ZERO,
            fee,
        };
        self.sign_and_broadcast(&key, unsigned, payload).await
    }

    /// One round per input, sequentially. Any failed round or signature that
    /// does not verify under the custody key aborts the withdrawal before
    /// broadcast.
    async fn sign_and_broadcast(
        &self,
        key: &SigningKey,
        unsigned: UnsignedWithdrawal,
        payload: SignPayload,
    ) -> Result<Txid, BridgeError> {
        let (custody_key, _) = key.public_key.x_only_public_key();
        let mut witnesses = Vec::with_capacity(unsigned.sighashes.len());
        for (input, sighash) in unsigned.sighashes.iter().enumerate() {
            let digest = B256::from(sighash.to_byte_array());
            tracing::debug!("Signing input {input} with digest {digest}");

            let result = self
                .sign(key, &key.committee, payload.with_hash(digest))
                .await?;
            let signature = schnorr::Signature::from_slice(&result.schnorr_bytes())?;
            SECP.verify_schnorr(&signature, &Message::from_digest(digest.0), &custody_key)
                .map_err(|e| BridgeError::InvalidSignature(format!("input {input}: {e}")))?;

            let signature = taproot::Signature {
                signature,
                sighash_type: TapSighashType::Default,
            };
            witnesses.push(Witness::p2tr_key_spend(&signature));
        }

        let tx = attach_witnesses(unsigned.tx, witnesses)?;
        let txid = self.wallet.broadcast(&tx).await?;
        tracing::info!("Broadcast withdrawal {txid}");

        Ok(txid)
    }
}

/// Fills in one witness per input. The counts must match exactly.
pub fn attach_witnesses(
    mut tx: Transaction,
    witnesses: Vec<Witness>,
) -> Result<Transaction, BridgeError> {
    if witnesses.len() != tx.input.len() {
        return Err(BridgeError::MissingWitness {
            inputs: tx.input.len(),
            witnesses: witnesses.len(),
        });
    }

    for (input, witness) in tx.input.iter_mut().zip(witnesses) {
        input.witness = witness;
    }

    Ok(tx)
}
