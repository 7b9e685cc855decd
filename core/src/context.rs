//! # Bridge Context
//!
//! Every long-lived collaborator of the coordinator, built once from
//! [`BridgeConfig`] at startup and handed to the components that need it.

use crate::builder::{TaprootTransactionBuilder, TransactionBuilder};
use crate::chain::{ChainClient, EvmChainClient};
use crate::config::BridgeConfig;
use crate::database::{Database, MemoryStore, TransferStore};
use crate::errors::BridgeError;
use crate::finalizer::Finalizer;
use crate::keys::{KeyLifecycleManager, KeyStore};
use crate::nonce_pool::NoncePool;
use crate::observer::ChainObserver;
use crate::orchestrator::{OrchestratorParams, SigningOrchestrator};
use crate::provisioner::{AddressProvisioner, HttpUserFeed};
use crate::registry::{OperatorFeed, OperatorRegistry, RegistrySyncTask, SubgraphFeed};
use crate::settlement::{AlloySettlementReader, SettlementReader};
use crate::signer::{HttpSigningNetwork, SigningNetwork};
use crate::task::manager::BackgroundTaskManager;
use crate::task::TaskExt;
use crate::wallet::{BitcoinWallet, EsploraWallet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BridgeContext {
    pub config: BridgeConfig,
    pub store: Arc<dyn TransferStore>,
    pub chain: Arc<dyn ChainClient>,
    pub registry: Arc<OperatorRegistry>,
    pub signers: Arc<dyn SigningNetwork>,
    pub keys: Arc<KeyStore>,
    pub nonces: Arc<NoncePool>,
    pub wallet: Arc<dyn BitcoinWallet>,
    pub settlement: Arc<dyn SettlementReader>,
    pub builder: Arc<dyn TransactionBuilder>,
}

impl BridgeContext {
    /// Connects to every external service named in `config`.
    pub async fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        let store: Arc<dyn TransferStore> = if config.use_memory_store {
            tracing::warn!("Using the in-memory transfer store, nothing survives a restart");
            Arc::new(MemoryStore::new())
        } else {
            Database::ensure_schema(&config).await?;
            Arc::new(Database::new(&config).await?)
        };

        let feed: Arc<dyn OperatorFeed> = Arc::new(SubgraphFeed::new(
            config.subgraph_url.clone(),
            config.node_public_keys_source.clone(),
        ));
        let signers: Arc<dyn SigningNetwork> =
            Arc::new(HttpSigningNetwork::with_timeout(config.signing_timeout())?);

        Ok(Self::from_parts(
            store,
            Arc::new(EvmChainClient::new(&config.evm_rpc_url)?),
            Arc::new(OperatorRegistry::new(feed)),
            signers,
            Arc::new(KeyStore::load(config.key_store_path.clone())?),
            Arc::new(EsploraWallet::new(config.esplora_url.clone())),
            Arc::new(AlloySettlementReader::new(
                &config.settlement_rpc_url,
                config.settlement_contract_address,
                config.network,
            )?),
            config,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        store: Arc<dyn TransferStore>,
        chain: Arc<dyn ChainClient>,
        registry: Arc<OperatorRegistry>,
        signers: Arc<dyn SigningNetwork>,
        keys: Arc<KeyStore>,
        wallet: Arc<dyn BitcoinWallet>,
        settlement: Arc<dyn SettlementReader>,
        config: BridgeConfig,
    ) -> Self {
        let nonces = Arc::new(
            NoncePool::new(signers.clone(), config.signing.nonce_max_attempts)
                .with_request_timeout(config.signing_timeout()),
        );

        Self {
            config,
            store,
            chain,
            registry,
            signers,
            keys,
            nonces,
            wallet,
            settlement,
            builder: Arc::new(TaprootTransactionBuilder),
        }
    }

    pub fn orchestrator(&self) -> SigningOrchestrator {
        SigningOrchestrator::new(
            OrchestratorParams {
                chain_id: self.config.chain_id,
                network: self.config.network,
                signing_timeout: self.config.signing_timeout(),
                withdrawal_fee: self.config.signing.withdrawal_fee_sats,
                nonce_refill: self.config.signing.nonce_preallocation,
            },
            self.registry.clone(),
            self.keys.clone(),
            self.nonces.clone(),
            self.signers.clone(),
            self.store.clone(),
            self.wallet.clone(),
            self.settlement.clone(),
            self.builder.clone(),
        )
    }

    pub fn key_manager(&self) -> KeyLifecycleManager {
        KeyLifecycleManager::new(
            self.registry.clone(),
            self.signers.clone(),
            self.keys.clone(),
            self.config.signing.dkg_max_attempts,
        )
        .with_timeouts(self.config.liveness_timeout(), self.config.dkg_timeout())
    }

    pub fn observer(&self) -> ChainObserver {
        let observer = ChainObserver::new(
            self.config.chain_id,
            self.chain.clone(),
            self.store.clone(),
            self.config.observer.batch_block_size,
            self.config.min_batch_duration(),
        );

        match (
            &self.config.user_feed_url,
            self.config.deposit_factory_address,
            self.config.deposit_init_code_hash,
        ) {
            (Some(url), Some(factory), Some(init_code_hash)) => {
                observer.with_provisioner(AddressProvisioner::new(
                    self.store.clone(),
                    Arc::new(HttpUserFeed::new(url.clone())),
                    factory,
                    init_code_hash,
                ))
            }
            _ => observer,
        }
    }

    pub fn finalizer(&self) -> Finalizer {
        Finalizer::new(
            self.config.chain_id,
            self.chain.clone(),
            self.store.clone(),
            self.config.finalizer.batch_size,
        )
    }

    /// Starts the observer, finalizer and registry refresh loops. Transient
    /// upstream errors are retried inside each loop.
    pub async fn spawn_background_tasks(&self, manager: &BackgroundTaskManager) {
        let retry = self.config.transient_retry_delay();

        manager
            .ensure_task_looping(
                RegistrySyncTask::new(self.registry.clone())
                    .into_recoverable(retry)
                    .into_polling(Duration::from_secs(self.config.registry_refresh_secs)),
            )
            .await;
        manager
            .ensure_task_looping(
                self.observer()
                    .into_recoverable(retry)
                    .into_polling(Duration::from_secs(self.config.observer.poll_delay_secs)),
            )
            .await;
        manager
            .ensure_task_looping(
                self.finalizer()
                    .into_recoverable(retry)
                    .into_polling(Duration::from_secs(self.config.finalizer.poll_delay_secs)),
            )
            .await;
    }

    /// Restarts, every `interval`, any loop that stopped on a non-transient
    /// error. Never returns; drop it before shutting the manager down.
    pub async fn supervise_background_tasks(
        &self,
        manager: &BackgroundTaskManager,
        interval: Duration,
    ) {
        loop {
            tokio::time::sleep(interval).await;

            let stopped = manager.get_stopped_tasks().await;
            if stopped.is_empty() {
                continue;
            }
            tracing::error!("Restarting stopped background tasks: {}", stopped.join(", "));
            self.spawn_background_tasks(manager).await;
        }
    }
}
