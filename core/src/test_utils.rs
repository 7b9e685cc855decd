//! # Testing Utilities
//!
//! In-process stand-ins for every external collaborator, plus a
//! [`TestBridge`] that wires them together the way the coordinator does.
//!
//! [`MockSigningNetwork`] behaves like a committee that shares its key
//! additively: every member holds a random share, the group key is the sum
//! of the public shares and partial signatures are
//! `s_i = d_i + rho_i * e_i + c * x_i` with the BIP-340 challenge `c`. The
//! aggregate therefore verifies as a real Schnorr signature whenever the
//! whole committee signs.

use crate::builder::address::{custody_address, p2wpkh_from_public_key};
use crate::builder::TaprootTransactionBuilder;
use crate::chain::decoder::IERC20;
use crate::chain::{ChainClient, ChainTransaction};
use crate::constants::{DKG_ROUND1_PATH, GENERATE_NONCES_PATH, SIGN_PATH};
use crate::database::{MemoryStore, TransferStore};
use crate::errors::BridgeError;
use crate::frost::{aggregate_nonce, binding_factor, SECP};
use crate::keys::{KeyLifecycleManager, KeyStore};
use crate::nonce_pool::NoncePool;
use crate::orchestrator::{OrchestratorParams, SigningOrchestrator};
use crate::provisioner::UserFeed;
use crate::registry::{OperatorFeed, OperatorInfo, OperatorRegistry};
use crate::settlement::{BurnEvent, SettlementReader};
use crate::signer::{DkgResult, SignRequest, SigningNetwork};
use crate::types::{
    ChainId, KeyPurpose, NodeId, NonceRecord, PublicNonce, Transfer, TransferStatus,
    WatchedAddress,
};
use crate::validator::{ActionValidator, CallerAllowList};
use crate::wallet::{BitcoinWallet, Utxo};
use alloy::primitives::{Address, TxHash, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::secp256k1::rand::{thread_rng, RngCore};
use bitcoin::secp256k1::{PublicKey, Scalar, SecretKey};
use bitcoin::{Network, OutPoint, Transaction, Txid};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};
use std::time::Duration;
use tokio::sync::Mutex;

pub const CHAIN_ID: ChainId = 11155111;

/// Operator `n` with a deterministic key and a socket on `10.0.0.n`.
pub fn operator(n: u8) -> OperatorInfo {
    let address = Address::repeat_byte(n);
    let secret = SecretKey::from_slice(&[n.max(1); 32]).expect("valid secret");
    OperatorInfo {
        node_id: NodeId::from_operator(&address),
        address,
        socket: format!("http://10.0.0.{n}:5037"),
        stake: U256::from(1_000u64),
        public_key: PublicKey::from_secret_key(&SECP, &secret),
    }
}

/// Unspent output `seed:0` of `value` sats.
pub fn utxo(seed: u8, value: u64) -> Utxo {
    Utxo {
        txid: Txid::from_byte_array([seed; 32]),
        vout: 0,
        value,
    }
}

/// A regtest custody address nobody holds the key for.
pub fn custody_address_for_tests() -> bitcoin::Address {
    let secret = SecretKey::from_slice(&[0x42; 32]).expect("valid secret");
    custody_address(&PublicKey::from_secret_key(&SECP, &secret), Network::Regtest)
}

/// An ERC20 `transfer(to, amount)` with hash `seed` repeated.
pub fn erc20_transfer(seed: u8, to: Address, amount: u64) -> ChainTransaction {
    ChainTransaction {
        hash: TxHash::repeat_byte(seed),
        from: Address::repeat_byte(0xaa),
        to: Some(Address::repeat_byte(0xee)),
        input: IERC20::transferCall {
            to,
            amount: U256::from(amount),
        }
        .abi_encode()
        .into(),
    }
}

pub async fn watch(store: &dyn TransferStore, user_id: u64, address: Address) {
    assert!(store
        .insert_watched_address(&WatchedAddress {
            user_id,
            address,
            is_active: true,
        })
        .await
        .expect("insert watched address"));
}

#[derive(Debug, Default)]
struct OperatorFeedState {
    operators: Vec<OperatorInfo>,
    failing: bool,
}

#[derive(Debug, Default)]
pub struct MockOperatorFeed {
    state: Mutex<OperatorFeedState>,
}

impl MockOperatorFeed {
    pub fn new(operators: Vec<OperatorInfo>) -> Self {
        Self {
            state: Mutex::new(OperatorFeedState {
                operators,
                failing: false,
            }),
        }
    }

    pub async fn set_operators(&self, operators: Vec<OperatorInfo>) {
        self.state.lock().await.operators = operators;
    }

    pub async fn set_failing(&self, failing: bool) {
        self.state.lock().await.failing = failing;
    }
}

#[async_trait]
impl OperatorFeed for MockOperatorFeed {
    async fn fetch_operators(&self) -> Result<Vec<OperatorInfo>, BridgeError> {
        let state = self.state.lock().await;
        if state.failing {
            return Err(BridgeError::Registry("subgraph unreachable".into()));
        }
        Ok(state.operators.clone())
    }
}

#[derive(Debug, Default)]
pub struct MockUserFeed {
    latest: AtomicU64,
}

impl MockUserFeed {
    pub fn new(latest: u64) -> Self {
        Self {
            latest: AtomicU64::new(latest),
        }
    }

    pub fn set_latest(&self, latest: u64) {
        self.latest.store(latest, Ordering::SeqCst);
    }
}

#[async_trait]
impl UserFeed for MockUserFeed {
    async fn latest_user_id(&self) -> Result<u64, BridgeError> {
        Ok(self.latest.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Default)]
struct ChainState {
    head: u64,
    finalized: u64,
    blocks: BTreeMap<u64, Vec<ChainTransaction>>,
    failing: bool,
}

/// Canonical chain held in memory. Blocks without pushed transactions are
/// empty.
#[derive(Debug, Default)]
pub struct MockChain {
    state: SyncMutex<ChainState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn set_finalized(&self, finalized: u64) {
        self.state.lock().unwrap().finalized = finalized;
    }

    pub fn push_tx(&self, block: u64, tx: ChainTransaction) {
        self.state.lock().unwrap().blocks.entry(block).or_default().push(tx);
    }

    /// Replaces the contents of `block`, as a competing fork would.
    pub fn replace_block(&self, block: u64, txs: Vec<ChainTransaction>) {
        self.state.lock().unwrap().blocks.insert(block, txs);
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    fn read<T>(&self, f: impl FnOnce(&ChainState) -> T) -> Result<T, BridgeError> {
        let state = self.state.lock().unwrap();
        if state.failing {
            return Err(BridgeError::ChainRpc("connection reset".into()));
        }
        Ok(f(&state))
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn latest_block_number(&self) -> Result<u64, BridgeError> {
        self.read(|state| state.head)
    }

    async fn finalized_block_number(&self) -> Result<u64, BridgeError> {
        self.read(|state| state.finalized)
    }

    async fn block_transactions(&self, number: u64) -> Result<Vec<ChainTransaction>, BridgeError> {
        self.read(|state| state.blocks.get(&number).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct WalletState {
    utxos: Vec<Utxo>,
    broadcasts: Vec<Transaction>,
}

/// Wallet backend that records broadcasts and spends their inputs.
#[derive(Debug, Default)]
pub struct MockWallet {
    state: Mutex<WalletState>,
}

impl MockWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fund(&self, utxos: Vec<Utxo>) {
        self.state.lock().await.utxos.extend(utxos);
    }

    pub async fn broadcasts(&self) -> Vec<Transaction> {
        self.state.lock().await.broadcasts.clone()
    }
}

#[async_trait]
impl BitcoinWallet for MockWallet {
    async fn list_utxos(&self, _address: &bitcoin::Address) -> Result<Vec<Utxo>, BridgeError> {
        Ok(self.state.lock().await.utxos.clone())
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, BridgeError> {
        let mut state = self.state.lock().await;
        let spent: HashSet<OutPoint> = tx.input.iter().map(|i| i.previous_output).collect();
        state
            .utxos
            .retain(|u| !spent.contains(&OutPoint::new(u.txid, u.vout)));
        state.broadcasts.push(tx.clone());
        Ok(tx.compute_txid())
    }
}

#[derive(Debug, Default)]
pub struct MockSettlement {
    burns: Mutex<HashMap<TxHash, BurnEvent>>,
}

impl MockSettlement {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, tx_hash: TxHash, burn: BurnEvent) {
        self.burns.lock().await.insert(tx_hash, burn);
    }
}

#[async_trait]
impl SettlementReader for MockSettlement {
    async fn get_burn(&self, tx_hash: TxHash) -> Result<BurnEvent, BridgeError> {
        self.burns
            .lock()
            .await
            .get(&tx_hash)
            .cloned()
            .ok_or(BridgeError::BurnNotFound(tx_hash))
    }
}

#[derive(Debug, Default)]
struct MockMember {
    /// Key share per key id.
    shares: HashMap<String, SecretKey>,
    /// Secret nonce pair per private commitment.
    nonces: HashMap<String, (SecretKey, SecretKey)>,
    sign_calls: usize,
}

#[derive(Debug, Default)]
struct SigningState {
    members: HashMap<NodeId, MockMember>,
    offline: HashSet<NodeId>,
    rejecting: HashSet<NodeId>,
    /// Members that stop answering sign requests after this many calls.
    stall_after: HashMap<NodeId, usize>,
    /// Members that accept nonce requests but never answer them.
    hanging: HashSet<NodeId>,
    /// Key generation never completes when set.
    dkg_hangs: bool,
    /// Members that answer sign requests with a garbage share.
    corrupt: HashSet<NodeId>,
    validator: Option<Arc<ActionValidator>>,
    /// Members only answer `caller` on allow-listed paths when set.
    allow_list: Option<(CallerAllowList, IpAddr)>,
    dkg_runs: usize,
}

impl SigningState {
    fn authorize(&self, path: &str) -> Result<(), BridgeError> {
        match &self.allow_list {
            Some((list, caller)) => list.check(caller, path),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MockSigningNetwork {
    state: Mutex<SigningState>,
}

/// `H_tag(R.x || P.x || m)` reduced to a scalar.
pub fn bip340_challenge(nonce: &PublicKey, key: &PublicKey, message: &[u8]) -> Scalar {
    let tag = sha256::Hash::hash(b"BIP0340/challenge");
    let mut engine = sha256::Hash::engine();
    engine.input(tag.as_byte_array());
    engine.input(tag.as_byte_array());
    engine.input(&nonce.serialize()[1..]);
    engine.input(&key.serialize()[1..]);
    engine.input(message);
    Scalar::from_be_bytes(sha256::Hash::from_engine(engine).to_byte_array())
        .expect("challenge below group order")
}

fn random_id() -> String {
    let mut bytes = [0u8; 16];
    thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl MockSigningNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_offline(&self, node: NodeId) {
        self.state.lock().await.offline.insert(node);
    }

    pub async fn set_rejecting(&self, node: NodeId, rejecting: bool) {
        let mut state = self.state.lock().await;
        if rejecting {
            state.rejecting.insert(node);
        } else {
            state.rejecting.remove(&node);
        }
    }

    /// `node` answers its next `calls` sign requests and hangs afterwards.
    pub async fn stall_after(&self, node: NodeId, calls: usize) {
        self.state.lock().await.stall_after.insert(node, calls);
    }

    pub async fn set_hanging(&self, node: NodeId) {
        self.state.lock().await.hanging.insert(node);
    }

    pub async fn set_dkg_hanging(&self, hangs: bool) {
        self.state.lock().await.dkg_hangs = hangs;
    }

    pub async fn set_corrupt(&self, node: NodeId) {
        self.state.lock().await.corrupt.insert(node);
    }

    /// Members recompute every action with `validator` before signing.
    pub async fn set_validator(&self, validator: Arc<ActionValidator>) {
        self.state.lock().await.validator = Some(validator);
    }

    pub async fn clear_validator(&self) {
        self.state.lock().await.validator = None;
    }

    /// Requests are made from `caller` and members check it against `list`.
    pub async fn set_allow_list(&self, list: CallerAllowList, caller: IpAddr) {
        self.state.lock().await.allow_list = Some((list, caller));
    }

    pub async fn dkg_runs(&self) -> usize {
        self.state.lock().await.dkg_runs
    }

    pub async fn sign_calls(&self, node: &NodeId) -> usize {
        self.state
            .lock()
            .await
            .members
            .get(node)
            .map_or(0, |member| member.sign_calls)
    }

    fn unreachable(node: &OperatorInfo) -> BridgeError {
        BridgeError::SignerFailed(node.node_id, "connection refused".into())
    }
}

#[async_trait]
impl SigningNetwork for MockSigningNetwork {
    async fn request_nonces(
        &self,
        node: &OperatorInfo,
        count: usize,
    ) -> Result<Vec<NonceRecord>, BridgeError> {
        let mut state = self.state.lock().await;
        if state.offline.contains(&node.node_id) {
            return Err(Self::unreachable(node));
        }
        state.authorize(GENERATE_NONCES_PATH)?;
        if state.hanging.contains(&node.node_id) {
            drop(state);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return Err(Self::unreachable(node));
        }

        let member = state.members.entry(node.node_id).or_default();
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            let d = SecretKey::new(&mut thread_rng());
            let e = SecretKey::new(&mut thread_rng());
            let commitment = random_id();
            member.nonces.insert(commitment.clone(), (d, e));
            records.push(NonceRecord {
                public_part: PublicNonce {
                    d: PublicKey::from_secret_key(&SECP, &d),
                    e: PublicKey::from_secret_key(&SECP, &e),
                },
                private_commitment: commitment,
            });
        }

        Ok(records)
    }

    async fn request_partial_signature(
        &self,
        node: &OperatorInfo,
        request: &SignRequest,
    ) -> Result<[u8; 32], BridgeError> {
        let (validator, stalls) = {
            let mut state = self.state.lock().await;
            if state.offline.contains(&node.node_id) {
                return Err(Self::unreachable(node));
            }
            state.authorize(SIGN_PATH)?;
            if state.rejecting.contains(&node.node_id) {
                return Err(BridgeError::ValidationFailed(format!(
                    "node {} rejected the request",
                    node.node_id
                )));
            }
            let limit = state.stall_after.get(&node.node_id).copied();
            let member = state.members.entry(node.node_id).or_default();
            member.sign_calls += 1;
            let stalls = limit.is_some_and(|limit| member.sign_calls > limit);
            (state.validator.clone(), stalls)
        };

        if stalls {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some(validator) = validator {
            validator.validate(&request.payload).await?;
        }

        let mut state = self.state.lock().await;
        let corrupt = state.corrupt.contains(&node.node_id);
        let member = state.members.entry(node.node_id).or_default();
        let record = request
            .nonces
            .get(&node.node_id)
            .ok_or_else(|| BridgeError::SignerFailed(node.node_id, "no nonce for node".into()))?;
        let (d, e) = member
            .nonces
            .remove(&record.private_commitment)
            .ok_or_else(|| BridgeError::SignerFailed(node.node_id, "unknown or used nonce".into()))?;
        let share = *member
            .shares
            .get(&request.key_id)
            .ok_or_else(|| BridgeError::SignerFailed(node.node_id, "unknown key".into()))?;

        let message = request.payload.hash();
        let commitments: BTreeMap<NodeId, PublicNonce> = request
            .nonces
            .iter()
            .map(|(id, record)| (*id, record.public_part))
            .collect();
        let rho = binding_factor(&node.node_id, message.as_slice(), &commitments)?;
        let group_nonce = aggregate_nonce(message.as_slice(), &commitments)?;
        let challenge = bip340_challenge(&group_nonce, &request.public_key, message.as_slice());

        let k = d.add_tweak(&Scalar::from(e.mul_tweak(&rho)?))?;
        let s = k.add_tweak(&Scalar::from(share.mul_tweak(&challenge)?))?;
        if corrupt {
            return Ok(SecretKey::new(&mut thread_rng()).secret_bytes());
        }

        Ok(s.secret_bytes())
    }

    async fn request_dkg(
        &self,
        _threshold: usize,
        party: &[OperatorInfo],
        _purpose: KeyPurpose,
    ) -> Result<DkgResult, BridgeError> {
        let mut state = self.state.lock().await;
        if let Some(node) = party.iter().find(|node| state.offline.contains(&node.node_id)) {
            return Err(Self::unreachable(node));
        }
        state.authorize(DKG_ROUND1_PATH)?;
        state.dkg_runs += 1;
        if state.dkg_hangs {
            drop(state);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return Err(BridgeError::DkgFailed("round never completed".into()));
        }

        let key_id = random_id();
        let mut public_shares = Vec::with_capacity(party.len());
        for node in party {
            let share = SecretKey::new(&mut thread_rng());
            public_shares.push(PublicKey::from_secret_key(&SECP, &share));
            state
                .members
                .entry(node.node_id)
                .or_default()
                .shares
                .insert(key_id.clone(), share);
        }
        let refs: Vec<&PublicKey> = public_shares.iter().collect();

        Ok(DkgResult {
            key_id,
            public_key: PublicKey::combine_keys(&refs)?,
            party: party.iter().map(|node| node.node_id).collect(),
        })
    }
}

/// A coordinator over mocks with both keys generated among `n` members.
/// Members validate every action against the same store and settlement the
/// coordinator uses.
pub struct TestBridge {
    pub operators: Vec<OperatorInfo>,
    pub registry: Arc<OperatorRegistry>,
    pub store: Arc<MemoryStore>,
    pub chain: Arc<MockChain>,
    pub wallet: Arc<MockWallet>,
    pub settlement: Arc<MockSettlement>,
    pub signers: Arc<MockSigningNetwork>,
    pub keys: Arc<KeyStore>,
    pub nonces: Arc<NoncePool>,
    pub orchestrator: Arc<SigningOrchestrator>,
}

impl TestBridge {
    pub async fn new(n: u8) -> Self {
        let operators: Vec<OperatorInfo> = (1..=n).map(operator).collect();
        let registry = Arc::new(OperatorRegistry::new(Arc::new(MockOperatorFeed::new(
            operators.clone(),
        ))));
        registry.refresh().await.unwrap();

        let signers = Arc::new(MockSigningNetwork::new());
        let keys = Arc::new(KeyStore::in_memory());
        let manager = KeyLifecycleManager::new(registry.clone(), signers.clone(), keys.clone(), 64);
        let threshold = operators.len();
        let btc = manager
            .generate(threshold, KeyPurpose::BtcCustody, None)
            .await
            .unwrap();
        manager
            .generate(threshold, KeyPurpose::EthAttestation, None)
            .await
            .unwrap();

        let store = Arc::new(MemoryStore::new());
        let settlement = Arc::new(MockSettlement::new());
        let builder = Arc::new(TaprootTransactionBuilder);
        signers
            .set_validator(Arc::new(ActionValidator::new(
                CHAIN_ID,
                Network::Regtest,
                btc.taproot_address(Network::Regtest),
                store.clone(),
                settlement.clone(),
                builder.clone(),
            )))
            .await;

        let nonces = Arc::new(NoncePool::new(signers.clone(), 64));
        let wallet = Arc::new(MockWallet::new());
        let orchestrator = Arc::new(SigningOrchestrator::new(
            OrchestratorParams {
                chain_id: CHAIN_ID,
                network: Network::Regtest,
                signing_timeout: Duration::from_secs(50),
                withdrawal_fee: 3_000,
                nonce_refill: 8,
            },
            registry.clone(),
            keys.clone(),
            nonces.clone(),
            signers.clone(),
            store.clone(),
            wallet.clone(),
            settlement.clone(),
            builder,
        ));

        Self {
            operators,
            registry,
            store,
            chain: Arc::new(MockChain::new()),
            wallet,
            settlement,
            signers,
            keys,
            nonces,
            orchestrator,
        }
    }

    /// Registers a burn of `amount` sats whose single-spend output is
    /// `utxo(single_spend_seed, _)`.
    pub async fn register_burn(&self, tx: TxHash, amount: u64, single_spend_seed: u8) -> BurnEvent {
        let user = SecretKey::new(&mut thread_rng());
        let burn = BurnEvent {
            burner: Address::repeat_byte(0x0b),
            amount,
            destination: p2wpkh_from_public_key(
                &PublicKey::from_secret_key(&SECP, &user).serialize(),
                Network::Regtest,
            )
            .unwrap(),
            single_spend_txid: utxo(single_spend_seed, 0).txid,
        };
        self.settlement.insert(tx, burn.clone()).await;
        burn
    }

    /// Stores a transfer and walks it to `status`.
    pub async fn seed_transfer(&self, tx: TxHash, to: Address, value: U256, status: TransferStatus) {
        self.store
            .insert_transfers(&[Transfer::pending(
                CHAIN_ID,
                tx,
                Address::repeat_byte(0xee),
                to,
                value,
                100,
            )])
            .await
            .unwrap();

        let path: &[TransferStatus] = match status {
            TransferStatus::Pending => &[],
            TransferStatus::Finalized | TransferStatus::Reorg => &[status],
            TransferStatus::Verified | TransferStatus::Rejected => {
                &[TransferStatus::Finalized, status]
            }
        };
        let mut current = TransferStatus::Pending;
        for next in path {
            assert!(self
                .store
                .transition(CHAIN_ID, tx, current, *next)
                .await
                .unwrap());
            current = *next;
        }
    }

    pub async fn status(&self, tx: TxHash) -> TransferStatus {
        self.store
            .get_transfer(CHAIN_ID, tx)
            .await
            .unwrap()
            .unwrap()
            .status
    }
}
