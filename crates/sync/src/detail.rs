//! Full state of one token, kept current while it is being viewed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::{Address, TxHash, U256};
use alloy::rpc::types::Log;
use deployer_chain::{
    ChainClient, ContractBinding, FactoryToken, SupplyEvent, TokenEvent, decode_supply_log, read,
};
use deployer_core::AppError;
use deployer_core::units::format_amount;
use serde::Serialize;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use crate::network::Network;
use crate::records::{Capability, DecimalsCache, TokenReads, TokenRecord};
use crate::subscriptions::{Subscription, SubscriptionHandle, SubscriptionManager};
use crate::transaction::{TransactionController, TransactionState, TxError};
use crate::validation::WriteCall;

/// One token as shown on its detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenDetail {
    pub record: TokenRecord,
    pub owner: Address,
    pub raw_total_supply: U256,
    pub raw_balance: Option<U256>,
}

/// Read everything about `token` at once. Fails if any single read fails.
pub async fn fetch_token_detail(
    client: &dyn ChainClient,
    decimals: &DecimalsCache,
    binding: &ContractBinding,
    token: Address,
    account: Option<Address>,
) -> Result<TokenDetail, AppError> {
    let (reads, owner) = tokio::try_join!(
        TokenReads::fetch(client, decimals, binding.chain_id(), token, account),
        read(client, token, FactoryToken::ownerCall {}),
    )?;
    Ok(TokenDetail {
        record: reads.to_record()?,
        owner,
        raw_total_supply: reads.total_supply,
        raw_balance: reads.balance,
    })
}

struct Viewed {
    network: Network,
    token: Address,
    _subscriptions: Vec<SubscriptionHandle>,
    resync: JoinHandle<()>,
}

impl Drop for Viewed {
    fn drop(&mut self) {
        self.resync.abort();
    }
}

/// Progress of a write made through the view, keyed by its hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalWrite {
    /// Submitted; neither its log nor its outcome has arrived.
    InFlight,
    /// Its supply log arrived first and was skipped.
    Logged,
    /// Confirmed and resynced; its log is still to be skipped.
    Settled,
}

/// Detail view of a single token.
///
/// `Minted`/`Burned` subscriptions are tied to the viewed token, not to its
/// numbers: they are set up when the token changes and live until another
/// token is loaded or the view is closed.
///
/// Writes made through the view resync once their receipt is in. Supply
/// events carrying the hash of such a write are skipped, so every change is
/// picked up by exactly one path. When the outcome stays unknown (receipt
/// timeout, node error), the change falls back to whichever path has not
/// consumed it yet.
pub struct TokenDetailView {
    tx: Arc<TransactionController>,
    subscriptions: Arc<SubscriptionManager>,
    decimals: Arc<DecimalsCache>,
    viewed: Mutex<Option<Viewed>>,
    generation: AtomicU64,
    local_writes: Arc<Mutex<HashMap<TxHash, LocalWrite>>>,
    detail: watch::Sender<Option<TokenDetail>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TokenDetailView {
    pub fn new(
        tx: Arc<TransactionController>,
        subscriptions: Arc<SubscriptionManager>,
        decimals: Arc<DecimalsCache>,
    ) -> Self {
        Self {
            tx,
            subscriptions,
            decimals,
            viewed: Mutex::new(None),
            generation: AtomicU64::new(0),
            local_writes: Arc::new(Mutex::new(HashMap::new())),
            detail: watch::Sender::new(None),
        }
    }

    /// Latest published detail, `None` until a load completes.
    pub fn detail(&self) -> Option<TokenDetail> {
        self.detail.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<TokenDetail>> {
        self.detail.subscribe()
    }

    /// Address of the token being viewed.
    pub fn token(&self) -> Option<Address> {
        lock(&self.viewed).as_ref().map(|v| v.token)
    }

    /// View `token` on `network` and publish its full state.
    ///
    /// Loading the token already on view re-reads it without touching the
    /// subscriptions.
    pub async fn load(self: &Arc<Self>, network: &Network, token: Address) -> Result<TokenDetail, AppError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let chain_id = network.chain_id();

        let same_token = lock(&self.viewed)
            .as_ref()
            .is_some_and(|v| v.token == token && v.network.chain_id() == chain_id);
        if !same_token {
            let previous = lock(&self.viewed).take();
            drop(previous);
            lock(&self.local_writes).clear();
            self.detail.send_replace(None);

            let viewed = self.watch_supply(network, token).await?;
            let mut slot = lock(&self.viewed);
            if self.generation.load(Ordering::SeqCst) != generation {
                return Err(AppError::Stale(format!("load of {token} superseded")));
            }
            *slot = Some(viewed);
        }

        let detail = fetch_token_detail(
            network.client.as_ref(),
            &self.decimals,
            &network.binding,
            token,
            network.account(),
        )
        .await?;

        let _viewed = lock(&self.viewed);
        if self.generation.load(Ordering::SeqCst) != generation {
            return Err(AppError::Stale(format!("load of {token} superseded")));
        }
        self.detail.send_replace(Some(detail.clone()));
        tracing::info!(chain_id, %token, symbol = %detail.record.symbol, "Token loaded");
        Ok(detail)
    }

    async fn watch_supply(self: &Arc<Self>, network: &Network, token: Address) -> Result<Viewed, AppError> {
        let chain_id = network.chain_id();
        let notify = Arc::new(Notify::new());

        let mut handles = Vec::with_capacity(TokenEvent::ALL.len());
        for event in TokenEvent::ALL {
            let subscription = Subscription::token_event(&network.binding, token, event);
            let on_batch = {
                let notify = notify.clone();
                let decimals = self.decimals.clone();
                let local_writes = self.local_writes.clone();
                move |logs: Vec<Log>| {
                    let mut local = lock(&local_writes);
                    let mut foreign = false;
                    for supply in logs.iter().filter_map(decode_supply_log) {
                        if let Some(hash) = supply.transaction_hash() {
                            match local.get(&hash).copied() {
                                Some(LocalWrite::Settled) => {
                                    local.remove(&hash);
                                    continue;
                                }
                                Some(_) => {
                                    local.insert(hash, LocalWrite::Logged);
                                    continue;
                                }
                                None => {}
                            }
                        }
                        foreign = true;
                        log_supply_event(&supply, decimals.get(chain_id, token));
                    }
                    if foreign {
                        notify.notify_one();
                    }
                }
            };
            let handle = self
                .subscriptions
                .subscribe(network.client.clone(), subscription, None, on_batch)
                .await?;
            handles.push(handle);
        }

        let view = Arc::downgrade(self);
        let resync = tokio::spawn(async move {
            loop {
                notify.notified().await;
                let Some(view) = view.upgrade() else {
                    break;
                };
                if let Err(e) = view.resync().await {
                    tracing::warn!(%token, error = %e, "Resync after supply event failed");
                }
            }
        });

        Ok(Viewed {
            network: network.clone(),
            token,
            _subscriptions: handles,
            resync,
        })
    }

    /// Re-read supply and balance of the viewed token.
    ///
    /// Returns `None` if nothing is loaded or the view moved on meanwhile.
    pub async fn resync(&self) -> Result<Option<TokenDetail>, AppError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let Some(network) = lock(&self.viewed).as_ref().map(|v| v.network.clone()) else {
            return Ok(None);
        };
        let Some(current) = self.detail() else {
            return Ok(None);
        };
        let token = current.record.address;
        let client = network.client.as_ref();
        let account = network.account();

        let balance = async {
            match account {
                Some(account) => network.binding.balance_of(client, token, account).await.map(Some),
                None => Ok(None),
            }
        };
        let (supply, balance) =
            tokio::try_join!(network.binding.total_supply(client, token), balance)?;

        let decimals = current.record.decimals;
        let mut next = current;
        next.raw_total_supply = supply;
        next.raw_balance = balance;
        next.record.total_supply = format_amount(supply, decimals)?;
        next.record.owner_balance = balance.map(|b| format_amount(b, decimals)).transpose()?;

        let _viewed = lock(&self.viewed);
        if self.generation.load(Ordering::SeqCst) != generation {
            return Ok(None);
        }
        self.detail.send_replace(Some(next.clone()));
        tracing::debug!(%token, total_supply = %next.record.total_supply, "Token resynced");
        Ok(Some(next))
    }

    /// Mint `amount` (in whole-token units) of the viewed token to `to`.
    pub async fn mint(&self, to: Address, amount: &str) -> Result<TransactionState, AppError> {
        let (network, detail) = self.current()?;
        detail.record.capabilities().require(Capability::Mint)?;
        let call = WriteCall::mint(detail.record.address, to, amount, detail.record.decimals)?;
        self.write(&network, call).await
    }

    /// Burn `amount` (in whole-token units) of the viewed token from the connected account.
    pub async fn burn(&self, amount: &str) -> Result<TransactionState, AppError> {
        let (network, detail) = self.current()?;
        detail.record.capabilities().require(Capability::Burn)?;
        let call = WriteCall::burn(detail.record.address, amount, detail.record.decimals)?;
        self.write(&network, call).await
    }

    fn current(&self) -> Result<(Network, TokenDetail), AppError> {
        let network = lock(&self.viewed)
            .as_ref()
            .map(|v| v.network.clone())
            .ok_or_else(|| AppError::validation("no token loaded"))?;
        let detail = self
            .detail()
            .ok_or_else(|| AppError::validation("token is still loading"))?;
        Ok((network, detail))
    }

    async fn write(&self, network: &Network, call: WriteCall) -> Result<TransactionState, AppError> {
        let pending = self.tx.submit(&network.binding, call).await?;
        let hash = pending.hash;
        lock(&self.local_writes).insert(hash, LocalWrite::InFlight);

        let outcome = self.tx.confirm(pending).await;
        if self.settle(hash, outcome.as_ref().ok()) {
            self.resync().await?;
        }
        outcome
    }

    /// Record how the write `hash` ended. Returns true if the caller must resync.
    fn settle(&self, hash: TxHash, outcome: Option<&TransactionState>) -> bool {
        let mut local = lock(&self.local_writes);
        let logged = local.remove(&hash) == Some(LocalWrite::Logged);
        match outcome {
            Some(TransactionState::Confirmed { .. }) => {
                if !logged {
                    local.insert(hash, LocalWrite::Settled);
                }
                true
            }
            Some(TransactionState::Failed {
                error: TxError::Reverted,
                ..
            }) => false,
            // Unknown outcome: a log not yet delivered now counts as foreign.
            _ => logged,
        }
    }

    /// Stop viewing: dispose the subscriptions and clear the detail.
    pub fn close(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let previous = lock(&self.viewed).take();
        if let Some(viewed) = &previous {
            tracing::debug!(token = %viewed.token, "Closing token view");
        }
        drop(previous);
        lock(&self.local_writes).clear();
        self.detail.send_replace(None);
    }
}

fn log_supply_event(event: &SupplyEvent, decimals: Option<u8>) {
    let amount = decimals
        .and_then(|d| format_amount(event.amount(), d).ok())
        .unwrap_or_else(|| event.amount().to_string());
    match event {
        SupplyEvent::Minted { token, to, .. } => {
            tracing::info!(%token, %to, %amount, "Tokens minted");
        }
        SupplyEvent::Burned { token, from, .. } => {
            tracing::info!(%token, %from, %amount, "Tokens burned");
        }
    }
}
