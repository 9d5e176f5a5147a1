//! The connected account's tokens on the active chain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::Address;
use alloy::rpc::types::Log;
use deployer_core::AppError;
use futures::future::try_join_all;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use crate::network::Network;
use crate::records::{DecimalsCache, TokenReads, TokenRecord};
use crate::subscriptions::{Subscription, SubscriptionHandle, SubscriptionManager};

/// What a refresh did with its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The collection was replaced with this many records.
    Published(usize),
    /// The context changed or a newer refresh started; nothing was published.
    Discarded,
}

#[derive(Clone)]
struct OwnerContext {
    network: Network,
    owner: Address,
}

/// Collection of [`TokenRecord`]s deployed by one owner through the factory.
///
/// The collection is always replaced whole; readers never see a mix of two
/// refreshes, or records from a previous chain or account.
pub struct OwnedTokenSet {
    decimals: Arc<DecimalsCache>,
    context: Mutex<Option<OwnerContext>>,
    generation: AtomicU64,
    records: watch::Sender<Arc<Vec<TokenRecord>>>,
}

impl OwnedTokenSet {
    pub fn new(decimals: Arc<DecimalsCache>) -> Self {
        Self {
            decimals,
            context: Mutex::new(None),
            generation: AtomicU64::new(0),
            records: watch::Sender::new(Arc::new(Vec::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<OwnerContext>> {
        self.context.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Point the view at `owner` on `network`, clearing the current records.
    ///
    /// Either being `None` leaves the view empty until the next switch.
    pub fn switch_context(&self, network: Option<Network>, owner: Option<Address>) {
        let mut context = self.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        *context = network
            .zip(owner)
            .map(|(network, owner)| OwnerContext { network, owner });
        self.records.send_replace(Arc::new(Vec::new()));
    }

    pub fn owner(&self) -> Option<Address> {
        self.lock().as_ref().map(|ctx| ctx.owner)
    }

    /// Current snapshot.
    pub fn records(&self) -> Arc<Vec<TokenRecord>> {
        self.records.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<TokenRecord>>> {
        self.records.subscribe()
    }

    /// Re-read the owner's tokens and replace the collection.
    ///
    /// Any failing read fails the whole refresh and the previous collection
    /// stays in place.
    pub async fn refresh(&self) -> Result<RefreshOutcome, AppError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let OwnerContext { network, owner } = self.lock().clone().ok_or(AppError::NotConnected)?;
        let chain_id = network.chain_id();
        let result = self.load(&network, owner).await;

        let _context = self.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(chain_id, %owner, "Discarding superseded token refresh");
            return Ok(RefreshOutcome::Discarded);
        }
        let records = result.inspect_err(|e| {
            tracing::warn!(chain_id, %owner, error = %e, "Token refresh failed, keeping previous records");
        })?;
        let count = records.len();
        self.records.send_replace(Arc::new(records));
        tracing::info!(chain_id, %owner, count, "Owned tokens refreshed");
        Ok(RefreshOutcome::Published(count))
    }

    async fn load(&self, network: &Network, owner: Address) -> Result<Vec<TokenRecord>, AppError> {
        let client = network.client.as_ref();
        let chain_id = network.chain_id();
        let tokens = network.binding.owner_tokens(client, owner).await?;
        let reads = try_join_all(tokens.into_iter().map(|token| {
            TokenReads::fetch(client, &self.decimals, chain_id, token, Some(owner))
        }))
        .await?;
        reads.iter().map(TokenReads::to_record).collect()
    }

    /// Refresh whenever the factory reports a deployment by the current owner.
    ///
    /// One refresh runs as soon as the subscription is in place, so a
    /// deployment landing before it is never missed. Notifications are
    /// coalesced: one batch of logs, or several batches arriving during a
    /// refresh, cause a single follow-up refresh.
    pub async fn follow_deployments(
        self: &Arc<Self>,
        subscriptions: &SubscriptionManager,
    ) -> Result<DeploymentWatch, AppError> {
        let OwnerContext { network, owner } = self.lock().clone().ok_or(AppError::NotConnected)?;
        let notify = Arc::new(Notify::new());

        let subscription = Subscription::token_deployed(&network.binding, Some(owner));
        let handle = subscriptions
            .subscribe(network.client.clone(), subscription, None, {
                let notify = notify.clone();
                move |logs: Vec<Log>| {
                    tracing::debug!(%owner, count = logs.len(), "TokenDeployed batch");
                    notify.notify_one();
                }
            })
            .await?;
        notify.notify_one();

        let view = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                notify.notified().await;
                let Some(view) = view.upgrade() else {
                    break;
                };
                if let Err(e) = view.refresh().await {
                    tracing::warn!(error = %e, "Refresh after deployment failed");
                }
            }
        });

        Ok(DeploymentWatch {
            _subscription: handle,
            task,
        })
    }
}

/// Keeps an [`OwnedTokenSet`] following `TokenDeployed`. Stops when dropped.
pub struct DeploymentWatch {
    _subscription: SubscriptionHandle,
    task: JoinHandle<()>,
}

impl Drop for DeploymentWatch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy::primitives::U256;
    use alloy::sol_types::SolEvent;
    use deployer_chain::ERC20Factory;

    use super::*;
    use crate::testing::{MockChain, MockToken, OTHER, OWNER, TESTNET, network};

    fn view(mock: &Arc<MockChain>, owner: Address) -> Arc<OwnedTokenSet> {
        let set = OwnedTokenSet::new(Arc::new(DecimalsCache::new()));
        set.switch_context(Some(network(mock)), Some(owner));
        Arc::new(set)
    }

    fn units(amount: u64, decimals: u8) -> U256 {
        U256::from(amount) * U256::from(10u64).pow(U256::from(decimals))
    }

    #[tokio::test]
    async fn owner_without_tokens_gets_an_empty_collection() {
        let mock = MockChain::new(TESTNET);
        let set = view(&mock, OWNER);

        assert_eq!(set.refresh().await.unwrap(), RefreshOutcome::Published(0));
        assert!(set.records().is_empty());
        assert_eq!(mock.calls("getOwnerTokens"), 1);
    }

    #[tokio::test]
    async fn records_follow_factory_order_with_capabilities() {
        let mock = MockChain::new(TESTNET);
        let t1 = mock.add_token(OWNER, MockToken::new("T1", 18, OWNER, units(1000, 18)).mintable());
        let t2 = mock.add_token(OWNER, MockToken::new("T2", 6, OWNER, units(50, 6)).burnable());
        mock.add_token(OTHER, MockToken::new("T3", 18, OTHER, U256::ZERO));
        let set = view(&mock, OWNER);

        assert_eq!(set.refresh().await.unwrap(), RefreshOutcome::Published(2));
        let records = set.records();
        assert_eq!(records.iter().map(|r| r.address).collect::<Vec<_>>(), vec![t1, t2]);

        assert_eq!(records[0].symbol, "T1");
        assert!(records[0].mintable && !records[0].burnable);
        assert_eq!(records[0].total_supply, "1000");
        assert_eq!(records[0].owner_balance.as_deref(), Some("1000"));

        assert_eq!(records[1].decimals, 6);
        assert!(!records[1].mintable && records[1].burnable);
        assert_eq!(records[1].total_supply, "50");
    }

    #[tokio::test]
    async fn failed_read_keeps_previous_records() {
        let mock = MockChain::new(TESTNET);
        let t1 = mock.add_token(OWNER, MockToken::new("T1", 18, OWNER, U256::ZERO));
        let set = view(&mock, OWNER);
        set.refresh().await.unwrap();
        let before = set.records();

        let t2 = mock.add_token(OWNER, MockToken::new("T2", 18, OWNER, U256::ZERO));
        mock.fail_reads_for(t2);
        assert!(set.refresh().await.is_err());
        assert_eq!(set.records(), before);
        assert_eq!(set.records()[0].address, t1);
    }

    #[tokio::test]
    async fn decimals_are_read_once_per_token() {
        let mock = MockChain::new(TESTNET);
        mock.add_token(OWNER, MockToken::new("T1", 8, OWNER, U256::ZERO));
        let set = view(&mock, OWNER);

        set.refresh().await.unwrap();
        set.refresh().await.unwrap();
        assert_eq!(mock.calls("decimals"), 1);
        assert_eq!(mock.calls("totalSupply"), 2);
    }

    #[tokio::test]
    async fn refresh_without_context_is_refused() {
        let set = OwnedTokenSet::new(Arc::new(DecimalsCache::new()));
        assert!(matches!(set.refresh().await, Err(AppError::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_superseded_by_context_switch_is_discarded() {
        let mock = MockChain::new(TESTNET);
        mock.add_token(OWNER, MockToken::new("T1", 18, OWNER, U256::ZERO));
        mock.slow_reads(Duration::from_millis(100));
        let set = view(&mock, OWNER);

        let refresh = tokio::spawn({
            let set = set.clone();
            async move { set.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        set.switch_context(Some(network(&mock)), Some(OTHER));

        assert_eq!(refresh.await.unwrap().unwrap(), RefreshOutcome::Discarded);
        assert!(set.records().is_empty());
        assert_eq!(set.owner(), Some(OTHER));
    }

    #[tokio::test(start_paused = true)]
    async fn older_refresh_never_overwrites_newer() {
        let mock = MockChain::new(TESTNET);
        mock.add_token(OWNER, MockToken::new("T1", 18, OWNER, U256::ZERO));
        mock.slow_reads(Duration::from_millis(100));
        let set = view(&mock, OWNER);

        let first = tokio::spawn({
            let set = set.clone();
            async move { set.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = set.refresh().await.unwrap();

        assert_eq!(second, RefreshOutcome::Published(1));
        assert_eq!(first.await.unwrap().unwrap(), RefreshOutcome::Discarded);
    }

    #[tokio::test(start_paused = true)]
    async fn one_refresh_per_deployment_batch() {
        let mock = MockChain::new(TESTNET);
        let set = view(&mock, OWNER);
        let subs = SubscriptionManager::new(Duration::from_millis(100));
        let _watch = set.follow_deployments(&subs).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mock.calls("getOwnerTokens"), 1);

        let t1 = mock.add_token(OWNER, MockToken::new("T1", 18, OWNER, U256::ZERO));
        let t2 = mock.add_token(OWNER, MockToken::new("T2", 18, OWNER, U256::ZERO));
        let deployed = |token| {
            let event = ERC20Factory::TokenDeployed { owner: OWNER, token };
            (mock.factory, event.encode_log_data(), None)
        };
        mock.emit(vec![deployed(t1), deployed(t2)]);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(mock.calls("getOwnerTokens"), 2);
        assert_eq!(set.records().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deployment_before_following_is_not_missed() {
        let mock = MockChain::new(TESTNET);
        let set = view(&mock, OWNER);
        set.refresh().await.unwrap();
        assert!(set.records().is_empty());

        let token = mock.add_token(OWNER, MockToken::new("T1", 18, OWNER, U256::ZERO));
        let event = ERC20Factory::TokenDeployed { owner: OWNER, token };
        mock.emit(vec![(mock.factory, event.encode_log_data(), None)]);

        let subs = SubscriptionManager::new(Duration::from_millis(100));
        let _watch = set.follow_deployments(&subs).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(set.records().iter().map(|r| r.address).collect::<Vec<_>>(), vec![token]);
        assert_eq!(mock.calls("getOwnerTokens"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deployments_by_other_owners_are_ignored() {
        let mock = MockChain::new(TESTNET);
        let set = view(&mock, OWNER);
        let subs = SubscriptionManager::new(Duration::from_millis(100));
        let watch = set.follow_deployments(&subs).await.unwrap();

        let token = mock.add_token(OTHER, MockToken::new("T3", 18, OTHER, U256::ZERO));
        let event = ERC20Factory::TokenDeployed { owner: OTHER, token };
        mock.emit(vec![(mock.factory, event.encode_log_data(), None)]);
        tokio::time::sleep(Duration::from_millis(500)).await;
        // Only the refresh that starts every watch.
        assert_eq!(mock.calls("getOwnerTokens"), 1);

        drop(watch);
        assert!(subs.active_keys().is_empty());
    }
}
