//! The active network and everything bound to it.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use alloy::primitives::Address;
use deployer_chain::{
    ChainClient, ChainConfig, ChainRegistry, Disconnected, LocalWallet, RpcChainClient, Wallet,
};
use deployer_core::{AppError, Settings};

use crate::detail::{TokenDetail, TokenDetailView};
use crate::network::Network;
use crate::owned::{DeploymentWatch, OwnedTokenSet, RefreshOutcome};
use crate::records::DecimalsCache;
use crate::subscriptions::SubscriptionManager;
use crate::transaction::{LifecycleConfig, TransactionController, TransactionState};
use crate::validation::WriteCall;

/// Opens a read client and a wallet for a chain.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        chain: &ChainConfig,
    ) -> Result<(Arc<dyn ChainClient>, Arc<dyn Wallet>), AppError>;
}

/// [`Connector`] over JSON-RPC, signing with an optional local key.
#[derive(Clone)]
pub struct RpcConnector {
    poll_interval: Duration,
    receipt_timeout: Duration,
    private_key: Option<String>,
}

impl RpcConnector {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            receipt_timeout: settings.receipt_timeout(),
            private_key: settings.private_key.clone(),
        }
    }
}

impl Connector for RpcConnector {
    fn connect(
        &self,
        chain: &ChainConfig,
    ) -> Result<(Arc<dyn ChainClient>, Arc<dyn Wallet>), AppError> {
        let client: Arc<dyn ChainClient> = Arc::new(RpcChainClient::connect(
            &chain.rpc_url,
            self.poll_interval,
            self.receipt_timeout,
        )?);
        let wallet: Arc<dyn Wallet> = match &self.private_key {
            Some(key) => Arc::new(LocalWallet::from_private_key(&chain.rpc_url, key)?),
            None => Arc::new(Disconnected),
        };
        Ok((client, wallet))
    }
}

/// One user session: the selected network plus the controller and views
/// that depend on it.
///
/// Switching networks tears down every subscription, drops any in-flight
/// transaction, and clears both views before the new network is used.
pub struct Session {
    registry: &'static ChainRegistry,
    connector: Box<dyn Connector>,
    subscriptions: Arc<SubscriptionManager>,
    tx: Arc<TransactionController>,
    owned: Arc<OwnedTokenSet>,
    detail: Arc<TokenDetailView>,
    network: Mutex<Option<Network>>,
    deployments: Mutex<Option<DeploymentWatch>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Session {
    pub fn new(
        registry: &'static ChainRegistry,
        connector: impl Connector + 'static,
        config: LifecycleConfig,
    ) -> Self {
        let decimals = Arc::new(DecimalsCache::new());
        let subscriptions = Arc::new(SubscriptionManager::new(config.poll_interval));
        let tx = Arc::new(TransactionController::new(config));
        let owned = Arc::new(OwnedTokenSet::new(decimals.clone()));
        let detail = Arc::new(TokenDetailView::new(
            tx.clone(),
            subscriptions.clone(),
            decimals,
        ));
        Self {
            registry,
            connector: Box::new(connector),
            subscriptions,
            tx,
            owned,
            detail,
            network: Mutex::new(None),
            deployments: Mutex::new(None),
        }
    }

    /// Make `chain_id` the active network.
    ///
    /// State bound to the previous network is discarded first, so on error
    /// the session is left disconnected.
    pub fn switch_network(&self, chain_id: u64) -> Result<Network, AppError> {
        self.disconnect();

        let binding = self.registry.resolve(chain_id)?;
        let (client, wallet) = self.connector.connect(binding.chain())?;
        let network = Network::new(binding, client, wallet);

        self.tx.reset_for_network(Some(network.clone()));
        self.owned
            .switch_context(Some(network.clone()), network.account());
        *lock(&self.network) = Some(network.clone());

        tracing::info!(
            chain_id,
            name = %network.binding.chain().name,
            account = ?network.account(),
            "Switched network"
        );
        Ok(network)
    }

    /// Drop the active network and everything bound to it.
    pub fn disconnect(&self) {
        let deployments = lock(&self.deployments).take();
        drop(deployments);
        self.detail.close();
        self.subscriptions.dispose_all();
        self.tx.reset_for_network(None);
        self.owned.switch_context(None, None);
        *lock(&self.network) = None;
    }

    pub fn network(&self) -> Option<Network> {
        lock(&self.network).clone()
    }

    fn require_network(&self) -> Result<Network, AppError> {
        self.network().ok_or(AppError::NotConnected)
    }

    pub fn registry(&self) -> &'static ChainRegistry {
        self.registry
    }

    pub fn transactions(&self) -> &Arc<TransactionController> {
        &self.tx
    }

    pub fn owned_tokens(&self) -> &Arc<OwnedTokenSet> {
        &self.owned
    }

    pub fn token_detail(&self) -> &Arc<TokenDetailView> {
        &self.detail
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub async fn refresh_owned(&self) -> Result<RefreshOutcome, AppError> {
        self.owned.refresh().await
    }

    /// Keep the owned-token list following new deployments until the next switch.
    pub async fn follow_deployments(&self) -> Result<(), AppError> {
        let watch = self.owned.follow_deployments(&self.subscriptions).await?;
        *lock(&self.deployments) = Some(watch);
        Ok(())
    }

    pub async fn load_token(&self, token: Address) -> Result<TokenDetail, AppError> {
        let network = self.require_network()?;
        self.detail.load(&network, token).await
    }

    /// Deploy a new token through the factory.
    ///
    /// The owned-token list picks it up from the `TokenDeployed` event when
    /// [`follow_deployments`](Self::follow_deployments) is active.
    pub async fn submit_create_token(
        &self,
        name: &str,
        symbol: &str,
        decimals: i64,
        initial_supply: &str,
        mintable: bool,
    ) -> Result<TransactionState, AppError> {
        let call = WriteCall::create_token(name, symbol, decimals, initial_supply, mintable)?;
        let network = self.require_network()?;
        self.tx.execute(&network.binding, call).await
    }

    /// Mint `amount` of `token` to `to`, loading `token` into the detail view first if needed.
    pub async fn submit_mint(
        &self,
        token: Address,
        to: Address,
        amount: &str,
    ) -> Result<TransactionState, AppError> {
        self.ensure_loaded(token).await?;
        self.detail.mint(to, amount).await
    }

    pub async fn submit_burn(&self, token: Address, amount: &str) -> Result<TransactionState, AppError> {
        self.ensure_loaded(token).await?;
        self.detail.burn(amount).await
    }

    async fn ensure_loaded(&self, token: Address) -> Result<(), AppError> {
        let loaded = self.detail.token() == Some(token) && self.detail.detail().is_some();
        if !loaded {
            self.load_token(token).await?;
        }
        Ok(())
    }
}
