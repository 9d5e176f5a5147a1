use std::time::Duration;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::TransportError;
use async_trait::async_trait;
use deployer_core::AppError;

use crate::client::{ChainClient, TxReceipt, Wallet};

/// EIP-1193 "user rejected request".
const USER_REJECTED_CODE: i64 = 4001;

/// Create a type-erased HTTP provider from an RPC URL string.
pub fn create_provider(rpc_url: &str) -> eyre::Result<DynProvider> {
    let url = rpc_url.parse()?;
    let provider = ProviderBuilder::new().connect_http(url);
    Ok(provider.erased())
}

/// Create a provider that signs with `signer` before submitting.
pub fn create_signing_provider(rpc_url: &str, signer: PrivateKeySigner) -> eyre::Result<DynProvider> {
    let url = rpc_url.parse()?;
    let provider = ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .connect_http(url);
    Ok(provider.erased())
}

fn rpc_error(err: TransportError) -> AppError {
    if let Some(resp) = err.as_error_resp() {
        if resp.code == USER_REJECTED_CODE {
            return AppError::WalletRejected(resp.message.to_string());
        }
    }
    AppError::Rpc(err.to_string())
}

/// [`ChainClient`] backed by a JSON-RPC node.
#[derive(Clone)]
pub struct RpcChainClient {
    provider: DynProvider,
    poll_interval: Duration,
    receipt_timeout: Duration,
}

impl RpcChainClient {
    pub fn new(provider: DynProvider, poll_interval: Duration, receipt_timeout: Duration) -> Self {
        Self {
            provider,
            poll_interval,
            receipt_timeout,
        }
    }

    pub fn connect(
        rpc_url: &str,
        poll_interval: Duration,
        receipt_timeout: Duration,
    ) -> eyre::Result<Self> {
        Ok(Self::new(
            create_provider(rpc_url)?,
            poll_interval,
            receipt_timeout,
        ))
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes, AppError> {
        let tx = TransactionRequest::default().with_to(to).with_input(input);
        self.provider.call(tx).await.map_err(rpc_error)
    }

    async fn block_number(&self) -> Result<u64, AppError> {
        self.provider.get_block_number().await.map_err(rpc_error)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, AppError> {
        self.provider.get_logs(filter).await.map_err(rpc_error)
    }

    async fn transaction_seen(&self, hash: TxHash) -> Result<bool, AppError> {
        let tx = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(rpc_error)?;
        Ok(tx.is_some())
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt, AppError> {
        tokio::time::timeout(self.receipt_timeout, self.poll_receipt(hash))
            .await
            .map_err(|_| {
                AppError::Rpc(format!(
                    "no receipt for {hash} after {}s",
                    self.receipt_timeout.as_secs()
                ))
            })?
    }
}

impl RpcChainClient {
    async fn poll_receipt(&self, hash: TxHash) -> Result<TxReceipt, AppError> {
        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(hash)
                .await
                .map_err(rpc_error)?;
            if let Some(receipt) = receipt {
                return Ok(TxReceipt {
                    transaction_hash: receipt.transaction_hash,
                    block_number: receipt.block_number,
                    gas_used: receipt.gas_used,
                    success: receipt.status(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// [`Wallet`] holding a local private key.
#[derive(Clone)]
pub struct LocalWallet {
    provider: DynProvider,
    account: Address,
}

impl LocalWallet {
    /// Build a wallet from a hex private key, submitting through `rpc_url`.
    pub fn from_private_key(rpc_url: &str, private_key: &str) -> eyre::Result<Self> {
        let signer: PrivateKeySigner = private_key.trim().parse()?;
        let account = signer.address();
        let provider = create_signing_provider(rpc_url, signer)?;
        Ok(Self { provider, account })
    }
}

#[async_trait]
impl Wallet for LocalWallet {
    fn account(&self) -> Option<Address> {
        Some(self.account)
    }

    async fn send_transaction(&self, to: Address, input: Bytes) -> Result<TxHash, AppError> {
        let tx = TransactionRequest::default()
            .with_from(self.account)
            .with_to(to)
            .with_input(input);
        let pending = self.provider.send_transaction(tx).await.map_err(rpc_error)?;
        let hash = *pending.tx_hash();
        tracing::debug!(%hash, %to, "Transaction broadcast");
        Ok(hash)
    }
}

/// A wallet with no connected account; every write is refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disconnected;

#[async_trait]
impl Wallet for Disconnected {
    fn account(&self) -> Option<Address> {
        None
    }

    async fn send_transaction(&self, _to: Address, _input: Bytes) -> Result<TxHash, AppError> {
        Err(AppError::NotConnected)
    }
}
