//! The two external collaborators the sync layer talks to: a read client for
//! chain state and a wallet that can sign and submit writes.

use alloy::primitives::{Address, Bytes, TxHash};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use deployer_core::AppError;
use serde::Serialize;

/// Chain-confirmed outcome of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxReceipt {
    pub transaction_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    /// `false` when the transaction was mined but reverted.
    pub success: bool,
}

/// Read access to one chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Execute an `eth_call` against `to` with ABI-encoded `input`.
    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes, AppError>;

    async fn block_number(&self) -> Result<u64, AppError>;

    /// Logs matching `filter`, in chain order.
    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, AppError>;

    /// Whether the node knows the transaction (pending pool or mined).
    async fn transaction_seen(&self, hash: TxHash) -> Result<bool, AppError>;

    /// Block until the receipt for `hash` is available.
    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt, AppError>;
}

/// A connected account able to sign and broadcast transactions.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// The connected account, if any.
    fn account(&self) -> Option<Address>;

    /// Sign and submit a call to `to`. Fails with [`AppError::WalletRejected`]
    /// when the user declines.
    async fn send_transaction(&self, to: Address, input: Bytes) -> Result<TxHash, AppError>;
}

/// Typed `eth_call`: encode `call`, execute it, decode the return value.
pub async fn read<C>(client: &dyn ChainClient, to: Address, call: C) -> Result<C::Return, AppError>
where
    C: SolCall + Send,
{
    let output = client.call(to, call.abi_encode().into()).await?;
    C::abi_decode_returns(&output)
        .map_err(|e| AppError::Decode(format!("{} on {to}: {e}", C::SIGNATURE)))
}
