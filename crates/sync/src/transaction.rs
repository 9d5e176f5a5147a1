//! Lifecycle of a single user-initiated write.
//!
//! ```text
//! Idle ──submit──▶ Submitted ──seen──▶ Confirming ──receipt──▶ Confirmed
//!   │                  │                    │
//!   └──────────────────┴────────────────────┴──▶ Failed
//! ```
//!
//! Terminal states return to `Idle` on `reset`, when a new action starts, or
//! when the active network changes. A network change also invalidates every
//! in-flight driver: its later results are dropped, never applied.

use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use alloy::primitives::TxHash;
use deployer_chain::{ContractBinding, TxReceipt};
use deployer_core::{AppError, Settings};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::network::Network;
use crate::validation::WriteCall;

/// Why a transaction ended in [`TransactionState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    /// The user declined to sign.
    WalletRejected(String),
    /// Node, network or timeout failure.
    Rpc(String),
    /// Mined, but execution reverted.
    Reverted,
}

impl fmt::Display for TxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WalletRejected(msg) => write!(f, "wallet rejected the request: {msg}"),
            Self::Rpc(msg) => write!(f, "rpc error: {msg}"),
            Self::Reverted => f.write_str("transaction reverted"),
        }
    }
}

impl From<&AppError> for TxError {
    fn from(err: &AppError) -> Self {
        let non_empty = |msg: &str, fallback: &str| {
            if msg.trim().is_empty() {
                fallback.to_string()
            } else {
                msg.to_string()
            }
        };
        match err {
            AppError::WalletRejected(msg) => {
                Self::WalletRejected(non_empty(msg, "user declined to sign"))
            }
            AppError::Reverted(_) => Self::Reverted,
            AppError::Rpc(msg) => Self::Rpc(non_empty(msg, "unknown rpc failure")),
            other => Self::Rpc(other.to_string()),
        }
    }
}

/// Observable state of the current user action.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    Idle,
    Submitted {
        hash: TxHash,
    },
    Confirming {
        hash: TxHash,
    },
    Confirmed {
        hash: TxHash,
        receipt: TxReceipt,
    },
    Failed {
        hash: Option<TxHash>,
        error: TxError,
    },
}

impl TransactionState {
    /// `Submitted` or `Confirming`.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Submitted { .. } | Self::Confirming { .. })
    }

    /// `Confirmed` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed { .. } | Self::Failed { .. })
    }

    pub fn hash(&self) -> Option<TxHash> {
        match self {
            Self::Idle => None,
            Self::Submitted { hash } | Self::Confirming { hash } | Self::Confirmed { hash, .. } => {
                Some(*hash)
            }
            Self::Failed { hash, .. } => *hash,
        }
    }
}

/// Timing knobs for confirmation tracking.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleConfig {
    pub poll_interval: Duration,
    /// How long a submitted hash may stay unknown to the node.
    pub pending_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            pending_timeout: Duration::from_secs(120),
        }
    }
}

impl From<&Settings> for LifecycleConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            pending_timeout: settings.receipt_timeout(),
        }
    }
}

/// A submitted transaction awaiting [`TransactionController::confirm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTx {
    pub hash: TxHash,
    epoch: u64,
}

struct Lifecycle {
    /// Bumped on every network change; drivers from older epochs are stale.
    epoch: u64,
    /// Waiting on the wallet; no hash yet.
    signing: bool,
    network: Option<Network>,
}

/// Clears the signing flag if a submit is dropped while the wallet is busy.
struct SigningGuard<'a> {
    controller: &'a TransactionController,
    epoch: u64,
    active: bool,
}

impl Drop for SigningGuard<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let mut inner = self.controller.lock();
        if inner.epoch == self.epoch {
            tracing::debug!("Submit abandoned while awaiting signature");
            inner.signing = false;
        }
    }
}

/// Owns the one [`TransactionState`] of the session.
pub struct TransactionController {
    config: LifecycleConfig,
    inner: Mutex<Lifecycle>,
    state: watch::Sender<TransactionState>,
}

impl TransactionController {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Lifecycle {
                epoch: 0,
                signing: false,
                network: None,
            }),
            state: watch::Sender::new(TransactionState::Idle),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> watch::Receiver<TransactionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> TransactionState {
        self.state.borrow().clone()
    }

    /// Switch to `network` (or to none), dropping whatever was in flight.
    pub fn reset_for_network(&self, network: Option<Network>) {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.signing = false;
        let dropped = self.state.send_replace(TransactionState::Idle);
        if dropped.is_pending() {
            tracing::warn!(hash = ?dropped.hash(), "Dropping pending transaction on network change");
        }
        inner.network = network;
    }

    /// Return a terminal state to `Idle`. Refused while a transaction is pending.
    pub fn reset(&self) -> bool {
        let inner = self.lock();
        if inner.signing || self.state.borrow().is_pending() {
            return false;
        }
        self.state.send_replace(TransactionState::Idle);
        true
    }

    /// Validate `call`, have the wallet sign it, and move to `Submitted`.
    pub async fn submit(
        &self,
        binding: &ContractBinding,
        call: WriteCall,
    ) -> Result<PendingTx, AppError> {
        call.validate()?;

        let (network, epoch) = {
            let mut inner = self.lock();
            let network = inner.network.clone().ok_or(AppError::NotConnected)?;
            if network.chain_id() != binding.chain_id() {
                return Err(AppError::Stale(format!(
                    "binding for chain {} but chain {} is active",
                    binding.chain_id(),
                    network.chain_id()
                )));
            }
            if network.account().is_none() {
                return Err(AppError::NotConnected);
            }
            let busy = inner.signing || self.state.borrow().is_pending();
            if busy {
                return Err(AppError::AlreadyInFlight);
            }
            inner.signing = true;
            self.state.send_if_modified(|state| {
                let finished = state.is_terminal();
                if finished {
                    *state = TransactionState::Idle;
                }
                finished
            });
            (network, inner.epoch)
        };

        let mut signing = SigningGuard {
            controller: self,
            epoch,
            active: true,
        };

        let target = call.target(binding);
        tracing::info!(
            function = call.function_name(),
            chain_id = binding.chain_id(),
            %target,
            "Submitting transaction"
        );
        let result = network
            .wallet
            .send_transaction(target, call.calldata(binding))
            .await;

        let mut inner = self.lock();
        signing.active = false;
        if inner.epoch != epoch {
            return Err(AppError::Stale(
                "network changed while awaiting signature".into(),
            ));
        }
        inner.signing = false;
        match result {
            Ok(hash) => {
                tracing::info!(%hash, function = call.function_name(), "Transaction submitted");
                self.state.send_replace(TransactionState::Submitted { hash });
                Ok(PendingTx { hash, epoch })
            }
            Err(e) => {
                tracing::warn!(error = %e, function = call.function_name(), "Submission failed");
                self.state.send_replace(TransactionState::Failed {
                    hash: None,
                    error: TxError::from(&e),
                });
                Err(e)
            }
        }
    }

    /// Follow a submitted transaction to `Confirmed` or `Failed`.
    ///
    /// Returns the terminal state, or [`AppError::Stale`] if the network
    /// changed meanwhile (nothing is published in that case).
    pub async fn confirm(&self, pending: PendingTx) -> Result<TransactionState, AppError> {
        let PendingTx { hash, epoch } = pending;
        let network = self.network_for(epoch)?;

        let deadline = Instant::now() + self.config.pending_timeout;
        loop {
            match network.client.transaction_seen(hash).await {
                Ok(true) => break,
                Ok(false) if Instant::now() < deadline => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Ok(false) => {
                    let error = TxError::Rpc(format!(
                        "transaction not seen by the node after {}s",
                        self.config.pending_timeout.as_secs()
                    ));
                    return self.finish(epoch, TransactionState::Failed { hash: Some(hash), error });
                }
                Err(e) => {
                    let error = TxError::from(&e);
                    return self.finish(epoch, TransactionState::Failed { hash: Some(hash), error });
                }
            }
            self.network_for(epoch)?;
        }

        self.publish(epoch, TransactionState::Confirming { hash })?;
        tracing::info!(%hash, "Transaction pending, waiting for receipt");

        let outcome = match network.client.wait_for_receipt(hash).await {
            Ok(receipt) if receipt.success => TransactionState::Confirmed { hash, receipt },
            Ok(receipt) => {
                tracing::warn!(%hash, block = ?receipt.block_number, "Transaction reverted");
                TransactionState::Failed {
                    hash: Some(hash),
                    error: TxError::Reverted,
                }
            }
            Err(e) => TransactionState::Failed {
                hash: Some(hash),
                error: TxError::from(&e),
            },
        };
        self.finish(epoch, outcome)
    }

    /// [`submit`](Self::submit) followed by [`confirm`](Self::confirm).
    pub async fn execute(
        &self,
        binding: &ContractBinding,
        call: WriteCall,
    ) -> Result<TransactionState, AppError> {
        let pending = self.submit(binding, call).await?;
        self.confirm(pending).await
    }

    fn network_for(&self, epoch: u64) -> Result<Network, AppError> {
        let inner = self.lock();
        match &inner.network {
            Some(network) if inner.epoch == epoch => Ok(network.clone()),
            _ => Err(AppError::Stale("network changed while confirming".into())),
        }
    }

    fn publish(&self, epoch: u64, next: TransactionState) -> Result<(), AppError> {
        let inner = self.lock();
        if inner.epoch != epoch {
            return Err(AppError::Stale("network changed while confirming".into()));
        }
        self.state.send_replace(next);
        Ok(())
    }

    fn finish(&self, epoch: u64, outcome: TransactionState) -> Result<TransactionState, AppError> {
        self.publish(epoch, outcome.clone())?;
        match &outcome {
            TransactionState::Confirmed { hash, receipt } => {
                tracing::info!(%hash, block = ?receipt.block_number, gas_used = receipt.gas_used, "Transaction confirmed");
            }
            TransactionState::Failed { hash, error } => {
                tracing::warn!(hash = ?hash, %error, "Transaction failed");
            }
            _ => {}
        }
        Ok(outcome)
    }
}
