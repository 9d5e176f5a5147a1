//! Chain-state synchronisation for factory-deployed tokens: transaction
//! lifecycle, owned-token and token-detail views, and the log subscriptions
//! that keep them current.

pub mod detail;
pub mod network;
pub mod owned;
pub mod records;
pub mod session;
pub mod subscriptions;
pub mod transaction;
pub mod validation;

#[cfg(test)]
mod testing;

pub use detail::{TokenDetail, TokenDetailView, fetch_token_detail};
pub use network::Network;
pub use owned::{DeploymentWatch, OwnedTokenSet, RefreshOutcome};
pub use records::{Capabilities, Capability, DecimalsCache, TokenRecord};
pub use session::{Connector, RpcConnector, Session};
pub use subscriptions::{Subscription, SubscriptionHandle, SubscriptionKey, SubscriptionManager};
pub use transaction::{LifecycleConfig, PendingTx, TransactionController, TransactionState, TxError};
pub use validation::WriteCall;
