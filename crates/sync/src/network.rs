use std::fmt;
use std::sync::Arc;

use alloy::primitives::Address;
use deployer_chain::{ChainClient, ContractBinding, Wallet};

/// Everything needed to talk to the active network: its binding, a read
/// client, and the connected wallet.
#[derive(Clone)]
pub struct Network {
    pub binding: ContractBinding,
    pub client: Arc<dyn ChainClient>,
    pub wallet: Arc<dyn Wallet>,
}

impl Network {
    pub fn new(
        binding: ContractBinding,
        client: Arc<dyn ChainClient>,
        wallet: Arc<dyn Wallet>,
    ) -> Self {
        Self {
            binding,
            client,
            wallet,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.binding.chain_id()
    }

    /// The connected account, if any.
    pub fn account(&self) -> Option<Address> {
        self.wallet.account()
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("chain_id", &self.chain_id())
            .field("factory", &self.binding.factory_address())
            .field("account", &self.account())
            .finish()
    }
}
