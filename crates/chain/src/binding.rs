//! Resolution of the active network id into concrete contract bindings.

use std::fmt;
use std::sync::Arc;

use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::rpc::types::Filter;
use alloy::sol_types::{SolCall, SolEvent};
use deployer_core::AppError;
use serde::Serialize;

use crate::abi::{ERC20Factory, FactoryToken};
use crate::client::{ChainClient, read};
use crate::registry::{ChainConfig, ChainRegistry};

/// Which factory interface a deployment speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FactoryAbi {
    /// `ERC20FactoryModule#ERC20Factory`.
    Erc20Factory,
}

/// Arguments of a factory `createToken` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewToken {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub initial_supply: U256,
    pub mintable: bool,
}

impl FactoryAbi {
    pub fn owner_tokens_call(self, owner: Address) -> Bytes {
        match self {
            Self::Erc20Factory => ERC20Factory::getOwnerTokensCall { owner }.abi_encode().into(),
        }
    }

    pub fn decode_owner_tokens(self, output: &[u8]) -> Result<Vec<Address>, AppError> {
        match self {
            Self::Erc20Factory => ERC20Factory::getOwnerTokensCall::abi_decode_returns(output)
                .map_err(|e| AppError::Decode(format!("getOwnerTokens: {e}"))),
        }
    }

    pub fn create_token_call(self, token: &NewToken) -> Bytes {
        match self {
            Self::Erc20Factory => ERC20Factory::createTokenCall {
                name: token.name.clone(),
                symbol: token.symbol.clone(),
                decimals: token.decimals,
                initialSupply: token.initial_supply,
                mintable: token.mintable,
            }
            .abi_encode()
            .into(),
        }
    }

    /// topic0 of the factory's deployment event.
    pub fn token_deployed_topic(self) -> B256 {
        match self {
            Self::Erc20Factory => ERC20Factory::TokenDeployed::SIGNATURE_HASH,
        }
    }
}

/// Events emitted by a factory token that change its supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenEvent {
    Minted,
    Burned,
}

impl TokenEvent {
    pub const ALL: [TokenEvent; 2] = [TokenEvent::Minted, TokenEvent::Burned];

    pub fn name(self) -> &'static str {
        match self {
            Self::Minted => "Minted",
            Self::Burned => "Burned",
        }
    }

    pub fn topic(self) -> B256 {
        match self {
            Self::Minted => FactoryToken::Minted::SIGNATURE_HASH,
            Self::Burned => FactoryToken::Burned::SIGNATURE_HASH,
        }
    }
}

impl fmt::Display for TokenEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Factory and token ABIs bound to one network.
///
/// Cheap to clone. A binding is only meaningful for the chain it was resolved
/// for; callers re-resolve on every network switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractBinding {
    chain: Arc<ChainConfig>,
}

impl ContractBinding {
    pub fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    pub fn chain_id(&self) -> u64 {
        self.chain.chain_id
    }

    pub fn factory_address(&self) -> Address {
        self.chain.factory_address
    }

    pub fn factory_abi(&self) -> FactoryAbi {
        self.chain.factory_abi
    }

    /// `getOwnerTokens(owner)` on this chain's factory, in factory order.
    pub async fn owner_tokens(
        &self,
        client: &dyn ChainClient,
        owner: Address,
    ) -> Result<Vec<Address>, AppError> {
        let abi = self.factory_abi();
        let output = client
            .call(self.factory_address(), abi.owner_tokens_call(owner))
            .await?;
        abi.decode_owner_tokens(&output)
    }

    /// Current total supply of `token`.
    pub async fn total_supply(
        &self,
        client: &dyn ChainClient,
        token: Address,
    ) -> Result<U256, AppError> {
        read(client, token, FactoryToken::totalSupplyCall {}).await
    }

    pub async fn balance_of(
        &self,
        client: &dyn ChainClient,
        token: Address,
        account: Address,
    ) -> Result<U256, AppError> {
        read(client, token, FactoryToken::balanceOfCall { account }).await
    }

    /// Filter for this factory's `TokenDeployed`, optionally narrowed to one owner.
    pub fn token_deployed_filter(&self, owner: Option<Address>) -> Filter {
        let filter = Filter::new()
            .address(self.factory_address())
            .event_signature(self.factory_abi().token_deployed_topic());
        match owner {
            Some(owner) => filter.topic1(owner.into_word()),
            None => filter,
        }
    }

    /// Filter for one supply event of `token`.
    pub fn token_event_filter(&self, token: Address, event: TokenEvent) -> Filter {
        Filter::new().address(token).event_signature(event.topic())
    }

    pub fn mint_call(&self, to: Address, amount: U256) -> Bytes {
        FactoryToken::mintCall { to, amount }.abi_encode().into()
    }

    pub fn burn_call(&self, amount: U256) -> Bytes {
        FactoryToken::burnCall { amount }.abi_encode().into()
    }
}

impl ChainRegistry {
    /// Resolve the binding for `chain_id`.
    pub fn resolve(&self, chain_id: u64) -> Result<ContractBinding, AppError> {
        self.get_shared(chain_id)
            .map(|chain| ContractBinding { chain })
            .ok_or(AppError::UnsupportedChain(chain_id))
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;

    use super::*;
    use crate::registry::{ETHERLINK_MAINNET, ETHERLINK_TESTNET};

    fn registry() -> ChainRegistry {
        let chain = |chain_id, factory_address, explorer: &str| ChainConfig {
            chain_id,
            name: format!("chain {chain_id}"),
            factory_address,
            factory_abi: FactoryAbi::Erc20Factory,
            explorer_base_url: explorer.to_string(),
            rpc_url: "http://localhost:8545".to_string(),
            testnet: false,
        };
        ChainRegistry::new([
            chain(
                ETHERLINK_MAINNET,
                address!("00000000000000000000000000000000000000aa"),
                "https://explorer.etherlink.com",
            ),
            chain(
                ETHERLINK_TESTNET,
                address!("00000000000000000000000000000000000000bb"),
                "https://testnet.explorer.etherlink.com",
            ),
        ])
    }

    #[test]
    fn resolves_every_supported_chain_to_its_entry() {
        let registry = registry();
        for chain in registry.chains() {
            let binding = registry.resolve(chain.chain_id).unwrap();
            assert_eq!(binding.chain_id(), chain.chain_id);
            assert_eq!(binding.factory_address(), chain.factory_address);
            assert_eq!(binding.factory_abi(), chain.factory_abi);
            assert_eq!(binding.chain(), chain);
        }
    }

    #[test]
    fn unsupported_chain_is_an_error() {
        for id in [0, 1, 8453, 128124] {
            assert!(matches!(
                registry().resolve(id),
                Err(AppError::UnsupportedChain(got)) if got == id
            ));
        }
    }

    #[test]
    fn owner_filter_narrows_topic1() {
        let binding = registry().resolve(ETHERLINK_TESTNET).unwrap();
        let owner = address!("00000000000000000000000000000000000000a1");

        let filter = binding.token_deployed_filter(Some(owner));
        assert!(filter.topics[0].matches(&ERC20Factory::TokenDeployed::SIGNATURE_HASH));
        assert!(filter.topics[1].matches(&owner.into_word()));
        assert!(!filter.topics[1].matches(&Address::ZERO.into_word()));
        assert!(binding.token_deployed_filter(None).topics[1].is_empty());
    }

    #[test]
    fn event_topics_are_distinct() {
        assert_ne!(TokenEvent::Minted.topic(), TokenEvent::Burned.topic());
        assert_eq!(TokenEvent::Burned.to_string(), "Burned");
    }
}
