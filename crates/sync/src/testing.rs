//! In-memory chain + wallet used by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, LogData, TxHash, U256, keccak256};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::{SolCall, SolEvent, SolInterface};
use async_trait::async_trait;
use deployer_chain::abi::ERC20Factory;
use deployer_chain::abi::FactoryToken::{self, FactoryTokenCalls};
use deployer_chain::{
    ChainClient, ChainConfig, ChainRegistry, ContractBinding, FactoryAbi, TxReceipt, Wallet,
};
use deployer_core::AppError;

use crate::network::Network;

pub const TESTNET: u64 = 128123;
pub const MAINNET: u64 = 42793;
pub const OWNER: Address = Address::repeat_byte(0xa1);
pub const OTHER: Address = Address::repeat_byte(0xa2);

pub fn factory_for(chain_id: u64) -> Address {
    let mut bytes = [0xfa; 20];
    bytes[..8].copy_from_slice(&chain_id.to_be_bytes());
    Address::from(bytes)
}

pub fn registry() -> ChainRegistry {
    let chain = |chain_id: u64| ChainConfig {
        chain_id,
        name: format!("chain {chain_id}"),
        factory_address: factory_for(chain_id),
        factory_abi: FactoryAbi::Erc20Factory,
        explorer_base_url: format!("https://explorer.{chain_id}.test"),
        rpc_url: "http://localhost:8545".to_string(),
        testnet: chain_id == TESTNET,
    };
    ChainRegistry::new([chain(MAINNET), chain(TESTNET)])
}

pub fn binding(chain_id: u64) -> ContractBinding {
    registry().resolve(chain_id).unwrap()
}

pub fn network(mock: &Arc<MockChain>) -> Network {
    let binding = binding(mock.chain_id);
    Network::new(binding, mock.clone(), mock.clone())
}

/// Token state held by the mock.
#[derive(Debug, Clone)]
pub struct MockToken {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: U256,
    pub balances: HashMap<Address, U256>,
    pub owner: Address,
    pub mintable: bool,
    pub burnable: bool,
}

impl MockToken {
    pub fn new(symbol: &str, decimals: u8, owner: Address, supply: U256) -> Self {
        Self {
            name: format!("{symbol} Token"),
            symbol: symbol.to_string(),
            decimals,
            total_supply: supply,
            balances: HashMap::from([(owner, supply)]),
            owner,
            mintable: false,
            burnable: false,
        }
    }

    pub fn mintable(mut self) -> Self {
        self.mintable = true;
        self
    }

    pub fn burnable(mut self) -> Self {
        self.burnable = true;
        self
    }
}

#[derive(Default)]
struct MockState {
    head: u64,
    nonce: u64,
    owner_tokens: HashMap<Address, Vec<Address>>,
    tokens: HashMap<Address, MockToken>,
    logs: Vec<Log>,
    failing: HashSet<Address>,
    receipts: HashMap<TxHash, bool>,
    calls: HashMap<&'static str, usize>,
    account: Option<Address>,
    reject_signing: bool,
    revert_next: bool,
    hold_receipts: bool,
    hold_signing: bool,
    fail_receipts: bool,
    unseen_polls: usize,
    read_delay: Option<Duration>,
    receipt_delay: Option<Duration>,
}

/// A single-chain mock implementing both [`ChainClient`] and [`Wallet`].
pub struct MockChain {
    pub chain_id: u64,
    pub factory: Address,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(chain_id: u64) -> Arc<Self> {
        Arc::new(Self {
            chain_id,
            factory: factory_for(chain_id),
            state: Mutex::new(MockState {
                head: 100,
                account: Some(OWNER),
                ..Default::default()
            }),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Register `token` as deployed by `owner`, returning its address.
    pub fn add_token(&self, owner: Address, token: MockToken) -> Address {
        let mut state = self.state();
        state.nonce += 1;
        let address = Address::from_word(keccak256(state.nonce.to_be_bytes()));
        state.owner_tokens.entry(owner).or_default().push(address);
        state.tokens.insert(address, token);
        address
    }

    pub fn token(&self, address: Address) -> MockToken {
        self.state().tokens[&address].clone()
    }

    /// Change supply out-of-band (as another account would).
    pub fn set_supply(&self, address: Address, supply: U256) {
        self.state().tokens.get_mut(&address).unwrap().total_supply = supply;
    }

    /// Append logs to a fresh block, all in one block.
    pub fn emit(&self, logs: Vec<(Address, LogData, Option<TxHash>)>) {
        let mut state = self.state();
        state.head += 1;
        let block = state.head;
        for (index, (address, data, hash)) in logs.into_iter().enumerate() {
            state.logs.push(Log {
                inner: alloy::primitives::Log { address, data },
                block_number: Some(block),
                transaction_hash: hash,
                log_index: Some(index as u64),
                ..Default::default()
            });
        }
    }

    pub fn fail_reads_for(&self, token: Address) {
        self.state().failing.insert(token);
    }

    pub fn set_account(&self, account: Option<Address>) {
        self.state().account = account;
    }

    pub fn reject_signing(&self) {
        self.state().reject_signing = true;
    }

    pub fn revert_next(&self) {
        self.state().revert_next = true;
    }

    pub fn hold_receipts(&self) {
        self.state().hold_receipts = true;
    }

    /// Leave the wallet prompt open until `false` is passed again.
    pub fn hold_signing(&self, hold: bool) {
        self.state().hold_signing = hold;
    }

    /// Report the next `polls` lookups of any sent transaction as unknown.
    pub fn pending_polls(&self, polls: usize) {
        self.state().unseen_polls = polls;
    }

    /// Make every receipt wait take `delay` before answering.
    pub fn slow_receipts(&self, delay: Duration) {
        self.state().receipt_delay = Some(delay);
    }

    /// Make receipt waits end in a node error, after any receipt delay.
    pub fn fail_receipts(&self) {
        self.state().fail_receipts = true;
    }

    /// Make every `eth_call` take `delay` before answering.
    pub fn slow_reads(&self, delay: Duration) {
        self.state().read_delay = Some(delay);
    }

    /// How many times `function` was called (reads and writes).
    pub fn calls(&self, function: &str) -> usize {
        self.state().calls.get(function).copied().unwrap_or(0)
    }

    fn count(state: &mut MockState, function: &'static str) {
        *state.calls.entry(function).or_default() += 1;
    }

    fn answer_token(state: &mut MockState, to: Address, input: &[u8]) -> Result<Vec<u8>, AppError> {
        if state.failing.contains(&to) {
            return Err(AppError::Rpc(format!("node refused call to {to}")));
        }
        let call = FactoryTokenCalls::abi_decode(input)
            .map_err(|e| AppError::Rpc(format!("execution reverted: {e}")))?;
        let token = state
            .tokens
            .get(&to)
            .cloned()
            .ok_or_else(|| AppError::Rpc(format!("no contract at {to}")))?;

        let (name, output) = match call {
            FactoryTokenCalls::name(_) => ("name", FactoryToken::nameCall::abi_encode_returns(&token.name)),
            FactoryTokenCalls::symbol(_) => {
                ("symbol", FactoryToken::symbolCall::abi_encode_returns(&token.symbol))
            }
            FactoryTokenCalls::decimals(_) => (
                "decimals",
                FactoryToken::decimalsCall::abi_encode_returns(&token.decimals),
            ),
            FactoryTokenCalls::totalSupply(_) => (
                "totalSupply",
                FactoryToken::totalSupplyCall::abi_encode_returns(&token.total_supply),
            ),
            FactoryTokenCalls::balanceOf(c) => (
                "balanceOf",
                FactoryToken::balanceOfCall::abi_encode_returns(
                    &token.balances.get(&c.account).copied().unwrap_or_default(),
                ),
            ),
            FactoryTokenCalls::owner(_) => {
                ("owner", FactoryToken::ownerCall::abi_encode_returns(&token.owner))
            }
            FactoryTokenCalls::mintable(_) => (
                "mintable",
                FactoryToken::mintableCall::abi_encode_returns(&token.mintable),
            ),
            FactoryTokenCalls::burnable(_) => (
                "burnable",
                FactoryToken::burnableCall::abi_encode_returns(&token.burnable),
            ),
            _ => return Err(AppError::Rpc("not a view function".into())),
        };
        Self::count(state, name);
        Ok(output)
    }

    fn push_log(state: &mut MockState, address: Address, data: LogData, hash: TxHash) {
        state.head += 1;
        let block = state.head;
        state.logs.push(Log {
            inner: alloy::primitives::Log { address, data },
            block_number: Some(block),
            transaction_hash: Some(hash),
            log_index: Some(0),
            ..Default::default()
        });
    }

    fn apply_write(
        state: &mut MockState,
        from: Address,
        to: Address,
        input: &[u8],
        hash: TxHash,
    ) -> Result<(), AppError> {
        if let Ok(create) = ERC20Factory::createTokenCall::abi_decode(input) {
            Self::count(state, "createToken");
            state.nonce += 1;
            let token = Address::from_word(keccak256(state.nonce.to_be_bytes()));
            let supply = create.initialSupply
                * U256::from(10u64).pow(U256::from(create.decimals));
            let mut record = MockToken::new(&create.symbol, create.decimals, from, supply);
            record.name = create.name;
            record.mintable = create.mintable;
            state.tokens.insert(token, record);
            state.owner_tokens.entry(from).or_default().push(token);
            let event = ERC20Factory::TokenDeployed { owner: from, token };
            Self::push_log(state, to, event.encode_log_data(), hash);
            return Ok(());
        }

        let call = FactoryTokenCalls::abi_decode(input)
            .map_err(|e| AppError::Rpc(format!("execution reverted: {e}")))?;
        let token = state
            .tokens
            .get_mut(&to)
            .ok_or_else(|| AppError::Rpc(format!("no contract at {to}")))?;
        let (function, data) = match call {
            FactoryTokenCalls::mint(c) => {
                token.total_supply += c.amount;
                *token.balances.entry(c.to).or_default() += c.amount;
                let event = FactoryToken::Minted {
                    to: c.to,
                    amount: c.amount,
                };
                ("mint", event.encode_log_data())
            }
            FactoryTokenCalls::burn(c) => {
                token.total_supply -= c.amount;
                *token.balances.entry(from).or_default() -= c.amount;
                let event = FactoryToken::Burned {
                    from,
                    amount: c.amount,
                };
                ("burn", event.encode_log_data())
            }
            _ => return Err(AppError::Rpc("not a write function".into())),
        };
        Self::count(state, function);
        Self::push_log(state, to, data, hash);
        Ok(())
    }
}

fn log_matches(filter: &Filter, log: &Log) -> bool {
    let block = log.block_number.unwrap_or_default();
    let in_range = filter.get_from_block().is_none_or(|from| block >= from)
        && filter.get_to_block().is_none_or(|to| block <= to);
    let topics = log.topics();
    in_range
        && filter.address.matches(&log.address())
        && filter.topics.iter().enumerate().all(|(i, wanted)| {
            wanted.is_empty() || topics.get(i).is_some_and(|topic| wanted.matches(topic))
        })
}

#[async_trait]
impl ChainClient for MockChain {
    async fn call(&self, to: Address, input: Bytes) -> Result<Bytes, AppError> {
        let delay = self.state().read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        if to == self.factory {
            let call = ERC20Factory::getOwnerTokensCall::abi_decode(&input)
                .map_err(|e| AppError::Rpc(format!("execution reverted: {e}")))?;
            Self::count(&mut state, "getOwnerTokens");
            let tokens = state
                .owner_tokens
                .get(&call.owner)
                .cloned()
                .unwrap_or_default();
            return Ok(ERC20Factory::getOwnerTokensCall::abi_encode_returns(&tokens).into());
        }
        Self::answer_token(&mut state, to, &input).map(Bytes::from)
    }

    async fn block_number(&self) -> Result<u64, AppError> {
        Ok(self.state().head)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, AppError> {
        Ok(self
            .state()
            .logs
            .iter()
            .filter(|log| log_matches(filter, log))
            .cloned()
            .collect())
    }

    async fn transaction_seen(&self, hash: TxHash) -> Result<bool, AppError> {
        let mut state = self.state();
        if state.unseen_polls > 0 {
            state.unseen_polls -= 1;
            return Ok(false);
        }
        Ok(state.receipts.contains_key(&hash))
    }

    async fn wait_for_receipt(&self, hash: TxHash) -> Result<TxReceipt, AppError> {
        let (hold, fail, delay, success) = {
            let state = self.state();
            (
                state.hold_receipts,
                state.fail_receipts,
                state.receipt_delay,
                state.receipts.get(&hash).copied(),
            )
        };
        if hold {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(AppError::Rpc(format!("timed out waiting for receipt of {hash}")));
        }
        let success =
            success.ok_or_else(|| AppError::Rpc(format!("unknown transaction {hash}")))?;
        Ok(TxReceipt {
            transaction_hash: hash,
            block_number: Some(self.state().head),
            gas_used: 21_000,
            success,
        })
    }
}

#[async_trait]
impl Wallet for MockChain {
    fn account(&self) -> Option<Address> {
        self.state().account
    }

    async fn send_transaction(&self, to: Address, input: Bytes) -> Result<TxHash, AppError> {
        let hold = self.state().hold_signing;
        if hold {
            std::future::pending::<()>().await;
        }
        let mut state = self.state();
        Self::count(&mut state, "sendTransaction");
        if state.reject_signing {
            return Err(AppError::WalletRejected("User rejected the request.".into()));
        }
        let from = state.account.ok_or(AppError::NotConnected)?;
        state.nonce += 1;
        let hash = keccak256([&input[..], &state.nonce.to_be_bytes()].concat());

        let success = !std::mem::take(&mut state.revert_next);
        if success {
            Self::apply_write(&mut state, from, to, &input, hash)?;
        }
        state.receipts.insert(hash, success);
        Ok(hash)
    }
}
