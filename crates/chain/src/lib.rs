pub mod abi;
pub mod binding;
pub mod client;
pub mod decoder;
pub mod provider;
pub mod registry;

pub use abi::{ERC20Factory, FactoryToken};
pub use binding::{ContractBinding, FactoryAbi, NewToken, TokenEvent};
pub use client::{ChainClient, TxReceipt, Wallet, read};
pub use decoder::{SupplyEvent, TokenDeployedEvent, decode_factory_log, decode_supply_log};
pub use provider::{Disconnected, LocalWallet, RpcChainClient, create_provider};
pub use registry::{ChainConfig, ChainRegistry};
