use alloy::primitives::{Address, TxHash, U256};
use alloy::rpc::types::Log;

use crate::abi::{ERC20Factory, FactoryToken};

/// Decoded ERC20Factory `TokenDeployed` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDeployedEvent {
    pub owner: Address,
    pub token: Address,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<TxHash>,
}

/// A supply-changing event emitted by a factory token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupplyEvent {
    Minted {
        token: Address,
        to: Address,
        amount: U256,
        transaction_hash: Option<TxHash>,
    },
    Burned {
        token: Address,
        from: Address,
        amount: U256,
        transaction_hash: Option<TxHash>,
    },
}

impl SupplyEvent {
    pub fn amount(&self) -> U256 {
        match self {
            Self::Minted { amount, .. } | Self::Burned { amount, .. } => *amount,
        }
    }

    pub fn transaction_hash(&self) -> Option<TxHash> {
        match self {
            Self::Minted {
                transaction_hash, ..
            }
            | Self::Burned {
                transaction_hash, ..
            } => *transaction_hash,
        }
    }
}

/// Attempt to decode a log as an ERC20Factory `TokenDeployed` event.
pub fn decode_factory_log(log: &Log) -> Option<TokenDeployedEvent> {
    let decoded = log.log_decode::<ERC20Factory::TokenDeployed>().ok()?;
    let inner = decoded.inner.data;

    Some(TokenDeployedEvent {
        owner: inner.owner,
        token: inner.token,
        block_number: log.block_number,
        transaction_hash: log.transaction_hash,
    })
}

/// Attempt to decode a log as a token `Minted`/`Burned` event.
pub fn decode_supply_log(log: &Log) -> Option<SupplyEvent> {
    let token = log.address();
    let transaction_hash = log.transaction_hash;

    if let Ok(decoded) = log.log_decode::<FactoryToken::Minted>() {
        let d = decoded.inner.data;
        return Some(SupplyEvent::Minted {
            token,
            to: d.to,
            amount: d.amount,
            transaction_hash,
        });
    }

    if let Ok(decoded) = log.log_decode::<FactoryToken::Burned>() {
        let d = decoded.inner.data;
        return Some(SupplyEvent::Burned {
            token,
            from: d.from,
            amount: d.amount,
            transaction_hash,
        });
    }

    None
}
