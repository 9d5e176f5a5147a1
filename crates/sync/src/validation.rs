//! User-initiated write calls and their local validation.

use alloy::primitives::{Address, Bytes, U256};
use deployer_chain::{ContractBinding, NewToken};
use deployer_core::AppError;
use deployer_core::units::{MAX_DECIMALS, parse_amount, parse_positive_amount};

/// A write the user asked for, already converted to raw on-chain units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCall {
    CreateToken(NewToken),
    Mint {
        token: Address,
        to: Address,
        amount: U256,
    },
    Burn {
        token: Address,
        amount: U256,
    },
}

impl WriteCall {
    /// Validate form input for a new token.
    ///
    /// `decimals` is taken wide so that out-of-range input can be reported
    /// rather than silently wrapped. `initial_supply` is a whole-token count.
    pub fn create_token(
        name: &str,
        symbol: &str,
        decimals: i64,
        initial_supply: &str,
        mintable: bool,
    ) -> Result<Self, AppError> {
        let decimals = u8::try_from(decimals)
            .ok()
            .filter(|d| *d <= MAX_DECIMALS)
            .ok_or_else(|| {
                AppError::validation(format!(
                    "decimals must be between 0 and {MAX_DECIMALS}, got {decimals}"
                ))
            })?;

        let call = Self::CreateToken(NewToken {
            name: name.trim().to_string(),
            symbol: symbol.trim().to_uppercase(),
            decimals,
            initial_supply: parse_amount(initial_supply, 0)?,
            mintable,
        });
        call.validate()?;
        Ok(call)
    }

    /// Validate a mint of `amount` (decimal string) at the token's `decimals`.
    pub fn mint(token: Address, to: Address, amount: &str, decimals: u8) -> Result<Self, AppError> {
        if to.is_zero() {
            return Err(AppError::validation("cannot mint to the zero address"));
        }
        Ok(Self::Mint {
            token,
            to,
            amount: parse_positive_amount(amount, decimals)?,
        })
    }

    /// Validate a burn of `amount` (decimal string) at the token's `decimals`.
    pub fn burn(token: Address, amount: &str, decimals: u8) -> Result<Self, AppError> {
        Ok(Self::Burn {
            token,
            amount: parse_positive_amount(amount, decimals)?,
        })
    }

    /// Re-check invariants on an already-built call.
    pub fn validate(&self) -> Result<(), AppError> {
        match self {
            Self::CreateToken(token) => {
                if token.name.trim().is_empty() {
                    return Err(AppError::validation("token name is required"));
                }
                if token.symbol.trim().is_empty() {
                    return Err(AppError::validation("token symbol is required"));
                }
                if token.decimals > MAX_DECIMALS {
                    return Err(AppError::validation(format!(
                        "decimals must be between 0 and {MAX_DECIMALS}"
                    )));
                }
            }
            Self::Mint { to, amount, .. } => {
                if to.is_zero() {
                    return Err(AppError::validation("cannot mint to the zero address"));
                }
                if amount.is_zero() {
                    return Err(AppError::validation("amount must be greater than zero"));
                }
            }
            Self::Burn { amount, .. } => {
                if amount.is_zero() {
                    return Err(AppError::validation("amount must be greater than zero"));
                }
            }
        }
        Ok(())
    }

    /// Contract function name, for logs.
    pub fn function_name(&self) -> &'static str {
        match self {
            Self::CreateToken(_) => "createToken",
            Self::Mint { .. } => "mint",
            Self::Burn { .. } => "burn",
        }
    }

    /// Contract the call is sent to.
    pub fn target(&self, binding: &ContractBinding) -> Address {
        match self {
            Self::CreateToken(_) => binding.factory_address(),
            Self::Mint { token, .. } | Self::Burn { token, .. } => *token,
        }
    }

    pub fn calldata(&self, binding: &ContractBinding) -> Bytes {
        match self {
            Self::CreateToken(token) => binding.factory_abi().create_token_call(token),
            Self::Mint { to, amount, .. } => binding.mint_call(*to, *amount),
            Self::Burn { amount, .. } => binding.burn_call(*amount),
        }
    }
}
