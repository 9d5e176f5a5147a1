use alloy::primitives::{Address, U256};
use dashmap::DashMap;
use deployer_chain::{ChainClient, FactoryToken, read};
use deployer_core::AppError;
use deployer_core::units::{MAX_DECIMALS, format_amount};
use serde::Serialize;

/// Per-token summary shown in the owned-token list.
///
/// Always rebuilt as a whole from one refresh; never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenRecord {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub mintable: bool,
    pub burnable: bool,
    /// Total supply formatted at `decimals`.
    pub total_supply: String,
    /// Balance of the connected account formatted at `decimals`.
    pub owner_balance: Option<String>,
}

impl TokenRecord {
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::from_flags(self.mintable, self.burnable)
    }
}

/// Raw results of one batch of per-token reads.
#[derive(Debug, Clone)]
pub(crate) struct TokenReads {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub mintable: bool,
    pub burnable: bool,
    pub total_supply: U256,
    pub balance: Option<U256>,
}

impl TokenReads {
    /// Issue every read concurrently; the first failure fails the batch.
    ///
    /// `balanceOf` is only read when `account` is given.
    pub async fn fetch(
        client: &dyn ChainClient,
        decimals: &DecimalsCache,
        chain_id: u64,
        token: Address,
        account: Option<Address>,
    ) -> Result<Self, AppError> {
        let balance = async {
            match account {
                Some(account) => read(client, token, FactoryToken::balanceOfCall { account })
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };
        let (name, symbol, decimals, mintable, burnable, total_supply, balance) = tokio::try_join!(
            read(client, token, FactoryToken::nameCall {}),
            read(client, token, FactoryToken::symbolCall {}),
            decimals.get_or_fetch(client, chain_id, token),
            read(client, token, FactoryToken::mintableCall {}),
            read(client, token, FactoryToken::burnableCall {}),
            read(client, token, FactoryToken::totalSupplyCall {}),
            balance,
        )?;

        Ok(Self {
            address: token,
            name,
            symbol,
            decimals,
            mintable,
            burnable,
            total_supply,
            balance,
        })
    }

    pub fn to_record(&self) -> Result<TokenRecord, AppError> {
        Ok(TokenRecord {
            address: self.address,
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            decimals: self.decimals,
            mintable: self.mintable,
            burnable: self.burnable,
            total_supply: format_amount(self.total_supply, self.decimals)?,
            owner_balance: self
                .balance
                .map(|balance| format_amount(balance, self.decimals))
                .transpose()?,
        })
    }
}

/// Optional operation a token may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Capability {
    Mint,
    Burn,
}

/// The set of optional operations a token instance offers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    mint: bool,
    burn: bool,
}

impl Capabilities {
    pub fn from_flags(mintable: bool, burnable: bool) -> Self {
        Self {
            mint: mintable,
            burn: burnable,
        }
    }

    pub fn contains(self, capability: Capability) -> bool {
        match capability {
            Capability::Mint => self.mint,
            Capability::Burn => self.burn,
        }
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        [Capability::Mint, Capability::Burn]
            .into_iter()
            .filter(move |c| self.contains(*c))
    }

    /// Fail with a validation error unless `capability` is present.
    pub fn require(self, capability: Capability) -> Result<(), AppError> {
        if self.contains(capability) {
            return Ok(());
        }
        let op = match capability {
            Capability::Mint => "mintable",
            Capability::Burn => "burnable",
        };
        Err(AppError::validation(format!("token is not {op}")))
    }
}

/// Token decimals, fetched once per `(chain_id, token)` and then reused.
///
/// Decimals are fixed at creation, so supply and balances of one token are
/// always formatted with the same value.
#[derive(Debug, Default)]
pub struct DecimalsCache {
    inner: DashMap<(u64, Address), u8>,
}

impl DecimalsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chain_id: u64, token: Address) -> Option<u8> {
        self.inner.get(&(chain_id, token)).map(|d| *d)
    }

    /// Cached decimals, reading `decimals()` on first use.
    pub async fn get_or_fetch(
        &self,
        client: &dyn ChainClient,
        chain_id: u64,
        token: Address,
    ) -> Result<u8, AppError> {
        if let Some(decimals) = self.get(chain_id, token) {
            return Ok(decimals);
        }

        let decimals = read(client, token, FactoryToken::decimalsCall {}).await?;
        if decimals > MAX_DECIMALS {
            return Err(AppError::Decode(format!(
                "token {token} reports {decimals} decimals"
            )));
        }

        // First successful fetch wins if two loads race.
        Ok(*self.inner.entry((chain_id, token)).or_insert(decimals))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
