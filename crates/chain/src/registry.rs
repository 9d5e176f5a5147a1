//! Static table of supported networks and their factory deployments.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::{Arc, OnceLock};

use alloy::primitives::Address;
use deployer_core::{AppError, Settings};
use serde::Serialize;

use crate::binding::FactoryAbi;

/// Etherlink Mainnet chain ID.
pub const ETHERLINK_MAINNET: u64 = 42793;

/// Etherlink Testnet chain ID.
pub const ETHERLINK_TESTNET: u64 = 128123;

struct KnownChain {
    chain_id: u64,
    name: &'static str,
    rpc_url: &'static str,
    explorer_base_url: &'static str,
    testnet: bool,
}

const KNOWN_CHAINS: [KnownChain; 2] = [
    KnownChain {
        chain_id: ETHERLINK_MAINNET,
        name: "Etherlink Mainnet",
        rpc_url: "https://node.mainnet.etherlink.com",
        explorer_base_url: "https://explorer.etherlink.com",
        testnet: false,
    },
    KnownChain {
        chain_id: ETHERLINK_TESTNET,
        name: "Etherlink Testnet",
        rpc_url: "https://node.ghostnet.etherlink.com",
        explorer_base_url: "https://testnet.explorer.etherlink.com",
        testnet: true,
    },
];

/// One supported network and its factory deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub factory_address: Address,
    pub factory_abi: FactoryAbi,
    pub explorer_base_url: String,
    pub rpc_url: String,
    pub testnet: bool,
}

impl ChainConfig {
    /// Explorer page for a token contract.
    pub fn token_url(&self, token: Address) -> String {
        self.explorer_url("token", token)
    }

    /// Explorer page for an account or contract.
    pub fn address_url(&self, address: Address) -> String {
        self.explorer_url("address", address)
    }

    /// Explorer page for a transaction.
    pub fn tx_url(&self, hash: impl Display) -> String {
        self.explorer_url("tx", hash)
    }

    fn explorer_url(&self, kind: &str, id: impl Display) -> String {
        format!(
            "{}/{kind}/{id}",
            self.explorer_base_url.trim_end_matches('/')
        )
    }
}

/// Immutable chain id → [`ChainConfig`] table.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: BTreeMap<u64, Arc<ChainConfig>>,
}

impl ChainRegistry {
    pub fn new(configs: impl IntoIterator<Item = ChainConfig>) -> Self {
        Self {
            chains: configs
                .into_iter()
                .map(|c| (c.chain_id, Arc::new(c)))
                .collect(),
        }
    }

    /// Build the table from the deployment settings.
    ///
    /// A known chain is supported only once its factory address is configured;
    /// `RPC_URL_<id>` overrides the public endpoint.
    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        if let Some(id) = settings
            .factory_addresses
            .keys()
            .find(|id| !KNOWN_CHAINS.iter().any(|k| k.chain_id == **id))
        {
            return Err(AppError::Config(format!(
                "factory configured for chain {id}, which has no known metadata"
            )));
        }

        let mut configs = Vec::new();
        for known in &KNOWN_CHAINS {
            let Some(raw) = settings.factory_addresses.get(&known.chain_id) else {
                tracing::debug!(chain_id = known.chain_id, "No factory configured, chain disabled");
                continue;
            };
            let factory_address: Address = raw.trim().parse().map_err(|e| {
                AppError::Config(format!("FACTORY_ADDRESS_{}: {e}", known.chain_id))
            })?;
            configs.push(ChainConfig {
                chain_id: known.chain_id,
                name: known.name.to_string(),
                factory_address,
                factory_abi: FactoryAbi::Erc20Factory,
                explorer_base_url: known.explorer_base_url.to_string(),
                rpc_url: settings
                    .rpc_urls
                    .get(&known.chain_id)
                    .cloned()
                    .unwrap_or_else(|| known.rpc_url.to_string()),
                testnet: known.testnet,
            });
        }

        Ok(Self::new(configs))
    }

    pub fn get(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.get(&chain_id).map(Arc::as_ref)
    }

    pub(crate) fn get_shared(&self, chain_id: u64) -> Option<Arc<ChainConfig>> {
        self.chains.get(&chain_id).cloned()
    }

    /// Supported chains, ordered by chain id.
    pub fn chains(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.values().map(Arc::as_ref)
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

static REGISTRY: OnceLock<ChainRegistry> = OnceLock::new();

/// Install the process-wide registry. May only be called once.
pub fn install(registry: ChainRegistry) -> Result<&'static ChainRegistry, AppError> {
    REGISTRY
        .set(registry)
        .map_err(|_| AppError::Config("chain registry already installed".into()))?;
    Ok(global())
}

/// The process-wide registry.
///
/// Falls back to building it from the environment on first use if
/// [`install`] was never called.
pub fn global() -> &'static ChainRegistry {
    REGISTRY.get_or_init(|| {
        Settings::from_env()
            .map_err(AppError::Other)
            .and_then(|s| ChainRegistry::from_settings(&s))
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to build chain registry, no chains supported");
                ChainRegistry::default()
            })
    })
}
