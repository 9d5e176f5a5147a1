use std::collections::BTreeMap;
use std::time::Duration;

use eyre::WrapErr;
use serde::Deserialize;

/// Chain the binaries connect to when `CHAIN_ID` is unset (Etherlink Testnet).
pub const DEFAULT_CHAIN_ID: u64 = 128123;

/// Global application settings loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Network the session starts on.
    pub chain_id: u64,

    /// Per-chain RPC endpoint overrides (`RPC_URL_<chain_id>`).
    pub rpc_urls: BTreeMap<u64, String>,

    /// Deployed factory addresses (`FACTORY_ADDRESS_<chain_id>`), unparsed.
    pub factory_addresses: BTreeMap<u64, String>,

    /// Interval between log/pending-pool polls, in milliseconds.
    pub poll_interval_ms: u64,

    /// Upper bound on waiting for a receipt, in seconds.
    pub receipt_timeout_secs: u64,

    /// Port for the API server.
    pub api_port: u16,

    /// Hex private key used by the CLI wallet. Absent means read-only.
    #[serde(skip)]
    pub private_key: Option<String>,
}

impl Settings {
    /// Load settings from environment variables (with optional `.env` file).
    pub fn from_env() -> eyre::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Build settings from an explicit set of variables.
    pub fn from_vars<I, K, V>(vars: I) -> eyre::Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: BTreeMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let get = |key: &str, default: &str| -> String {
            vars.get(key).cloned().unwrap_or_else(|| default.to_string())
        };

        let chain_id: u64 = get("CHAIN_ID", &DEFAULT_CHAIN_ID.to_string())
            .parse()
            .wrap_err("CHAIN_ID must be an integer")?;

        let mut rpc_urls = per_chain(&vars, "RPC_URL_")?;
        if let Some(url) = vars.get("RPC_URL") {
            rpc_urls.entry(chain_id).or_insert_with(|| url.clone());
        }

        Ok(Self {
            chain_id,
            rpc_urls,
            factory_addresses: per_chain(&vars, "FACTORY_ADDRESS_")?,
            poll_interval_ms: get("POLL_INTERVAL_MS", "2000")
                .parse()
                .wrap_err("POLL_INTERVAL_MS must be an integer")?,
            receipt_timeout_secs: get("RECEIPT_TIMEOUT_SECS", "120")
                .parse()
                .wrap_err("RECEIPT_TIMEOUT_SECS must be an integer")?,
            api_port: get("API_PORT", "3000")
                .parse()
                .wrap_err("API_PORT must be a port number")?,
            private_key: vars.get("PRIVATE_KEY").filter(|k| !k.is_empty()).cloned(),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }
}

/// Collect `<PREFIX><chain_id>=value` variables into a map keyed by chain id.
fn per_chain(vars: &BTreeMap<String, String>, prefix: &str) -> eyre::Result<BTreeMap<u64, String>> {
    let mut out = BTreeMap::new();
    for (key, value) in vars {
        let Some(suffix) = key.strip_prefix(prefix) else {
            continue;
        };
        let chain_id: u64 = suffix
            .parse()
            .wrap_err_with(|| format!("{key}: expected a numeric chain id suffix"))?;
        out.insert(chain_id, value.clone());
    }
    Ok(out)
}
