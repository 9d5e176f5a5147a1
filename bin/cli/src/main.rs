//! Deployer CLI — create, inspect, mint and burn factory tokens.
//!
//! Writes need `PRIVATE_KEY`; without it the session is read-only.

use std::sync::Arc;

use alloy::primitives::Address;
use clap::{Parser, Subcommand};
use deployer_chain::{ChainRegistry, registry};
use deployer_core::{Settings, telemetry};
use deployer_sync::{
    DecimalsCache, LifecycleConfig, Network, OwnedTokenSet, RpcConnector, Session,
    TransactionState,
};
use eyre::{Result, bail};
use serde_json::json;
use tokio::task::JoinHandle;

#[derive(Debug, Parser)]
#[command(name = "deployer", version, about = "ERC20 factory deployer")]
struct Args {
    /// Network to use; defaults to `CHAIN_ID`.
    #[arg(long, global = true)]
    chain_id: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List supported chains.
    Chains,
    /// List tokens deployed by an owner (the connected account by default).
    Tokens {
        #[arg(long)]
        owner: Option<Address>,
    },
    /// Show one token.
    Token { address: Address },
    /// Deploy a new token through the factory.
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value_t = 18, allow_negative_numbers = true)]
        decimals: i64,
        /// Whole-token initial supply, minted to the deployer.
        #[arg(long, default_value = "1000")]
        supply: String,
        #[arg(long)]
        mintable: bool,
    },
    /// Mint tokens (requires a mintable token).
    Mint {
        token: Address,
        #[arg(long)]
        to: Option<Address>,
        #[arg(long)]
        amount: String,
    },
    /// Burn tokens from the connected account (requires a burnable token).
    Burn {
        token: Address,
        #[arg(long)]
        amount: String,
    },
    /// Follow the connected account's tokens (and optionally one token) until Ctrl-C.
    Watch {
        #[arg(long)]
        token: Option<Address>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let args = Args::parse();
    let settings = Settings::from_env()?;
    let registry = registry::install(ChainRegistry::from_settings(&settings)?)?;

    let chain_id = args.chain_id.unwrap_or(settings.chain_id);
    let session = Session::new(
        registry,
        RpcConnector::from_settings(&settings),
        LifecycleConfig::from(&settings),
    );
    let connect = || -> Result<Network> {
        let network = session.switch_network(chain_id)?;
        tracing::info!(chain_id, account = ?network.account(), "Connected");
        Ok(network)
    };

    match args.command {
        Command::Chains => {
            for chain in registry.chains() {
                print_json(&json!({
                    "chain_id": chain.chain_id,
                    "name": chain.name,
                    "testnet": chain.testnet,
                    "factory": chain.factory_address,
                    "explorer": chain.address_url(chain.factory_address),
                }))?;
            }
        }
        Command::Tokens { owner } => {
            let network = connect()?;
            let records = match owner {
                Some(owner) if Some(owner) != network.account() => {
                    let owned = OwnedTokenSet::new(Arc::new(DecimalsCache::new()));
                    owned.switch_context(Some(network.clone()), Some(owner));
                    owned.refresh().await?;
                    owned.records()
                }
                _ => {
                    if network.account().is_none() {
                        bail!("pass --owner or set PRIVATE_KEY");
                    }
                    session.refresh_owned().await?;
                    session.owned_tokens().records()
                }
            };
            for record in records.iter() {
                print_json(record)?;
            }
        }
        Command::Token { address } => {
            let network = connect()?;
            let detail = session.load_token(address).await?;
            print_json(&detail)?;
            println!("{}", network.binding.chain().token_url(address));
        }
        Command::Create {
            name,
            symbol,
            decimals,
            supply,
            mintable,
        } => {
            let network = connect()?;
            let progress = report_progress(&session, &network);
            let outcome = session
                .submit_create_token(&name, &symbol, decimals, &supply, mintable)
                .await;
            progress.abort();
            finish(outcome?)?;
        }
        Command::Mint { token, to, amount } => {
            let network = connect()?;
            let Some(to) = to.or(network.account()) else {
                bail!("pass --to or set PRIVATE_KEY");
            };
            let progress = report_progress(&session, &network);
            let outcome = session.submit_mint(token, to, &amount).await;
            progress.abort();
            finish(outcome?)?;
            print_json(&session.token_detail().detail())?;
        }
        Command::Burn { token, amount } => {
            let network = connect()?;
            let progress = report_progress(&session, &network);
            let outcome = session.submit_burn(token, &amount).await;
            progress.abort();
            finish(outcome?)?;
            print_json(&session.token_detail().detail())?;
        }
        Command::Watch { token } => {
            connect()?;
            watch(&session, token).await?;
        }
    }

    session.disconnect();
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Log each transaction state change until aborted.
fn report_progress(session: &Session, network: &Network) -> JoinHandle<()> {
    let mut state = session.transactions().subscribe();
    let chain = network.binding.chain().clone();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = state.borrow_and_update().clone();
            match &current {
                TransactionState::Submitted { hash } => {
                    tracing::info!(%hash, url = %chain.tx_url(hash), "Submitted");
                }
                TransactionState::Confirming { hash } => {
                    tracing::info!(%hash, "Waiting for confirmation");
                }
                _ => {}
            }
        }
    })
}

fn finish(outcome: TransactionState) -> Result<()> {
    match outcome {
        TransactionState::Confirmed { hash, receipt } => {
            tracing::info!(%hash, block = ?receipt.block_number, gas_used = receipt.gas_used, "Confirmed");
            print_json(&receipt)
        }
        TransactionState::Failed { hash, error } => {
            bail!("transaction {hash:?} failed: {error}")
        }
        other => bail!("transaction ended in unexpected state {other:?}"),
    }
}

async fn watch(session: &Session, token: Option<Address>) -> Result<()> {
    let mut records = session.owned_tokens().subscribe();
    session.follow_deployments().await?;
    let mut detail = session.token_detail().subscribe();
    if let Some(token) = token {
        session.load_token(token).await?;
    }

    tracing::info!("Watching, Ctrl-C to stop");
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutting down gracefully…");
                break;
            }
            changed = records.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = records.borrow_and_update().clone();
                tracing::info!(count = snapshot.len(), "Owned tokens changed");
                for record in snapshot.iter() {
                    print_json(record)?;
                }
            }
            changed = detail.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(current) = detail.borrow_and_update().clone() {
                    tracing::info!(
                        token = %current.record.address,
                        total_supply = %current.record.total_supply,
                        "Token changed"
                    );
                }
            }
        }
    }

    tracing::info!("Watch stopped.");
    Ok(())
}
