//! Deployer API Server — read-only view of factory-deployed tokens per chain.

use alloy::primitives::Address;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use deployer_chain::{ChainClient, ChainConfig, ChainRegistry, Disconnected, RpcChainClient, registry};
use deployer_core::{AppError, Settings, telemetry};
use deployer_sync::{DecimalsCache, Network, OwnedTokenSet, RefreshOutcome, fetch_token_detail};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, net::SocketAddr, sync::Arc};

/// Shared application state.
struct AppState {
    registry: &'static ChainRegistry,
    clients: HashMap<u64, Arc<dyn ChainClient>>,
    decimals: Arc<DecimalsCache>,
}

impl AppState {
    fn network(&self, chain_id: u64) -> Result<Network, ApiError> {
        let binding = self.registry.resolve(chain_id).map_err(app_err)?;
        let client = self
            .clients
            .get(&chain_id)
            .cloned()
            .ok_or_else(|| app_err(AppError::UnsupportedChain(chain_id)))?;
        Ok(Network::new(binding, client, Arc::new(Disconnected)))
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    telemetry::init();
    let settings = Settings::from_env()?;

    tracing::info!("Starting Deployer API Server");

    let registry = registry::install(ChainRegistry::from_settings(&settings)?)?;
    if registry.is_empty() {
        tracing::warn!("No chains configured; set FACTORY_ADDRESS_<chain_id>");
    }

    let mut clients: HashMap<u64, Arc<dyn ChainClient>> = HashMap::new();
    for chain in registry.chains() {
        let client = RpcChainClient::connect(
            &chain.rpc_url,
            settings.poll_interval(),
            settings.receipt_timeout(),
        )?;
        clients.insert(chain.chain_id, Arc::new(client));
        tracing::info!(chain_id = chain.chain_id, rpc = %chain.rpc_url, "Chain ready");
    }

    let state = Arc::new(AppState {
        registry,
        clients,
        decimals: Arc::new(DecimalsCache::new()),
    });

    let app = Router::new()
        .route("/api/v1/chains", get(list_chains))
        .route(
            "/api/v1/chains/:chain_id/owners/:owner/tokens",
            get(get_owned_tokens),
        )
        .route("/api/v1/chains/:chain_id/tokens/:address", get(get_token))
        .route("/health", get(health))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.api_port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ─── Query Params ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AccountParams {
    account: Option<String>,
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    data: T,
}

#[derive(Serialize)]
struct ChainEntry {
    #[serde(flatten)]
    chain: ChainConfig,
    factory_url: String,
}

type ApiError = (StatusCode, Json<ApiResponse<String>>);

fn json_ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
    })
}

fn json_err(status: StatusCode, msg: &str) -> ApiError {
    (
        status,
        Json(ApiResponse {
            success: false,
            data: msg.to_string(),
        }),
    )
}

fn app_err(e: AppError) -> ApiError {
    let status = match &e {
        AppError::Validation(_) => StatusCode::BAD_REQUEST,
        AppError::UnsupportedChain(_) => StatusCode::NOT_FOUND,
        AppError::Rpc(_) | AppError::Decode(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %e, "Request failed");
    }
    json_err(status, &e.to_string())
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    raw.parse()
        .map_err(|_| json_err(StatusCode::BAD_REQUEST, &format!("invalid address: {raw}")))
}

// ─── Handlers ───────────────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

/// GET /api/v1/chains — supported chains with their factory.
async fn list_chains(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let chains: Vec<ChainEntry> = state
        .registry
        .chains()
        .map(|chain| ChainEntry {
            factory_url: chain.address_url(chain.factory_address),
            chain: chain.clone(),
        })
        .collect();
    json_ok(chains)
}

/// GET /api/v1/chains/:chain_id/owners/:owner/tokens — tokens deployed by `owner`.
async fn get_owned_tokens(
    State(state): State<Arc<AppState>>,
    Path((chain_id, owner)): Path<(u64, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = parse_address(&owner)?;
    let network = state.network(chain_id)?;

    let owned = OwnedTokenSet::new(state.decimals.clone());
    owned.switch_context(Some(network), Some(owner));
    match owned.refresh().await.map_err(app_err)? {
        RefreshOutcome::Published(_) => Ok(json_ok(owned.records().to_vec())),
        RefreshOutcome::Discarded => Err(json_err(
            StatusCode::INTERNAL_SERVER_ERROR,
            "refresh was superseded",
        )),
    }
}

/// GET /api/v1/chains/:chain_id/tokens/:address — one token, with `?account=` balance.
async fn get_token(
    State(state): State<Arc<AppState>>,
    Path((chain_id, address)): Path<(u64, String)>,
    Query(params): Query<AccountParams>,
) -> Result<impl IntoResponse, ApiError> {
    let token = parse_address(&address)?;
    let account = params.account.as_deref().map(parse_address).transpose()?;
    let network = state.network(chain_id)?;

    let detail = fetch_token_detail(
        network.client.as_ref(),
        &state.decimals,
        &network.binding,
        token,
        account,
    )
    .await
    .map_err(app_err)?;
    Ok(json_ok(detail))
}
