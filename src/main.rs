// src/main.rs
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider};
use ethers::signers::Signer;
use jsonrpsee::server::{ServerBuilder, ServerHandle};
use tracing::{info, warn};

use gasless_sdk::config::RelayerConfig;
use gasless_sdk::logging;
use gasless_sdk::network::NetworkManager;
use gasless_sdk::relayer::{
    AdWalletSponsorContract, FileUsageStore, MemoryUsageStore, Relayer, UsageStore, DAILY_LIMIT,
};
use gasless_sdk::rpc::{RelayRpcImpl, RelayRpcServer};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short, long, env = "RPC_SERVER_ADDR", default_value = "127.0.0.1:8545")]
    rpc_server_addr: String,

    #[clap(short, long)]
    debug: bool,

    /// Persist daily usage counters to this JSON file instead of memory.
    #[clap(short, long, env = "USAGE_FILE")]
    usage_file: Option<PathBuf>,

    #[clap(long, env = "DAILY_LIMIT", default_value_t = DAILY_LIMIT)]
    daily_limit: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args = Args::parse();
    logging::init(args.debug)?;

    let networks = NetworkManager::with_defaults();
    let config = RelayerConfig::from_env(&networks)?;
    if config.chains.is_empty() {
        warn!("No chain has a sponsor key and contract configured; every relay will fail");
    }

    let usage: Arc<dyn UsageStore> = match &args.usage_file {
        Some(path) => Arc::new(FileUsageStore::open(path).await?),
        None => Arc::new(MemoryUsageStore::new()),
    };

    let mut relayer = Relayer::new(networks, usage).with_daily_limit(args.daily_limit);
    for chain in &config.chains {
        let provider = Provider::<Http>::try_from(chain.rpc_url.as_str())?;
        let wallet = chain.wallet()?.with_chain_id(chain.chain_id);
        info!(
            "Relaying on chain {} via {:?} from sponsor {:?}",
            chain.chain_id,
            chain.contract,
            wallet.address()
        );
        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        relayer.add_sponsor(
            chain.chain_id,
            Arc::new(AdWalletSponsorContract::new(chain.contract, client)),
        );
    }

    let server_addr: SocketAddr = args.rpc_server_addr.parse()?;
    let relay_rpc = RelayRpcImpl::new(Arc::new(relayer));

    info!("Starting gasless relayer RPC server on {}", server_addr);
    let server_handle = start_server(server_addr, relay_rpc).await?;

    tokio::signal::ctrl_c().await?;
    server_handle.stop()?;
    info!("Server stopped");

    Ok(())
}

async fn start_server(
    server_addr: SocketAddr,
    relay_rpc: RelayRpcImpl,
) -> anyhow::Result<ServerHandle> {
    let server = ServerBuilder::default().build(server_addr).await?;
    Ok(server.start(relay_rpc.into_rpc()))
}
