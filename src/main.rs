//! mintgate command line
//!
//! `serve` runs the membership API, card checkout and webhook. The other
//! subcommands run one fee-gated action with the configured keypair.

#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(unused_must_use)]

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use solana_sdk::pubkey::Pubkey;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mintgate::chain::rpc::RpcChainClient;
use mintgate::chain::wallet::{expand_home, KeypairWallet, WalletSigner};
use mintgate::chain::ChainClient;
use mintgate::clock::{Clock, SystemClock};
use mintgate::config::Config;
use mintgate::fees::FeeSchedule;
use mintgate::membership::client::HttpMembershipClient;
use mintgate::membership::service::{MembershipService, PaymentVerifier};
use mintgate::membership::session::MembershipSession;
use mintgate::membership::store::FileMembershipStore;
use mintgate::membership::{MembershipBackend, Plan};
use mintgate::orchestrator::TokenService;
use mintgate::server::stripe::{StripeClient, WebhookVerifier};
use mintgate::server::{self, AppState};
use mintgate::tx_builder::payment::{lamports_to_sol, Treasury};
use mintgate::types::{
    AuthorityKind, CreateTokenRequest, LogoFile, MetadataUpdateRequest, SocialLinks,
};
use mintgate::upload::cloudinary::CloudinaryStore;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the membership HTTP server
    Serve,
    /// Create a token with metadata
    CreateToken(CreateTokenArgs),
    /// Burn tokens from the wallet's associated account
    Burn {
        #[arg(long)]
        mint: String,
        /// Decimal amount, e.g. 12.5
        #[arg(long)]
        amount: String,
    },
    /// Update on-chain metadata and the off-chain document
    UpdateMetadata(UpdateMetadataArgs),
    /// Permanently lock a token's metadata
    MakeImmutable {
        #[arg(long)]
        mint: String,
    },
    /// Revoke the mint or freeze authority
    Revoke {
        #[arg(long)]
        mint: String,
        /// mint or freeze
        #[arg(long)]
        authority: String,
    },
    /// Buy a membership with SOL
    Purchase {
        /// weekly or monthly
        #[arg(long)]
        plan: String,
    },
    /// Show membership status
    Status {
        /// Defaults to the configured keypair
        #[arg(long)]
        wallet: Option<String>,
        /// Keep polling at the configured interval
        #[arg(long)]
        watch: bool,
    },
    /// Show on-chain and off-chain token information
    TokenInfo {
        #[arg(long)]
        mint: String,
    },
}

#[derive(Args, Debug)]
struct LinkArgs {
    #[arg(long)]
    website: Option<String>,
    #[arg(long)]
    twitter: Option<String>,
    #[arg(long)]
    telegram: Option<String>,
    #[arg(long)]
    discord: Option<String>,
}

impl LinkArgs {
    fn into_links(self) -> SocialLinks {
        SocialLinks {
            website: self.website,
            twitter: self.twitter,
            telegram: self.telegram,
            discord: self.discord,
        }
    }
}

#[derive(Args, Debug)]
struct CreateTokenArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    symbol: String,
    #[arg(long, default_value_t = 9)]
    decimals: u8,
    /// Whole tokens minted to the wallet
    #[arg(long)]
    supply: u64,
    #[arg(long, default_value = "")]
    description: String,
    /// JPEG, PNG or WebP, at most 5 MB
    #[arg(long)]
    logo: Option<PathBuf>,
    #[command(flatten)]
    links: LinkArgs,
    #[arg(long)]
    revoke_mint: bool,
    #[arg(long)]
    revoke_freeze: bool,
    #[arg(long)]
    lock_metadata: bool,
}

#[derive(Args, Debug)]
struct UpdateMetadataArgs {
    #[arg(long)]
    mint: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    symbol: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    logo: Option<PathBuf>,
    #[command(flatten)]
    links: LinkArgs,
    /// Lock the metadata in the same transaction
    #[arg(long)]
    lock: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(&config, cli.verbose)?;
    config.validate().context("Invalid configuration")?;

    info!(version = env!("CARGO_PKG_VERSION"), "mintgate starting");

    match cli.command {
        Command::Serve => run_server(&config).await,
        Command::Status { wallet, watch } => show_status(&config, wallet, watch).await,
        command => run_action(&config, command).await,
    }
}

/// Initialize logging subsystem
fn init_logging(config: &Config, verbose: bool) -> Result<()> {
    let default_filter = if verbose {
        "mintgate=debug,info".to_string()
    } else {
        config.logging.filter.clone()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
            .context("Failed to initialize logging")?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .context("Failed to initialize logging")?;
    }
    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        Config::from_file_with_env(path).with_context(|| format!("Failed to load config from {path}"))
    } else {
        // logging is not up yet
        eprintln!("config file {path} not found, using defaults and environment");
        Ok(Config::from_env())
    }
}

fn chain_client(config: &Config) -> Result<Arc<dyn ChainClient>> {
    let client = RpcChainClient::new(
        config.rpc.url.clone(),
        Duration::from_secs(config.rpc.timeout_secs),
        config.commitment()?,
    );
    info!(rpc_url = %client.url(), "RPC client ready");
    Ok(Arc::new(client))
}

fn local_membership(config: &Config, chain: Option<Arc<dyn ChainClient>>) -> Result<MembershipService> {
    let store = Arc::new(FileMembershipStore::new(&config.membership.data_dir));
    let service = MembershipService::new(store, Arc::new(SystemClock));
    match chain {
        Some(chain) => {
            let treasury = Treasury::parse(&config.treasury.wallet)
                .context("on-chain payment verification needs a treasury wallet")?;
            Ok(service.with_payment_verifier(PaymentVerifier::new(chain, treasury)))
        }
        None => Ok(service),
    }
}

fn membership_backend(config: &Config, chain: &Arc<dyn ChainClient>) -> Result<Arc<dyn MembershipBackend>> {
    match &config.membership.api_url {
        Some(url) => {
            info!(url = %url, "using remote membership service");
            Ok(Arc::new(HttpMembershipClient::new(
                url.clone(),
                Duration::from_secs(config.rpc.timeout_secs),
            )?))
        }
        None => Ok(Arc::new(local_membership(config, Some(chain.clone()))?)),
    }
}

async fn run_server(config: &Config) -> Result<()> {
    let chain = if config.server.verify_onchain_payments {
        Some(chain_client(config)?)
    } else {
        warn!("on-chain membership payments are recorded without verification");
        None
    };
    let membership = Arc::new(local_membership(config, chain)?);

    let stripe = if config.stripe.secret_key.trim().is_empty() {
        warn!("STRIPE_SECRET_KEY not set; card checkout disabled");
        None
    } else {
        Some(Arc::new(StripeClient::new(&config.stripe)?))
    };
    let webhook = if config.stripe.webhook_secret.trim().is_empty() {
        warn!("STRIPE_WEBHOOK_SECRET not set; webhook disabled");
        None
    } else {
        Some(Arc::new(WebhookVerifier::new(
            config.stripe.webhook_secret.clone(),
            Duration::from_secs(config.stripe.webhook_tolerance_secs),
        )))
    };

    let state = AppState {
        membership,
        stripe,
        webhook,
        clock: Arc::new(SystemClock),
        allow_unverified_updates: config.server.allow_unverified_updates
            && !config.server.verify_onchain_payments,
    };
    server::serve(state, &config.server.bind_addr).await
}

async fn show_status(config: &Config, wallet: Option<String>, watch: bool) -> Result<()> {
    let chain = chain_client(config)?;
    let backend = membership_backend(config, &chain)?;
    let wallet = match wallet {
        Some(w) => Pubkey::from_str(&w).with_context(|| format!("invalid wallet address {w}"))?,
        None => load_wallet(config)?.pubkey(),
    };

    let session = Arc::new(MembershipSession::new(wallet));
    session.apply_fetched(backend.fetch_status(&wallet).await?);
    print_status(&session);

    if watch {
        let interval = Duration::from_secs(config.membership.poll_interval_secs);
        let poller = session.clone().spawn_poller(backend, interval);
        let mut last = session.snapshot();
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = ticker.tick() => {
                    let current = session.snapshot();
                    if current != last {
                        print_status(&session);
                        last = current;
                    }
                }
            }
        }
        poller.abort();
    }
    Ok(())
}

fn print_status(session: &MembershipSession) {
    let status = session.snapshot();
    let now = SystemClock.now_ms();
    match status.expires_at {
        Some(expires_at) if session.is_active(now) => {
            let expires = chrono::DateTime::from_timestamp_millis(expires_at)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| expires_at.to_string());
            println!("{}: active until {expires}", session.wallet());
        }
        Some(_) => println!("{}: expired", session.wallet()),
        None => println!("{}: no membership", session.wallet()),
    }
}

fn load_wallet(config: &Config) -> Result<KeypairWallet> {
    KeypairWallet::from_file(expand_home(&config.wallet.keypair_path)).context("Failed to load wallet")
}

fn read_logo(path: &Path) -> Result<LogoFile> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read logo {}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let content_type = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("logo")
        .to_string();
    Ok(LogoFile {
        bytes,
        file_name,
        content_type: content_type.to_string(),
    })
}

fn parse_mint(raw: &str) -> Result<Pubkey> {
    Pubkey::from_str(raw).with_context(|| format!("invalid mint address {raw}"))
}

async fn run_action(config: &Config, command: Command) -> Result<()> {
    let chain = chain_client(config)?;
    let wallet = load_wallet(config)?;
    info!(wallet = %wallet.pubkey(), rpc = %config.rpc.url, "wallet loaded");

    let treasury = Treasury::parse(&config.treasury.wallet)?;
    let service = TokenService::new(
        chain.clone(),
        Arc::new(wallet),
        Arc::new(CloudinaryStore::new(&config.storage)?),
        membership_backend(config, &chain)?,
        treasury,
        FeeSchedule::from_config(&config.fees)?,
        config.submit_policy(),
    )
    .with_compute_unit_limit(config.transaction.compute_unit_limit);

    let outcome = dispatch(&service, command).await;
    if let Err(err) = &outcome {
        if let Some(fee_err) = err.downcast_ref::<mintgate::FeeGateError>() {
            eprintln!("{}", fee_err.user_message());
        }
    }
    outcome
}

async fn dispatch(service: &TokenService, command: Command) -> Result<()> {
    match command {
        Command::CreateToken(args) => {
            let logo = args.logo.as_deref().map(read_logo).transpose()?;
            let result = service
                .create_token(CreateTokenRequest {
                    name: args.name,
                    symbol: args.symbol,
                    decimals: args.decimals,
                    initial_supply: args.supply,
                    description: args.description,
                    logo,
                    links: args.links.into_links(),
                    revoke_mint_authority: args.revoke_mint,
                    revoke_freeze_authority: args.revoke_freeze,
                    lock_metadata: args.lock_metadata,
                })
                .await?;
            println!("mint:       {}", result.mint);
            println!("signature:  {}", result.signature);
            println!("metadata:   {}", result.metadata_uri);
            println!("fee:        {} SOL", lamports_to_sol(result.fee_lamports));
            match result.verifications {
                Some(v) => println!("verified:   {}", serde_json::to_string(&v)?),
                None => println!("verified:   unavailable (check the mint on an explorer)"),
            }
        }
        Command::Burn { mint, amount } => {
            let result = service.burn_tokens(&parse_mint(&mint)?, &amount).await?;
            println!("burned {amount} ({} base units)", result.burned_raw);
            println!("signature: {}", result.signature);
            println!("fee:       {} SOL", lamports_to_sol(result.fee_lamports));
        }
        Command::UpdateMetadata(args) => {
            let logo = args.logo.as_deref().map(read_logo).transpose()?;
            let links = args.links.into_links();
            let result = service
                .update_metadata(MetadataUpdateRequest {
                    mint: parse_mint(&args.mint)?,
                    name: args.name,
                    symbol: args.symbol,
                    description: args.description,
                    logo,
                    links: (!links.is_empty()).then_some(links),
                    make_immutable: args.lock,
                })
                .await?;
            println!("signature: {}", result.signature);
            println!("metadata:  {}", result.metadata_uri);
            println!("fee:       {} SOL", lamports_to_sol(result.fee_lamports));
        }
        Command::MakeImmutable { mint } => {
            let receipt = service.make_immutable(&parse_mint(&mint)?).await?;
            println!("signature: {}", receipt.signature);
            println!("fee:       {} SOL", lamports_to_sol(receipt.fee_lamports));
        }
        Command::Revoke { mint, authority } => {
            let kind = match authority.to_ascii_lowercase().as_str() {
                "mint" => AuthorityKind::Mint,
                "freeze" => AuthorityKind::Freeze,
                other => bail!("unknown authority {other:?}; use mint or freeze"),
            };
            let receipt = service.revoke_authority(&parse_mint(&mint)?, kind).await?;
            println!("signature: {}", receipt.signature);
            println!("fee:       {} SOL", lamports_to_sol(receipt.fee_lamports));
        }
        Command::Purchase { plan } => {
            let plan = Plan::from_str(&plan)?;
            let result = service.purchase_membership(plan).await?;
            println!("signature: {}", result.signature);
            println!("paid:      {} SOL", lamports_to_sol(result.fee_lamports));
            println!("status:    {}", serde_json::to_string(&result.status)?);
        }
        Command::TokenInfo { mint } => {
            let info = service.token_info(&parse_mint(&mint)?).await?;
            println!("mint:             {}", info.mint);
            println!("decimals:         {}", info.mint_state.decimals);
            println!("supply:           {}", info.mint_state.supply);
            println!("mint authority:   {}", display_authority(info.mint_state.mint_authority));
            println!("freeze authority: {}", display_authority(info.mint_state.freeze_authority));
            if let Some(meta) = &info.metadata {
                println!("name:             {}", meta.name);
                println!("symbol:           {}", meta.symbol);
                println!("uri:              {}", meta.uri);
                println!("mutable:          {}", meta.is_mutable);
            }
            if let Some(document) = &info.document {
                println!("document:         {}", serde_json::to_string_pretty(document)?);
            }
        }
        Command::Serve | Command::Status { .. } => bail!("not a wallet action"),
    }
    Ok(())
}

fn display_authority(authority: Option<Pubkey>) -> String {
    authority.map_or_else(|| "revoked".to_string(), |a| a.to_string())
}
