//! Command-line harness for exercising the account-state subsystem end to
//! end against a real RocksDB backend, without pulling in a full node.

use anyhow::{Context, Result};
use chainstate_account::{Account, AccountState, Address};
use chainstate_config::StateConfig;
use chainstate_crypto::{Hash, EMPTY_HASH};
use chainstate_storage::RocksDbStorage;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[clap(name = "chainstate-cli")]
#[clap(author, version, about = "Exercise the account-state subsystem from the command line", long_about = None)]
struct Cli {
    /// Configuration file path
    #[clap(short, long, value_name = "FILE", default_value = "state.toml")]
    config: String,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        #[clap(short, long, default_value = "state.toml")]
        output: String,
    },

    /// Credit an address with a balance, creating the account if needed
    Fund { address: String, amount: u128 },

    /// Move balance from one address to another
    Transfer { from: String, to: String, amount: u128 },

    /// Print an account's balance, nonce and storage root
    Show { address: String },

    /// Print the current account-state root
    Root,
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    if let Commands::Init { output } = &cli.command {
        return init_config(output);
    }

    let config = load_config(&cli.config)?;
    std::fs::create_dir_all(&config.storage.db_path)?;

    let storage: Arc<dyn chainstate_storage::Storage> = Arc::new(
        RocksDbStorage::open_with_options(
            &config.storage.db_path,
            config.storage.max_open_files,
            config.storage.cache_size_mb,
        )
        .context("opening RocksDB state backend")?,
    );

    let root_path = root_sidecar_path(&config.storage.db_path);
    let root = read_root(&root_path)?;
    let mut state = AccountState::new(root, storage)?;

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),
        Commands::Fund { address, amount } => {
            let addr = parse_address(&address)?;
            state.begin_batch()?;
            state.get_or_create_user_account(addr).add_balance(amount);
            state.commit()?;
            let new_root = state.root_hash();
            write_root(&root_path, new_root)?;
            info!(address = %addr, amount, root = %hex::encode(new_root), "funded account");
        }
        Commands::Transfer { from, to, amount } => {
            let from_addr = parse_address(&from)?;
            let to_addr = parse_address(&to)?;
            state.begin_batch()?;
            state.get_or_create_user_account(from_addr).sub_balance(amount)?;
            state.get_or_create_user_account(to_addr).add_balance(amount);
            state.commit()?;
            let new_root = state.root_hash();
            write_root(&root_path, new_root)?;
            info!(%from_addr, %to_addr, amount, root = %hex::encode(new_root), "transferred");
        }
        Commands::Show { address } => {
            let addr = parse_address(&address)?;
            match state.get_contract_account(addr) {
                Ok(account) => print_account(addr, account),
                Err(_) => {
                    let account = state.get_or_create_user_account(addr);
                    print_account(addr, account);
                }
            }
        }
        Commands::Root => {
            println!("{}", hex::encode(state.root_hash()));
        }
    }

    Ok(())
}

fn print_account(addr: Address, account: &Account) {
    println!("address:  {addr}");
    println!("balance:  {}", account.balance());
    println!("nonce:    {}", account.nonce());
    println!("vars_hash:{}", hex::encode(account.vars_hash()));
}

fn parse_address(s: &str) -> Result<Address> {
    let bytes = hex::decode(s.trim_start_matches("0x")).context("address is not valid hex")?;
    Address::try_from_slice(&bytes).map_err(|e| anyhow::anyhow!("{e}"))
}

fn init_config(output: &str) -> Result<()> {
    let config = StateConfig::default();
    config.to_file(Path::new(output))?;
    println!("configuration file created: {output}");
    Ok(())
}

fn load_config(path: &str) -> Result<StateConfig> {
    if Path::new(path).exists() {
        StateConfig::from_file(Path::new(path))
    } else {
        info!("configuration file not found, using defaults");
        Ok(StateConfig::default())
    }
}

fn root_sidecar_path(db_path: &Path) -> PathBuf {
    db_path.with_extension("root")
}

fn read_root(path: &Path) -> Result<Hash> {
    if !path.exists() {
        return Ok(EMPTY_HASH);
    }
    let raw = std::fs::read_to_string(path)?;
    let bytes = hex::decode(raw.trim())?;
    bytes.try_into().map_err(|_| anyhow::anyhow!("root sidecar file is not 32 bytes"))
}

fn write_root(path: &Path, root: Hash) -> Result<()> {
    std::fs::write(path, hex::encode(root))?;
    Ok(())
}

fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();
}
