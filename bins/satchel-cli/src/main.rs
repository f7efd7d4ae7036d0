//! satchel-cli — Command-line front end for the Satchel wallet core.
//!
//! Creates and restores wallets, lists accounts, derives addresses and
//! estimates fees. Encrypted wallet records live in a local data directory;
//! there is no network transport, so chain queries see an empty chain.

mod storage;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use satchel_core::config::WalletConfig;
use satchel_core::constants::{COIN, CryptoCurrency, DEFAULT_FEE_PER_KB};
use satchel_core::types::Utxo;
use satchel_wallet::payment::fees;
use satchel_wallet::{OutputType, PayloadManager};
use tracing_subscriber::EnvFilter;

use crate::storage::{FileStorage, OfflineExplorer, Session};

type Manager = PayloadManager<FileStorage, OfflineExplorer>;

/// Satchel command-line wallet interface.
#[derive(Parser)]
#[command(name = "satchel-cli")]
#[command(version, about = "Non-custodial Bitcoin and Bitcoin Cash wallet.")]
struct Cli {
    /// Data directory (default: platform data dir + /satchel).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration file (default: <data dir>/satchel.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wallet management subcommands.
    Wallet {
        #[command(subcommand)]
        action: WalletAction,
    },
    /// Add an HD account.
    AddAccount(AddAccountArgs),
    /// Show the next unused address of an account.
    Address(AddressArgs),
    /// Estimate the fee of a transaction shape.
    Fee(FeeArgs),
}

#[derive(Subcommand)]
enum WalletAction {
    /// Create a new HD wallet.
    Create(WalletCreateArgs),
    /// Restore a wallet from its recovery phrase.
    Restore(WalletRestoreArgs),
    /// Show accounts and extended public keys.
    Show,
    /// Print the recovery phrase.
    Mnemonic,
    /// Upgrade the payload to the newest version.
    Upgrade,
    /// Change the main password.
    Password,
}

#[derive(Args)]
struct WalletCreateArgs {
    /// Email address registered with the wallet.
    #[arg(short, long)]
    email: Option<String>,
}

#[derive(Args)]
struct WalletRestoreArgs {
    /// Email address registered with the wallet.
    #[arg(short, long)]
    email: Option<String>,

    /// Prompt for a BIP39 passphrase.
    #[arg(long)]
    passphrase: bool,
}

#[derive(Args)]
struct AddAccountArgs {
    /// Label of the new account.
    #[arg(short, long)]
    label: Option<String>,
}

#[derive(Args)]
struct AddressArgs {
    /// Currency (btc or bch).
    #[arg(short, long, default_value = "btc")]
    currency: String,

    /// Account index.
    #[arg(short, long, default_value_t = 0)]
    account: usize,

    /// Show the next change address instead.
    #[arg(long, conflicts_with = "reserve")]
    change: bool,

    /// Reserve the receive address under this label.
    #[arg(long)]
    reserve: Option<String>,
}

#[derive(Args)]
struct FeeArgs {
    /// Number of legacy (P2PKH) inputs.
    #[arg(long, default_value_t = 1)]
    inputs: usize,

    /// Number of segwit (P2WPKH) inputs.
    #[arg(long, default_value_t = 0)]
    segwit_inputs: usize,

    /// Output type, repeatable (p2pkh, p2wpkh, p2sh, p2wsh).
    #[arg(short, long = "output", default_value = "p2pkh")]
    outputs: Vec<String>,

    /// Fee rate in satoshis per kilobyte.
    #[arg(short, long, default_value_t = DEFAULT_FEE_PER_KB)]
    fee_per_kb: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = resolve_data_dir(cli.data_dir.clone())?;
    let config_path = cli.config.clone().unwrap_or_else(|| data_dir.join("satchel.toml"));
    let config = WalletConfig::load(Some(&config_path))
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .init();

    match cli.command {
        Commands::Wallet { action } => match action {
            WalletAction::Create(args) => wallet_create(&data_dir, config, args),
            WalletAction::Restore(args) => wallet_restore(&data_dir, config, args),
            WalletAction::Show => wallet_show(&data_dir, config),
            WalletAction::Mnemonic => wallet_mnemonic(&data_dir, config),
            WalletAction::Upgrade => wallet_upgrade(&data_dir, config),
            WalletAction::Password => wallet_password(&data_dir, config),
        },
        Commands::AddAccount(args) => add_account(&data_dir, config, args),
        Commands::Address(args) => address(&data_dir, config, args),
        Commands::Fee(args) => fee(args),
    }
}

/// Create a new wallet and make it the default one.
fn wallet_create(data_dir: &Path, config: WalletConfig, args: WalletCreateArgs) -> Result<()> {
    let manager = open_manager(data_dir, config)?;
    let password = prompt_new_password()?;

    manager
        .create(&password, args.email.as_deref())
        .context("Failed to create wallet")?;
    let session = remember(&manager, data_dir)?;
    let words = manager.mnemonic(None).context("Failed to read recovery phrase")?;

    println!("\n=== WALLET CREATED ===");
    println!("Wallet ID: {}", session.guid);
    println!("\nRecovery phrase (write it down and keep it safe):");
    println!("{}", words.join(" "));
    Ok(())
}

/// Restore a wallet from its phrase, discovering used accounts.
fn wallet_restore(data_dir: &Path, config: WalletConfig, args: WalletRestoreArgs) -> Result<()> {
    let manager = open_manager(data_dir, config)?;

    let mnemonic = rpassword::prompt_password("Recovery phrase: ").context("Failed to read recovery phrase")?;
    let passphrase = if args.passphrase {
        prompt_password("BIP39 passphrase")?
    } else {
        String::new()
    };
    let password = prompt_new_password()?;

    manager
        .recover_from_mnemonic(mnemonic.trim(), &passphrase, &password, args.email.as_deref())
        .context("Failed to restore wallet")?;
    let session = remember(&manager, data_dir)?;
    let accounts = manager.with_wallet(|w| w.accounts().len())?;

    println!("\n=== WALLET RESTORED ===");
    println!("Wallet ID: {}", session.guid);
    println!("Accounts: {accounts}");
    Ok(())
}

fn wallet_show(data_dir: &Path, config: WalletConfig) -> Result<()> {
    let manager = load_wallet(data_dir, config)?;

    manager.with_wallet(|w| {
        println!("Wallet ID: {}", w.guid);
        println!("Payload version: {}", w.wrapper_version());
        println!("Second password: {}", if w.double_encryption { "yes" } else { "no" });
        println!("Imported addresses: {}", w.keys.len());
        for (i, account) in w.accounts().iter().enumerate() {
            let archived = if account.is_archived() { " (archived)" } else { "" };
            println!("\n[{i}] {}{archived}", account.label());
            for xpub in account.xpubs().xpubs {
                println!("    {:?}: {}", xpub.derivation, xpub.address);
            }
        }
    })?;
    Ok(())
}

fn wallet_mnemonic(data_dir: &Path, config: WalletConfig) -> Result<()> {
    let manager = load_wallet(data_dir, config)?;
    let second_password = prompt_second_password(&manager)?;

    let words = manager
        .mnemonic(second_password.as_deref())
        .context("Failed to read recovery phrase")?;
    println!("{}", words.join(" "));
    Ok(())
}

fn wallet_upgrade(data_dir: &Path, config: WalletConfig) -> Result<()> {
    let v4_enabled = config.v4_enabled;
    let manager = load_wallet(data_dir, config)?;
    let (v3, v4) = manager.with_wallet(|w| (w.is_upgraded_to_v3(), w.is_upgraded_to_v4()))?;
    if v4 || (v3 && !v4_enabled) {
        println!("Wallet is already up to date.");
        return Ok(());
    }

    let second_password = prompt_second_password(&manager)?;
    if !v3 {
        manager
            .upgrade_v2_to_v3(second_password.as_deref())
            .context("Failed to upgrade to version 3")?;
    }
    if v4_enabled {
        manager
            .upgrade_v3_to_v4(second_password.as_deref())
            .context("Failed to upgrade to version 4")?;
    }

    let version = manager.with_wallet(|w| w.wrapper_version())?;
    println!("Wallet upgraded to version {version}.");
    Ok(())
}

fn wallet_password(data_dir: &Path, config: WalletConfig) -> Result<()> {
    let manager = load_wallet(data_dir, config)?;
    let password = prompt_new_password()?;
    manager.update_password(&password).context("Failed to change password")?;
    println!("Password changed.");
    Ok(())
}

fn add_account(data_dir: &Path, config: WalletConfig, args: AddAccountArgs) -> Result<()> {
    let default_label = config.default_account_name.clone();
    let manager = load_wallet(data_dir, config)?;
    let second_password = prompt_second_password(&manager)?;

    let label = match args.label {
        Some(label) => label,
        None => manager.with_wallet(|w| w.next_account_label(&default_label))?,
    };
    let index = manager
        .add_account(&label, second_password.as_deref())
        .context("Failed to add account")?;
    println!("Added account [{index}] {label}");
    Ok(())
}

fn address(data_dir: &Path, config: WalletConfig, args: AddressArgs) -> Result<()> {
    let currency = parse_currency(&args.currency)?;
    let manager = load_wallet(data_dir, config)?;

    let address = match (&args.reserve, args.change) {
        (Some(label), _) => {
            if currency != CryptoCurrency::Btc {
                bail!("Only BTC receive addresses can be reserved");
            }
            manager.next_receive_address_and_reserve(args.account, label)
        }
        (None, true) => manager.next_change_address(currency, args.account),
        (None, false) => manager.next_receive_address(currency, args.account),
    }
    .context("Failed to derive address")?;

    println!("{address}");
    Ok(())
}

fn fee(args: FeeArgs) -> Result<()> {
    let outputs = args
        .outputs
        .iter()
        .map(|o| parse_output_type(o))
        .collect::<Result<Vec<_>>>()?;
    let mut inputs = vec![Utxo::default(); args.inputs];
    inputs.extend(std::iter::repeat_n(
        Utxo {
            is_segwit: true,
            ..Utxo::default()
        },
        args.segwit_inputs,
    ));
    if inputs.is_empty() {
        bail!("At least one input is required");
    }

    let size = fees::estimated_size(&inputs, &outputs);
    let fee = fees::estimated_fee(&inputs, &outputs, args.fee_per_kb);
    println!("Size: {size:.2} vbytes");
    println!("Fee: {fee} satoshis ({:.8})", fee as f64 / COIN as f64);
    if !fees::is_adequate_fee(&inputs, &outputs, fee) {
        println!("Warning: fee is below the relay minimum");
    }
    Ok(())
}

/// Build a manager over the data directory.
fn open_manager(data_dir: &Path, config: WalletConfig) -> Result<Manager> {
    let wallets = data_dir.join("wallets");
    let storage = FileStorage::open(&wallets)
        .with_context(|| format!("Failed to create wallet directory: {}", wallets.display()))?;
    Ok(PayloadManager::new(Arc::new(storage), Arc::new(OfflineExplorer), config))
}

/// Open the default wallet, prompting for its password.
fn load_wallet(data_dir: &Path, config: WalletConfig) -> Result<Manager> {
    let session_path = data_dir.join("session.json");
    let session = Session::load(&session_path)
        .with_context(|| format!("Failed to read {}", session_path.display()))?
        .context("No wallet found. Create one with `satchel-cli wallet create`")?;

    let manager = open_manager(data_dir, config)?;
    let password = prompt_password("Wallet password")?;
    manager
        .initialize_and_decrypt(&session.guid, &session.shared_key, &password)
        .context("Failed to open wallet")?;
    Ok(manager)
}

/// Record the loaded wallet as the default one.
fn remember(manager: &Manager, data_dir: &Path) -> Result<Session> {
    let session = manager.with_wallet(|w| Session {
        guid: w.guid.clone(),
        shared_key: w.shared_key.clone(),
    })?;
    let path = data_dir.join("session.json");
    session
        .store(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(session)
}

/// Prompt for a password securely (no echo).
fn prompt_password(prompt: &str) -> Result<String> {
    rpassword::prompt_password(format!("{}: ", prompt)).context("Failed to read password")
}

fn prompt_new_password() -> Result<String> {
    let password = prompt_password("New wallet password")?;
    if password.len() < 4 {
        bail!("Password must be at least 4 characters");
    }
    let confirm = prompt_password("Confirm password")?;
    if password != confirm {
        bail!("Passwords do not match");
    }
    Ok(password)
}

/// Second password, only asked for when the wallet is double encrypted.
fn prompt_second_password(manager: &Manager) -> Result<Option<String>> {
    if manager.with_wallet(|w| w.double_encryption)? {
        prompt_password("Second password").map(Some)
    } else {
        Ok(None)
    }
}

/// Resolve the data directory, using the platform default if not provided.
fn resolve_data_dir(path: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(p) = path {
        return Ok(p);
    }
    let base = dirs::data_dir().context("Could not determine data directory")?;
    Ok(base.join("satchel"))
}

fn parse_currency(s: &str) -> Result<CryptoCurrency> {
    match s.to_lowercase().as_str() {
        "btc" => Ok(CryptoCurrency::Btc),
        "bch" => Ok(CryptoCurrency::Bch),
        _ => bail!("Invalid currency (must be 'btc' or 'bch')"),
    }
}

fn parse_output_type(s: &str) -> Result<OutputType> {
    match s.to_lowercase().as_str() {
        "p2pkh" => Ok(OutputType::P2pkh),
        "p2wpkh" => Ok(OutputType::P2wpkh),
        "p2sh" => Ok(OutputType::P2sh),
        "p2wsh" => Ok(OutputType::P2wsh),
        _ => bail!("Invalid output type '{s}' (p2pkh, p2wpkh, p2sh or p2wsh)"),
    }
}
