use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fractions::{
    access::SingleAdmin,
    audit::{Attestation, AuditorSet, SignedAttestation},
    config::{LedgerConfig, DEFAULT_CONFIG_FILE},
    ledger::{Address, Amount, Fractions, PropertyId},
    store::{LocalLedger, StateFile},
    units::{format_units, parse_units},
};

//==================== CLI ====================//

#[derive(Parser)]
#[command(name = "fractions", version, about = "Fixed-price fractional property ledger")]
struct Cli {
    /// TOML config file; defaults are used when it does not exist
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Identity performing the operation (defaults to the configured admin)
    #[arg(long, global = true)]
    caller: Option<Address>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty state file from the config
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Mint a new property split into a fixed number of fractions [admin]
    Mint {
        #[arg(long)]
        fractions: Fractions,
    },
    /// Buy fractions from the reserve pool
    Buy {
        #[command(flatten)]
        target: Target,
        /// Payment in whole units, e.g. 1.5; defaults to the exact cost
        #[arg(long)]
        payment: Option<String>,
    },
    /// Sell fractions back to the reserve pool
    Sell {
        #[command(flatten)]
        target: Target,
    },
    /// Replace the buy and sell prices [admin]
    SetPrices {
        #[arg(long)]
        buy: String,
        #[arg(long)]
        sell: String,
    },
    /// Send all pooled funds to the admin [admin]
    Withdraw,
    /// Print prices, pooled funds and per-property supply
    Show,
    /// Print a holder's balance for a property
    Balance {
        #[arg(long)]
        property: PropertyId,
        /// Defaults to --caller
        #[arg(long)]
        holder: Option<Address>,
    },
    /// Print the registry owner of a property
    Owner {
        #[arg(long)]
        property: PropertyId,
    },
    /// Print cost to buy and payout for selling an amount of fractions
    Quote {
        #[arg(long)]
        amount: Fractions,
    },
    /// Print the event log
    Events,
    /// Print (or write) a snapshot with its state root
    Snapshot {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate an ed25519 auditor keypair
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Sign an attestation of the current snapshot
    Attest {
        /// 32-byte ed25519 secret key in hex
        #[arg(long)]
        sk_hex: String,
        #[arg(long)]
        auditor: String,
        /// Attestation file; an existing attestation of the same state is co-signed
        #[arg(long)]
        out: PathBuf,
    },
    /// Verify an attestation against a set of auditor keys
    VerifyAttestation {
        #[arg(long)]
        file: PathBuf,
        /// Auditor key as <id>=<64-hex public key>; repeatable
        #[arg(long = "pk", required = true)]
        keys: Vec<String>,
        #[arg(long, default_value_t = 1)]
        quorum: usize,
    },
}

#[derive(Args)]
struct Target {
    #[arg(long)]
    property: PropertyId,
    #[arg(long)]
    amount: Fractions,
}

//==================== helpers ====================//

struct Session {
    config: LedgerConfig,
    caller: Address,
}

impl Session {
    fn open(&self) -> Result<LocalLedger> {
        let path = &self.config.state_file;
        let state = StateFile::load(path)
            .with_context(|| format!("run `fractions init` to create {}", path.display()))?;
        let ledger = state.into_ledger(
            &self.config.ledger_id,
            SingleAdmin::new(self.config.admin.clone()),
        )?;
        Ok(ledger)
    }

    fn commit(&self, ledger: LocalLedger) -> Result<()> {
        StateFile::from_ledger(ledger).save(&self.config.state_file)?;
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(value)?;
    fs::write(path, json).with_context(|| format!("write {}", path.display()))
}

fn parse_amount(flag: &str, value: &str) -> Result<Amount> {
    parse_units(value).with_context(|| format!("invalid --{flag}"))
}

fn decode_key<const N: usize>(name: &str, value: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(value.trim()).with_context(|| format!("invalid {name}"))?;
    let Ok(arr) = <[u8; N]>::try_from(bytes.as_slice()) else {
        bail!("{name} must be {N} bytes ({} hex chars)", N * 2);
    };
    Ok(arr)
}

fn parse_auditor_key(spec: &str) -> Result<(String, VerifyingKey)> {
    let Some((id, key_hex)) = spec.split_once('=') else {
        bail!("--pk must look like <id>=<hex>, got {spec:?}");
    };
    let bytes = decode_key::<32>("--pk", key_hex)?;
    let key = VerifyingKey::from_bytes(&bytes)
        .with_context(|| format!("--pk for {id} is not a valid ed25519 key"))?;
    Ok((id.to_string(), key))
}

//==================== ledger commands ====================//

#[derive(Serialize)]
struct PropertySummary {
    property_id: PropertyId,
    total_fractions: Fractions,
    available: Fractions,
    holders: usize,
}

#[derive(Serialize)]
struct Overview {
    ledger_id: Address,
    admin: Address,
    buy_price: String,
    sell_price: String,
    pooled_funds: String,
    next_property_id: PropertyId,
    height: u64,
    properties: Vec<PropertySummary>,
}

fn init_cmd(session: &Session, force: bool) -> Result<()> {
    let path = &session.config.state_file;
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let prices = session.config.price_schedule()?;
    StateFile::fresh(&session.config.ledger_id, prices).save(path)?;
    println!("initialized ledger {} → {}", session.config.ledger_id, path.display());
    Ok(())
}

fn mint_cmd(session: &Session, fractions: Fractions) -> Result<()> {
    let mut ledger = session.open()?;
    let property_id = ledger.mint_property(&session.caller, fractions)?;
    session.commit(ledger)?;
    println!("minted property {property_id} with {fractions} fractions");
    Ok(())
}

fn buy_cmd(session: &Session, target: &Target, payment: Option<&str>) -> Result<()> {
    let mut ledger = session.open()?;
    let payment = match payment {
        Some(value) => parse_amount("payment", value)?,
        None => ledger.cost_to_buy(target.amount)?,
    };
    ledger.buy_fraction(&session.caller, target.property, target.amount, payment)?;
    let balance = ledger.balance_of(target.property, &session.caller)?;
    session.commit(ledger)?;
    println!(
        "{} bought {} fractions of property {} for {} (balance {})",
        session.caller,
        target.amount,
        target.property,
        format_units(payment),
        balance
    );
    Ok(())
}

fn sell_cmd(session: &Session, target: &Target) -> Result<()> {
    let mut ledger = session.open()?;
    let payout = ledger.sell_fraction(&session.caller, target.property, target.amount)?;
    let balance = ledger.balance_of(target.property, &session.caller)?;
    session.commit(ledger)?;
    println!(
        "{} sold {} fractions of property {} for {} (balance {})",
        session.caller,
        target.amount,
        target.property,
        format_units(payout),
        balance
    );
    Ok(())
}

fn set_prices_cmd(session: &Session, buy: &str, sell: &str) -> Result<()> {
    let buy = parse_amount("buy", buy)?;
    let sell = parse_amount("sell", sell)?;
    let mut ledger = session.open()?;
    ledger.set_prices(&session.caller, buy, sell)?;
    session.commit(ledger)?;
    println!(
        "prices set: buy {} / sell {}",
        format_units(buy),
        format_units(sell)
    );
    Ok(())
}

fn withdraw_cmd(session: &Session) -> Result<()> {
    let mut ledger = session.open()?;
    let amount = ledger.withdraw(&session.caller)?;
    session.commit(ledger)?;
    println!("withdrew {} to {}", format_units(amount), session.config.admin);
    Ok(())
}

fn show_cmd(session: &Session) -> Result<()> {
    let ledger = session.open()?;
    let state = ledger.state();
    let overview = Overview {
        ledger_id: state.ledger_id.clone(),
        admin: session.config.admin.clone(),
        buy_price: format_units(ledger.buy_price()),
        sell_price: format_units(ledger.sell_price()),
        pooled_funds: format_units(ledger.pooled_funds()),
        next_property_id: ledger.next_property_id(),
        height: state.height,
        properties: state
            .properties
            .iter()
            .map(|(id, p)| PropertySummary {
                property_id: *id,
                total_fractions: p.total_fractions,
                available: p.reserve,
                holders: p.holders.len(),
            })
            .collect(),
    };
    print_json(&overview)
}

fn balance_cmd(session: &Session, property: PropertyId, holder: Option<&str>) -> Result<()> {
    let ledger = session.open()?;
    let holder = holder.unwrap_or(&session.caller);
    let balance = ledger.balance_of(property, holder)?;
    println!("{holder}: {balance} of {} fractions", ledger.total_fractions(property)?);
    Ok(())
}

fn owner_cmd(session: &Session, property: PropertyId) -> Result<()> {
    let ledger = session.open()?;
    println!("{}", ledger.owner_of_registry_entry(property)?);
    Ok(())
}

fn quote_cmd(session: &Session, amount: Fractions) -> Result<()> {
    let ledger = session.open()?;
    println!(
        "buy {amount}: {} / sell {amount}: {}",
        format_units(ledger.cost_to_buy(amount)?),
        format_units(ledger.payout_for_sell(amount)?)
    );
    Ok(())
}

fn events_cmd(session: &Session) -> Result<()> {
    let ledger = session.open()?;
    for event in ledger.events() {
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(())
}

fn snapshot_cmd(session: &Session, out: Option<&Path>) -> Result<()> {
    let snapshot = session.open()?.snapshot();
    match out {
        Some(path) => {
            write_json(path, &snapshot)?;
            println!(
                "snapshot at height {} (root {}) → {}",
                snapshot.height,
                snapshot.state_root_hex(),
                path.display()
            );
            Ok(())
        }
        None => print_json(&snapshot),
    }
}

//==================== audit commands ====================//

fn keygen_cmd(out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("create {}", out_dir.display()))?;
    let mut sk_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut sk_bytes);
    let sk = SigningKey::from_bytes(&sk_bytes);
    let pk = sk.verifying_key();
    fs::write(out_dir.join("sk.hex"), hex::encode(sk_bytes))?;
    fs::write(out_dir.join("pk.hex"), hex::encode(pk.as_bytes()))?;
    println!("keypair written → {}", out_dir.display());
    Ok(())
}

fn attest_cmd(session: &Session, sk_hex: &str, auditor: &str, out: &Path) -> Result<()> {
    let sk = SigningKey::from_bytes(&decode_key::<32>("--sk-hex", sk_hex)?);
    let attestation = Attestation::of(&session.open()?.snapshot());

    let mut signed = SignedAttestation::new(attestation.clone());
    if out.exists() {
        let bytes = fs::read(out).with_context(|| format!("read {}", out.display()))?;
        let existing: SignedAttestation = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse {}", out.display()))?;
        if existing.attestation == attestation {
            signed = existing;
        } else {
            tracing::warn!(path = %out.display(), "existing attestation is for another state, replacing it");
        }
    }
    signed.sign(auditor, &sk);
    write_json(out, &signed)?;
    println!(
        "{auditor} attested height {} ({} signatures) → {}",
        attestation.height,
        signed.signatures.len(),
        out.display()
    );
    Ok(())
}

fn verify_attestation_cmd(
    session: &Session,
    file: &Path,
    keys: &[String],
    quorum: usize,
) -> Result<()> {
    let bytes = fs::read(file).with_context(|| format!("read {}", file.display()))?;
    let signed: SignedAttestation =
        serde_json::from_slice(&bytes).with_context(|| format!("parse {}", file.display()))?;
    let members = keys
        .iter()
        .map(|spec| parse_auditor_key(spec))
        .collect::<Result<Vec<_>>>()?;
    AuditorSet::new(members, quorum).verify(&signed)?;

    let current = match session.open() {
        Ok(ledger) => signed.attestation.matches(&ledger.snapshot()),
        Err(err) => {
            tracing::debug!(%err, "no local ledger to compare against");
            false
        }
    };
    println!(
        "attestation OK: height {}, {} signatures, matches local state: {}",
        signed.attestation.height,
        signed.signatures.len(),
        current
    );
    Ok(())
}

//==================== main ====================//

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = LedgerConfig::load(&cli.config)?;
    let caller = cli.caller.unwrap_or_else(|| config.admin.clone());
    let session = Session { config, caller };

    match &cli.command {
        Command::Init { force } => init_cmd(&session, *force),
        Command::Mint { fractions } => mint_cmd(&session, *fractions),
        Command::Buy { target, payment } => buy_cmd(&session, target, payment.as_deref()),
        Command::Sell { target } => sell_cmd(&session, target),
        Command::SetPrices { buy, sell } => set_prices_cmd(&session, buy, sell),
        Command::Withdraw => withdraw_cmd(&session),
        Command::Show => show_cmd(&session),
        Command::Balance { property, holder } => {
            balance_cmd(&session, *property, holder.as_deref())
        }
        Command::Owner { property } => owner_cmd(&session, *property),
        Command::Quote { amount } => quote_cmd(&session, *amount),
        Command::Events => events_cmd(&session),
        Command::Snapshot { out } => snapshot_cmd(&session, out.as_deref()),
        Command::Keygen { out_dir } => keygen_cmd(out_dir),
        Command::Attest {
            sk_hex,
            auditor,
            out,
        } => attest_cmd(&session, sk_hex, auditor, out),
        Command::VerifyAttestation {
            file,
            keys,
            quorum,
        } => verify_attestation_cmd(&session, file, keys, *quorum),
    }
}
