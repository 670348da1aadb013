//! sealkv: command-line access to an encrypted sealkv database
//!
//! Usage:
//!   sealkv [--config FILE] [--key-file FILE] <DB> <COMMAND>
//!
//! Commands:
//!   get <path>            - print the raw value at <path>
//!   set <path> [value]    - store a value (read from stdin when omitted)
//!   del <path>...         - delete one or more values atomically
//!   keys [path]           - list leaf keys of the values directly under [path]
//!   dump [path]           - print path<TAB>value for each value under [path]
//!   dir [path]            - list child buckets of [path]
//!   backup <dest>         - write a consistent copy of the database to <dest>
//!
//! Without --key-file the master key is derived from a passphrase
//! (SEALKV_PASSPHRASE or an interactive prompt) with Argon2id, salted by
//! `<DB>.salt`.

mod config;
mod kdf;

use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sealkv::Db;
use sealkv_crypto::MasterKey;
use secrecy::SecretString;
use tracing::debug;

use crate::config::{load_config, CliConfig};

const PASSPHRASE_ENV: &str = "SEALKV_PASSPHRASE";

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "sealkv", version, about = "Encrypted path-addressed key-value store")]
struct Cli {
    /// Path to sealkv.toml configuration file
    #[arg(long, short = 'c', env = "SEALKV_CONFIG", default_value = "sealkv.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "SEALKV_LOG")]
    log: Option<String>,

    /// Log format (json, text)
    #[arg(long, env = "SEALKV_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// File holding the 256-bit master key as 64 hex characters
    #[arg(long, short = 'k', env = "SEALKV_KEY_FILE")]
    key_file: Option<PathBuf>,

    /// Database file
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the raw value stored at a path
    Get { path: String },

    /// Store a value at a path, creating buckets as needed
    Set {
        path: String,
        /// Value to store (default: read all of stdin)
        value: Option<String>,
    },

    /// Delete values; nothing is deleted unless every bucket exists
    Del {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// List the leaf keys of the values directly under a bucket
    Keys {
        #[arg(default_value = "")]
        path: String,
    },

    /// Print path<TAB>value for every value directly under a bucket
    Dump {
        #[arg(default_value = "")]
        path: String,
    },

    /// List the child buckets of a bucket
    Dir {
        #[arg(default_value = "")]
        path: String,
    },

    /// Write a consistent copy of the database to a new file
    Backup { dest: PathBuf },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let level = cli
        .log
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "warn".to_string());
    init_logging(&level, &cli.log_format);

    debug!(
        version = env!("CARGO_PKG_VERSION"),
        db = %cli.db.display(),
        scheme = %config.store.segment_scheme,
        "sealkv starting"
    );

    let master = master_key(&cli, &config)?;
    let db = Db::open(&cli.db, master.as_bytes(), &config.store)
        .with_context(|| format!("opening {}", cli.db.display()))?;
    drop(master);

    let result = run(&db, cli.command);
    db.close().context("closing database")?;
    result
}

fn run(db: &Db, command: Commands) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        Commands::Get { path } => {
            let value = db
                .get(&path)
                .with_context(|| format!("get {path}"))?
                .with_context(|| format!("no value at {path}"))?;
            out.write_all(&value)?;
        }
        Commands::Set { path, value } => {
            let value = match value {
                Some(v) => v.into_bytes(),
                None => read_stdin()?,
            };
            db.set(&path, &value).with_context(|| format!("set {path}"))?;
        }
        Commands::Del { paths } => {
            db.del_many(paths.as_slice()).context("del")?;
        }
        Commands::Keys { path } => {
            for key in db.all_keys(&path).with_context(|| format!("keys {path}"))? {
                writeln!(out, "{key}")?;
            }
        }
        Commands::Dump { path } => {
            for (key, value) in db.all(&path).with_context(|| format!("dump {path}"))? {
                writeln!(out, "{key}\t{}", String::from_utf8_lossy(&value))?;
            }
        }
        Commands::Dir { path } => {
            for name in db.dir(&path).with_context(|| format!("dir {path}"))? {
                writeln!(out, "{name}")?;
            }
        }
        Commands::Backup { dest } => {
            let bytes = db
                .backup_to_path(&dest)
                .with_context(|| format!("backup to {}", dest.display()))?;
            writeln!(out, "wrote {bytes} bytes to {}", dest.display())?;
        }
    }
    out.flush()?;
    Ok(())
}

fn read_stdin() -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    io::stdin()
        .read_to_end(&mut buf)
        .context("reading value from stdin")?;
    Ok(buf)
}

// ── Key material ──────────────────────────────────────────────────────────────

fn master_key(cli: &Cli, config: &CliConfig) -> Result<MasterKey> {
    if let Some(path) = &cli.key_file {
        return kdf::read_key_file(path);
    }

    let passphrase = read_passphrase()?;
    let salt = kdf::load_or_create_salt(&kdf::salt_path(&cli.db))?;
    kdf::derive_master_key(&passphrase, &salt, &config.kdf)
}

fn read_passphrase() -> Result<SecretString> {
    if let Ok(pass) = std::env::var(PASSPHRASE_ENV) {
        return Ok(SecretString::from(pass));
    }
    let pass = rpassword::prompt_password("sealkv passphrase: ").context("reading passphrase")?;
    Ok(SecretString::from(pass))
}

// ── Logging ───────────────────────────────────────────────────────────────────

/// Logs go to stderr so stdout carries nothing but command output and can
/// be piped (`sealkv vault.redb get blob > blob.bin`).
fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
        }
    }
}
