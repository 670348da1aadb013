//! Key sources: Argon2id passphrase → master key, or a raw hex key file

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use sealkv_crypto::{MasterKey, KEY_SIZE};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Size of the Argon2id salt kept next to the database
pub const SALT_SIZE: usize = 16;

/// Argon2id parameters for KDF
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Derive a 256-bit master key from a passphrase and salt using Argon2id.
pub fn derive_master_key(
    passphrase: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> Result<MasterKey> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| anyhow::anyhow!("invalid Argon2id params: {e}"))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut key[..])
        .map_err(|e| anyhow::anyhow!("Argon2id KDF failed: {e}"))?;

    Ok(MasterKey::from_bytes(*key))
}

/// `<db>.salt`
pub fn salt_path(db: &Path) -> PathBuf {
    let mut name = db.as_os_str().to_owned();
    name.push(".salt");
    PathBuf::from(name)
}

/// Read the salt at `path`, creating a random one on first use.
///
/// The salt is not secret, but losing it makes every passphrase-derived key
/// unrecoverable.
pub fn load_or_create_salt(path: &Path) -> Result<[u8; SALT_SIZE]> {
    if path.exists() {
        let raw = fs::read(path).with_context(|| format!("reading salt: {}", path.display()))?;
        return raw.as_slice().try_into().map_err(|_| {
            anyhow::anyhow!(
                "salt file {} must be {SALT_SIZE} bytes, found {}",
                path.display(),
                raw.len()
            )
        });
    }

    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("creating salt: {}", path.display()))?;
    file.write_all(&salt)
        .and_then(|()| file.sync_all())
        .with_context(|| format!("writing salt: {}", path.display()))?;
    tracing::info!(path = %path.display(), "created new salt");
    Ok(salt)
}

/// Read a master key stored as 64 hex characters (surrounding whitespace ignored).
pub fn read_key_file(path: &Path) -> Result<MasterKey> {
    let text = Zeroizing::new(
        fs::read_to_string(path).with_context(|| format!("reading key file: {}", path.display()))?,
    );
    let trimmed = text.trim();
    if trimmed.len() != KEY_SIZE * 2 {
        bail!(
            "key file {} must hold {} hex characters, found {}",
            path.display(),
            KEY_SIZE * 2,
            trimmed.len()
        );
    }
    let raw = Zeroizing::new(
        hex::decode(trimmed).with_context(|| format!("key file {} is not hex", path.display()))?,
    );
    MasterKey::try_from_slice(&raw).map_err(|e| anyhow::anyhow!("key file {}: {e}", path.display()))
}
