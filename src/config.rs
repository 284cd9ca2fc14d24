use serde::Deserialize;
use std::fmt;
use std::path::Path;

use crate::crypto::AesKey;
use crate::keys::{MasterKeySet, MAX_KEY_SLOT};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub auth: AuthConfig,
    pub keys: KeysConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Key slot used for the EV2 handshake
    pub key_no: u8,
    /// Authenticate with CMAC(master, UID) instead of the master key itself
    #[serde(default)]
    pub diversify: bool,
}

#[derive(Debug, Deserialize)]
pub struct KeysConfig {
    pub master: Vec<MasterKeyEntry>,
}

#[derive(Deserialize)]
pub struct MasterKeyEntry {
    pub slot: u8,
    /// 32 hex characters
    pub key: String,
}

impl fmt::Debug for MasterKeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKeyEntry")
            .field("slot", &self.slot)
            .field("key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", path, e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
        if config.auth.key_no > MAX_KEY_SLOT {
            anyhow::bail!(
                "auth.key_no {} out of range 0..={}",
                config.auth.key_no,
                MAX_KEY_SLOT
            );
        }
        Ok(config)
    }

    /// Decode the configured master keys
    pub fn master_keys(&self) -> anyhow::Result<MasterKeySet> {
        let mut entries = Vec::with_capacity(self.keys.master.len());
        for entry in &self.keys.master {
            let bytes = hex::decode(entry.key.trim())
                .map_err(|e| anyhow::anyhow!("Master key for slot {} is not hex: {}", entry.slot, e))?;
            let key: AesKey = bytes.as_slice().try_into().map_err(|_| {
                anyhow::anyhow!(
                    "Master key for slot {} must be 16 bytes, got {}",
                    entry.slot,
                    bytes.len()
                )
            })?;
            entries.push((entry.slot, key));
        }
        MasterKeySet::new(entries).map_err(|e| anyhow::anyhow!("Invalid master key set: {}", e))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth: AuthConfig {
                key_no: 0,
                diversify: false,
            },
            keys: KeysConfig {
                master: (0..=MAX_KEY_SLOT)
                    .map(|slot| MasterKeyEntry {
                        slot,
                        key: "00000000000000000000000000000000".to_string(),
                    })
                    .collect(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}
