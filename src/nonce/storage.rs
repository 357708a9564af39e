//! Backing stores for the account → next-nonce map
//!
//! Stores are only touched while the nonce manager holds its lock, so they
//! need no synchronisation of their own.

use crate::error::{ClientError, ClientResult};

use ethers::types::Address;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

pub trait NonceStorage: Send {
    fn get(&self, account: &Address) -> Option<u64>;

    fn set(&mut self, account: Address, next_nonce: u64) -> ClientResult<()>;
}

/// Process-local store, lost on restart
#[derive(Debug, Default)]
pub struct MemoryStorage {
    nonces: HashMap<Address, u64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NonceStorage for MemoryStorage {
    fn get(&self, account: &Address) -> Option<u64> {
        self.nonces.get(account).copied()
    }

    fn set(&mut self, account: Address, next_nonce: u64) -> ClientResult<()> {
        self.nonces.insert(account, next_nonce);
        Ok(())
    }
}

/// JSON file store, rewritten through a temp file on every update
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    nonces: HashMap<Address, u64>,
}

impl FileStorage {
    /// Open `path`, loading existing entries when the file exists
    pub fn open(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref().to_path_buf();

        let nonces = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| ClientError::Storage(format!("read {:?}: {}", path, e)))?;
            let entries: BTreeMap<String, u64> = serde_json::from_str(&raw)
                .map_err(|e| ClientError::Storage(format!("parse {:?}: {}", path, e)))?;

            let mut nonces = HashMap::with_capacity(entries.len());
            for (key, next) in entries {
                match Address::from_str(&key) {
                    Ok(account) => {
                        nonces.insert(account, next);
                    }
                    Err(e) => warn!("Skipping invalid account {} in {:?}: {}", key, path, e),
                }
            }
            debug!("Loaded {} nonce entries from {:?}", nonces.len(), path);
            nonces
        } else {
            HashMap::new()
        };

        Ok(Self { path, nonces })
    }

    fn persist(&self) -> ClientResult<()> {
        let entries: BTreeMap<String, u64> = self
            .nonces
            .iter()
            .map(|(account, next)| (format!("{:?}", account), *next))
            .collect();
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| ClientError::Storage(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        let mut file = File::create(&tmp)
            .map_err(|e| ClientError::Storage(format!("create {:?}: {}", tmp, e)))?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| ClientError::Storage(format!("write {:?}: {}", tmp, e)))?;
        drop(file);

        std::fs::rename(&tmp, &self.path)
            .map_err(|e| ClientError::Storage(format!("rename to {:?}: {}", self.path, e)))?;

        sync_parent_dir(&self.path);
        Ok(())
    }
}

/// Make the rename durable; the file contents are already synced, so a
/// failure here is only logged
#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) else {
        return;
    };
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        warn!("Failed to sync directory {:?}: {}", dir, e);
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

impl NonceStorage for FileStorage {
    fn get(&self, account: &Address) -> Option<u64> {
        self.nonces.get(account).copied()
    }

    fn set(&mut self, account: Address, next_nonce: u64) -> ClientResult<()> {
        let previous = self.nonces.insert(account, next_nonce);
        if let Err(e) = self.persist() {
            // keep memory and disk in agreement
            match previous {
                Some(prev) => self.nonces.insert(account, prev),
                None => self.nonces.remove(&account),
            };
            return Err(e);
        }
        Ok(())
    }
}
