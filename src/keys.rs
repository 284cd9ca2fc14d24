//! Tag key management
//!
//! Every tag gets its own operational keys, diversified from a small set
//! of master keys: `CMAC-AES128(MasterKey, UID)`. Leaking one tag's key
//! reveals neither the master key nor any other tag's key.

use std::collections::BTreeMap;
use std::fmt;

use zeroize::Zeroize;

use crate::crypto::{self, AesKey};
use crate::error::{Error, Result};

/// Highest key slot on an NTAG 424 DNA (slots 0..=4)
pub const MAX_KEY_SLOT: u8 = 4;

/// Diversify `master` for the tag identified by `tag_id`
pub fn derive(master: &AesKey, tag_id: &[u8]) -> AesKey {
    crypto::cmac(master, tag_id)
}

/// Master key per key slot
///
/// Built once from configuration and read-only afterwards.
#[derive(Clone, Default)]
pub struct MasterKeySet {
    keys: BTreeMap<u8, AesKey>,
}

impl MasterKeySet {
    /// Build a key set, rejecting out-of-range and duplicate slots
    pub fn new(entries: impl IntoIterator<Item = (u8, AesKey)>) -> Result<Self> {
        let mut keys = BTreeMap::new();
        for (slot, key) in entries {
            if slot > MAX_KEY_SLOT {
                return Err(Error::InvalidParameter(format!(
                    "key slot {} out of range 0..={}",
                    slot, MAX_KEY_SLOT
                )));
            }
            if keys.insert(slot, key).is_some() {
                return Err(Error::InvalidParameter(format!(
                    "key slot {} configured twice",
                    slot
                )));
            }
        }
        Ok(Self { keys })
    }

    /// Look up the master key for a slot
    pub fn get(&self, slot: u8) -> Option<&AesKey> {
        self.keys.get(&slot)
    }

    /// Derive the tag-unique key for `slot`
    pub fn derive(&self, slot: u8, tag_id: &[u8]) -> Result<AesKey> {
        let master = self.get(slot).ok_or(Error::UnknownKeySlot(slot))?;
        Ok(derive(master, tag_id))
    }

    pub fn slots(&self) -> impl Iterator<Item = u8> + '_ {
        self.keys.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Debug for MasterKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKeySet")
            .field("slots", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Drop for MasterKeySet {
    fn drop(&mut self) {
        for key in self.keys.values_mut() {
            key.zeroize();
        }
    }
}
