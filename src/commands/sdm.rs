//! Secure Dynamic Messaging settings
//!
//! The SDM block of ChangeFileSettings:
//!
//!   SDMOptions(1) | SDMAccessRights(2) | offsets (3 bytes each, LE)
//!
//! Which offsets follow depends on how the tag mirrors its metadata:
//! in plain (SDMMetaRead = E) the UID and read counter each get an
//! offset; encrypted (SDMMetaRead = key) mirrors a single PICCData
//! cryptogram instead. The MAC offsets only exist when SDMFileRead
//! names a key.

use bytes::{BufMut, BytesMut};

use super::Access;
use crate::apdu::put_u24_le;
use crate::error::{Error, Result};
use crate::keys::MAX_KEY_SLOT;

const OPT_UID_MIRROR: u8 = 0x80;
const OPT_READ_CTR_MIRROR: u8 = 0x40;
const OPT_ASCII_ENCODING: u8 = 0x01;

/// How UID and read counter appear in the mirrored message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mirroring {
    /// Plain ASCII mirrors readable by anyone
    Plain {
        uid_offset: Option<u32>,
        counter_offset: Option<u32>,
    },
    /// One PICCData cryptogram under `key`
    Encrypted {
        key: u8,
        picc_data_offset: u32,
        mirror_uid: bool,
        mirror_counter: bool,
    },
}

/// Placement and key of the SDM MAC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdmMac {
    pub key: u8,
    /// Where MAC input starts in the file
    pub input_offset: u32,
    /// Where the tag writes the MAC
    pub mac_offset: u32,
}

/// Full SDM configuration for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdmConfig {
    pub mirroring: Mirroring,
    /// `None` disables the MAC (SDMFileRead = F)
    pub mac: Option<SdmMac>,
    /// Access condition for retrieving the SDM read counter
    pub counter_retrieval: Access,
    /// Mirror as ASCII hex rather than binary
    pub ascii: bool,
}

impl SdmConfig {
    fn options(&self) -> u8 {
        let (uid, counter) = match &self.mirroring {
            Mirroring::Plain {
                uid_offset,
                counter_offset,
            } => (uid_offset.is_some(), counter_offset.is_some()),
            Mirroring::Encrypted {
                mirror_uid,
                mirror_counter,
                ..
            } => (*mirror_uid, *mirror_counter),
        };

        let mut options = 0u8;
        if uid {
            options |= OPT_UID_MIRROR;
        }
        if counter {
            options |= OPT_READ_CTR_MIRROR;
        }
        if self.ascii {
            options |= OPT_ASCII_ENCODING;
        }
        options
    }

    /// `[RFU << 4 | CtrRet, MetaRead << 4 | FileRead]`
    fn access_rights(&self) -> Result<[u8; 2]> {
        let meta_read = match &self.mirroring {
            Mirroring::Plain { .. } => Access::Free,
            Mirroring::Encrypted { key, .. } => Access::Key(*key),
        };
        let file_read = match &self.mac {
            Some(mac) => Access::Key(mac.key),
            None => Access::Denied,
        };

        Ok([
            0xF0 | self.counter_retrieval.nibble()?,
            meta_read.nibble()? << 4 | file_read.nibble()?,
        ])
    }

    /// Append the SDM block to a ChangeFileSettings payload
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        if let Mirroring::Encrypted { key, .. } = &self.mirroring {
            check_key(*key, "PICCData")?;
        }
        if let Some(mac) = &self.mac {
            check_key(mac.key, "SDM MAC")?;
        }

        buf.put_u8(self.options());
        buf.put_slice(&self.access_rights()?);

        match &self.mirroring {
            Mirroring::Plain {
                uid_offset,
                counter_offset,
            } => {
                if let Some(offset) = uid_offset {
                    put_u24_le(buf, *offset, "UID offset")?;
                }
                if let Some(offset) = counter_offset {
                    put_u24_le(buf, *offset, "read counter offset")?;
                }
            }
            Mirroring::Encrypted {
                picc_data_offset, ..
            } => {
                put_u24_le(buf, *picc_data_offset, "PICCData offset")?;
            }
        }

        if let Some(mac) = &self.mac {
            put_u24_le(buf, mac.input_offset, "MAC input offset")?;
            put_u24_le(buf, mac.mac_offset, "MAC offset")?;
        }
        Ok(())
    }
}

fn check_key(key: u8, what: &str) -> Result<()> {
    if key > MAX_KEY_SLOT {
        return Err(Error::InvalidParameter(format!(
            "{} key {} out of range 0..={}",
            what, key, MAX_KEY_SLOT
        )));
    }
    Ok(())
}
