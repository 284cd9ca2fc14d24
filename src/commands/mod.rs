//! Configuration commands used during provisioning
//!
//! Each operation sends exactly one command and maps the tag's status
//! word to success or [`Error::Command`]. Nothing here retries: deciding
//! whether to re-authenticate and try again is up to the caller.

pub mod sdm;

use bytes::{BufMut, BytesMut};
use tracing::info;
use zeroize::Zeroizing;

use crate::apdu::{self, put_u24_le, CommandCode, StatusWord};
use crate::crypto::AesKey;
use crate::error::{Error, Result};
use crate::keys::MAX_KEY_SLOT;
use crate::messaging::{self, SecureCommand};
use crate::session::Session;
use crate::transport::Transport;

pub use sdm::{Mirroring, SdmConfig, SdmMac};

/// File option bit enabling Secure Dynamic Messaging
const FILE_OPTION_SDM: u8 = 0x40;

/// Access condition nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Requires authentication with this key slot
    Key(u8),
    /// Granted without authentication (E)
    Free,
    /// Never granted (F)
    Denied,
}

impl Access {
    pub fn nibble(self) -> Result<u8> {
        match self {
            Access::Key(k) if k <= MAX_KEY_SLOT => Ok(k),
            Access::Key(k) => Err(Error::InvalidParameter(format!(
                "access key {} out of range 0..={}",
                k, MAX_KEY_SLOT
            ))),
            Access::Free => Ok(0x0E),
            Access::Denied => Ok(0x0F),
        }
    }
}

/// Communication mode the tag enforces for a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommMode {
    Plain = 0x00,
    Mac = 0x01,
    Full = 0x03,
}

/// File access rights
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRights {
    pub read: Access,
    pub write: Access,
    pub read_write: Access,
    pub change: Access,
}

impl AccessRights {
    /// `[RW << 4 | Change, Read << 4 | Write]`
    pub fn to_bytes(&self) -> Result<[u8; 2]> {
        Ok([
            self.read_write.nibble()? << 4 | self.change.nibble()?,
            self.read.nibble()? << 4 | self.write.nibble()?,
        ])
    }
}

/// New settings for a standard data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSettings {
    pub comm_mode: CommMode,
    pub access_rights: AccessRights,
    pub sdm: Option<SdmConfig>,
}

impl FileSettings {
    /// `FileOption || AccessRights || [SDM block]`
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(32);
        let mut file_option = self.comm_mode as u8;
        if self.sdm.is_some() {
            file_option |= FILE_OPTION_SDM;
        }
        buf.put_u8(file_option);
        buf.put_slice(&self.access_rights.to_bytes()?);
        if let Some(sdm) = &self.sdm {
            sdm.encode(&mut buf)?;
        }
        Ok(buf.to_vec())
    }
}

/// Select the NTAG 424 DNA application (ISO SELECT)
pub fn select_application<T>(transport: &mut T) -> Result<()>
where
    T: Transport + ?Sized,
{
    let resp = transport.transmit(&apdu::select_application())?;
    let status = resp.status();
    if status != StatusWord::ISO_OK {
        return Err(Error::Command {
            command: 0xA4,
            status,
        });
    }
    info!("NTAG 424 application selected");
    Ok(())
}

/// ChangeFileSettings, sent encrypted and MACed
pub fn change_file_settings<T>(
    transport: &mut T,
    session: &mut Session,
    file_no: u8,
    settings: &FileSettings,
) -> Result<()>
where
    T: Transport + ?Sized,
{
    let command = SecureCommand::new(
        CommandCode::ChangeFileSettings as u8,
        vec![file_no],
        settings.to_payload()?,
    );
    messaging::exchange_full(transport, session, &command)?;
    info!("File {} settings changed", file_no);
    Ok(())
}

/// ChangeKey: `NewKey || KeyVer || OldKey`, old key sent as is
pub fn change_key<T>(
    transport: &mut T,
    session: &mut Session,
    key_no: u8,
    new_key: &AesKey,
    old_key: &AesKey,
    version: u8,
) -> Result<()>
where
    T: Transport + ?Sized,
{
    if key_no > MAX_KEY_SLOT {
        return Err(Error::InvalidParameter(format!(
            "key slot {} out of range 0..={}",
            key_no, MAX_KEY_SLOT
        )));
    }

    let mut payload = Zeroizing::new(Vec::with_capacity(33));
    payload.extend_from_slice(new_key);
    payload.push(version);
    payload.extend_from_slice(old_key);

    let command = SecureCommand::new(CommandCode::ChangeKey as u8, vec![key_no], payload.to_vec());
    messaging::exchange_full(transport, session, &command)?;
    info!("Key {} changed (version {})", key_no, version);
    Ok(())
}

/// WriteData with an unprotected body
///
/// Only accepted by the tag if the file's communication mode is Plain.
pub fn write_data_plain<T>(
    transport: &mut T,
    session: &mut Session,
    file_no: u8,
    offset: u32,
    data: &[u8],
) -> Result<()>
where
    T: Transport + ?Sized,
{
    let header = write_data_header(file_no, offset, data.len())?;
    messaging::exchange_plain(transport, session, CommandCode::WriteData as u8, &header, data)?;
    info!("Wrote {} bytes to file {} at offset {}", data.len(), file_no, offset);
    Ok(())
}

/// `FileNo || Offset(3, LE) || Length(3, LE)`
fn write_data_header(file_no: u8, offset: u32, len: usize) -> Result<Vec<u8>> {
    let len = u32::try_from(len)
        .map_err(|_| Error::InvalidParameter(format!("data length {} too large", len)))?;
    let mut buf = BytesMut::with_capacity(7);
    buf.put_u8(file_no);
    put_u24_le(&mut buf, offset, "write offset")?;
    put_u24_le(&mut buf, len, "write length")?;
    Ok(buf.to_vec())
}
