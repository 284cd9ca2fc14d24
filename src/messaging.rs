//! EV2 secure messaging for one command
//!
//! Full-mode command layout:
//!
//!   Cmd | CmdHeader | E(SesAuthENCKey, IV, pad(CmdData)) | MACt(8)
//!
//! where
//!   IV   = AES(SesAuthENCKey, A5 5A | TI | CmdCtr(LE) | 00*8)
//!   MACt = odd bytes of CMAC(SesAuthMACKey, Cmd | CmdCtr(LE) | TI | CmdHeader | ciphertext)
//!
//! CmdCtr advances once per command the tag accepts. Anything else (a
//! rejected status, a dead reader) clears the session: the tag-side
//! counter can no longer be inferred, so the host re-authenticates.

use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::apdu::{self, StatusWord};
use crate::crypto::{self, AesKey, BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::session::Session;
use crate::transport::Transport;

/// Prefix of the IV input for host-to-tag command data
const COMMAND_IV_LABEL: [u8; 2] = [0xA5, 0x5A];

/// Length of the transmitted MAC
pub const MAC_LEN: usize = 8;

/// IV for the command sent with counter `counter`
pub fn command_iv(enc_key: &AesKey, ti: &[u8; 4], counter: u16) -> [u8; BLOCK_SIZE] {
    let mut input = [0u8; BLOCK_SIZE];
    input[..2].copy_from_slice(&COMMAND_IV_LABEL);
    input[2..6].copy_from_slice(ti);
    input[6..8].copy_from_slice(&counter.to_le_bytes());
    crypto::encrypt_block(enc_key, &input)
}

/// Pad and encrypt command data
pub fn encrypt_payload(enc_key: &AesKey, ti: &[u8; 4], counter: u16, payload: &[u8]) -> Result<Vec<u8>> {
    encrypt_with_iv(enc_key, &command_iv(enc_key, ti, counter), payload)
}

fn encrypt_with_iv(enc_key: &AesKey, iv: &[u8; BLOCK_SIZE], payload: &[u8]) -> Result<Vec<u8>> {
    let mut padded = crypto::iso7816_pad(payload);
    let ciphertext = crypto::cbc_encrypt(enc_key, iv, &padded);
    padded.zeroize();
    ciphertext
}

/// Decrypt command data and strip the padding
///
/// This is the tag's view of [`encrypt_payload`].
pub fn decrypt_payload(enc_key: &AesKey, ti: &[u8; 4], counter: u16, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let iv = command_iv(enc_key, ti, counter);
    let mut padded = crypto::cbc_decrypt(enc_key, &iv, ciphertext)?;
    let plain = crypto::iso7816_unpad(&padded).map(|p| p.to_vec());
    padded.zeroize();
    plain
}

/// Truncated MAC over a protected command
pub fn command_mac(
    mac_key: &AesKey,
    code: u8,
    counter: u16,
    ti: &[u8; 4],
    header: &[u8],
    ciphertext: &[u8],
) -> [u8; MAC_LEN] {
    let mut input = Vec::with_capacity(7 + header.len() + ciphertext.len());
    input.push(code);
    input.extend_from_slice(&counter.to_le_bytes());
    input.extend_from_slice(ti);
    input.extend_from_slice(header);
    input.extend_from_slice(ciphertext);
    truncate_mac(&crypto::cmac(mac_key, &input))
}

/// Keep bytes 1, 3, 5, ..., 15 of a full CMAC
pub fn truncate_mac(full: &[u8; BLOCK_SIZE]) -> [u8; MAC_LEN] {
    let mut out = [0u8; MAC_LEN];
    for (dst, src) in out.iter_mut().zip(full.iter().skip(1).step_by(2)) {
        *dst = *src;
    }
    out
}

/// Plaintext command before protection
pub struct SecureCommand {
    pub code: u8,
    pub header: Vec<u8>,
    payload: Vec<u8>,
}

impl SecureCommand {
    pub fn new(code: u8, header: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            code,
            header,
            payload,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Encrypt and MAC with the session's current counter
    pub fn protect(&self, session: &Session) -> Result<ProtectedCommand> {
        let live = session.active()?;
        let iv = command_iv(&live.keys.enc, &live.ti, live.counter);
        let ciphertext = encrypt_with_iv(&live.keys.enc, &iv, &self.payload)?;
        let mac = command_mac(
            &live.keys.mac,
            self.code,
            live.counter,
            &live.ti,
            &self.header,
            &ciphertext,
        );

        Ok(ProtectedCommand {
            code: self.code,
            header: self.header.clone(),
            iv,
            ciphertext,
            mac,
        })
    }
}

impl Drop for SecureCommand {
    fn drop(&mut self) {
        self.payload.zeroize();
    }
}

/// Command after encryption, ready to send
#[derive(Debug, Clone)]
pub struct ProtectedCommand {
    pub code: u8,
    pub header: Vec<u8>,
    pub iv: [u8; BLOCK_SIZE],
    pub ciphertext: Vec<u8>,
    pub mac: [u8; MAC_LEN],
}

impl ProtectedCommand {
    /// `header || ciphertext || mac`
    pub fn body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.header.len() + self.ciphertext.len() + MAC_LEN);
        body.extend_from_slice(&self.header);
        body.extend_from_slice(&self.ciphertext);
        body.extend_from_slice(&self.mac);
        body
    }
}

/// Send a command in full (encrypted + MAC) mode
///
/// Returns the response data on `91 00`.
pub fn exchange_full<T>(transport: &mut T, session: &mut Session, command: &SecureCommand) -> Result<Vec<u8>>
where
    T: Transport + ?Sized,
{
    let protected = command.protect(session)?;
    exchange(transport, session, command.code, &protected.body())
}

/// Send a command whose body travels unprotected
///
/// Still bound to the session: it needs one and advances its counter.
pub fn exchange_plain<T>(
    transport: &mut T,
    session: &mut Session,
    code: u8,
    header: &[u8],
    data: &[u8],
) -> Result<Vec<u8>>
where
    T: Transport + ?Sized,
{
    session.active()?;
    let mut body = Vec::with_capacity(header.len() + data.len());
    body.extend_from_slice(header);
    body.extend_from_slice(data);
    exchange(transport, session, code, &body)
}

fn exchange<T>(transport: &mut T, session: &mut Session, code: u8, body: &[u8]) -> Result<Vec<u8>>
where
    T: Transport + ?Sized,
{
    let counter = session.active()?.counter;
    if counter == u16::MAX {
        // the tag would accept this command but the host could never follow it
        session.invalidate();
        return Err(Error::Authentication(
            "command counter exhausted, re-authenticate".to_string(),
        ));
    }
    let apdu = apdu::wrap_native(code, body)?;
    debug!("Command 0x{:02X} with CmdCtr {} ({} byte body)", code, counter, body.len());

    let resp = match transport.transmit(&apdu) {
        Ok(resp) => resp,
        Err(e) => {
            warn!("Transport failed during command 0x{:02X}, dropping session", code);
            session.invalidate();
            return Err(e.into());
        }
    };

    let status = resp.status();
    if status != StatusWord::OK {
        warn!("Command 0x{:02X} rejected with {}, dropping session", code, status);
        session.invalidate();
        return Err(Error::Command {
            command: code,
            status,
        });
    }

    session.advance()?;
    Ok(resp.data)
}
