//! ISO 7816-4 command framing for NTAG 424 DNA
//!
//! Native commands are wrapped into ISO APDUs:
//!
//!   CLA(0x90) | INS(cmd) | P1(0x00) | P2(0x00) | Lc | data | Le(0x00)
//!
//! Only short APDUs are produced, so a command body is capped at 255 bytes.

use bytes::{BufMut, BytesMut};
use std::fmt;

use crate::error::{Error, Result};

/// Class byte for wrapped native commands
pub const NATIVE_CLA: u8 = 0x90;

/// Application identifier of the NTAG 424 DNA NDEF application
pub const NTAG424_AID: [u8; 7] = [0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];

/// Largest body a short APDU can carry
pub const MAX_BODY_LEN: usize = 255;

/// Native command codes (INS byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
    AuthenticateEv2First = 0x71,
    AdditionalFrame = 0xAF,
    ChangeFileSettings = 0x5F,
    ChangeKey = 0xC4,
    WriteData = 0x8D,
}

/// Two-byte status trailer of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusWord {
    pub sw1: u8,
    pub sw2: u8,
}

impl StatusWord {
    /// ISO command completed (SELECT and other ISO-class commands)
    pub const ISO_OK: StatusWord = StatusWord::new(0x90, 0x00);
    /// Native command completed
    pub const OK: StatusWord = StatusWord::new(0x91, 0x00);
    /// Native command expects another frame
    pub const ADDITIONAL_FRAME: StatusWord = StatusWord::new(0x91, 0xAF);

    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Short description for the native status codes the tag can return
    pub fn describe(&self) -> Option<&'static str> {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) | (0x91, 0x00) => Some("success"),
            (0x91, 0xAF) => Some("additional frame expected"),
            (0x91, 0x1C) => Some("illegal command code"),
            (0x91, 0x1E) => Some("integrity error"),
            (0x91, 0x40) => Some("no such key"),
            (0x91, 0x7E) => Some("length error"),
            (0x91, 0x9D) => Some("permission denied"),
            (0x91, 0x9E) => Some("parameter error"),
            (0x91, 0xAD) => Some("authentication delay"),
            (0x91, 0xAE) => Some("authentication error"),
            (0x91, 0xBE) => Some("boundary error"),
            (0x91, 0xCA) => Some("command aborted"),
            (0x91, 0xEE) => Some("memory error"),
            (0x91, 0xF0) => Some("file not found"),
            (0x6A, 0x82) => Some("application or file not found"),
            _ => None,
        }
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.describe() {
            Some(text) => write!(f, "{:02X} {:02X} ({})", self.sw1, self.sw2, text),
            None => write!(f, "{:02X} {:02X}", self.sw1, self.sw2),
        }
    }
}

/// Wrap a native command into an ISO 7816-4 APDU
pub fn wrap_native(command: u8, body: &[u8]) -> Result<Vec<u8>> {
    if body.len() > MAX_BODY_LEN {
        return Err(Error::InvalidParameter(format!(
            "command body is {} bytes, short APDUs carry at most {}",
            body.len(),
            MAX_BODY_LEN
        )));
    }

    let mut buf = BytesMut::with_capacity(6 + body.len());
    buf.put_u8(NATIVE_CLA);
    buf.put_u8(command);
    buf.put_u8(0x00); // P1
    buf.put_u8(0x00); // P2
    buf.put_u8(body.len() as u8);
    buf.put_slice(body);
    buf.put_u8(0x00); // Le
    Ok(buf.to_vec())
}

/// ISO SELECT by DF name for the NTAG 424 application
pub fn select_application() -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(6 + NTAG424_AID.len());
    buf.put_slice(&[0x00, 0xA4, 0x04, 0x00]);
    buf.put_u8(NTAG424_AID.len() as u8);
    buf.put_slice(&NTAG424_AID);
    buf.put_u8(0x00);
    buf.to_vec()
}

/// Append a value as a 3-byte little-endian field
///
/// File offsets and lengths on the tag are 24-bit.
pub fn put_u24_le(buf: &mut BytesMut, value: u32, what: &str) -> Result<()> {
    if value > 0x00FF_FFFF {
        return Err(Error::InvalidParameter(format!(
            "{} {} does not fit in 24 bits",
            what, value
        )));
    }
    buf.put_slice(&value.to_le_bytes()[..3]);
    Ok(())
}
