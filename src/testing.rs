//! Test doubles shared by the unit tests

use std::collections::VecDeque;

use rand::{CryptoRng, RngCore};

use crate::crypto::{self, AesKey, ZERO_IV};
use crate::transport::{Response, Transport, TransportError};

/// Transport that replays canned responses and records every APDU sent
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    responses: VecDeque<Result<Response, TransportError>>,
    pub(crate) sent: Vec<Vec<u8>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(mut self, data: Vec<u8>, sw1: u8, sw2: u8) -> Self {
        self.responses.push_back(Ok(Response::new(data, sw1, sw2)));
        self
    }

    pub(crate) fn ok(self) -> Self {
        self.respond(Vec::new(), 0x91, 0x00)
    }

    pub(crate) fn fail(mut self, message: &str) -> Self {
        self.responses.push_back(Err(TransportError::new(message)));
        self
    }

    /// Queue the tag's side of a successful EV2 handshake
    pub(crate) fn handshake(self, key: &AesKey, rnd_b: &[u8; 16], ti: [u8; 4]) -> Self {
        let enc_rnd_b = crypto::cbc_encrypt(key, &ZERO_IV, rnd_b).unwrap();
        let mut plain = [0u8; 32];
        plain[..4].copy_from_slice(&ti);
        let enc_data = crypto::cbc_encrypt(key, &ZERO_IV, &plain).unwrap();
        self.respond(enc_rnd_b, 0x91, 0xAF)
            .respond(enc_data, 0x91, 0x00)
    }
}

impl Transport for ScriptedTransport {
    fn transmit(&mut self, apdu: &[u8]) -> Result<Response, TransportError> {
        self.sent.push(apdu.to_vec());
        self.responses
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::new("no scripted response left")))
    }
}

/// "Random" source that repeats a fixed pattern
pub(crate) struct FixedRng(pub(crate) [u8; 16]);

impl RngCore for FixedRng {
    fn next_u32(&mut self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    fn next_u64(&mut self) -> u64 {
        u64::from(self.next_u32()) << 32 | u64::from(self.next_u32())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for (i, b) in dest.iter_mut().enumerate() {
            *b = self.0[i % 16];
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for FixedRng {}

pub(crate) fn key_from_hex(s: &str) -> AesKey {
    let mut key = [0u8; 16];
    key.copy_from_slice(&hex::decode(s).unwrap());
    key
}
