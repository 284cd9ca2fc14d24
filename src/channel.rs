//! EV2 mutual authentication (AuthenticateEV2First)
//!
//! ```text
//! host                                      tag
//!  | 90 71 00 00 02 KeyNo 00 00  ------------> |
//!  | <------------ E(K, RndB)            91 AF |
//!  | 90 AF 00 00 20 E(K, RndA || RndB') 00 --> |
//!  | <----- E(K, TI || RndA' || caps)    91 00 |
//! ```
//!
//! All three cryptograms use AES-CBC under the long-term key with a zero
//! IV. Session keys are CMACs of the long-term key over a context mixed
//! from both random numbers.

use rand::{CryptoRng, RngCore};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::apdu::{self, CommandCode, StatusWord};
use crate::crypto::{self, AesKey, BLOCK_SIZE, ZERO_IV};
use crate::error::{Error, Result};
use crate::keys::MAX_KEY_SLOT;
use crate::session::{Session, SessionKeys};
use crate::transport::Transport;

/// Derivation label prefix for the session encryption key
const SV1_LABEL: [u8; 6] = [0xA5, 0x5A, 0x00, 0x01, 0x00, 0x80];
/// Derivation label prefix for the session MAC key
const SV2_LABEL: [u8; 6] = [0x5A, 0xA5, 0x00, 0x01, 0x00, 0x80];
/// Length of the mixed RndA/RndB context
const CONTEXT_LEN: usize = 26;

/// Handshake progress of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    AwaitingChallenge,
    Authenticated,
    Failed,
}

/// Drives one EV2 handshake and hands out the resulting [`Session`]
#[derive(Debug)]
pub struct SecureChannel {
    state: HandshakeState,
}

impl Default for SecureChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureChannel {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Idle,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Return to `Idle` so another handshake may start
    pub fn reset(&mut self) {
        self.state = HandshakeState::Idle;
    }

    /// Authenticate with key slot `key_no` using long-term key `key`
    ///
    /// `key` is either a master key or a diversified tag key. The channel
    /// must be `Idle`; on any failure it ends up `Failed` and nothing of
    /// the partial exchange survives.
    pub fn authenticate_ev2_first<T, R>(
        &mut self,
        transport: &mut T,
        rng: &mut R,
        key_no: u8,
        key: &AesKey,
    ) -> Result<Session>
    where
        T: Transport + ?Sized,
        R: RngCore + CryptoRng + ?Sized,
    {
        if self.state != HandshakeState::Idle {
            return Err(Error::Authentication(format!(
                "handshake needs an idle channel, channel is {:?}",
                self.state
            )));
        }
        if key_no > MAX_KEY_SLOT {
            return Err(Error::InvalidParameter(format!(
                "key slot {} out of range 0..={}",
                key_no, MAX_KEY_SLOT
            )));
        }

        match self.exchange(transport, rng, key_no, key) {
            Ok(session) => {
                self.state = HandshakeState::Authenticated;
                if let Some(ti) = session.transaction_id() {
                    info!("Authenticated with key {} (TI {})", key_no, hex::encode_upper(ti));
                }
                Ok(session)
            }
            Err(e) => {
                self.state = HandshakeState::Failed;
                warn!("Authentication with key {} failed: {}", key_no, e);
                Err(e)
            }
        }
    }

    fn exchange<T, R>(
        &mut self,
        transport: &mut T,
        rng: &mut R,
        key_no: u8,
        key: &AesKey,
    ) -> Result<Session>
    where
        T: Transport + ?Sized,
        R: RngCore + CryptoRng + ?Sized,
    {
        // Part 1: ask for the tag's challenge
        self.state = HandshakeState::AwaitingChallenge;
        let apdu = apdu::wrap_native(CommandCode::AuthenticateEv2First as u8, &[key_no, 0x00])?;
        let resp = transport.transmit(&apdu)?;
        if resp.status() != StatusWord::ADDITIONAL_FRAME {
            return Err(Error::Authentication(format!(
                "challenge for key {} refused: {}",
                key_no,
                resp.status()
            )));
        }
        let enc_rnd_b = leading_bytes(&resp.data, BLOCK_SIZE, "encrypted RndB")?;
        let rnd_b = Zeroizing::new(to_block(&crypto::cbc_decrypt(key, &ZERO_IV, enc_rnd_b)?));
        debug!("Received challenge for key {}", key_no);

        // Part 2: answer with RndA || RndB'
        let mut rnd_a = Zeroizing::new([0u8; BLOCK_SIZE]);
        rng.fill_bytes(&mut rnd_a[..]);
        let token = Zeroizing::new(challenge_response(key, &rnd_a, &rnd_b)?);
        let apdu = apdu::wrap_native(CommandCode::AdditionalFrame as u8, &token[..])?;
        let resp = transport.transmit(&apdu)?;
        if resp.status() != StatusWord::OK {
            return Err(Error::Authentication(format!(
                "challenge response for key {} rejected: {}",
                key_no,
                resp.status()
            )));
        }
        let enc_data = leading_bytes(&resp.data, 2 * BLOCK_SIZE, "authentication response")?;
        let dec_data = Zeroizing::new(crypto::cbc_decrypt(key, &ZERO_IV, enc_data)?);

        // The echoed RndA' in dec_data[4..20] is not checked.
        let mut ti = [0u8; 4];
        ti.copy_from_slice(&dec_data[..4]);

        let keys = derive_session_keys(key, &rnd_a, &rnd_b);
        debug!("Session keys derived for key {}", key_no);
        Ok(Session::establish(keys, ti))
    }
}

/// `E(K, RndA || rotl(RndB))`, the host's second handshake message
pub fn challenge_response(
    key: &AesKey,
    rnd_a: &[u8; BLOCK_SIZE],
    rnd_b: &[u8; BLOCK_SIZE],
) -> Result<[u8; 2 * BLOCK_SIZE]> {
    let mut token = Zeroizing::new([0u8; 2 * BLOCK_SIZE]);
    token[..BLOCK_SIZE].copy_from_slice(rnd_a);
    token[BLOCK_SIZE..].copy_from_slice(&crypto::rotate_left(rnd_b));

    let encrypted = crypto::cbc_encrypt(key, &ZERO_IV, &token[..])?;
    let mut out = [0u8; 2 * BLOCK_SIZE];
    out.copy_from_slice(&encrypted);
    Ok(out)
}

/// Session keys from the long-term key and both random numbers
pub fn derive_session_keys(
    key: &AesKey,
    rnd_a: &[u8; BLOCK_SIZE],
    rnd_b: &[u8; BLOCK_SIZE],
) -> SessionKeys {
    // SV = label(6) || context(26)
    let mut sv = Zeroizing::new([0u8; 6 + CONTEXT_LEN]);
    sv[6..].copy_from_slice(&session_context(rnd_a, rnd_b)[..]);

    sv[..6].copy_from_slice(&SV1_LABEL);
    let enc = crypto::cmac(key, &sv[..]);
    sv[..6].copy_from_slice(&SV2_LABEL);
    let mac = crypto::cmac(key, &sv[..]);

    SessionKeys { enc, mac }
}

/// `RndA[0:2] || (RndA[2:8] ^ RndB[0:6]) || RndB[6:16] || RndA[8:16]`
fn session_context(
    rnd_a: &[u8; BLOCK_SIZE],
    rnd_b: &[u8; BLOCK_SIZE],
) -> Zeroizing<[u8; CONTEXT_LEN]> {
    let mut context = Zeroizing::new([0u8; CONTEXT_LEN]);
    context[..2].copy_from_slice(&rnd_a[..2]);
    for i in 0..6 {
        context[2 + i] = rnd_a[2 + i] ^ rnd_b[i];
    }
    context[8..18].copy_from_slice(&rnd_b[6..]);
    context[18..].copy_from_slice(&rnd_a[8..]);
    context
}

fn leading_bytes<'a>(data: &'a [u8], len: usize, what: &str) -> Result<&'a [u8]> {
    data.get(..len).ok_or_else(|| {
        Error::Protocol(format!(
            "{} needs {} bytes, tag sent {}",
            what,
            len,
            data.len()
        ))
    })
}

fn to_block(data: &[u8]) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    block.copy_from_slice(&data[..BLOCK_SIZE]);
    block
}
