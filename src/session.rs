//! Authenticated session state
//!
//! A [`Session`] belongs to exactly one tag interaction. It starts empty,
//! is populated once by a successful EV2 handshake, and is cleared for
//! good on disconnect, on the first failed command, or on
//! re-authentication. There is no way to resume a cleared session: the
//! next handshake starts again from command counter 0.

use std::fmt;

use tracing::debug;
use zeroize::Zeroize;

use crate::crypto::AesKey;
use crate::error::{Error, Result};

/// Session encryption and MAC keys
pub struct SessionKeys {
    pub enc: AesKey,
    pub mac: AesKey,
}

impl Drop for SessionKeys {
    fn drop(&mut self) {
        self.enc.zeroize();
        self.mac.zeroize();
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeys(<redacted>)")
    }
}

/// Live channel parameters, only reachable through an authenticated [`Session`]
#[derive(Debug)]
pub(crate) struct Established {
    pub(crate) keys: SessionKeys,
    pub(crate) ti: [u8; 4],
    pub(crate) counter: u16,
}

impl Drop for Established {
    fn drop(&mut self) {
        self.ti.zeroize();
        self.counter = 0;
    }
}

/// Single-owner session with one physical tag
#[derive(Debug, Default)]
pub struct Session {
    state: Option<Established>,
}

impl Session {
    /// Empty, unauthenticated session
    pub fn new() -> Self {
        Self::default()
    }

    /// Set all session fields at once; only the handshake does this.
    pub(crate) fn establish(keys: SessionKeys, ti: [u8; 4]) -> Self {
        Self {
            state: Some(Established {
                keys,
                ti,
                counter: 0,
            }),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_some()
    }

    /// Counter value the next secure command will use
    pub fn command_counter(&self) -> Option<u16> {
        self.state.as_ref().map(|s| s.counter)
    }

    pub fn transaction_id(&self) -> Option<[u8; 4]> {
        self.state.as_ref().map(|s| s.ti)
    }

    /// Borrow the live parameters, failing fast on an empty session
    pub(crate) fn active(&self) -> Result<&Established> {
        self.state
            .as_ref()
            .ok_or_else(|| Error::Authentication("no authenticated session".to_string()))
    }

    /// Record that the tag accepted a command on this session
    pub(crate) fn advance(&mut self) -> Result<()> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| Error::Authentication("no authenticated session".to_string()))?;
        match state.counter.checked_add(1) {
            Some(next) => {
                state.counter = next;
                Ok(())
            }
            None => {
                self.invalidate();
                Err(Error::Authentication(
                    "command counter exhausted, re-authenticate".to_string(),
                ))
            }
        }
    }

    /// Destroy the session; keys are wiped
    pub fn invalidate(&mut self) {
        if self.state.take().is_some() {
            debug!("Session cleared");
        }
    }

    #[cfg(test)]
    pub(crate) fn with_counter(keys: SessionKeys, ti: [u8; 4], counter: u16) -> Self {
        let mut session = Self::establish(keys, ti);
        if let Some(state) = session.state.as_mut() {
            state.counter = counter;
        }
        session
    }
}
