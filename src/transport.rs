//! Reader transport abstraction
//!
//! The core never talks to a PC/SC reader directly. Whatever drives the
//! reader implements [`Transport`]: one command out, one response back,
//! blocking until the tag answers or the reader gives up.

use thiserror::Error;

use crate::apdu::StatusWord;

/// Failure reported by a reader driver (timeout, card removed, ...).
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Response APDU split into data and status bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub data: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

impl Response {
    pub fn new(data: Vec<u8>, sw1: u8, sw2: u8) -> Self {
        Self { data, sw1, sw2 }
    }

    pub fn status(&self) -> StatusWord {
        StatusWord::new(self.sw1, self.sw2)
    }
}

/// Synchronous send-command / receive-response primitive
pub trait Transport {
    /// Send one command APDU and wait for its response.
    fn transmit(&mut self, apdu: &[u8]) -> Result<Response, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn transmit(&mut self, apdu: &[u8]) -> Result<Response, TransportError> {
        (**self).transmit(apdu)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn transmit(&mut self, apdu: &[u8]) -> Result<Response, TransportError> {
        (**self).transmit(apdu)
    }
}
