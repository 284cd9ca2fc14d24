//! NTAG 424 DNA provisioning core
//!
//! EV2 authentication and secure messaging for configuring tags whose
//! NDEF URL is rewritten by Secure Dynamic Messaging on every read.
//!
//! ```text
//! keys (diversify) -> channel (EV2 handshake) -> Session
//!                                                  |
//!                   commands -> messaging (IV, CBC, MACt, CmdCtr) -> Transport
//! ```
//!
//! The reader itself is out of scope: plug one in through [`Transport`].

pub mod apdu;
pub mod channel;
pub mod commands;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod logging;
pub mod messaging;
pub mod session;
pub mod tag;
pub mod transport;

#[cfg(test)]
mod testing;

pub use channel::{HandshakeState, SecureChannel};
pub use commands::{Access, AccessRights, CommMode, FileSettings, Mirroring, SdmConfig, SdmMac};
pub use crypto::AesKey;
pub use error::{Error, Result};
pub use keys::MasterKeySet;
pub use session::Session;
pub use tag::Ntag424;
pub use transport::{Response, Transport, TransportError};
