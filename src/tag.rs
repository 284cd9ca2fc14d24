//! One tag interaction
//!
//! [`Ntag424`] ties a reader transport to the session of the tag
//! currently in the field. It owns exactly one [`Session`]; replacing the
//! tag means dropping (or [`Ntag424::disconnect`]ing) the driver.

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use tracing::info;
use zeroize::Zeroizing;

use crate::channel::SecureChannel;
use crate::commands::{self, FileSettings};
use crate::config::AuthConfig;
use crate::crypto::AesKey;
use crate::error::{Error, Result};
use crate::keys::MasterKeySet;
use crate::session::Session;
use crate::transport::Transport;

/// Driver for a single NTAG 424 DNA tag
pub struct Ntag424<T: Transport> {
    transport: T,
    channel: SecureChannel,
    session: Session,
}

impl<T: Transport> Ntag424<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            channel: SecureChannel::new(),
            session: Session::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn select_application(&mut self) -> Result<()> {
        commands::select_application(&mut self.transport)
    }

    /// EV2 handshake with a key given directly
    pub fn authenticate(&mut self, key_no: u8, key: &AesKey) -> Result<()> {
        self.authenticate_with_rng(&mut OsRng, key_no, key)
    }

    /// EV2 handshake with the key diversified for `uid`
    pub fn authenticate_diversified(
        &mut self,
        keys: &MasterKeySet,
        key_no: u8,
        uid: &[u8],
    ) -> Result<()> {
        self.session.invalidate();
        let key = Zeroizing::new(keys.derive(key_no, uid)?);
        self.authenticate(key_no, &key)
    }

    /// EV2 handshake as the `[auth]` section describes it
    ///
    /// With `diversify` set the tag key is derived for `uid`, otherwise
    /// the master key of `auth.key_no` is used as is.
    pub fn authenticate_with_config(
        &mut self,
        auth: &AuthConfig,
        keys: &MasterKeySet,
        uid: &[u8],
    ) -> Result<()> {
        if auth.diversify {
            return self.authenticate_diversified(keys, auth.key_no, uid);
        }
        self.session.invalidate();
        let master = keys
            .get(auth.key_no)
            .ok_or(Error::UnknownKeySlot(auth.key_no))?;
        let key = Zeroizing::new(*master);
        self.authenticate(auth.key_no, &key)
    }

    /// EV2 handshake drawing RndA from `rng`
    ///
    /// Any previous session is discarded first, even if the handshake fails.
    pub fn authenticate_with_rng<R>(&mut self, rng: &mut R, key_no: u8, key: &AesKey) -> Result<()>
    where
        R: RngCore + CryptoRng + ?Sized,
    {
        self.session.invalidate();
        self.channel.reset();
        self.session = self
            .channel
            .authenticate_ev2_first(&mut self.transport, rng, key_no, key)?;
        Ok(())
    }

    pub fn change_file_settings(&mut self, file_no: u8, settings: &FileSettings) -> Result<()> {
        commands::change_file_settings(&mut self.transport, &mut self.session, file_no, settings)
    }

    pub fn change_key(
        &mut self,
        key_no: u8,
        new_key: &AesKey,
        old_key: &AesKey,
        version: u8,
    ) -> Result<()> {
        commands::change_key(
            &mut self.transport,
            &mut self.session,
            key_no,
            new_key,
            old_key,
            version,
        )
    }

    pub fn write_data_plain(&mut self, file_no: u8, offset: u32, data: &[u8]) -> Result<()> {
        commands::write_data_plain(&mut self.transport, &mut self.session, file_no, offset, data)
    }

    /// End the interaction, wiping the session, and hand back the transport
    pub fn disconnect(mut self) -> T {
        self.session.invalidate();
        info!("Tag disconnected");
        self.transport
    }
}
