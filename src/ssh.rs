//! SSH session establishment for the jump host tunnel.
//!
//! Handles:
//! - Private key parsing and publickey authentication
//! - Strict host key verification against the caller-supplied expected key
//! - Opening `direct-tcpip` channels to forwarded destinations

use std::sync::Arc;

use anyhow::anyhow;
use russh::Channel;
use russh::client::{self, AuthResult, Handle, Msg};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey, decode_secret_key};
use tracing::{debug, warn};

use crate::error::Error;
use crate::keys::{self, KeyGetter};

/// An authenticated SSH connection to the jump host.
///
/// Owned by the proxy for its lifetime. Forwarder tasks share it read-only
/// and each opens its own independent channel.
pub(crate) struct SshConnection {
    handle: Handle<TrustedHostKey>,
}

impl SshConnection {
    /// Open a `direct-tcpip` channel to `host:port` through the jump host.
    pub(crate) async fn open_destination(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Channel<Msg>, russh::Error> {
        self.handle
            .channel_open_direct_tcpip(host, port as u32, "127.0.0.1", 0)
            .await
    }
}

/// Establish an authenticated session with the jump host.
///
/// Fails in order: key parse, host-key lookup, dial/handshake/auth. No local
/// port is touched here, and no destination channel is opened yet.
pub(crate) async fn connect(
    key_getter: &dyn KeyGetter,
    private_key_pem: &str,
    user: &str,
    jumpbox_url: &str,
) -> Result<SshConnection, Error> {
    let key = decode_secret_key(private_key_pem, None).map_err(Error::InvalidKey)?;

    let expected = key_getter
        .get(private_key_pem, jumpbox_url)
        .await
        .map_err(Error::HostKeyLookup)?;

    debug!(
        "Dialing jump host {} (expected host key {})",
        jumpbox_url,
        keys::compute_fingerprint(&expected)
    );

    let config = Arc::new(client::Config::default());
    let handler = TrustedHostKey { expected };

    let mut handle = client::connect(config, jumpbox_url, handler)
        .await
        .map_err(|e| Error::Dial(e.into()))?;

    let rsa_hash = handle
        .best_supported_rsa_hash()
        .await
        .map_err(|e| Error::Dial(e.into()))?
        .flatten();

    let auth = handle
        .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), rsa_hash))
        .await
        .map_err(|e| Error::Dial(e.into()))?;

    match auth {
        AuthResult::Success => {}
        AuthResult::Failure { .. } => {
            return Err(Error::Dial(anyhow!(
                "publickey authentication rejected by {}",
                jumpbox_url
            )));
        }
    }

    debug!("Authenticated to jump host {} as '{}'", jumpbox_url, user);

    Ok(SshConnection { handle })
}

/// Host key callback that accepts exactly one key.
///
/// Anything but an exact match on the key data fails the handshake, whatever
/// the key algorithm.
struct TrustedHostKey {
    expected: PublicKey,
}

impl client::Handler for TrustedHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let matches = server_public_key.key_data() == self.expected.key_data();
        if !matches {
            warn!(
                "Jump host key mismatch: expected {}, got {}",
                keys::compute_fingerprint(&self.expected),
                keys::compute_fingerprint(server_public_key),
            );
        }
        Ok(matches)
    }
}
