//! Error types for the tunneling proxy.

use thiserror::Error;

/// Failures surfaced by the proxy's public operations.
///
/// Setup-phase errors carry the underlying cause with a short context prefix.
/// Per-connection failures (malformed handshakes, unreachable destinations,
/// relay I/O) are contained to their connection and never appear here.
#[derive(Debug, Error)]
pub enum Error {
    /// The supplied private key material could not be parsed.
    #[error("parse private key: {0}")]
    InvalidKey(#[source] russh::keys::Error),

    /// The host-key collaborator failed to produce an expected key.
    #[error("get host key: {0}")]
    HostKeyLookup(#[source] anyhow::Error),

    /// TCP dial, SSH handshake, or authentication to the jump host failed.
    #[error("ssh dial: {0}")]
    Dial(#[source] anyhow::Error),

    /// The local SOCKS5 listener could not be bound.
    #[error("open port: {0}")]
    Listen(#[source] std::io::Error),

    /// The bound address was requested while the proxy is not running.
    #[error("socks5 proxy is not running")]
    NotRunning,
}
