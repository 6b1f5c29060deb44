//! SOCKS5 tunneling through an SSH jump host.
//!
//! Opens an authenticated SSH connection to a jump host, binds a SOCKS5
//! listener on an ephemeral loopback port, and forwards every accepted
//! connection through the SSH session to its requested destination.
//!
//! The jump host's identity is verified against a key supplied by a
//! `KeyGetter` collaborator; there is no trust-on-first-use.

pub mod config;
pub mod error;
pub mod keys;
pub mod proxy;
mod socks5;
mod ssh;

pub use error::Error;
pub use keys::{KeyGetter, StaticKeyGetter};
pub use proxy::{ListenerFactory, LoopbackListenerFactory, Socks5Proxy};
