//! SOCKS5 proxy lifecycle and connection forwarding.
//!
//! Handles:
//! - Idempotent, concurrency-safe startup (SSH session, then loopback listener)
//! - The background accept loop
//! - Per-connection SOCKS5 handshake, channel open, and bidirectional relay

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::keys::KeyGetter;
use crate::socks5;
use crate::ssh::{self, SshConnection};

/// The user the original jump hosts provision for tunnel access.
const DEFAULT_JUMPBOX_USER: &str = "jumpbox";

/// Produces the TCP listener the proxy serves SOCKS5 on.
///
/// Injected so tests can substitute a failing or recording factory without
/// mutating process-global state.
#[async_trait]
pub trait ListenerFactory: Send + Sync {
    async fn bind(&self) -> io::Result<TcpListener>;
}

/// Default factory: loopback on an OS-assigned ephemeral port.
pub struct LoopbackListenerFactory;

#[async_trait]
impl ListenerFactory for LoopbackListenerFactory {
    async fn bind(&self) -> io::Result<TcpListener> {
        TcpListener::bind(("127.0.0.1", 0)).await
    }
}

enum ProxyState {
    NotStarted,
    Running {
        addr: SocketAddr,
        /// Keeps the SSH session alive for as long as the proxy runs.
        _connection: Arc<SshConnection>,
    },
    Failed,
}

/// A SOCKS5 proxy that forwards every connection through an SSH jump host.
///
/// `start` is idempotent and safe to call from concurrent tasks; `addr`
/// reports the bound loopback address once running. There is no stop surface:
/// the listener lives until process teardown.
pub struct Socks5Proxy {
    key_getter: Arc<dyn KeyGetter>,
    listener_factory: Arc<dyn ListenerFactory>,
    user: String,
    state: Mutex<ProxyState>,
}

impl Socks5Proxy {
    pub fn new(key_getter: Arc<dyn KeyGetter>) -> Self {
        Self {
            key_getter,
            listener_factory: Arc::new(LoopbackListenerFactory),
            user: DEFAULT_JUMPBOX_USER.to_string(),
            state: Mutex::new(ProxyState::NotStarted),
        }
    }

    /// Set the SSH username used to authenticate to the jump host.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Replace the listener factory.
    pub fn with_listener_factory(mut self, factory: Arc<dyn ListenerFactory>) -> Self {
        self.listener_factory = factory;
        self
    }

    /// Start the proxy: authenticate to the jump host at `jumpbox_url`
    /// (`host:port`, no scheme), bind the local SOCKS5 listener, and begin
    /// accepting in the background.
    ///
    /// Returns once the listener is bound; a no-op if already running. On
    /// failure nothing is left bound and a later call may retry with
    /// different inputs.
    pub async fn start(&self, private_key_pem: &str, jumpbox_url: &str) -> Result<(), Error> {
        // One critical section covers the state check, the dial, the bind,
        // and the transition, so concurrent callers cannot double-bind.
        let mut state = self.state.lock().await;
        if let ProxyState::Running { addr, .. } = &*state {
            debug!("Proxy already running on {}, ignoring start", addr);
            return Ok(());
        }

        match self.start_locked(private_key_pem, jumpbox_url).await {
            Ok(running) => {
                *state = running;
                Ok(())
            }
            Err(e) => {
                *state = ProxyState::Failed;
                Err(e)
            }
        }
    }

    async fn start_locked(
        &self,
        private_key_pem: &str,
        jumpbox_url: &str,
    ) -> Result<ProxyState, Error> {
        let connection = Arc::new(
            ssh::connect(&*self.key_getter, private_key_pem, &self.user, jumpbox_url).await?,
        );

        let listener = self.listener_factory.bind().await.map_err(Error::Listen)?;
        let addr = listener.local_addr().map_err(Error::Listen)?;

        info!("SOCKS5 proxy listening on {}", addr);

        tokio::spawn(accept_loop(listener, connection.clone()));

        Ok(ProxyState::Running {
            addr,
            _connection: connection,
        })
    }

    /// The bound loopback `host:port`, once running.
    pub async fn addr(&self) -> Result<String, Error> {
        match &*self.state.lock().await {
            ProxyState::Running { addr, .. } => Ok(addr.to_string()),
            ProxyState::NotStarted | ProxyState::Failed => Err(Error::NotRunning),
        }
    }
}

/// Accept SOCKS5 clients until the listener closes; each connection gets its
/// own task so a slow handshake never blocks the next accept.
async fn accept_loop(listener: TcpListener, connection: Arc<SshConnection>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("Accepted SOCKS5 client from {}", peer);
                let connection = connection.clone();
                tokio::spawn(async move {
                    if let Err(e) = forward(stream, peer, connection).await {
                        debug!("Connection from {} ended: {:#}", peer, e);
                    }
                });
            }
            Err(e) => {
                warn!("Accept error: {}", e);
                break;
            }
        }
    }
}

/// Handle one SOCKS5 client: handshake, open the SSH channel, relay until
/// either direction finishes, then drop (close) both ends.
async fn forward(
    mut stream: TcpStream,
    peer: SocketAddr,
    connection: Arc<SshConnection>,
) -> Result<()> {
    let dest = socks5::handshake(&mut stream)
        .await
        .context("socks5 handshake")?;

    let channel = match connection.open_destination(&dest.host, dest.port).await {
        Ok(channel) => channel,
        Err(e) => {
            socks5::send_reply(&mut stream, socks5::REPLY_HOST_UNREACHABLE)
                .await
                .ok();
            return Err(e).with_context(|| format!("open channel to {}:{}", dest.host, dest.port));
        }
    };

    socks5::send_reply(&mut stream, socks5::REPLY_SUCCEEDED).await?;

    debug!("Relaying {} <-> {}:{}", peer, dest.host, dest.port);

    let (mut client_rd, mut client_wr) = stream.into_split();
    let (mut remote_rd, mut remote_wr) = tokio::io::split(channel.into_stream());

    // Either direction finishing (EOF or error) ends the relay; dropping the
    // halves closes both the client socket and the SSH channel, whatever the
    // other direction was still doing.
    tokio::select! {
        res = tokio::io::copy(&mut client_rd, &mut remote_wr) => {
            if let Err(e) = res {
                debug!("client->remote copy from {} ended: {}", peer, e);
            }
        }
        res = tokio::io::copy(&mut remote_rd, &mut client_wr) => {
            if let Err(e) = res {
                debug!("remote->client copy to {} ended: {}", peer, e);
            }
        }
    }

    Ok(())
}
