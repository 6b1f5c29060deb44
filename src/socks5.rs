//! Minimal server-side SOCKS5 handshake (RFC 1928 subset).
//!
//! Supports:
//! - No-authentication negotiation only
//! - The CONNECT command only (BIND and UDP ASSOCIATE are rejected)
//! - IPv4, domain name, and IPv6 destination addresses

use std::net::{Ipv4Addr, Ipv6Addr};

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub(crate) const VERSION: u8 = 0x05;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NO_ACCEPTABLE: u8 = 0xff;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

pub(crate) const REPLY_SUCCEEDED: u8 = 0x00;
pub(crate) const REPLY_HOST_UNREACHABLE: u8 = 0x04;
pub(crate) const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub(crate) const REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Destination requested by a SOCKS5 CONNECT.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Destination {
    pub host: String,
    pub port: u16,
}

/// Run the server side of the SOCKS5 handshake and return the requested
/// destination.
///
/// Unsupported or malformed requests get the matching SOCKS5 error reply
/// (where one exists) before the error is returned; the caller closes the
/// connection without forwarding anything. The success reply is NOT sent
/// here; the caller sends it once the destination channel is open.
pub(crate) async fn handshake<S>(stream: &mut S) -> Result<Destination>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Greeting: VER + NMETHODS + METHODS.
    let mut greeting = [0u8; 2];
    stream
        .read_exact(&mut greeting)
        .await
        .context("read greeting")?;
    if greeting[0] != VERSION {
        bail!("unsupported socks version {}", greeting[0]);
    }

    let mut methods = vec![0u8; greeting[1] as usize];
    stream
        .read_exact(&mut methods)
        .await
        .context("read auth methods")?;

    if !methods.contains(&METHOD_NO_AUTH) {
        stream
            .write_all(&[VERSION, METHOD_NO_ACCEPTABLE])
            .await
            .ok();
        bail!("client offered no acceptable auth method");
    }
    stream
        .write_all(&[VERSION, METHOD_NO_AUTH])
        .await
        .context("write method selection")?;

    // Request: VER + CMD + RSV + ATYP + DST.ADDR + DST.PORT.
    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .await
        .context("read request")?;
    if header[0] != VERSION {
        bail!("unsupported socks version {} in request", header[0]);
    }
    if header[1] != CMD_CONNECT {
        send_reply(stream, REPLY_COMMAND_NOT_SUPPORTED).await.ok();
        bail!("unsupported command {}", header[1]);
    }

    let host = match header[3] {
        ATYP_IPV4 => {
            let mut addr = [0u8; 4];
            stream
                .read_exact(&mut addr)
                .await
                .context("read ipv4 address")?;
            Ipv4Addr::from(addr).to_string()
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream
                .read_exact(&mut len)
                .await
                .context("read domain length")?;
            let mut domain = vec![0u8; len[0] as usize];
            stream.read_exact(&mut domain).await.context("read domain")?;
            String::from_utf8(domain).context("domain is not valid utf-8")?
        }
        ATYP_IPV6 => {
            let mut addr = [0u8; 16];
            stream
                .read_exact(&mut addr)
                .await
                .context("read ipv6 address")?;
            Ipv6Addr::from(addr).to_string()
        }
        other => {
            send_reply(stream, REPLY_ADDRESS_TYPE_NOT_SUPPORTED)
                .await
                .ok();
            bail!("unsupported address type {}", other);
        }
    };

    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await.context("read port")?;

    Ok(Destination {
        host,
        port: u16::from_be_bytes(port),
    })
}

/// Write a SOCKS5 reply with the given status code.
///
/// The bound address field is the all-zero IPv4 placeholder; CONNECT clients
/// do not dial it.
pub(crate) async fn send_reply<S>(stream: &mut S, reply: u8) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let msg = [VERSION, reply, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0];
    stream.write_all(&msg).await.context("write reply")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    /// Feed `input` to the server side of the handshake and collect whatever
    /// it wrote back.
    async fn drive(input: &[u8]) -> (Result<Destination>, Vec<u8>) {
        let (mut client, mut server) = duplex(1024);
        client.write_all(input).await.unwrap();

        let result = handshake(&mut server).await;
        drop(server);

        let mut replied = Vec::new();
        client.read_to_end(&mut replied).await.unwrap();
        (result, replied)
    }

    #[tokio::test]
    async fn test_connect_ipv4() {
        let mut input = vec![5, 1, 0];
        input.extend_from_slice(&[5, 1, 0, 1, 127, 0, 0, 1]);
        input.extend_from_slice(&9000u16.to_be_bytes());

        let (result, replied) = drive(&input).await;
        let dest = result.unwrap();
        assert_eq!(dest.host, "127.0.0.1");
        assert_eq!(dest.port, 9000);
        assert_eq!(replied, vec![5, 0]);
    }

    #[tokio::test]
    async fn test_connect_domain() {
        let mut input = vec![5, 1, 0];
        input.extend_from_slice(&[5, 1, 0, 3]);
        input.push(b"example.com".len() as u8);
        input.extend_from_slice(b"example.com");
        input.extend_from_slice(&443u16.to_be_bytes());

        let (result, _) = drive(&input).await;
        let dest = result.unwrap();
        assert_eq!(dest.host, "example.com");
        assert_eq!(dest.port, 443);
    }

    #[tokio::test]
    async fn test_connect_ipv6() {
        let mut input = vec![5, 1, 0];
        input.extend_from_slice(&[5, 1, 0, 4]);
        input.extend_from_slice(&std::net::Ipv6Addr::LOCALHOST.octets());
        input.extend_from_slice(&8080u16.to_be_bytes());

        let (result, _) = drive(&input).await;
        let dest = result.unwrap();
        assert_eq!(dest.host, "::1");
        assert_eq!(dest.port, 8080);
    }

    #[tokio::test]
    async fn test_rejects_wrong_version() {
        let (result, replied) = drive(&[4, 1, 0]).await;
        assert!(result.is_err());
        assert!(replied.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_missing_no_auth_method() {
        // Client only offers username/password auth.
        let (result, replied) = drive(&[5, 1, 2]).await;
        assert!(result.is_err());
        assert_eq!(replied, vec![5, 0xff]);
    }

    #[tokio::test]
    async fn test_rejects_bind_command() {
        let mut input = vec![5, 1, 0];
        input.extend_from_slice(&[5, 2, 0, 1, 127, 0, 0, 1]);
        input.extend_from_slice(&9000u16.to_be_bytes());

        let (result, replied) = drive(&input).await;
        assert!(result.is_err());
        assert_eq!(replied[..2], [5, 0]);
        assert_eq!(replied[2..], [5, REPLY_COMMAND_NOT_SUPPORTED, 0, 1, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_rejects_unknown_address_type() {
        let input = vec![5, 1, 0, 5, 1, 0, 9];

        let (result, replied) = drive(&input).await;
        assert!(result.is_err());
        assert_eq!(replied[2..], [5, REPLY_ADDRESS_TYPE_NOT_SUPPORTED, 0, 1, 0, 0, 0, 0, 0, 0]);
    }
}
