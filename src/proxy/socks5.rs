//! SOCKS5 client handshake (RFC 1928) with user/password auth (RFC 1929).

use std::net::IpAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::context::Context;
use crate::error::{Error, Op, Result};
use crate::proxy::Credentials;

const VERSION: u8 = 0x05;
const AUTH_VERSION: u8 = 0x01;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NONE_ACCEPTABLE: u8 = 0xff;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_FQDN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

fn reply_message(code: u8) -> String {
    match code {
        0x01 => "general SOCKS server failure".to_string(),
        0x02 => "connection not allowed by ruleset".to_string(),
        0x03 => "network unreachable".to_string(),
        0x04 => "host unreachable".to_string(),
        0x05 => "connection refused".to_string(),
        0x06 => "TTL expired".to_string(),
        0x07 => "command not supported".to_string(),
        0x08 => "address type not supported".to_string(),
        other => format!("unknown reply code {other:#04x}"),
    }
}

/// Negotiates a tunnel to `host:port` over a stream already connected to
/// the SOCKS5 proxy.
pub async fn handshake<S>(
    ctx: &Context,
    stream: &mut S,
    host: &str,
    port: u16,
    credentials: Option<&Credentials>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ctx.run(negotiate(stream, host, port, credentials))
        .await
        .map_err(|e| Error::op(Op::Proxy, e))
}

async fn negotiate<S>(stream: &mut S, host: &str, port: u16, credentials: Option<&Credentials>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Some(creds) = credentials {
        if creds.username.is_empty() || creds.username.len() > 255 {
            return Err(Error::other("socks5: user name must be 1 to 255 bytes"));
        }
        if creds.password.len() > 255 {
            return Err(Error::other("socks5: password must be at most 255 bytes"));
        }
    }

    let greeting: &[u8] = match credentials {
        Some(_) => &[VERSION, 2, METHOD_NO_AUTH, METHOD_USER_PASS],
        None => &[VERSION, 1, METHOD_NO_AUTH],
    };
    stream.write_all(greeting).await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != VERSION {
        return Err(Error::other(format!("socks5: unexpected protocol version {}", choice[0])));
    }
    match choice[1] {
        METHOD_NO_AUTH => {}
        METHOD_USER_PASS => {
            let creds = credentials
                .ok_or_else(|| Error::other("socks5: proxy asked for credentials"))?;
            authenticate(stream, creds).await?;
        }
        METHOD_NONE_ACCEPTABLE => {
            return Err(Error::other("socks5: no acceptable authentication methods"));
        }
        other => {
            return Err(Error::other(format!("socks5: unsupported method {other:#04x}")));
        }
    }

    let mut request = vec![VERSION, CMD_CONNECT, 0x00];
    match host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            if host.is_empty() || host.len() > 255 {
                return Err(Error::other(format!("socks5: destination host name too long: {host}")));
            }
            request.push(ATYP_FQDN);
            request.push(host.len() as u8);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await?;
    if reply[0] != VERSION {
        return Err(Error::other(format!("socks5: unexpected protocol version {}", reply[0])));
    }
    if reply[1] != 0x00 {
        return Err(Error::other(format!("socks5: {}", reply_message(reply[1]))));
    }
    if reply[2] != 0x00 {
        return Err(Error::other("socks5: non-zero reserved field"));
    }

    let addr_len = match reply[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_FQDN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        other => {
            return Err(Error::other(format!("socks5: unknown address type {other:#04x}")));
        }
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await?;
    tracing::debug!(host, port, "socks5 tunnel established");
    Ok(())
}

async fn authenticate<S>(stream: &mut S, creds: &Credentials) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut frame = Vec::with_capacity(3 + creds.username.len() + creds.password.len());
    frame.push(AUTH_VERSION);
    frame.push(creds.username.len() as u8);
    frame.extend_from_slice(creds.username.as_bytes());
    frame.push(creds.password.len() as u8);
    frame.extend_from_slice(creds.password.as_bytes());
    stream.write_all(&frame).await?;

    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await?;
    if status[0] != AUTH_VERSION {
        return Err(Error::other(format!(
            "socks5: unexpected authentication version {:#04x}",
            status[0]
        )));
    }
    if status[1] != 0x00 {
        return Err(Error::other("socks5: username/password authentication failed"));
    }
    Ok(())
}
