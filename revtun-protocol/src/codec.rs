//! Encoding and decoding of version 1 control messages
//!
//! Decoding reads from any `AsyncRead` and consumes exactly the bytes of one
//! message; there is no partial decode state to carry between calls.
//! Encoding builds a single buffer sized up front.

use crate::address::Address;
use crate::constants::{CONN_ID_LEN, PROTOCOL_VERSION};
use crate::frame::{
    BuildTunnel, BuildTunnelAck, Command, ConnectionId, Heartbeat, Join, JoinAck, Reply,
};
use crate::validation::{validate_name_len, ProtocolError};
use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use std::net::IpAddr;
use tokio::io::{AsyncRead, AsyncReadExt};

const HEADER_LEN: usize = 2;

/// Decode failure: either the stream broke or the peer sent garbage
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl CodecError {
    /// I/O errors end a session; protocol errors may be tolerated.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Message encoding into a caller-sized buffer
pub trait Encode {
    /// Exact number of bytes `encode_into` writes
    fn encoded_len(&self) -> usize;

    fn encode_into(&self, dst: &mut BytesMut);

    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }
}

fn put_header(dst: &mut BytesMut, cmd: Command) {
    dst.put_u8(PROTOCOL_VERSION);
    dst.put_u8(cmd.as_byte());
}

fn put_name(dst: &mut BytesMut, name: &str) {
    dst.put_u8(name.len() as u8);
    dst.put_slice(name.as_bytes());
}

impl Encode for Address {
    fn encoded_len(&self) -> usize {
        let ip_len = match self.ip() {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 16,
        };
        1 + ip_len + 2
    }

    fn encode_into(&self, dst: &mut BytesMut) {
        dst.put_u8(self.atype());
        match self.ip() {
            IpAddr::V4(ip) => dst.put_slice(&ip.octets()),
            IpAddr::V6(ip) => dst.put_slice(&ip.octets()),
        }
        dst.put_u16(self.port());
    }
}

impl Encode for Join {
    fn encoded_len(&self) -> usize {
        HEADER_LEN + 1 + self.name.len()
    }

    fn encode_into(&self, dst: &mut BytesMut) {
        put_header(dst, Command::Join);
        put_name(dst, &self.name);
    }
}

impl Encode for JoinAck {
    fn encoded_len(&self) -> usize {
        HEADER_LEN + 1
    }

    fn encode_into(&self, dst: &mut BytesMut) {
        put_header(dst, Command::JoinAck);
        dst.put_u8(self.reply.as_byte());
    }
}

impl Encode for Heartbeat {
    fn encoded_len(&self) -> usize {
        HEADER_LEN
    }

    fn encode_into(&self, dst: &mut BytesMut) {
        put_header(dst, Command::Heartbeat);
    }
}

impl Encode for BuildTunnel {
    fn encoded_len(&self) -> usize {
        HEADER_LEN + self.relay_addr.encoded_len() + self.target_addr.encoded_len() + CONN_ID_LEN
    }

    fn encode_into(&self, dst: &mut BytesMut) {
        put_header(dst, Command::BuildTunnel);
        self.relay_addr.encode_into(dst);
        self.target_addr.encode_into(dst);
        dst.put_u64(self.conn_id.0);
    }
}

impl Encode for BuildTunnelAck {
    fn encoded_len(&self) -> usize {
        HEADER_LEN + 1 + self.name.len() + CONN_ID_LEN + 1
    }

    fn encode_into(&self, dst: &mut BytesMut) {
        put_header(dst, Command::BuildTunnelAck);
        put_name(dst, &self.name);
        dst.put_u64(self.conn_id.0);
        dst.put_u8(self.reply.as_byte());
    }
}

/// BUILD_TUNNEL bytes up to (not including) the connection id.
///
/// A proxy tunnel always sends the same relay and target addresses, so the
/// prefix is built once and only the trailing id varies per client.
#[derive(Debug, Clone)]
pub struct BuildTunnelPrefix {
    bytes: Bytes,
}

impl BuildTunnelPrefix {
    pub fn new(relay_addr: &Address, target_addr: &Address) -> Self {
        let len = HEADER_LEN + relay_addr.encoded_len() + target_addr.encoded_len();
        let mut buf = BytesMut::with_capacity(len);
        put_header(&mut buf, Command::BuildTunnel);
        relay_addr.encode_into(&mut buf);
        target_addr.encode_into(&mut buf);
        Self {
            bytes: buf.freeze(),
        }
    }

    /// Complete BUILD_TUNNEL command for one connection id
    pub fn command(&self, conn_id: ConnectionId) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.bytes.len() + CONN_ID_LEN);
        buf.put_slice(&self.bytes);
        buf.put_u64(conn_id.0);
        buf.freeze()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Read the version and command bytes that open every message.
pub async fn decode_command<R>(r: &mut R) -> Result<Command, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_LEN];
    r.read_exact(&mut buf).await?;
    if buf[0] != PROTOCOL_VERSION {
        return Err(ProtocolError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            got: buf[0],
        }
        .into());
    }
    Ok(Command::try_from(buf[1])?)
}

/// Read a header and fail unless it carries `expected`.
pub async fn expect_command<R>(r: &mut R, expected: Command) -> Result<(), CodecError>
where
    R: AsyncRead + Unpin,
{
    let got = decode_command(r).await?;
    if got != expected {
        return Err(ProtocolError::UnexpectedCommand { expected, got }.into());
    }
    Ok(())
}

async fn decode_name<R>(r: &mut R) -> Result<String, CodecError>
where
    R: AsyncRead + Unpin,
{
    let len = validate_name_len(r.read_u8().await?)?;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|_| ProtocolError::InvalidNameEncoding.into())
}

async fn decode_reply<R>(r: &mut R) -> Result<Reply, CodecError>
where
    R: AsyncRead + Unpin,
{
    Ok(Reply::from_byte(r.read_u8().await?))
}

/// Decode a JOIN payload (after the header).
pub async fn decode_join<R>(r: &mut R) -> Result<Join, CodecError>
where
    R: AsyncRead + Unpin,
{
    let name = decode_name(r).await?;
    Ok(Join { name })
}

/// Decode a JOIN_ACK payload (after the header).
pub async fn decode_join_ack<R>(r: &mut R) -> Result<JoinAck, CodecError>
where
    R: AsyncRead + Unpin,
{
    let reply = decode_reply(r).await?;
    Ok(JoinAck { reply })
}

/// Decode one tagged address.
pub async fn decode_address<R>(r: &mut R) -> Result<Address, CodecError>
where
    R: AsyncRead + Unpin,
{
    let atype = r.read_u8().await?;
    let len = Address::ip_len(atype).ok_or(ProtocolError::UnknownAddressType(atype))?;
    let mut ip = [0u8; 16];
    r.read_exact(&mut ip[..len]).await?;
    let port = r.read_u16().await?;
    Ok(Address::from_parts(atype, &ip[..len], port)?)
}

/// Decode a BUILD_TUNNEL payload (after the header).
pub async fn decode_build_tunnel<R>(r: &mut R) -> Result<BuildTunnel, CodecError>
where
    R: AsyncRead + Unpin,
{
    let relay_addr = decode_address(r).await?;
    let target_addr = decode_address(r).await?;
    let conn_id = ConnectionId(r.read_u64().await?);
    Ok(BuildTunnel {
        relay_addr,
        target_addr,
        conn_id,
    })
}

/// Decode a BUILD_TUNNEL_ACK payload (after the header).
///
/// A non-success reply is returned as data, not as an error: the hub still
/// needs the connection id to release the pending slot.
pub async fn decode_build_tunnel_ack<R>(r: &mut R) -> Result<BuildTunnelAck, CodecError>
where
    R: AsyncRead + Unpin,
{
    let name = decode_name(r).await?;
    let conn_id = ConnectionId(r.read_u64().await?);
    let reply = decode_reply(r).await?;
    Ok(BuildTunnelAck {
        name,
        conn_id,
        reply,
    })
}
