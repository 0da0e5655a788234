//! Minimal blocking RPC plumbing: one request frame in, one reply frame out,
//! over a short-lived loopback TCP connection.

pub mod client;
pub mod server;

use std::error::Error;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Upper bound on a single frame; anything larger is a corrupt stream.
const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug)]
pub enum RpcError {
    Io(io::Error),
    Codec(bincode::Error),
    /// `serve` was called before `bind`.
    NotBound,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Io(err) => write!(f, "io error: {}", err),
            RpcError::Codec(err) => write!(f, "codec error: {}", err),
            RpcError::NotBound => f.write_str("server is not bound to an address"),
        }
    }
}

impl Error for RpcError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RpcError::Io(err) => Some(err),
            RpcError::Codec(err) => Some(err),
            RpcError::NotBound => None,
        }
    }
}

impl From<io::Error> for RpcError {
    fn from(err: io::Error) -> RpcError {
        RpcError::Io(err)
    }
}

impl From<bincode::Error> for RpcError {
    fn from(err: bincode::Error) -> RpcError {
        RpcError::Codec(err)
    }
}

/// Writes `value` as a length-prefixed bincode frame.
fn write_frame<T: Serialize>(stream: &mut TcpStream, value: &T) -> Result<(), RpcError> {
    let payload = bincode::serialize(value)?;
    let len = payload.len() as u32;
    stream.write_all(&len.to_le_bytes())?;
    stream.write_all(&payload)?;
    stream.flush()?;
    Ok(())
}

/// Reads one length-prefixed bincode frame.
fn read_frame<T: DeserializeOwned>(stream: &mut TcpStream) -> Result<T, RpcError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(RpcError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds the {} byte limit", len, MAX_FRAME_LEN),
        )));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(bincode::deserialize(&payload)?)
}
