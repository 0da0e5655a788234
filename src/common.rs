//! Crate-wide constants and the operator-facing error type.

use std::error::Error;
use std::fmt;

use crate::rpc::RpcError;

pub mod constants {
    /// Port of the first general; general `i` listens on `BASE_PORT + i - 1`.
    pub const BASE_PORT: u16 = 18812;

    /// Cadence of the per-node election tick.
    pub const ELECTION_PERIOD_MS: u64 = 5000;

    /// Granularity at which sleeping loops re-check the shutdown flag.
    pub const SHUTDOWN_POLL_MS: u64 = 50;

    /// Every general binds and dials on loopback only.
    pub const HOST: &str = "127.0.0.1";
}

/// Errors surfaced to the operator shell.
#[derive(Debug)]
pub enum GeneralError {
    /// The endpoint for a new general could not be brought up.
    Rpc(RpcError),
    /// No live general has the requested id.
    UnknownGeneral(u64),
}

impl fmt::Display for GeneralError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneralError::Rpc(err) => write!(f, "rpc failure: {}", err),
            GeneralError::UnknownGeneral(id) => {
                write!(f, "General with id {} doesn't exist", id)
            }
        }
    }
}

impl Error for GeneralError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GeneralError::Rpc(err) => Some(err),
            GeneralError::UnknownGeneral(_) => None,
        }
    }
}

impl From<RpcError> for GeneralError {
    fn from(err: RpcError) -> GeneralError {
        GeneralError::Rpc(err)
    }
}
