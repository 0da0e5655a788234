//! Short-lived requests to a peer endpoint.
//!
//! The helpers below flatten every transport failure into `None`/`false`:
//! from a caller's point of view an unreachable general is a dead general.

use std::net::TcpStream;

use super::{read_frame, write_frame, RpcError};
use crate::common::constants;
use crate::protocol::{ElectionMessage, FaultState, Opinion, Property, Reply, Request};

/// One-shot request to the general listening on `port`.
pub struct Rpc {
    request: Request,
}

impl Rpc {
    pub fn new(request: Request) -> Rpc {
        Rpc { request }
    }

    /// Connects, sends the request, and blocks for the reply.
    pub fn send(&self, port: u16) -> Result<Reply, RpcError> {
        let mut stream = TcpStream::connect((constants::HOST, port))?;
        write_frame(&mut stream, &self.request)?;
        read_frame(&mut stream)
    }
}

pub fn is_alive(port: u16) -> bool {
    Rpc::new(Request::IsAlive)
        .send(port)
        .map(|reply| matches!(reply, Reply::Alive(true)))
        .unwrap_or(false)
}

pub fn get_id(port: u16) -> Option<u64> {
    match Rpc::new(Request::GetId).send(port) {
        Ok(Reply::Id(id)) => Some(id),
        _ => None,
    }
}

pub fn get_state(port: u16) -> Option<FaultState> {
    match Rpc::new(Request::GetState).send(port) {
        Ok(Reply::State(state)) => Some(state),
        _ => None,
    }
}

pub fn set_state(port: u16, state: FaultState) -> bool {
    Rpc::new(Request::SetState { state }).send(port).is_ok()
}

/// The coordinator port cached by the general on `port`, if it knows one.
pub fn known_coordinator_port(port: u16) -> Option<u16> {
    match Rpc::new(Request::GetKnownCoordinatorPort).send(port) {
        Ok(Reply::KnownCoordinatorPort(coordinator)) => coordinator,
        _ => None,
    }
}

/// One Bully election step. `None` covers both "no reply" and "unreachable";
/// the election treats either as a silent abstention.
pub fn send_message(
    port: u16,
    sender_port: u16,
    sender_id: u64,
    message: ElectionMessage,
) -> Option<ElectionMessage> {
    match Rpc::new(Request::SendMessage {
        sender_port,
        sender_id,
        message,
    })
    .send(port)
    {
        Ok(Reply::Election(reply)) => reply,
        _ => None,
    }
}

pub fn send_order(port: u16, sender_port: u16, opinion: Opinion) -> bool {
    Rpc::new(Request::SendOrder {
        sender_port,
        opinion,
    })
    .send(port)
    .is_ok()
}

/// Runs a full order round on the commander at `port`; blocks until the
/// verdict comes back.
pub fn execute_order(port: u16, opinion: Opinion) -> Option<String> {
    match Rpc::new(Request::ExecuteOrder { opinion }).send(port) {
        Ok(Reply::Verdict(verdict)) => Some(verdict),
        _ => None,
    }
}

pub fn report_consensus(port: u16, majority: Option<Opinion>) -> bool {
    Rpc::new(Request::ReportConsensus { majority })
        .send(port)
        .is_ok()
}

pub fn list(port: u16, properties: &[Property]) -> Option<String> {
    match Rpc::new(Request::List {
        properties: properties.to_vec(),
    })
    .send(port)
    {
        Ok(Reply::Listing(listing)) => Some(listing),
        _ => None,
    }
}

pub fn stop(port: u16) -> bool {
    Rpc::new(Request::Stop).send(port).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_port_flattens_to_absent() {
        // Nothing listens here; every helper must degrade silently.
        const DEAD_PORT: u16 = 18949;
        assert!(!is_alive(DEAD_PORT));
        assert_eq!(get_id(DEAD_PORT), None);
        assert_eq!(get_state(DEAD_PORT), None);
        assert_eq!(known_coordinator_port(DEAD_PORT), None);
        assert_eq!(
            send_message(DEAD_PORT, 1, 1, ElectionMessage::Election),
            None
        );
        assert!(!send_order(DEAD_PORT, 1, Opinion::Attack));
        assert_eq!(execute_order(DEAD_PORT, Opinion::Attack), None);
        assert!(!report_consensus(DEAD_PORT, Some(Opinion::Attack)));
        assert_eq!(list(DEAD_PORT, &[Property::Id]), None);
        assert!(!stop(DEAD_PORT));
    }
}
