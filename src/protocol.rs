//! Wire messages exchanged between generals and with the operator shell.
//!
//! Every request travels as one tagged [`Request`] frame and is answered by
//! one [`Reply`] frame.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A commander's order, or a relayed vote about one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opinion {
    Attack,
    Retreat,
}

impl Opinion {
    /// The opposite opinion.
    pub fn flipped(self) -> Opinion {
        match self {
            Opinion::Attack => Opinion::Retreat,
            Opinion::Retreat => Opinion::Attack,
        }
    }

    pub fn parse(raw: &str) -> Option<Opinion> {
        match raw {
            "attack" => Some(Opinion::Attack),
            "retreat" => Some(Opinion::Retreat),
            _ => None,
        }
    }
}

impl fmt::Display for Opinion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opinion::Attack => f.write_str("attack"),
            Opinion::Retreat => f.write_str("retreat"),
        }
    }
}

/// Coordinator or not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Primary,
    Secondary,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => f.write_str("primary"),
            Role::Secondary => f.write_str("secondary"),
        }
    }
}

/// Operator-set fault flag. A faulty general lies about the opinions it
/// forwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultState {
    Faulty,
    NonFaulty,
}

impl FaultState {
    pub fn parse(raw: &str) -> Option<FaultState> {
        match raw {
            "faulty" => Some(FaultState::Faulty),
            "non-faulty" => Some(FaultState::NonFaulty),
            _ => None,
        }
    }
}

impl fmt::Display for FaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultState::Faulty => f.write_str("faulty"),
            FaultState::NonFaulty => f.write_str("non-faulty"),
        }
    }
}

/// Fields a `list` request can ask a general to render.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Property {
    Id,
    Role,
    Majority,
    State,
}

/// Bully election messages. `Election` travels as a request; `Ok` and
/// `Coordinator` come back as replies, and `Coordinator` is also broadcast
/// by a fresh winner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionMessage {
    Election,
    Ok,
    Coordinator,
}

/// One operation on a general's endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Request {
    List { properties: Vec<Property> },
    GetId,
    GetState,
    SetState { state: FaultState },
    IsAlive,
    GetKnownCoordinatorPort,
    SendMessage {
        sender_port: u16,
        sender_id: u64,
        message: ElectionMessage,
    },
    SendOrder { sender_port: u16, opinion: Opinion },
    ExecuteOrder { opinion: Opinion },
    ReportConsensus { majority: Option<Opinion> },
    Stop,
}

/// The answer to a [`Request`], variant-matched by the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Listing(String),
    Id(u64),
    State(FaultState),
    Alive(bool),
    KnownCoordinatorPort(Option<u16>),
    Election(Option<ElectionMessage>),
    Verdict(String),
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opinion_parses_both_values() {
        assert_eq!(Opinion::parse("attack"), Some(Opinion::Attack));
        assert_eq!(Opinion::parse("retreat"), Some(Opinion::Retreat));
        assert_eq!(Opinion::parse("surrender"), None);
        assert_eq!(Opinion::parse("Attack"), None);
    }

    #[test]
    fn opinion_displays_lowercase() {
        assert_eq!(Opinion::Attack.to_string(), "attack");
        assert_eq!(Opinion::Retreat.to_string(), "retreat");
    }

    #[test]
    fn flipped_swaps_opinions() {
        assert_eq!(Opinion::Attack.flipped(), Opinion::Retreat);
        assert_eq!(Opinion::Retreat.flipped(), Opinion::Attack);
    }

    #[test]
    fn fault_state_parses_operator_spelling() {
        assert_eq!(FaultState::parse("faulty"), Some(FaultState::Faulty));
        assert_eq!(FaultState::parse("non-faulty"), Some(FaultState::NonFaulty));
        assert_eq!(FaultState::parse("nonfaulty"), None);
    }

    #[test]
    fn role_displays_operator_spelling() {
        assert_eq!(Role::Primary.to_string(), "primary");
        assert_eq!(Role::Secondary.to_string(), "secondary");
    }
}
