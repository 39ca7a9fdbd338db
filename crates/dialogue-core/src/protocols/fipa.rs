//! FIPA negotiation protocol
//!
//! A buyer opens with a call for proposals, the seller proposes, and the two
//! sides accept, match and exchange information until one of them ends or
//! declines the negotiation.
//!
//! ```text
//! CFP ──► PROPOSE ──► ACCEPT ──────────► MATCH_ACCEPT ──────────┐
//!  │         │   └──► ACCEPT_W_INFORM ─► MATCH_ACCEPT_W_INFORM ─┤
//!  │         │              │                                   ▼
//!  ▼         ▼              ▼                            INFORM* ──► END
//! DECLINE  DECLINE        DECLINE
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dialogue::{Dialogue, Rules};
use crate::message::{Message, MessageBody};
use crate::protocol::{Protocol, RoleFromFirstMessage};

/// Speech acts of the FIPA negotiation protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FipaPerformative {
    Cfp,
    Propose,
    Accept,
    AcceptWInform,
    MatchAccept,
    MatchAcceptWInform,
    Inform,
    Decline,
    End,
}

impl FipaPerformative {
    /// Every performative of the protocol
    pub const ALL: [FipaPerformative; 9] = [
        FipaPerformative::Cfp,
        FipaPerformative::Propose,
        FipaPerformative::Accept,
        FipaPerformative::AcceptWInform,
        FipaPerformative::MatchAccept,
        FipaPerformative::MatchAcceptWInform,
        FipaPerformative::Inform,
        FipaPerformative::Decline,
        FipaPerformative::End,
    ];

    /// Wire name of the performative
    pub fn as_str(&self) -> &'static str {
        match self {
            FipaPerformative::Cfp => "cfp",
            FipaPerformative::Propose => "propose",
            FipaPerformative::Accept => "accept",
            FipaPerformative::AcceptWInform => "accept_w_inform",
            FipaPerformative::MatchAccept => "match_accept",
            FipaPerformative::MatchAcceptWInform => "match_accept_w_inform",
            FipaPerformative::Inform => "inform",
            FipaPerformative::Decline => "decline",
            FipaPerformative::End => "end",
        }
    }
}

impl fmt::Display for FipaPerformative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form key/value information attached to some performatives
pub type Info = BTreeMap<String, String>;

/// Message contents, one variant per performative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "performative", rename_all = "snake_case")]
pub enum FipaBody {
    Cfp { query: String },
    Propose { proposal: String },
    Accept,
    AcceptWInform { info: Info },
    MatchAccept,
    MatchAcceptWInform { info: Info },
    Inform { info: Info },
    Decline,
    End,
}

impl MessageBody for FipaBody {
    type Performative = FipaPerformative;

    fn performative(&self) -> FipaPerformative {
        match self {
            FipaBody::Cfp { .. } => FipaPerformative::Cfp,
            FipaBody::Propose { .. } => FipaPerformative::Propose,
            FipaBody::Accept => FipaPerformative::Accept,
            FipaBody::AcceptWInform { .. } => FipaPerformative::AcceptWInform,
            FipaBody::MatchAccept => FipaPerformative::MatchAccept,
            FipaBody::MatchAcceptWInform { .. } => FipaPerformative::MatchAcceptWInform,
            FipaBody::Inform { .. } => FipaPerformative::Inform,
            FipaBody::Decline => FipaPerformative::Decline,
            FipaBody::End => FipaPerformative::End,
        }
    }
}

/// Role of an agent in a FIPA dialogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FipaRole {
    Seller,
    Buyer,
}

impl fmt::Display for FipaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FipaRole::Seller => write!(f, "seller"),
            FipaRole::Buyer => write!(f, "buyer"),
        }
    }
}

/// How a FIPA dialogue ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FipaEndState {
    Successful,
    DeclinedCfp,
    DeclinedPropose,
    DeclinedAccept,
}

impl fmt::Display for FipaEndState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FipaEndState::Successful => "successful",
            FipaEndState::DeclinedCfp => "declined_cfp",
            FipaEndState::DeclinedPropose => "declined_propose",
            FipaEndState::DeclinedAccept => "declined_accept",
        };
        f.write_str(name)
    }
}

/// FIPA protocol descriptor
#[derive(Debug, Clone, Copy, Default)]
pub struct Fipa;

impl Protocol for Fipa {
    type Body = FipaBody;
    type Role = FipaRole;
    type EndState = FipaEndState;

    const NAME: &'static str = "fipa";

    fn end_states() -> Vec<FipaEndState> {
        vec![
            FipaEndState::Successful,
            FipaEndState::DeclinedCfp,
            FipaEndState::DeclinedPropose,
            FipaEndState::DeclinedAccept,
        ]
    }

    fn end_state(dialogue: &Dialogue<Self>) -> Option<FipaEndState> {
        let last = dialogue.last_message()?;
        match last.performative() {
            FipaPerformative::End => Some(FipaEndState::Successful),
            FipaPerformative::Decline => {
                let declined = dialogue.get_message_by_id(last.target)?;
                match declined.performative() {
                    FipaPerformative::Cfp => Some(FipaEndState::DeclinedCfp),
                    FipaPerformative::Propose => Some(FipaEndState::DeclinedPropose),
                    FipaPerformative::Accept | FipaPerformative::AcceptWInform => {
                        Some(FipaEndState::DeclinedAccept)
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Reply structure of the FIPA protocol
pub fn rules() -> Rules<FipaPerformative> {
    use FipaPerformative::*;

    Rules::new(
        [Cfp],
        [Decline, End],
        [
            (Cfp, vec![Propose, Decline]),
            (Propose, vec![Accept, AcceptWInform, Decline]),
            (Accept, vec![Decline, MatchAccept, MatchAcceptWInform]),
            (AcceptWInform, vec![Decline, MatchAcceptWInform]),
            (MatchAccept, vec![Inform, End]),
            (MatchAcceptWInform, vec![Inform, End]),
            (Inform, vec![Inform, End]),
            (Decline, vec![]),
            (End, vec![]),
        ],
    )
}

/// The sender of the call for proposals is the buyer
pub fn role_from_first_message(message: &Message<FipaBody>, self_address: &str) -> FipaRole {
    if message.sender() == self_address {
        FipaRole::Buyer
    } else {
        FipaRole::Seller
    }
}

/// [`role_from_first_message`] in the form [`Dialogues`](crate::manager::Dialogues) expects
pub fn role_inference() -> RoleFromFirstMessage<Fipa> {
    Arc::new(role_from_first_message)
}
