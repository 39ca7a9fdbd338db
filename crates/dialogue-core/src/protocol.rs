//! Protocol descriptor trait
//!
//! A [`Protocol`] ties together the types one concrete speech-act protocol
//! uses: its message payload (and through it the performative enum), the roles
//! an agent can play and the end states a finished dialogue is classified
//! into. The reply structure itself is a runtime [`Rules`](crate::dialogue::Rules)
//! value handed to [`Dialogues`](crate::manager::Dialogues) at construction.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::dialogue::Dialogue;
use crate::message::{Message, MessageBody};

/// Performative type of a protocol
pub type Performative<P> = <<P as Protocol>::Body as MessageBody>::Performative;

/// Callback deciding the local agent's role from the first message of a dialogue
///
/// Receives the first message and the local agent's address.
pub type RoleFromFirstMessage<P> =
    Arc<dyn Fn(&Message<<P as Protocol>::Body>, &str) -> <P as Protocol>::Role + Send + Sync>;

/// Types and hooks of one speech-act protocol
pub trait Protocol: Sized + Send + Sync + 'static {
    /// Message payload, one variant per performative
    type Body: MessageBody;

    /// Role of the local agent in a dialogue; persisted as a string
    type Role: Copy
        + Eq
        + Hash
        + fmt::Debug
        + fmt::Display
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// Classification of a finished dialogue
    type EndState: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// Protocol name, used in logs
    const NAME: &'static str;

    /// Every end state the protocol can report
    fn end_states() -> Vec<Self::EndState>;

    /// Protocol-specific validation run after the generic checks
    ///
    /// Returns a human-readable reason on failure.
    fn custom_validation(
        _dialogue: &Dialogue<Self>,
        _message: &Message<Self::Body>,
    ) -> Result<(), String> {
        Ok(())
    }

    /// Classify a dialogue that just reached a terminal performative
    fn end_state(_dialogue: &Dialogue<Self>) -> Option<Self::EndState> {
        None
    }
}
