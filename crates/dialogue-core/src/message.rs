//! Message envelope consumed by the dialogue engine
//!
//! The engine never looks inside a message's contents. It only needs the
//! threading fields (dialogue reference, message id, target), the performative
//! and the sender/recipient addresses. Protocols plug in their payload as a
//! tagged union implementing [`MessageBody`]; the performative is derived from
//! the variant, so a payload can never disagree with its own performative.
//!
//! ```text
//! Message<B>
//!   ├── dialogue_reference  (starter nonce, responder nonce)
//!   ├── message_id          signed: starter > 0, responder < 0
//!   ├── target              0 for the first message, else the id replied to
//!   ├── sender / to         set by the engine on outbound messages
//!   └── body: B             protocol enum, B::performative()
//! ```

use std::fmt;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Address of an agent taking part in dialogues
pub type Address = String;

/// Pair of nonces identifying a dialogue: (starter reference, responder reference)
pub type DialogueReference = (String, String);

/// Id of the first message of every dialogue
pub const STARTING_MESSAGE_ID: i64 = 1;

/// Target of the first message of every dialogue
pub const STARTING_TARGET: i64 = 0;

/// Placeholder for a nonce that has not been assigned yet
pub const UNASSIGNED_DIALOGUE_REFERENCE: &str = "";

/// Protocol-specific message contents
///
/// Implemented by a protocol's payload enum. Each variant corresponds to one
/// performative, which the engine reads through [`MessageBody::performative`].
pub trait MessageBody:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Closed set of speech-act tags for this protocol
    type Performative: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// The performative carried by this payload
    fn performative(&self) -> Self::Performative;
}

/// A message exchanged within a dialogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message<B> {
    /// Dialogue reference (starter nonce, responder nonce)
    pub dialogue_reference: DialogueReference,

    /// Signed message id
    pub message_id: i64,

    /// Id of the message this one replies to (0 for the first message)
    pub target: i64,

    /// Sender address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Address>,

    /// Recipient address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,

    /// Protocol-specific payload
    pub body: B,
}

impl<B: MessageBody> Message<B> {
    /// Create an unaddressed message
    pub fn new(dialogue_reference: DialogueReference, message_id: i64, target: i64, body: B) -> Self {
        Self {
            dialogue_reference,
            message_id,
            target,
            sender: None,
            to: None,
            body,
        }
    }

    /// Set the sender
    pub fn with_sender(mut self, sender: impl Into<Address>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Set the recipient
    pub fn with_to(mut self, to: impl Into<Address>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// The message's performative
    pub fn performative(&self) -> B::Performative {
        self.body.performative()
    }

    /// Whether the sender is set
    pub fn has_sender(&self) -> bool {
        self.sender.is_some()
    }

    /// Whether the recipient is set
    pub fn has_to(&self) -> bool {
        self.to.is_some()
    }

    /// Sender address, or the empty string when unset
    pub fn sender(&self) -> &str {
        self.sender.as_deref().unwrap_or_default()
    }

    /// Recipient address, or the empty string when unset
    pub fn to(&self) -> &str {
        self.to.as_deref().unwrap_or_default()
    }

    /// Starter half of the dialogue reference
    pub fn starter_reference(&self) -> &str {
        &self.dialogue_reference.0
    }

    /// Responder half of the dialogue reference
    pub fn responder_reference(&self) -> &str {
        &self.dialogue_reference.1
    }

    /// Serialize to a JSON value
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Deserialize from a JSON value
    pub fn from_json(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

impl<B: MessageBody> fmt::Display for Message<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message(dialogue_reference=({}, {}), message_id={}, target={}, performative={}, sender={}, to={})",
            self.dialogue_reference.0,
            self.dialogue_reference.1,
            self.message_id,
            self.target,
            self.performative(),
            self.sender(),
            self.to(),
        )
    }
}
