//! Dialogue identity
//!
//! A [`DialogueLabel`] names one dialogue from the point of view of one agent:
//! the dialogue reference pair plus the opponent's address and the address of
//! whoever started the dialogue. While the responder nonce is still unassigned
//! the label is *incomplete*; once the responder's first message arrives it
//! becomes *complete*. Both versions name the same logical dialogue and the
//! storage layer resolves either one to the live [`Dialogue`](super::Dialogue).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DialogueError;
use crate::message::{Address, DialogueReference, UNASSIGNED_DIALOGUE_REFERENCE};

/// Number of random bytes in a dialogue nonce
pub const NONCE_BYTES_NB: usize = 32;

/// Identifier of a dialogue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "DialogueLabelRecord", into = "DialogueLabelRecord")]
pub struct DialogueLabel {
    dialogue_reference: DialogueReference,
    dialogue_opponent_addr: Address,
    dialogue_starter_addr: Address,
}

/// Structured form of a label as stored in dialogue records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueLabelRecord {
    pub dialogue_starter_reference: String,
    pub dialogue_responder_reference: String,
    pub dialogue_opponent_addr: String,
    pub dialogue_starter_addr: String,
}

impl DialogueLabel {
    /// Create a new dialogue label
    pub fn new(
        dialogue_reference: DialogueReference,
        dialogue_opponent_addr: impl Into<Address>,
        dialogue_starter_addr: impl Into<Address>,
    ) -> Self {
        Self {
            dialogue_reference,
            dialogue_opponent_addr: dialogue_opponent_addr.into(),
            dialogue_starter_addr: dialogue_starter_addr.into(),
        }
    }

    /// The dialogue reference pair
    pub fn dialogue_reference(&self) -> &DialogueReference {
        &self.dialogue_reference
    }

    /// The nonce assigned by the dialogue starter
    pub fn dialogue_starter_reference(&self) -> &str {
        &self.dialogue_reference.0
    }

    /// The nonce assigned by the responder (empty while incomplete)
    pub fn dialogue_responder_reference(&self) -> &str {
        &self.dialogue_reference.1
    }

    /// Address of the agent the dialogue is kept with
    pub fn dialogue_opponent_addr(&self) -> &str {
        &self.dialogue_opponent_addr
    }

    /// Address of the agent that started the dialogue
    pub fn dialogue_starter_addr(&self) -> &str {
        &self.dialogue_starter_addr
    }

    /// Whether the responder nonce has been assigned
    pub fn is_complete(&self) -> bool {
        self.dialogue_reference.1 != UNASSIGNED_DIALOGUE_REFERENCE
    }

    /// The same label with the responder nonce cleared
    pub fn get_incomplete_version(&self) -> Self {
        Self {
            dialogue_reference: (
                self.dialogue_reference.0.clone(),
                UNASSIGNED_DIALOGUE_REFERENCE.to_string(),
            ),
            dialogue_opponent_addr: self.dialogue_opponent_addr.clone(),
            dialogue_starter_addr: self.dialogue_starter_addr.clone(),
        }
    }

    /// Structured record form
    pub fn json(&self) -> DialogueLabelRecord {
        self.clone().into()
    }

    /// Build a label from its structured record form
    pub fn from_json(record: DialogueLabelRecord) -> Self {
        record.into()
    }
}

impl From<DialogueLabelRecord> for DialogueLabel {
    fn from(record: DialogueLabelRecord) -> Self {
        DialogueLabel::new(
            (
                record.dialogue_starter_reference,
                record.dialogue_responder_reference,
            ),
            record.dialogue_opponent_addr,
            record.dialogue_starter_addr,
        )
    }
}

impl From<DialogueLabel> for DialogueLabelRecord {
    fn from(label: DialogueLabel) -> Self {
        let (starter, responder) = label.dialogue_reference;
        DialogueLabelRecord {
            dialogue_starter_reference: starter,
            dialogue_responder_reference: responder,
            dialogue_opponent_addr: label.dialogue_opponent_addr,
            dialogue_starter_addr: label.dialogue_starter_addr,
        }
    }
}

/// Canonical string form: `{starter_ref}_{responder_ref}_{opponent_addr}_{starter_addr}`
///
/// This is also the key under which a dialogue record is stored.
impl fmt::Display for DialogueLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.dialogue_reference.0,
            self.dialogue_reference.1,
            self.dialogue_opponent_addr,
            self.dialogue_starter_addr
        )
    }
}

/// Parse the canonical string form.
///
/// The separator is not escaped, so addresses containing `_` cannot be
/// parsed back; such strings are rejected rather than split arbitrarily.
impl FromStr for DialogueLabel {
    type Err = DialogueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('_').collect();
        match parts.as_slice() {
            [starter, responder, opponent, starter_addr] => Ok(DialogueLabel::new(
                (starter.to_string(), responder.to_string()),
                *opponent,
                *starter_addr,
            )),
            _ => Err(DialogueError::invalid_record(format!(
                "Dialogue label string must have 4 '_'-separated fields, found {}: {}",
                parts.len(),
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label() -> DialogueLabel {
        DialogueLabel::new(
            ("starter".to_string(), "responder".to_string()),
            "opponent",
            "starter",
        )
    }

    #[test]
    fn test_label_accessors() {
        let label = label();
        assert_eq!(label.dialogue_starter_reference(), "starter");
        assert_eq!(label.dialogue_responder_reference(), "responder");
        assert_eq!(label.dialogue_opponent_addr(), "opponent");
        assert_eq!(label.dialogue_starter_addr(), "starter");
        assert!(label.is_complete());
    }

    #[test]
    fn test_incomplete_version() {
        let label = label();
        let incomplete = label.get_incomplete_version();

        assert!(!incomplete.is_complete());
        assert_eq!(incomplete.dialogue_starter_reference(), "starter");
        assert_eq!(incomplete.dialogue_responder_reference(), "");
        assert_eq!(incomplete.dialogue_opponent_addr(), label.dialogue_opponent_addr());
        assert_ne!(incomplete, label);
        assert_eq!(incomplete.get_incomplete_version(), incomplete);
    }

    #[test]
    fn test_canonical_string() {
        let label = label();
        assert_eq!(label.to_string(), "starter_responder_opponent_starter");

        let parsed: DialogueLabel = label.to_string().parse().unwrap();
        assert_eq!(parsed, label);

        let incomplete = label.get_incomplete_version();
        assert_eq!(incomplete.to_string(), "starter__opponent_starter");
        let parsed: DialogueLabel = incomplete.to_string().parse().unwrap();
        assert_eq!(parsed, incomplete);
    }

    #[test]
    fn test_canonical_string_rejects_separator_in_address() {
        let label = DialogueLabel::new(
            ("a".to_string(), "b".to_string()),
            "agent_one",
            "agent_two",
        );
        assert!(label.to_string().parse::<DialogueLabel>().is_err());
    }

    #[test]
    fn test_record_form() {
        let label = label();
        let value = serde_json::to_value(&label).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "dialogue_starter_reference": "starter",
                "dialogue_responder_reference": "responder",
                "dialogue_opponent_addr": "opponent",
                "dialogue_starter_addr": "starter",
            })
        );
        assert_eq!(DialogueLabel::from_json(label.json()), label);
        assert_eq!(serde_json::from_value::<DialogueLabel>(value).unwrap(), label);
    }
}
