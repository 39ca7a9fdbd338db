//! Dialogue implementation
//!
//! This module contains the [`Dialogue`] struct, which holds one conversation's
//! message history and validates every message appended to it, and
//! [`DialogueHandle`], the shared handle through which the manager, the storage
//! layer and the application all reach the same dialogue.
//!
//! ## Message ids
//!
//! The starter's messages carry ids `1, 2, 3, ...` and the responder's carry
//! `-1, -2, -3, ...`. The next id in either direction is a pure function of
//! the history, so it can be computed speculatively before a message is
//! committed.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::label::DialogueLabel;
use super::rules::{describe_performatives, Rules};
use crate::errors::{DialogueError, DialogueResult};
use crate::message::{
    Address, Message, STARTING_MESSAGE_ID, STARTING_TARGET, UNASSIGNED_DIALOGUE_REFERENCE,
};
use crate::protocol::{Performative, Protocol};

/// Callback invoked when a dialogue appends a terminal performative
pub type TerminalStateCallback<P> = Arc<dyn Fn(&Dialogue<P>) + Send + Sync>;

/// One conversation following a protocol's reply graph
pub struct Dialogue<P: Protocol> {
    /// Identifier of this dialogue
    dialogue_label: DialogueLabel,

    /// Address of the agent this dialogue is kept for
    self_address: Address,

    /// Role of the agent in this dialogue
    role: P::Role,

    /// Reply structure shared by all dialogues of the protocol
    rules: Arc<Rules<Performative<P>>>,

    /// Messages sent by this agent, in order
    outgoing_messages: Vec<Message<P::Body>>,

    /// Messages received from the opponent, in order
    incoming_messages: Vec<Message<P::Body>>,

    /// Id of the most recently appended message
    last_message_id: Option<i64>,

    /// Ids of all messages in the order they were appended
    ordered_message_ids: Vec<i64>,

    /// Named callbacks fired on reaching a terminal performative
    terminal_state_callbacks: Vec<(String, TerminalStateCallback<P>)>,
}

impl<P: Protocol> Dialogue<P> {
    /// Create an empty dialogue
    pub fn new(
        dialogue_label: DialogueLabel,
        self_address: impl Into<Address>,
        role: P::Role,
        rules: Arc<Rules<Performative<P>>>,
    ) -> Self {
        Self {
            dialogue_label,
            self_address: self_address.into(),
            role,
            rules,
            outgoing_messages: Vec::new(),
            incoming_messages: Vec::new(),
            last_message_id: None,
            ordered_message_ids: Vec::new(),
            terminal_state_callbacks: Vec::new(),
        }
    }

    /// Register a callback fired when a terminal performative is appended
    ///
    /// Registering a second callback under the same name replaces the first.
    pub fn add_terminal_state_callback(
        &mut self,
        name: impl Into<String>,
        callback: TerminalStateCallback<P>,
    ) {
        let name = name.into();
        if let Some(slot) = self
            .terminal_state_callbacks
            .iter_mut()
            .find(|(existing, _)| *existing == name)
        {
            slot.1 = callback;
        } else {
            self.terminal_state_callbacks.push((name, callback));
        }
    }

    /// The dialogue label
    pub fn dialogue_label(&self) -> &DialogueLabel {
        &self.dialogue_label
    }

    /// The label with the responder nonce cleared
    pub fn incomplete_dialogue_label(&self) -> DialogueLabel {
        self.dialogue_label.get_incomplete_version()
    }

    /// Both labels this dialogue answers to (complete and incomplete)
    pub fn dialogue_labels(&self) -> HashSet<DialogueLabel> {
        let mut labels = HashSet::with_capacity(2);
        labels.insert(self.dialogue_label.clone());
        labels.insert(self.incomplete_dialogue_label());
        labels
    }

    /// Address of the agent this dialogue is kept for
    pub fn self_address(&self) -> &str {
        &self.self_address
    }

    /// Role of the agent in this dialogue
    pub fn role(&self) -> P::Role {
        self.role
    }

    /// The protocol rules
    pub fn rules(&self) -> &Rules<Performative<P>> {
        &self.rules
    }

    /// Whether the local agent started this dialogue
    pub fn is_self_initiated(&self) -> bool {
        self.dialogue_label.dialogue_opponent_addr() != self.dialogue_label.dialogue_starter_addr()
    }

    /// Messages sent by the local agent
    pub fn outgoing_messages(&self) -> &[Message<P::Body>] {
        &self.outgoing_messages
    }

    /// Messages received from the opponent
    pub fn incoming_messages(&self) -> &[Message<P::Body>] {
        &self.incoming_messages
    }

    /// Id of the most recently appended message
    pub fn last_message_id(&self) -> Option<i64> {
        self.last_message_id
    }

    /// Message ids in append order
    pub fn ordered_message_ids(&self) -> &[i64] {
        &self.ordered_message_ids
    }

    /// All messages in the order they were appended
    pub fn messages(&self) -> Vec<&Message<P::Body>> {
        self.ordered_message_ids
            .iter()
            .filter_map(|id| self.get_message_by_id(*id))
            .collect()
    }

    /// The last incoming message, if any
    pub fn last_incoming_message(&self) -> Option<&Message<P::Body>> {
        self.incoming_messages.last()
    }

    /// The last outgoing message, if any
    pub fn last_outgoing_message(&self) -> Option<&Message<P::Body>> {
        self.outgoing_messages.last()
    }

    /// The most recently appended message, if any
    pub fn last_message(&self) -> Option<&Message<P::Body>> {
        let last_message_id = self.last_message_id?;
        match self.last_incoming_message() {
            Some(message) if message.message_id == last_message_id => Some(message),
            _ => self.last_outgoing_message(),
        }
    }

    /// Whether no message has been appended yet
    pub fn is_empty(&self) -> bool {
        self.outgoing_messages.is_empty() && self.incoming_messages.is_empty()
    }

    /// Whether a terminal performative has been appended
    pub fn is_terminal(&self) -> bool {
        self.incoming_messages
            .iter()
            .chain(self.outgoing_messages.iter())
            .any(|message| self.rules.is_terminal(message.performative()))
    }

    /// Look up a message by its signed id
    ///
    /// Returns `None` for id 0, which never names a message.
    pub fn get_message_by_id(&self, message_id: i64) -> Option<&Message<P::Body>> {
        if self.is_empty() || message_id == STARTING_TARGET {
            return None;
        }

        let messages = if (message_id > 0) == self.is_self_initiated() {
            &self.outgoing_messages
        } else {
            &self.incoming_messages
        };

        let last = messages.last()?;
        let index = message_id.unsigned_abs();
        if index > last.message_id.unsigned_abs() {
            return None;
        }

        messages.get((index - 1) as usize)
    }

    /// Next id for a message sent by the local agent
    pub fn get_outgoing_next_message_id(&self) -> i64 {
        let next_message_id = self
            .last_outgoing_message()
            .map_or(STARTING_MESSAGE_ID, |message| message.message_id.abs() + 1);

        if self.is_self_initiated() {
            next_message_id
        } else {
            -next_message_id
        }
    }

    /// Next id for a message sent by the opponent
    pub fn get_incoming_next_message_id(&self) -> i64 {
        let next_message_id = self
            .last_incoming_message()
            .map_or(STARTING_MESSAGE_ID, |message| message.message_id.abs() + 1);

        if self.is_self_initiated() {
            -next_message_id
        } else {
            next_message_id
        }
    }

    /// Reply to the last message of the dialogue
    pub fn reply(&mut self, body: P::Body) -> DialogueResult<Message<P::Body>> {
        self.reply_with(body, None, None)
    }

    /// Reply to the message with id `target`
    pub fn reply_to(&mut self, body: P::Body, target: i64) -> DialogueResult<Message<P::Body>> {
        self.reply_with(body, None, Some(target))
    }

    /// Reply to `target_message` and/or `target`, defaulting to the last message
    ///
    /// The reply is addressed, appended to the dialogue and returned for
    /// transmission.
    ///
    /// # Panics
    ///
    /// Panics if the dialogue is empty, or if both `target_message` and
    /// `target` are given and disagree.
    pub fn reply_with(
        &mut self,
        body: P::Body,
        target_message: Option<&Message<P::Body>>,
        target: Option<i64>,
    ) -> DialogueResult<Message<P::Body>> {
        let last_message_id = match self.last_message() {
            Some(message) => message.message_id,
            None => panic!("Cannot reply in an empty dialogue!"),
        };

        let target = match (target_message, target) {
            (None, Some(target)) => target,
            (None, None) => last_message_id,
            (Some(message), None) => message.message_id,
            (Some(message), Some(target)) => {
                assert_eq!(
                    target, message.message_id,
                    "The provided target and target_message do not match."
                );
                target
            }
        };

        if self.get_message_by_id(target).is_none() {
            return Err(DialogueError::TargetNotFound { target });
        }

        if self.is_terminal() {
            return Err(DialogueError::invalid_message(format!(
                "Dialogue {} is in a terminal state, no further replies allowed.",
                self.dialogue_label
            )));
        }

        let reply = Message::new(
            self.dialogue_label.dialogue_reference().clone(),
            self.get_outgoing_next_message_id(),
            target,
            body,
        )
        .with_sender(self.self_address.clone())
        .with_to(self.dialogue_label.dialogue_opponent_addr());

        self.update(reply.clone())?;
        Ok(reply)
    }

    /// Append `message` if it belongs to this dialogue and is a valid next message
    ///
    /// On failure the dialogue is left unchanged.
    pub(crate) fn update(&mut self, mut message: Message<P::Body>) -> DialogueResult<()> {
        if !message.has_sender() {
            message.sender = Some(self.self_address.clone());
        }

        if !self.is_belonging_to_dialogue(&message) {
            return Err(DialogueError::invalid_message(format!(
                "The message {} does not belong to this dialogue. \
                 The dialogue reference of the message is ({}, {}), \
                 while the dialogue reference of the dialogue is ({}, {})",
                message.message_id,
                message.dialogue_reference.0,
                message.dialogue_reference.1,
                self.dialogue_label.dialogue_starter_reference(),
                self.dialogue_label.dialogue_responder_reference(),
            )));
        }

        if let Err(reason) = self.validate_next_message(&message) {
            return Err(DialogueError::invalid_message(format!(
                "Message {} is invalid with respect to this dialogue. Error: {}",
                message.message_id, reason
            )));
        }

        let message_id = message.message_id;
        let performative = message.performative();

        if self.is_message_by_self(&message) {
            self.outgoing_messages.push(message);
        } else {
            self.incoming_messages.push(message);
        }
        self.last_message_id = Some(message_id);
        self.ordered_message_ids.push(message_id);

        debug!(
            "Dialogue {} appended message {} ({})",
            self.dialogue_label, message_id, performative
        );

        if self.rules.is_terminal(performative) {
            info!(
                "Dialogue {} reached terminal performative {}",
                self.dialogue_label, performative
            );
            let callbacks: Vec<TerminalStateCallback<P>> = self
                .terminal_state_callbacks
                .iter()
                .map(|(_, callback)| callback.clone())
                .collect();
            for callback in callbacks {
                callback(&*self);
            }
        }

        Ok(())
    }

    /// Replace the incomplete label with the complete one
    ///
    /// # Panics
    ///
    /// Panics unless the current label is incomplete and `final_dialogue_label`
    /// is complete; a dialogue label is completed exactly once.
    pub fn update_dialogue_label(&mut self, final_dialogue_label: DialogueLabel) {
        assert!(
            self.dialogue_label.dialogue_responder_reference() == UNASSIGNED_DIALOGUE_REFERENCE
                && final_dialogue_label.dialogue_responder_reference()
                    != UNASSIGNED_DIALOGUE_REFERENCE,
            "Dialogue label cannot be updated."
        );
        self.dialogue_label = final_dialogue_label;
    }

    /// Check whether `message` is a valid next message in this dialogue
    ///
    /// Runs the basic structural checks (reference, id, target, reply graph)
    /// followed by the protocol's custom validation.
    pub fn validate_next_message(&self, message: &Message<P::Body>) -> Result<(), String> {
        if self.is_empty() {
            self.basic_validation_initial_message(message)?;
        } else {
            self.basic_validation_non_initial_message(message)?;
        }
        P::custom_validation(self, message)
    }

    fn basic_validation_initial_message(&self, message: &Message<P::Body>) -> Result<(), String> {
        self.validate_starter_reference(message)?;

        if message.message_id != STARTING_MESSAGE_ID {
            return Err(format!(
                "Invalid message_id. Expected {}. Found {}.",
                STARTING_MESSAGE_ID, message.message_id
            ));
        }

        self.validate_message_target(message)?;

        let performative = message.performative();
        if !self.rules.is_initial(performative) {
            return Err(format!(
                "Invalid initial performative. Expected one of {}. Found {}.",
                describe_performatives(self.rules.initial_performatives()),
                performative
            ));
        }

        Ok(())
    }

    fn basic_validation_non_initial_message(
        &self,
        message: &Message<P::Body>,
    ) -> Result<(), String> {
        self.validate_starter_reference(message)?;
        self.validate_message_id(message)?;
        self.validate_message_target(message)
    }

    fn validate_starter_reference(&self, message: &Message<P::Body>) -> Result<(), String> {
        if message.starter_reference() != self.dialogue_label.dialogue_starter_reference() {
            return Err(format!(
                "Invalid dialogue_reference[0]. Expected {}. Found {}.",
                self.dialogue_label.dialogue_starter_reference(),
                message.starter_reference()
            ));
        }
        Ok(())
    }

    fn validate_message_id(&self, message: &Message<P::Body>) -> Result<(), String> {
        let is_outgoing = message.to() != self.self_address;

        let next_message_id = if is_outgoing {
            self.get_outgoing_next_message_id()
        } else {
            self.get_incoming_next_message_id()
        };

        if message.message_id != next_message_id {
            return Err(format!(
                "Invalid message_id. Expected {}. Found {}.",
                next_message_id, message.message_id
            ));
        }
        Ok(())
    }

    fn validate_message_target(&self, message: &Message<P::Body>) -> Result<(), String> {
        let target = message.target;

        if message.message_id == STARTING_MESSAGE_ID {
            if target == STARTING_TARGET {
                return Ok(());
            }
            return Err(format!("Invalid target. Expected 0. Found {}.", target));
        }

        if target == STARTING_TARGET {
            return Err(format!(
                "Invalid target. Expected a non-zero integer. Found {}.",
                target
            ));
        }

        let latest_id = self
            .last_incoming_message()
            .map(|m| m.message_id.unsigned_abs())
            .into_iter()
            .chain(self.last_outgoing_message().map(|m| m.message_id.unsigned_abs()))
            .max()
            .unwrap_or(0);

        if target.unsigned_abs() > latest_id {
            return Err(format!(
                "Invalid target. Expected a value less than or equal to abs({}). Found abs({}).",
                latest_id,
                target.unsigned_abs()
            ));
        }

        let Some(target_message) = self.get_message_by_id(target) else {
            return Err(format!(
                "Invalid target {}. target_message can not be found.",
                target
            ));
        };

        let target_performative = target_message.performative();
        let performative = message.performative();
        if !self.rules.is_valid_reply(target_performative, performative) {
            return Err(format!(
                "Invalid performative. Expected one of {}. Found {}.",
                describe_performatives(self.rules.get_valid_replies(target_performative)),
                performative
            ));
        }

        Ok(())
    }

    fn is_message_by_self(&self, message: &Message<P::Body>) -> bool {
        message.sender() == self.self_address
    }

    fn counterparty_from_message<'a>(&self, message: &'a Message<P::Body>) -> &'a str {
        if self.is_message_by_self(message) {
            message.to()
        } else {
            message.sender()
        }
    }

    fn is_belonging_to_dialogue(&self, message: &Message<P::Body>) -> bool {
        let opponent = self.counterparty_from_message(message);
        let candidate = if self.is_self_initiated() {
            DialogueLabel::new(
                (
                    message.starter_reference().to_string(),
                    UNASSIGNED_DIALOGUE_REFERENCE.to_string(),
                ),
                opponent,
                self.self_address.clone(),
            )
        } else {
            DialogueLabel::new(message.dialogue_reference.clone(), opponent, opponent)
        };
        self.dialogue_labels().contains(&candidate)
    }

    /// Serialize to the persisted dialogue record
    pub fn to_json(&self) -> DialogueResult<serde_json::Value> {
        let record = DialogueRecordRef {
            dialogue_label: &self.dialogue_label,
            self_address: &self.self_address,
            role: &self.role,
            incoming_messages: &self.incoming_messages,
            outgoing_messages: &self.outgoing_messages,
            last_message_id: self.last_message_id,
            ordered_message_ids: &self.ordered_message_ids,
        };
        Ok(serde_json::to_value(record)?)
    }

    /// Rebuild a dialogue, with all its messages, from a persisted record
    ///
    /// Terminal-state callbacks are not persisted; the caller re-registers them.
    pub fn from_json(
        data: serde_json::Value,
        rules: Arc<Rules<Performative<P>>>,
    ) -> DialogueResult<Self> {
        let record: DialogueRecord<P::Body, P::Role> = serde_json::from_value(data).map_err(|e| {
            DialogueError::invalid_record(format!("Dialogue representation is invalid: {}", e))
        })?;

        let mut dialogue = Self::new(record.dialogue_label, record.self_address, record.role, rules);
        dialogue.incoming_messages = record.incoming_messages;
        dialogue.outgoing_messages = record.outgoing_messages;
        dialogue.last_message_id = record.last_message_id;
        dialogue.ordered_message_ids = record.ordered_message_ids;
        Ok(dialogue)
    }
}

#[derive(Serialize)]
struct DialogueRecordRef<'a, B, R> {
    dialogue_label: &'a DialogueLabel,
    self_address: &'a str,
    role: &'a R,
    incoming_messages: &'a [Message<B>],
    outgoing_messages: &'a [Message<B>],
    last_message_id: Option<i64>,
    ordered_message_ids: &'a [i64],
}

#[derive(Deserialize)]
struct DialogueRecord<B, R> {
    dialogue_label: DialogueLabel,
    self_address: Address,
    role: R,
    incoming_messages: Vec<Message<B>>,
    outgoing_messages: Vec<Message<B>>,
    last_message_id: Option<i64>,
    ordered_message_ids: Vec<i64>,
}

impl<P: Protocol> PartialEq for Dialogue<P> {
    fn eq(&self, other: &Self) -> bool {
        self.dialogue_label == other.dialogue_label
            && self.incoming_messages == other.incoming_messages
            && self.outgoing_messages == other.outgoing_messages
            && self.ordered_message_ids == other.ordered_message_ids
            && self.last_message_id == other.last_message_id
            && self.role == other.role
            && self.self_address == other.self_address
    }
}

impl<P: Protocol> fmt::Debug for Dialogue<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialogue")
            .field("protocol", &P::NAME)
            .field("dialogue_label", &self.dialogue_label)
            .field("self_address", &self.self_address)
            .field("role", &self.role)
            .field("incoming_messages", &self.incoming_messages.len())
            .field("outgoing_messages", &self.outgoing_messages.len())
            .field("last_message_id", &self.last_message_id)
            .field("terminal_state_callbacks", &self.terminal_state_callbacks.len())
            .finish()
    }
}

impl<P: Protocol> fmt::Display for Dialogue<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dialogue Label:\n{}\nMessages:", self.dialogue_label)?;
        for message in self.messages() {
            writeln!(
                f,
                "message_id={}, target={}, performative={}",
                message.message_id,
                message.target,
                message.performative()
            )?;
        }
        Ok(())
    }
}

/// Shared handle to a dialogue
///
/// The manager, the storage layer and the application hold clones of the same
/// handle. Locks are short-lived: take one, do the work, drop it.
pub struct DialogueHandle<P: Protocol> {
    inner: Arc<Mutex<Dialogue<P>>>,
}

impl<P: Protocol> DialogueHandle<P> {
    /// Wrap a dialogue in a handle
    pub fn new(dialogue: Dialogue<P>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(dialogue)),
        }
    }

    /// Lock the dialogue
    pub fn lock(&self) -> MutexGuard<'_, Dialogue<P>> {
        self.inner.lock()
    }

    /// Current label of the dialogue
    pub fn label(&self) -> DialogueLabel {
        self.inner.lock().dialogue_label().clone()
    }

    /// Whether a terminal performative has been appended
    pub fn is_terminal(&self) -> bool {
        self.inner.lock().is_terminal()
    }

    /// Reply to the last message of the dialogue
    pub fn reply(&self, body: P::Body) -> DialogueResult<Message<P::Body>> {
        self.inner.lock().reply(body)
    }

    /// Reply to the message with id `target`
    pub fn reply_to(&self, body: P::Body, target: i64) -> DialogueResult<Message<P::Body>> {
        self.inner.lock().reply_to(body, target)
    }

    /// Whether both handles point at the same dialogue
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<P: Protocol> Clone for DialogueHandle<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Protocol> fmt::Debug for DialogueHandle<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Some(dialogue) => f
                .debug_tuple("DialogueHandle")
                .field(dialogue.dialogue_label())
                .finish(),
            None => f.debug_tuple("DialogueHandle").field(&"<locked>").finish(),
        }
    }
}

#[cfg(all(test, feature = "fipa"))]
mod tests {
    use super::*;
    use crate::protocols::fipa::{self, Fipa, FipaBody, FipaRole};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BUYER: &str = "buyer_addr";
    const SELLER: &str = "seller_addr";

    fn self_initiated() -> Dialogue<Fipa> {
        let label = DialogueLabel::new(("nonce1".to_string(), String::new()), SELLER, BUYER);
        Dialogue::new(label, BUYER, FipaRole::Buyer, Arc::new(fipa::rules()))
    }

    fn other_initiated() -> Dialogue<Fipa> {
        let label = DialogueLabel::new(
            ("nonce1".to_string(), "nonce2".to_string()),
            BUYER,
            BUYER,
        );
        Dialogue::new(label, SELLER, FipaRole::Seller, Arc::new(fipa::rules()))
    }

    fn cfp() -> Message<FipaBody> {
        Message::new(
            ("nonce1".to_string(), String::new()),
            STARTING_MESSAGE_ID,
            STARTING_TARGET,
            FipaBody::Cfp { query: "apples".to_string() },
        )
        .with_sender(BUYER)
        .with_to(SELLER)
    }

    #[test]
    fn test_empty_dialogue() {
        let dialogue = self_initiated();
        assert!(dialogue.is_empty());
        assert!(dialogue.is_self_initiated());
        assert!(dialogue.last_message().is_none());
        assert!(dialogue.get_message_by_id(1).is_none());
        assert_eq!(dialogue.get_outgoing_next_message_id(), 1);
        assert_eq!(dialogue.get_incoming_next_message_id(), -1);

        let dialogue = other_initiated();
        assert!(!dialogue.is_self_initiated());
        assert_eq!(dialogue.get_outgoing_next_message_id(), -1);
        assert_eq!(dialogue.get_incoming_next_message_id(), 1);
    }

    #[test]
    fn test_initial_message_appended() {
        let mut dialogue = self_initiated();
        dialogue.update(cfp()).unwrap();

        assert!(!dialogue.is_empty());
        assert_eq!(dialogue.outgoing_messages().len(), 1);
        assert_eq!(dialogue.last_message_id(), Some(1));
        assert_eq!(dialogue.ordered_message_ids(), &[1]);
        assert_eq!(dialogue.get_outgoing_next_message_id(), 2);
        assert_eq!(dialogue.get_incoming_next_message_id(), -1);
    }

    #[test]
    fn test_initial_message_rejected_for_wrong_performative() {
        let mut dialogue = self_initiated();
        let mut message = cfp();
        message.body = FipaBody::Propose { proposal: "10".to_string() };

        let error = dialogue.update(message).unwrap_err();
        assert!(error.to_string().contains("Invalid initial performative"));
        assert!(dialogue.is_empty());
    }

    #[test]
    fn test_initial_message_rejected_for_wrong_id_and_target() {
        let mut dialogue = self_initiated();
        let mut message = cfp();
        message.message_id = 2;
        let error = dialogue.validate_next_message(&message).unwrap_err();
        assert_eq!(error, "Invalid message_id. Expected 1. Found 2.");

        let mut message = cfp();
        message.target = 1;
        let error = dialogue.validate_next_message(&message).unwrap_err();
        assert_eq!(error, "Invalid target. Expected 0. Found 1.");
    }

    #[test]
    fn test_message_not_belonging_rejected() {
        let mut dialogue = self_initiated();
        let mut message = cfp();
        message.to = Some("stranger".to_string());

        let error = dialogue.update(message).unwrap_err();
        assert!(error.to_string().contains("does not belong to this dialogue"));
    }

    #[test]
    fn test_reply_computes_id_and_target() {
        let mut dialogue = other_initiated();
        dialogue.update(cfp()).unwrap();

        let reply = dialogue
            .reply(FipaBody::Propose { proposal: "10".to_string() })
            .unwrap();

        assert_eq!(reply.message_id, -1);
        assert_eq!(reply.target, 1);
        assert_eq!(reply.sender(), SELLER);
        assert_eq!(reply.to(), BUYER);
        assert_eq!(reply.dialogue_reference, ("nonce1".to_string(), "nonce2".to_string()));
        assert_eq!(dialogue.ordered_message_ids(), &[1, -1]);
        assert_eq!(dialogue.last_message().unwrap().message_id, -1);
    }

    #[test]
    fn test_reply_rejects_disallowed_performative() {
        let mut dialogue = other_initiated();
        dialogue.update(cfp()).unwrap();

        let error = dialogue.reply(FipaBody::Accept).unwrap_err();
        assert!(error.to_string().contains("Invalid performative"));
        assert_eq!(dialogue.outgoing_messages().len(), 0);
    }

    #[test]
    fn test_reply_to_unknown_target() {
        let mut dialogue = other_initiated();
        dialogue.update(cfp()).unwrap();

        match dialogue.reply_to(FipaBody::Decline, 5) {
            Err(DialogueError::TargetNotFound { target }) => assert_eq!(target, 5),
            other => panic!("Expected TargetNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_extreme_ids_are_not_found() {
        let mut dialogue = other_initiated();
        dialogue.update(cfp()).unwrap();

        assert!(dialogue.get_message_by_id(i64::MIN).is_none());
        assert!(dialogue.get_message_by_id(i64::MAX).is_none());

        let late = Message::new(
            dialogue.dialogue_label().dialogue_reference().clone(),
            2,
            i64::MIN,
            FipaBody::Decline,
        )
        .with_sender(dialogue.dialogue_label().dialogue_opponent_addr())
        .with_to(dialogue.self_address());
        let reason = dialogue.validate_next_message(&late).unwrap_err();
        assert!(reason.starts_with("Invalid target"), "{}", reason);
    }

    #[test]
    #[should_panic(expected = "Cannot reply in an empty dialogue!")]
    fn test_reply_in_empty_dialogue_panics() {
        let mut dialogue = other_initiated();
        let _ = dialogue.reply(FipaBody::Decline);
    }

    #[test]
    #[should_panic(expected = "The provided target and target_message do not match.")]
    fn test_reply_with_mismatched_target_panics() {
        let mut dialogue = other_initiated();
        dialogue.update(cfp()).unwrap();
        let first = dialogue.last_message().cloned().unwrap();
        let _ = dialogue.reply_with(FipaBody::Decline, Some(&first), Some(2));
    }

    #[test]
    fn test_terminal_callbacks_fire_once_per_name() {
        let mut dialogue = other_initiated();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let counter = counter.clone();
            dialogue.add_terminal_state_callback(
                "counter",
                Arc::new(move |_: &Dialogue<Fipa>| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        dialogue.update(cfp()).unwrap();
        assert!(!dialogue.is_terminal());
        dialogue.reply(FipaBody::Decline).unwrap();

        assert!(dialogue.is_terminal());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_reply_after_terminal() {
        let mut dialogue = other_initiated();
        dialogue.update(cfp()).unwrap();
        dialogue.reply(FipaBody::Decline).unwrap();

        let error = dialogue
            .reply_to(FipaBody::Propose { proposal: "late".to_string() }, 1)
            .unwrap_err();
        assert!(error.to_string().contains("terminal state"));
    }

    #[test]
    fn test_update_dialogue_label_once() {
        let mut dialogue = self_initiated();
        let complete = DialogueLabel::new(
            ("nonce1".to_string(), "nonce2".to_string()),
            SELLER,
            BUYER,
        );
        dialogue.update_dialogue_label(complete.clone());
        assert_eq!(dialogue.dialogue_label(), &complete);
        assert_eq!(dialogue.incomplete_dialogue_label().dialogue_responder_reference(), "");
    }

    #[test]
    #[should_panic(expected = "Dialogue label cannot be updated.")]
    fn test_update_dialogue_label_twice_panics() {
        let mut dialogue = self_initiated();
        let complete = DialogueLabel::new(
            ("nonce1".to_string(), "nonce2".to_string()),
            SELLER,
            BUYER,
        );
        dialogue.update_dialogue_label(complete.clone());
        dialogue.update_dialogue_label(complete);
    }

    #[test]
    fn test_json_round_trip() {
        let mut dialogue = other_initiated();
        dialogue.update(cfp()).unwrap();
        dialogue
            .reply(FipaBody::Propose { proposal: "10".to_string() })
            .unwrap();

        let data = dialogue.to_json().unwrap();
        assert_eq!(data["role"], "seller");
        assert_eq!(data["ordered_message_ids"], serde_json::json!([1, -1]));
        assert_eq!(data["dialogue_label"]["dialogue_starter_addr"], BUYER);

        let restored = Dialogue::<Fipa>::from_json(data, Arc::new(fipa::rules())).unwrap();
        assert_eq!(restored, dialogue);
        assert_eq!(restored.get_outgoing_next_message_id(), -2);
    }

    #[test]
    fn test_from_json_rejects_invalid_record() {
        let error = Dialogue::<Fipa>::from_json(
            serde_json::json!({ "self_address": "x" }),
            Arc::new(fipa::rules()),
        )
        .unwrap_err();
        assert!(matches!(error, DialogueError::InvalidRecord { .. }));
    }

    #[test]
    fn test_display_lists_messages_in_order() {
        let mut dialogue = other_initiated();
        dialogue.update(cfp()).unwrap();
        dialogue
            .reply(FipaBody::Propose { proposal: "10".to_string() })
            .unwrap();

        let rendered = dialogue.to_string();
        let first = rendered.find("message_id=1, target=0, performative=cfp").unwrap();
        let second = rendered.find("message_id=-1, target=1, performative=propose").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_handle_shares_state() {
        let handle = DialogueHandle::new(other_initiated());
        let other = handle.clone();
        handle.lock().update(cfp()).unwrap();

        assert!(other.ptr_eq(&handle));
        assert_eq!(other.lock().incoming_messages().len(), 1);
        assert_eq!(other.label().dialogue_responder_reference(), "nonce2");
    }
}
