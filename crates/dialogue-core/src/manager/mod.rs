//! Dialogue manager
//!
//! [`Dialogues`] keeps track of every dialogue of one agent for one protocol.
//! Outbound dialogues are opened with [`Dialogues::create`]; every inbound
//! message goes through [`Dialogues::update`], which routes it to an existing
//! dialogue, opens a new one, or drops it.
//!
//! ## Label lifecycle
//!
//! ```text
//! initiator                                   responder
//! ─────────                                   ─────────
//! create()  label (nA, "", B, A)  ── CFP ──►  update()  label (nA, nB, A, A)
//!                                                        (nA, "", A, A) ↦ complete
//! update()  (nA, "", B, A)        ◄─ PROPOSE ─ reply()   reference (nA, nB)
//!           re-keyed to (nA, nB, B, A)
//!           (nA, "", B, A) ↦ complete
//! ```
//!
//! Lookups by the incomplete label keep resolving after completion through
//! the storage's incomplete → complete map.

pub mod nonce;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{DialoguesConfig, StorageMode};
use crate::dialogue::{Dialogue, DialogueHandle, DialogueLabel, DialogueStats, Rules, TerminalStateCallback};
use crate::errors::{DialogueError, DialogueResult};
use crate::message::{
    DialogueReference, Message, STARTING_MESSAGE_ID, STARTING_TARGET,
    UNASSIGNED_DIALOGUE_REFERENCE,
};
use crate::protocol::{Performative, Protocol, RoleFromFirstMessage};
use crate::storage::{
    BasicDialoguesStorage, DialoguesStorage, PersistDialoguesStorage,
    PersistDialoguesStorageWithOffloading, StorageContext,
};

/// Name under which the manager registers its statistics callback
const STATS_CALLBACK: &str = "dialogue_stats";

/// All dialogues of one agent for one protocol
pub struct Dialogues<P: Protocol> {
    config: DialoguesConfig,
    rules: Arc<Rules<Performative<P>>>,
    role_from_first_message: RoleFromFirstMessage<P>,
    storage: Arc<dyn DialoguesStorage<P>>,
    dialogue_stats: Arc<Mutex<DialogueStats<P::EndState>>>,
}

impl<P: Protocol> Dialogues<P> {
    /// Create a manager
    ///
    /// `storage` is required for the persistent storage modes to actually
    /// persist anything; without it they keep dialogues in memory only.
    pub fn new(
        config: DialoguesConfig,
        rules: impl Into<Arc<Rules<Performative<P>>>>,
        role_from_first_message: RoleFromFirstMessage<P>,
        storage: Option<StorageContext>,
    ) -> DialogueResult<Self> {
        config
            .validate()
            .map_err(|e| DialogueError::configuration(format!("Invalid dialogues config: {}", e)))?;

        let rules = rules.into();
        let keep = config.keep_terminal_state_dialogues;

        if storage.is_none() && config.storage_mode != StorageMode::Basic {
            debug!(
                "No storage context for {} dialogues of {}, keeping them in memory only",
                P::NAME,
                config.self_address
            );
        }

        let storage: Arc<dyn DialoguesStorage<P>> = match config.storage_mode {
            StorageMode::Basic => BasicDialoguesStorage::new(keep),
            StorageMode::Persistent => {
                PersistDialoguesStorage::new(keep, rules.clone(), storage.as_ref())?
            }
            StorageMode::PersistentWithOffloading => {
                PersistDialoguesStorageWithOffloading::new(keep, rules.clone(), storage.as_ref())?
            }
        };

        Ok(Self {
            config,
            rules,
            role_from_first_message,
            storage,
            dialogue_stats: Arc::new(Mutex::new(DialogueStats::new(P::end_states()))),
        })
    }

    /// Address of the agent for whom dialogues are maintained
    pub fn self_address(&self) -> &str {
        &self.config.self_address
    }

    /// Manager configuration
    pub fn config(&self) -> &DialoguesConfig {
        &self.config
    }

    /// Protocol rules shared by all dialogues
    pub fn rules(&self) -> &Arc<Rules<Performative<P>>> {
        &self.rules
    }

    /// Underlying dialogue storage
    pub fn storage(&self) -> &Arc<dyn DialoguesStorage<P>> {
        &self.storage
    }

    /// Whether dialogues are kept after reaching a terminal state
    pub fn is_keep_dialogues_in_terminal_state(&self) -> bool {
        self.config.keep_terminal_state_dialogues
    }

    /// Snapshot of the end-state statistics
    pub fn dialogue_stats(&self) -> DialogueStats<P::EndState> {
        self.dialogue_stats.lock().clone()
    }

    /// Load persisted dialogues
    pub fn setup(&self) -> DialogueResult<()> {
        self.storage.setup()?;
        for dialogue in self.storage.dialogues_in_active_state() {
            dialogue
                .lock()
                .add_terminal_state_callback(STATS_CALLBACK, self.stats_hook());
        }
        Ok(())
    }

    /// Persist dialogues
    pub fn teardown(&self) -> DialogueResult<()> {
        self.storage.teardown()
    }

    /// All dialogues kept with `counterparty`
    pub fn get_dialogues_with_counterparty(&self, counterparty: &str) -> Vec<DialogueHandle<P>> {
        self.storage.get_dialogues_with_counterparty(counterparty)
    }

    /// Fresh dialogue reference for a dialogue this agent starts
    pub fn new_self_initiated_dialogue_reference(&self) -> DialogueReference {
        nonce::new_self_initiated_dialogue_reference(self.config.nonce_bytes)
    }

    /// Open a dialogue with `counterparty` by sending `body`
    ///
    /// Returns the addressed initial message, ready to be sent, and the new
    /// dialogue. If `body` is not a valid opening the dialogue is discarded
    /// and an error returned.
    pub fn create(
        &self,
        counterparty: &str,
        body: P::Body,
    ) -> DialogueResult<(Message<P::Body>, DialogueHandle<P>)> {
        let initial_message = Message::new(
            self.new_self_initiated_dialogue_reference(),
            STARTING_MESSAGE_ID,
            STARTING_TARGET,
            body,
        )
        .with_sender(self.self_address())
        .with_to(counterparty);

        let dialogue = self.create_dialogue(counterparty, initial_message.clone())?;
        Ok((initial_message, dialogue))
    }

    /// Open a dialogue with `counterparty` from a prepared initial message
    ///
    /// # Panics
    ///
    /// Panics if the message's sender or recipient is already set, or if its
    /// dialogue reference is not a fresh incomplete one.
    pub fn create_with_message(
        &self,
        counterparty: &str,
        initial_message: Message<P::Body>,
    ) -> DialogueResult<DialogueHandle<P>> {
        assert!(
            !initial_message.has_sender(),
            "The message's 'sender' field is already set {}",
            initial_message
        );
        assert!(
            !initial_message.has_to(),
            "The message's 'to' field is already set {}",
            initial_message
        );

        let initial_message = initial_message
            .with_sender(self.self_address())
            .with_to(counterparty);
        self.create_dialogue(counterparty, initial_message)
    }

    fn create_dialogue(
        &self,
        counterparty: &str,
        initial_message: Message<P::Body>,
    ) -> DialogueResult<DialogueHandle<P>> {
        let role = (self.role_from_first_message)(&initial_message, self.self_address());
        let dialogue = self.create_self_initiated(
            counterparty,
            initial_message.dialogue_reference.clone(),
            role,
        );

        let result = dialogue.lock().update(initial_message);
        if let Err(e) = result {
            let label = dialogue.label();
            self.storage.remove(&label);
            debug!("Rolled back dialogue {}: {}", label, e);
            return Err(match e {
                DialogueError::InvalidMessage { reason } => DialogueError::invalid_message(
                    format!(
                        "Cannot create a dialogue with the specified performative and contents. {}",
                        reason
                    ),
                ),
                other => other,
            });
        }
        Ok(dialogue)
    }

    /// Route an inbound message to its dialogue
    ///
    /// Returns the dialogue the message was appended to, which is newly
    /// created if the message opens a dialogue. Returns `None` if the message
    /// cannot be routed or is invalid for its dialogue; the dialogue is then
    /// left unchanged.
    ///
    /// # Panics
    ///
    /// Panics unless the message is sent by another agent and addressed to
    /// this one.
    pub fn update(&self, message: Message<P::Body>) -> Option<DialogueHandle<P>> {
        assert!(
            message.has_sender() && message.sender() != self.self_address(),
            "Invalid 'update' usage. Update must only be used with a message by another agent."
        );
        assert!(
            message.has_to(),
            "The message's 'to' field is not set {}",
            message
        );
        assert!(
            message.to() == self.self_address(),
            "Message to and dialogue self address do not match. Got 'to={}' expected 'to={}'.",
            message.to(),
            self.self_address()
        );

        let starter_assigned = message.starter_reference() != UNASSIGNED_DIALOGUE_REFERENCE;
        let responder_assigned = message.responder_reference() != UNASSIGNED_DIALOGUE_REFERENCE;
        let is_new_dialogue =
            starter_assigned && !responder_assigned && message.message_id == STARTING_MESSAGE_ID;
        let is_incomplete_label_and_non_initial_msg = starter_assigned
            && !responder_assigned
            && message.message_id != STARTING_MESSAGE_ID
            && message.message_id != STARTING_TARGET;

        let dialogue = if is_new_dialogue {
            self.open_opponent_initiated(&message)
        } else if is_incomplete_label_and_non_initial_msg {
            // Several messages may arrive before one with a complete reference
            self.get_dialogue(&message)
        } else if starter_assigned && responder_assigned {
            self.complete_dialogue_reference(&message);
            self.get_dialogue(&message)
        } else {
            None
        };

        let Some(dialogue) = dialogue else {
            warn!(
                "Dropping message {} from {}: no matching {} dialogue",
                message.message_id,
                message.sender(),
                P::NAME
            );
            return None;
        };

        let message_id = message.message_id;
        let result = dialogue.lock().update(message);
        match result {
            Ok(()) => Some(dialogue),
            Err(e) => {
                warn!("Dropping message {}: {}", message_id, e);
                if is_new_dialogue {
                    let label = dialogue.label();
                    self.storage.remove(&label);
                    self.storage
                        .remove_incomplete_dialogue(&label.get_incomplete_version());
                }
                None
            }
        }
    }

    fn open_opponent_initiated(&self, message: &Message<P::Body>) -> Option<DialogueHandle<P>> {
        let incomplete_label = DialogueLabel::new(
            message.dialogue_reference.clone(),
            message.sender(),
            message.sender(),
        );
        if self.storage.is_in_incomplete(&incomplete_label) {
            warn!("Dialogue {} was already opened", incomplete_label);
            return None;
        }

        let role = (self.role_from_first_message)(message, self.self_address());
        Some(self.create_opponent_initiated(
            message.sender(),
            message.dialogue_reference.clone(),
            role,
        ))
    }

    /// Re-key a self-initiated dialogue under the complete label carried by
    /// the responder's first message
    fn complete_dialogue_reference(&self, message: &Message<P::Body>) {
        let complete_dialogue_reference = message.dialogue_reference.clone();
        let incomplete_dialogue_label = DialogueLabel::new(
            (
                complete_dialogue_reference.0.clone(),
                UNASSIGNED_DIALOGUE_REFERENCE.to_string(),
            ),
            message.sender(),
            self.self_address(),
        );

        if !self.storage.is_dialogue_present(&incomplete_dialogue_label)
            || self.storage.is_in_incomplete(&incomplete_dialogue_label)
        {
            return;
        }
        let Some(dialogue) = self.storage.get(&incomplete_dialogue_label) else {
            return;
        };

        self.storage.remove(&incomplete_dialogue_label);
        let final_dialogue_label = DialogueLabel::new(
            complete_dialogue_reference,
            incomplete_dialogue_label.dialogue_opponent_addr(),
            incomplete_dialogue_label.dialogue_starter_addr(),
        );
        dialogue
            .lock()
            .update_dialogue_label(final_dialogue_label.clone());
        self.storage.add(dialogue);

        debug!(
            "Completed dialogue label {} -> {}",
            incomplete_dialogue_label, final_dialogue_label
        );
        self.storage
            .set_incomplete_dialogue(incomplete_dialogue_label, final_dialogue_label);
    }

    /// The dialogue `message` belongs to, trying both initiator interpretations
    pub fn get_dialogue(&self, message: &Message<P::Body>) -> Option<DialogueHandle<P>> {
        let counterparty = if message.sender() == self.self_address() {
            message.to()
        } else {
            message.sender()
        };

        let self_initiated_dialogue_label = self.storage.get_latest_label(&DialogueLabel::new(
            message.dialogue_reference.clone(),
            counterparty,
            self.self_address(),
        ));
        let other_initiated_dialogue_label = self.storage.get_latest_label(&DialogueLabel::new(
            message.dialogue_reference.clone(),
            counterparty,
            counterparty,
        ));

        self.get_dialogue_from_label(&self_initiated_dialogue_label)
            .or_else(|| self.get_dialogue_from_label(&other_initiated_dialogue_label))
    }

    /// The dialogue stored under `label`
    pub fn get_dialogue_from_label(&self, label: &DialogueLabel) -> Option<DialogueHandle<P>> {
        self.storage.get(label)
    }

    fn create_self_initiated(
        &self,
        dialogue_opponent_addr: &str,
        dialogue_reference: DialogueReference,
        role: P::Role,
    ) -> DialogueHandle<P> {
        assert!(
            dialogue_reference.0 != UNASSIGNED_DIALOGUE_REFERENCE
                && dialogue_reference.1 == UNASSIGNED_DIALOGUE_REFERENCE,
            "Cannot initiate dialogue with preassigned dialogue_responder_reference!"
        );
        let incomplete_dialogue_label = DialogueLabel::new(
            dialogue_reference,
            dialogue_opponent_addr,
            self.self_address(),
        );
        self.create_with_label(incomplete_dialogue_label, role, None)
    }

    fn create_opponent_initiated(
        &self,
        dialogue_opponent_addr: &str,
        dialogue_reference: DialogueReference,
        role: P::Role,
    ) -> DialogueHandle<P> {
        assert!(
            dialogue_reference.0 != UNASSIGNED_DIALOGUE_REFERENCE
                && dialogue_reference.1 == UNASSIGNED_DIALOGUE_REFERENCE,
            "Cannot initiate dialogue with preassigned dialogue_responder_reference!"
        );
        let complete_dialogue_reference = (
            dialogue_reference.0.clone(),
            nonce::generate_dialogue_nonce(self.config.nonce_bytes),
        );
        let incomplete_dialogue_label = DialogueLabel::new(
            dialogue_reference,
            dialogue_opponent_addr,
            dialogue_opponent_addr,
        );
        let complete_dialogue_label = DialogueLabel::new(
            complete_dialogue_reference,
            dialogue_opponent_addr,
            dialogue_opponent_addr,
        );
        self.create_with_label(incomplete_dialogue_label, role, Some(complete_dialogue_label))
    }

    fn create_with_label(
        &self,
        incomplete_dialogue_label: DialogueLabel,
        role: P::Role,
        complete_dialogue_label: Option<DialogueLabel>,
    ) -> DialogueHandle<P> {
        assert!(
            !self.storage.is_in_incomplete(&incomplete_dialogue_label),
            "Incomplete dialogue label already present."
        );
        let dialogue_label = match complete_dialogue_label {
            None => incomplete_dialogue_label,
            Some(complete_dialogue_label) => {
                self.storage.set_incomplete_dialogue(
                    incomplete_dialogue_label,
                    complete_dialogue_label.clone(),
                );
                complete_dialogue_label
            }
        };
        assert!(
            !self.storage.is_dialogue_present(&dialogue_label),
            "Dialogue label already present in dialogues."
        );

        info!("Created {} dialogue {} as {}", P::NAME, dialogue_label, role);
        let mut dialogue = Dialogue::new(dialogue_label, self.self_address(), role, self.rules.clone());
        dialogue.add_terminal_state_callback(STATS_CALLBACK, self.stats_hook());

        let dialogue = DialogueHandle::new(dialogue);
        self.storage.add(dialogue.clone());
        dialogue
    }

    fn stats_hook(&self) -> TerminalStateCallback<P> {
        let stats = self.dialogue_stats.clone();
        Arc::new(move |dialogue: &Dialogue<P>| {
            if let Some(end_state) = P::end_state(dialogue) {
                stats
                    .lock()
                    .add_dialogue_endstate(end_state, dialogue.is_self_initiated());
            }
        })
    }
}

impl<P: Protocol> fmt::Debug for Dialogues<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialogues")
            .field("protocol", &P::NAME)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "fipa"))]
mod tests {
    use super::*;
    use crate::protocols::fipa::{self, Fipa, FipaBody, FipaEndState, FipaRole};

    fn manager(address: &str) -> Dialogues<Fipa> {
        Dialogues::new(
            DialoguesConfig::new(address).with_storage_mode(StorageMode::Basic),
            fipa::rules(),
            fipa::role_inference(),
            None,
        )
        .unwrap()
    }

    fn cfp() -> FipaBody {
        FipaBody::Cfp { query: "apples".to_string() }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Dialogues::<Fipa>::new(
            DialoguesConfig::default(),
            fipa::rules(),
            fipa::role_inference(),
            None,
        );
        assert!(matches!(result, Err(DialogueError::Configuration { .. })));
    }

    #[test]
    fn test_create_registers_incomplete_dialogue() {
        let buyer = manager("buyer");
        let (message, dialogue) = buyer.create("seller", cfp()).unwrap();

        assert_eq!(message.message_id, 1);
        assert_eq!(message.target, 0);
        assert_eq!(message.sender(), "buyer");
        assert_eq!(message.to(), "seller");
        assert_eq!(message.responder_reference(), "");

        let label = dialogue.label();
        assert!(!label.is_complete());
        assert_eq!(dialogue.lock().role(), FipaRole::Buyer);
        assert!(buyer.get_dialogue_from_label(&label).unwrap().ptr_eq(&dialogue));
        assert!(buyer.get_dialogue(&message).unwrap().ptr_eq(&dialogue));
    }

    #[test]
    fn test_create_with_invalid_performative_rolls_back() {
        let buyer = manager("buyer");
        let error = buyer
            .create("seller", FipaBody::Propose { proposal: "10".to_string() })
            .unwrap_err();

        assert!(error.is_protocol_error());
        assert!(error.to_string().contains("Cannot create a dialogue"));
        assert!(buyer.get_dialogues_with_counterparty("seller").is_empty());
    }

    #[test]
    fn test_create_with_message() {
        let buyer = manager("buyer");
        let message = Message::new(
            buyer.new_self_initiated_dialogue_reference(),
            STARTING_MESSAGE_ID,
            STARTING_TARGET,
            cfp(),
        );
        let dialogue = buyer.create_with_message("seller", message).unwrap();
        let guard = dialogue.lock();
        assert_eq!(guard.outgoing_messages()[0].sender(), "buyer");
        assert_eq!(guard.outgoing_messages()[0].to(), "seller");
    }

    #[test]
    #[should_panic(expected = "The message's 'sender' field is already set")]
    fn test_create_with_addressed_message_panics() {
        let buyer = manager("buyer");
        let message = Message::new(
            buyer.new_self_initiated_dialogue_reference(),
            STARTING_MESSAGE_ID,
            STARTING_TARGET,
            cfp(),
        )
        .with_sender("buyer");
        let _ = buyer.create_with_message("seller", message);
    }

    #[test]
    #[should_panic(expected = "Invalid 'update' usage")]
    fn test_update_with_own_message_panics() {
        let buyer = manager("buyer");
        let (message, _) = buyer.create("seller", cfp()).unwrap();
        buyer.update(message);
    }

    #[test]
    #[should_panic(expected = "Message to and dialogue self address do not match")]
    fn test_update_with_misaddressed_message_panics() {
        let buyer = manager("buyer");
        let seller = manager("seller");
        let (message, _) = buyer.create("seller", cfp()).unwrap();
        let message = message.with_to("someone_else");
        seller.update(message);
    }

    #[test]
    fn test_update_with_unassigned_reference_is_dropped() {
        let seller = manager("seller");
        let message = Message::new((String::new(), String::new()), 1, 0, cfp())
            .with_sender("buyer")
            .with_to("seller");
        assert!(seller.update(message).is_none());
    }

    #[test]
    fn test_update_opens_other_initiated_dialogue() {
        let buyer = manager("buyer");
        let seller = manager("seller");
        let (message, _) = buyer.create("seller", cfp()).unwrap();

        let dialogue = seller.update(message.clone()).unwrap();
        let label = dialogue.label();
        assert!(label.is_complete());
        assert_eq!(label.dialogue_starter_addr(), "buyer");
        assert_eq!(dialogue.lock().role(), FipaRole::Seller);

        // The incomplete label resolves to the complete one
        assert!(seller.get_dialogue(&message).unwrap().ptr_eq(&dialogue));
        assert_eq!(
            seller
                .storage()
                .get_latest_label(&label.get_incomplete_version()),
            label
        );

        // A replayed opening message does not open a second dialogue
        assert!(seller.update(message).is_none());
        assert_eq!(seller.get_dialogues_with_counterparty("buyer").len(), 1);
    }

    #[test]
    fn test_invalid_opening_message_is_rolled_back() {
        let seller = manager("seller");
        let message = Message::new(
            ("nonce".to_string(), String::new()),
            1,
            0,
            FipaBody::Propose { proposal: "10".to_string() },
        )
        .with_sender("buyer")
        .with_to("seller");

        assert!(seller.update(message).is_none());
        assert!(seller.get_dialogues_with_counterparty("buyer").is_empty());

        let incomplete = DialogueLabel::new(
            ("nonce".to_string(), String::new()),
            "buyer",
            "buyer",
        );
        assert!(!seller.storage().is_in_incomplete(&incomplete));
        assert_eq!(seller.storage().get_latest_label(&incomplete), incomplete);

        // The nonce is free again for a valid opening message
        let message = Message::new(("nonce".to_string(), String::new()), 1, 0, cfp())
            .with_sender("buyer")
            .with_to("seller");
        assert!(seller.update(message).is_some());
    }

    #[test]
    fn test_stats_recorded_on_terminal_state() {
        let buyer = manager("buyer");
        let seller = manager("seller");
        let (cfp_message, _) = buyer.create("seller", cfp()).unwrap();
        let seller_dialogue = seller.update(cfp_message).unwrap();

        let decline = seller_dialogue.reply(FipaBody::Decline).unwrap();
        assert!(buyer.update(decline).is_some());

        let seller_stats = seller.dialogue_stats();
        assert_eq!(seller_stats.other_initiated()[&FipaEndState::DeclinedCfp], 1);
        assert_eq!(seller_stats.total(), 1);

        let buyer_stats = buyer.dialogue_stats();
        assert_eq!(buyer_stats.self_initiated()[&FipaEndState::DeclinedCfp], 1);
        assert_eq!(buyer_stats.total(), 1);
    }
}
