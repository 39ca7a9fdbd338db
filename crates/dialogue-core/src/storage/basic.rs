//! In-memory dialogue storage
//!
//! [`StorageCore`] holds the maps every storage variant shares;
//! [`BasicDialoguesStorage`] is the core on its own.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::DialoguesStorage;
use crate::dialogue::{Dialogue, DialogueHandle, DialogueLabel, TerminalStateCallback};
use crate::errors::DialogueResult;
use crate::message::Address;
use crate::protocol::Protocol;

/// Name under which a storage registers its terminal-state callback
pub(crate) const STORAGE_CALLBACK: &str = "storage";

struct StorageState<P: Protocol> {
    dialogues_by_label: HashMap<DialogueLabel, DialogueHandle<P>>,
    labels_by_address: HashMap<Address, Vec<DialogueLabel>>,
    incomplete_to_complete: HashMap<DialogueLabel, DialogueLabel>,
    terminal_labels: HashSet<DialogueLabel>,
}

impl<P: Protocol> Default for StorageState<P> {
    fn default() -> Self {
        Self {
            dialogues_by_label: HashMap::new(),
            labels_by_address: HashMap::new(),
            incomplete_to_complete: HashMap::new(),
            terminal_labels: HashSet::new(),
        }
    }
}

/// Maps shared by every storage variant
///
/// Only ever locks its own state; dialogues are locked before, never while,
/// the state is held.
pub(crate) struct StorageCore<P: Protocol> {
    state: Mutex<StorageState<P>>,
    keep_terminal_state_dialogues: bool,
}

impl<P: Protocol> StorageCore<P> {
    pub(crate) fn new(keep_terminal_state_dialogues: bool) -> Self {
        Self {
            state: Mutex::new(StorageState::default()),
            keep_terminal_state_dialogues,
        }
    }

    pub(crate) fn is_terminal_dialogues_kept(&self) -> bool {
        self.keep_terminal_state_dialogues
    }

    pub(crate) fn add(
        &self,
        dialogue: DialogueHandle<P>,
        callback: TerminalStateCallback<P>,
    ) -> DialogueLabel {
        let label = {
            let mut guard = dialogue.lock();
            guard.add_terminal_state_callback(STORAGE_CALLBACK, callback);
            guard.dialogue_label().clone()
        };

        let mut state = self.state.lock();
        let labels = state
            .labels_by_address
            .entry(label.dialogue_opponent_addr().to_string())
            .or_default();
        if !labels.contains(&label) {
            labels.push(label.clone());
        }
        state.dialogues_by_label.insert(label.clone(), dialogue);
        label
    }

    pub(crate) fn add_terminal(&self, dialogue: DialogueHandle<P>, callback: TerminalStateCallback<P>) {
        let label = self.add(dialogue, callback);
        self.mark_terminal(label);
    }

    pub(crate) fn mark_terminal(&self, label: DialogueLabel) {
        self.state.lock().terminal_labels.insert(label);
    }

    pub(crate) fn is_terminal_label(&self, label: &DialogueLabel) -> bool {
        self.state.lock().terminal_labels.contains(label)
    }

    pub(crate) fn remove(&self, label: &DialogueLabel) -> Option<DialogueHandle<P>> {
        let mut state = self.state.lock();
        let dialogue = state.dialogues_by_label.remove(label);
        state.incomplete_to_complete.remove(label);
        state.terminal_labels.remove(label);

        if dialogue.is_some() {
            let address = label.dialogue_opponent_addr();
            if let Some(labels) = state.labels_by_address.get_mut(address) {
                labels.retain(|existing| existing != label);
                if labels.is_empty() {
                    state.labels_by_address.remove(address);
                }
            }
        }
        dialogue
    }

    pub(crate) fn get(&self, label: &DialogueLabel) -> Option<DialogueHandle<P>> {
        self.state.lock().dialogues_by_label.get(label).cloned()
    }

    pub(crate) fn get_dialogues_with_counterparty(
        &self,
        counterparty: &str,
    ) -> Vec<DialogueHandle<P>> {
        let state = self.state.lock();
        state
            .labels_by_address
            .get(counterparty)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|label| state.dialogues_by_label.get(label).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn is_in_incomplete(&self, label: &DialogueLabel) -> bool {
        self.state.lock().incomplete_to_complete.contains_key(label)
    }

    pub(crate) fn set_incomplete_dialogue(&self, incomplete: DialogueLabel, complete: DialogueLabel) {
        self.state
            .lock()
            .incomplete_to_complete
            .insert(incomplete, complete);
    }

    pub(crate) fn remove_incomplete_dialogue(&self, incomplete: &DialogueLabel) {
        self.state.lock().incomplete_to_complete.remove(incomplete);
    }

    pub(crate) fn incomplete_dialogues(&self) -> Vec<(DialogueLabel, DialogueLabel)> {
        self.state
            .lock()
            .incomplete_to_complete
            .iter()
            .map(|(incomplete, complete)| (incomplete.clone(), complete.clone()))
            .collect()
    }

    pub(crate) fn set_incomplete_dialogues(&self, labels: Vec<(DialogueLabel, DialogueLabel)>) {
        self.state.lock().incomplete_to_complete = labels.into_iter().collect();
    }

    pub(crate) fn is_dialogue_present(&self, label: &DialogueLabel) -> bool {
        self.state.lock().dialogues_by_label.contains_key(label)
    }

    pub(crate) fn get_latest_label(&self, label: &DialogueLabel) -> DialogueLabel {
        self.state
            .lock()
            .incomplete_to_complete
            .get(label)
            .cloned()
            .unwrap_or_else(|| label.clone())
    }

    pub(crate) fn dialogues_in_active_state(&self) -> Vec<DialogueHandle<P>> {
        let state = self.state.lock();
        state
            .dialogues_by_label
            .iter()
            .filter(|(label, _)| !state.terminal_labels.contains(*label))
            .map(|(_, dialogue)| dialogue.clone())
            .collect()
    }

    pub(crate) fn dialogues_in_terminal_state(&self) -> Vec<DialogueHandle<P>> {
        let state = self.state.lock();
        state
            .terminal_labels
            .iter()
            .filter_map(|label| state.dialogues_by_label.get(label).cloned())
            .collect()
    }
}

/// Build the terminal-state callback a storage registers on its dialogues
///
/// Holds the storage weakly so dialogues never keep their storage alive.
pub(crate) fn terminal_hook<P, S>(storage: Weak<S>) -> TerminalStateCallback<P>
where
    P: Protocol,
    S: DialoguesStorage<P> + 'static,
{
    Arc::new(move |dialogue: &Dialogue<P>| {
        if let Some(storage) = storage.upgrade() {
            storage.dialogue_terminal_state_callback(dialogue);
        }
    })
}

/// In-memory storage without persistence
pub struct BasicDialoguesStorage<P: Protocol> {
    core: StorageCore<P>,
    self_ref: Weak<Self>,
}

impl<P: Protocol> BasicDialoguesStorage<P> {
    /// Create an empty storage
    pub fn new(keep_terminal_state_dialogues: bool) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            core: StorageCore::new(keep_terminal_state_dialogues),
            self_ref: self_ref.clone(),
        })
    }

    /// Whether dialogues stay in memory after reaching a terminal state
    pub fn is_terminal_dialogues_kept(&self) -> bool {
        self.core.is_terminal_dialogues_kept()
    }
}

impl<P: Protocol> DialoguesStorage<P> for BasicDialoguesStorage<P> {
    fn setup(&self) -> DialogueResult<()> {
        Ok(())
    }

    fn teardown(&self) -> DialogueResult<()> {
        Ok(())
    }

    fn add(&self, dialogue: DialogueHandle<P>) {
        self.core.add(dialogue, terminal_hook(self.self_ref.clone()));
    }

    fn remove(&self, label: &DialogueLabel) {
        self.core.remove(label);
    }

    fn get(&self, label: &DialogueLabel) -> Option<DialogueHandle<P>> {
        self.core.get(label)
    }

    fn get_dialogues_with_counterparty(&self, counterparty: &str) -> Vec<DialogueHandle<P>> {
        self.core.get_dialogues_with_counterparty(counterparty)
    }

    fn is_in_incomplete(&self, label: &DialogueLabel) -> bool {
        self.core.is_in_incomplete(label)
    }

    fn set_incomplete_dialogue(&self, incomplete: DialogueLabel, complete: DialogueLabel) {
        self.core.set_incomplete_dialogue(incomplete, complete);
    }

    fn remove_incomplete_dialogue(&self, incomplete: &DialogueLabel) {
        self.core.remove_incomplete_dialogue(incomplete);
    }

    fn is_dialogue_present(&self, label: &DialogueLabel) -> bool {
        self.core.is_dialogue_present(label)
    }

    fn get_latest_label(&self, label: &DialogueLabel) -> DialogueLabel {
        self.core.get_latest_label(label)
    }

    fn dialogues_in_active_state(&self) -> Vec<DialogueHandle<P>> {
        self.core.dialogues_in_active_state()
    }

    fn dialogues_in_terminal_state(&self) -> Vec<DialogueHandle<P>> {
        self.core.dialogues_in_terminal_state()
    }

    fn dialogue_terminal_state_callback(&self, dialogue: &Dialogue<P>) {
        let label = dialogue.dialogue_label().clone();
        if self.core.is_terminal_dialogues_kept() {
            debug!("Keeping terminal dialogue {}", label);
            self.core.mark_terminal(label);
        } else {
            debug!("Dropping terminal dialogue {}", label);
            self.core.remove(&label);
        }
    }
}

#[cfg(all(test, feature = "fipa"))]
pub(crate) mod tests {
    use super::*;
    use crate::message::{Message, STARTING_MESSAGE_ID, STARTING_TARGET};
    use crate::protocols::fipa::{self, Fipa, FipaBody, FipaRole};

    pub(crate) const SELF_ADDR: &str = "seller";

    /// Other-initiated dialogue with `opponent` that has received a CFP
    pub(crate) fn received_cfp(nonce: &str, opponent: &str) -> DialogueHandle<Fipa> {
        let label = DialogueLabel::new(
            (nonce.to_string(), format!("{}r", nonce)),
            opponent,
            opponent,
        );
        let mut dialogue =
            Dialogue::new(label, SELF_ADDR, FipaRole::Seller, Arc::new(fipa::rules()));
        let cfp = Message::new(
            (nonce.to_string(), String::new()),
            STARTING_MESSAGE_ID,
            STARTING_TARGET,
            FipaBody::Cfp { query: "apples".to_string() },
        )
        .with_sender(opponent)
        .with_to(SELF_ADDR);
        dialogue.update(cfp).unwrap();
        DialogueHandle::new(dialogue)
    }

    #[test]
    fn test_add_get_remove() {
        let storage = BasicDialoguesStorage::<Fipa>::new(false);
        let dialogue = received_cfp("n1", "buyer");
        let label = dialogue.label();

        storage.add(dialogue.clone());
        assert!(storage.is_dialogue_present(&label));
        assert!(storage.get(&label).unwrap().ptr_eq(&dialogue));
        assert_eq!(storage.get_dialogues_with_counterparty("buyer").len(), 1);
        assert!(storage.get_dialogues_with_counterparty("nobody").is_empty());
        assert_eq!(storage.dialogues_in_active_state().len(), 1);

        storage.remove(&label);
        assert!(!storage.is_dialogue_present(&label));
        assert!(storage.get_dialogues_with_counterparty("buyer").is_empty());
    }

    #[test]
    fn test_incomplete_label_mapping() {
        let storage = BasicDialoguesStorage::<Fipa>::new(false);
        let complete = received_cfp("n1", "buyer").label();
        let incomplete = complete.get_incomplete_version();

        assert_eq!(storage.get_latest_label(&incomplete), incomplete);
        storage.set_incomplete_dialogue(incomplete.clone(), complete.clone());
        assert!(storage.is_in_incomplete(&incomplete));
        assert_eq!(storage.get_latest_label(&incomplete), complete);
    }

    #[test]
    fn test_terminal_dialogue_dropped() {
        let storage = BasicDialoguesStorage::<Fipa>::new(false);
        let dialogue = received_cfp("n1", "buyer");
        let label = dialogue.label();
        storage.add(dialogue.clone());

        dialogue.reply(FipaBody::Decline).unwrap();

        assert!(storage.get(&label).is_none());
        assert!(storage.dialogues_in_terminal_state().is_empty());
    }

    #[test]
    fn test_terminal_dialogue_kept() {
        let storage = BasicDialoguesStorage::<Fipa>::new(true);
        let active = received_cfp("n1", "buyer");
        let finished = received_cfp("n2", "buyer");
        storage.add(active.clone());
        storage.add(finished.clone());

        finished.reply(FipaBody::Decline).unwrap();

        assert!(storage.is_terminal_dialogues_kept());
        assert!(storage.get(&finished.label()).is_some());
        let terminal = storage.dialogues_in_terminal_state();
        assert_eq!(terminal.len(), 1);
        assert!(terminal[0].ptr_eq(&finished));
        let active_now = storage.dialogues_in_active_state();
        assert_eq!(active_now.len(), 1);
        assert!(active_now[0].ptr_eq(&active));
    }

    #[test]
    fn test_dropped_storage_ignores_callbacks() {
        let dialogue = received_cfp("n1", "buyer");
        {
            let storage = BasicDialoguesStorage::<Fipa>::new(false);
            storage.add(dialogue.clone());
        }
        assert!(dialogue.reply(FipaBody::Decline).is_ok());
    }
}
