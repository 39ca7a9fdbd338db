//! Persistent dialogue storage with offloading of terminal dialogues
//!
//! When a dialogue reaches a terminal performative and terminal dialogues are
//! kept, its record is written straight to the terminal collection and the
//! dialogue is evicted from memory. A later lookup that misses in memory reads
//! the record back and caches it as a terminal dialogue. Terminal dialogues
//! are therefore not loaded on `setup`.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::{debug, warn};

use super::backend::{Collection, StorageContext};
use super::basic::terminal_hook;
use super::persistent::PersistentCore;
use super::DialoguesStorage;
use crate::dialogue::{Dialogue, DialogueHandle, DialogueLabel, Rules, TerminalStateCallback};
use crate::errors::DialogueResult;
use crate::protocol::{Performative, Protocol};

/// Field path of the opponent address inside a dialogue record
const OPPONENT_ADDR_FIELD: &str = "dialogue_label.dialogue_opponent_addr";

/// Persistent storage that moves terminal dialogues out of memory
pub struct PersistDialoguesStorageWithOffloading<P: Protocol> {
    inner: PersistentCore<P>,
    self_ref: Weak<Self>,
}

impl<P: Protocol> PersistDialoguesStorageWithOffloading<P> {
    /// Create a storage; collections are opened immediately when a context is given
    pub fn new(
        keep_terminal_state_dialogues: bool,
        rules: Arc<Rules<Performative<P>>>,
        context: Option<&StorageContext>,
    ) -> DialogueResult<Arc<Self>> {
        let inner = PersistentCore::new(keep_terminal_state_dialogues, rules, context)?;
        Ok(Arc::new_cyclic(|self_ref| Self {
            inner,
            self_ref: self_ref.clone(),
        }))
    }

    /// Whether terminal dialogues are kept (offloaded) rather than dropped
    pub fn is_terminal_dialogues_kept(&self) -> bool {
        self.inner.core.is_terminal_dialogues_kept()
    }

    /// Whether the storage is backed by collections
    pub fn is_persistent(&self) -> bool {
        self.inner.collections.is_some()
    }

    fn hook(&self) -> TerminalStateCallback<P> {
        terminal_hook(self.self_ref.clone())
    }

    fn dialogue_from_collection(
        &self,
        label: &DialogueLabel,
        collection: &dyn Collection,
    ) -> Option<Dialogue<P>> {
        let result = collection
            .get(&label.to_string())
            .and_then(|data| data.map(|data| self.inner.dialogue_from_json(data)).transpose());
        match result {
            Ok(dialogue) => dialogue,
            Err(e) => {
                warn!("Failed to read dialogue {} from storage: {}", label, e);
                None
            }
        }
    }

    fn dialogues_by_address_from_collection(
        &self,
        address: &str,
        collection: &dyn Collection,
    ) -> Vec<Dialogue<P>> {
        let result = collection
            .find(OPPONENT_ADDR_FIELD, &Value::from(address))
            .and_then(|records| {
                records
                    .into_iter()
                    .map(|(_, data)| self.inner.dialogue_from_json(data))
                    .collect::<DialogueResult<Vec<_>>>()
            });
        result.unwrap_or_else(|e| {
            warn!("Failed to read dialogues with {} from storage: {}", address, e);
            Vec::new()
        })
    }

    /// Wrap deserialized dialogues whose label is not already in `seen`
    fn unique_by_label(
        dialogues: impl IntoIterator<Item = Dialogue<P>>,
        seen: &mut HashSet<DialogueLabel>,
    ) -> Vec<DialogueHandle<P>> {
        dialogues
            .into_iter()
            .filter(|dialogue| seen.insert(dialogue.dialogue_label().clone()))
            .map(DialogueHandle::new)
            .collect()
    }
}

impl<P: Protocol> DialoguesStorage<P> for PersistDialoguesStorageWithOffloading<P> {
    fn setup(&self) -> DialogueResult<()> {
        self.inner.load(|| self.hook(), false)
    }

    fn teardown(&self) -> DialogueResult<()> {
        self.inner.dump(
            self.inner.core.dialogues_in_active_state(),
            self.inner.core.dialogues_in_terminal_state(),
        )
    }

    fn add(&self, dialogue: DialogueHandle<P>) {
        self.inner.core.add(dialogue, self.hook());
    }

    fn remove(&self, label: &DialogueLabel) {
        self.inner.remove(label);
    }

    fn get(&self, label: &DialogueLabel) -> Option<DialogueHandle<P>> {
        if let Some(dialogue) = self.inner.core.get(label) {
            return Some(dialogue);
        }

        let collections = self.inner.collections.as_ref()?;
        let dialogue = self.dialogue_from_collection(label, collections.terminal.as_ref())?;
        debug!("Re-hydrated offloaded dialogue {}", label);

        let handle = DialogueHandle::new(dialogue);
        self.inner.core.add_terminal(handle.clone(), self.hook());
        Some(handle)
    }

    fn get_dialogues_with_counterparty(&self, counterparty: &str) -> Vec<DialogueHandle<P>> {
        let in_memory = self.inner.core.get_dialogues_with_counterparty(counterparty);
        let Some(collections) = &self.inner.collections else {
            return in_memory;
        };

        let mut seen: HashSet<DialogueLabel> =
            in_memory.iter().map(|dialogue| dialogue.label()).collect();
        let mut dialogues = in_memory;
        for collection in [&collections.active, &collections.terminal] {
            let stored = self.dialogues_by_address_from_collection(counterparty, collection.as_ref());
            dialogues.extend(Self::unique_by_label(stored, &mut seen));
        }
        dialogues
    }

    fn is_in_incomplete(&self, label: &DialogueLabel) -> bool {
        self.inner.core.is_in_incomplete(label)
    }

    fn set_incomplete_dialogue(&self, incomplete: DialogueLabel, complete: DialogueLabel) {
        self.inner.core.set_incomplete_dialogue(incomplete, complete);
    }

    fn remove_incomplete_dialogue(&self, incomplete: &DialogueLabel) {
        self.inner.core.remove_incomplete_dialogue(incomplete);
    }

    fn is_dialogue_present(&self, label: &DialogueLabel) -> bool {
        self.inner.core.is_dialogue_present(label)
    }

    fn get_latest_label(&self, label: &DialogueLabel) -> DialogueLabel {
        self.inner.core.get_latest_label(label)
    }

    fn dialogues_in_active_state(&self) -> Vec<DialogueHandle<P>> {
        self.inner.core.dialogues_in_active_state()
    }

    fn dialogues_in_terminal_state(&self) -> Vec<DialogueHandle<P>> {
        let in_memory = self.inner.core.dialogues_in_terminal_state();
        let Some(collections) = &self.inner.collections else {
            return in_memory;
        };

        let stored = match self.inner.load_dialogues(collections.terminal.as_ref()) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Failed to read terminal dialogues from storage: {}", e);
                Vec::new()
            }
        };

        let mut seen: HashSet<DialogueLabel> =
            in_memory.iter().map(|dialogue| dialogue.label()).collect();
        let mut dialogues = in_memory;
        dialogues.extend(Self::unique_by_label(stored, &mut seen));
        dialogues
    }

    fn dialogue_terminal_state_callback(&self, dialogue: &Dialogue<P>) {
        let collections = match &self.inner.collections {
            Some(collections) if self.inner.core.is_terminal_dialogues_kept() => collections,
            _ => {
                self.inner.keep_or_remove(dialogue);
                return;
            }
        };

        let label = dialogue.dialogue_label();
        let offloaded = dialogue
            .to_json()
            .and_then(|data| collections.terminal.put(&label.to_string(), data));
        match offloaded {
            Ok(()) => {
                debug!("Offloaded terminal dialogue {}", label);
                self.inner.remove(label);
            }
            Err(e) => {
                warn!("Failed to offload dialogue {}, keeping it in memory: {}", label, e);
                self.inner.core.mark_terminal(label.clone());
            }
        }
    }
}
