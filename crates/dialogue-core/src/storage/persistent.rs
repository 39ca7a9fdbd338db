//! Persistent dialogue storage
//!
//! Dialogues live in memory exactly as in the basic storage. On `setup` the
//! storage loads the incomplete-label map, the active dialogues and the kept
//! terminal dialogues from the owner's collections; on `teardown` it writes
//! them back. Without a [`StorageContext`] both are no-ops.

use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::{debug, info, warn};

use super::backend::{Collection, StorageContext};
use super::basic::{terminal_hook, StorageCore};
use super::DialoguesStorage;
use crate::dialogue::{Dialogue, DialogueHandle, DialogueLabel, Rules, TerminalStateCallback};
use crate::errors::{DialogueError, DialogueResult};
use crate::protocol::{Performative, Protocol};

/// Key of the incomplete → complete label record in the active collection
pub const INCOMPLETE_DIALOGUES_OBJECT_NAME: &str = "incomplete_dialogues";

/// Active and terminal collections of one owner
pub(crate) struct Collections {
    pub(crate) active: Arc<dyn Collection>,
    pub(crate) terminal: Arc<dyn Collection>,
}

/// State and persistence logic shared by the persistent storages
pub(crate) struct PersistentCore<P: Protocol> {
    pub(crate) core: StorageCore<P>,
    pub(crate) rules: Arc<Rules<Performative<P>>>,
    pub(crate) collections: Option<Collections>,
}

impl<P: Protocol> PersistentCore<P> {
    pub(crate) fn new(
        keep_terminal_state_dialogues: bool,
        rules: Arc<Rules<Performative<P>>>,
        context: Option<&StorageContext>,
    ) -> DialogueResult<Self> {
        let collections = match context {
            Some(context) => {
                let (active, terminal) = context.open_collections()?;
                Some(Collections { active, terminal })
            }
            None => None,
        };
        Ok(Self {
            core: StorageCore::new(keep_terminal_state_dialogues),
            rules,
            collections,
        })
    }

    pub(crate) fn dialogue_from_json(&self, data: Value) -> DialogueResult<Dialogue<P>> {
        Dialogue::from_json(data, self.rules.clone())
    }

    /// Deserialize every dialogue record in `collection`
    pub(crate) fn load_dialogues(&self, collection: &dyn Collection) -> DialogueResult<Vec<Dialogue<P>>> {
        collection
            .list()?
            .into_iter()
            .filter(|(object_id, _)| object_id != INCOMPLETE_DIALOGUES_OBJECT_NAME)
            .map(|(_, data)| self.dialogue_from_json(data))
            .collect()
    }

    /// Load state from the collections
    pub(crate) fn load(
        &self,
        hook: impl Fn() -> TerminalStateCallback<P>,
        load_terminal: bool,
    ) -> DialogueResult<()> {
        let Some(collections) = &self.collections else {
            return Ok(());
        };

        if let Some(data) = collections.active.get(INCOMPLETE_DIALOGUES_OBJECT_NAME)? {
            let labels: Vec<(DialogueLabel, DialogueLabel)> =
                serde_json::from_value(data).map_err(|e| {
                    DialogueError::invalid_record(format!(
                        "Incomplete dialogues record is invalid: {}",
                        e
                    ))
                })?;
            self.core.set_incomplete_dialogues(labels);
        }

        let active = self.load_dialogues(collections.active.as_ref())?;
        let active_count = active.len();
        for dialogue in active {
            self.core.add(DialogueHandle::new(dialogue), hook());
        }

        let mut terminal_count = 0;
        if load_terminal {
            for dialogue in self.load_dialogues(collections.terminal.as_ref())? {
                self.core.add_terminal(DialogueHandle::new(dialogue), hook());
                terminal_count += 1;
            }
        }

        info!(
            "Loaded {} active and {} terminal dialogues",
            active_count, terminal_count
        );
        Ok(())
    }

    /// Write state to the collections
    pub(crate) fn dump(
        &self,
        active: Vec<DialogueHandle<P>>,
        terminal: Vec<DialogueHandle<P>>,
    ) -> DialogueResult<()> {
        let Some(collections) = &self.collections else {
            return Ok(());
        };

        let incomplete = serde_json::to_value(self.core.incomplete_dialogues())?;
        collections
            .active
            .put(INCOMPLETE_DIALOGUES_OBJECT_NAME, incomplete)?;

        let (active_count, terminal_count) = (active.len(), terminal.len());
        Self::dump_dialogues(active, collections.active.as_ref())?;
        Self::dump_dialogues(terminal, collections.terminal.as_ref())?;

        info!(
            "Dumped {} active and {} terminal dialogues",
            active_count, terminal_count
        );
        Ok(())
    }

    fn dump_dialogues(
        dialogues: Vec<DialogueHandle<P>>,
        collection: &dyn Collection,
    ) -> DialogueResult<()> {
        for dialogue in dialogues {
            let (label, data) = {
                let guard = dialogue.lock();
                (guard.dialogue_label().to_string(), guard.to_json()?)
            };
            collection.put(&label, data)?;
        }
        Ok(())
    }

    /// Remove from memory and from the collection the dialogue was persisted in
    pub(crate) fn remove(&self, label: &DialogueLabel) {
        let was_terminal = self.core.is_terminal_label(label);
        self.core.remove(label);

        if let Some(collections) = &self.collections {
            let collection = if was_terminal {
                &collections.terminal
            } else {
                &collections.active
            };
            if let Err(e) = collection.remove(&label.to_string()) {
                warn!("Failed to remove dialogue {} from storage: {}", label, e);
            }
        }
    }

    /// Default terminal behaviour: keep in memory or remove everywhere
    pub(crate) fn keep_or_remove(&self, dialogue: &Dialogue<P>) {
        let label = dialogue.dialogue_label().clone();
        if self.core.is_terminal_dialogues_kept() {
            debug!("Keeping terminal dialogue {}", label);
            self.core.mark_terminal(label);
        } else {
            debug!("Dropping terminal dialogue {}", label);
            self.remove(&label);
        }
    }
}

/// Storage that survives restarts through a [`StorageContext`]
pub struct PersistDialoguesStorage<P: Protocol> {
    inner: PersistentCore<P>,
    self_ref: Weak<Self>,
}

impl<P: Protocol> PersistDialoguesStorage<P> {
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

    /// Whether dialogues stay in memory after reaching a terminal state
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
}

impl<P: Protocol> DialoguesStorage<P> for PersistDialoguesStorage<P> {
    fn setup(&self) -> DialogueResult<()> {
        self.inner.load(|| self.hook(), true)
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
        self.inner.core.get(label)
    }

    fn get_dialogues_with_counterparty(&self, counterparty: &str) -> Vec<DialogueHandle<P>> {
        self.inner.core.get_dialogues_with_counterparty(counterparty)
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
        self.inner.core.dialogues_in_terminal_state()
    }

    fn dialogue_terminal_state_callback(&self, dialogue: &Dialogue<P>) {
        self.inner.keep_or_remove(dialogue);
    }
}
