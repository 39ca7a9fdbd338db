//! Dialogue storage
//!
//! A [`DialoguesStorage`] owns the authoritative label → dialogue map of one
//! [`Dialogues`](crate::manager::Dialogues) manager, an index of dialogues by
//! opponent address and the incomplete → complete label map used while a
//! self-initiated dialogue waits for the responder's nonce.
//!
//! Three variants differ in what happens to dialogues that reach a terminal
//! performative and in whether anything survives a restart:
//!
//! | Storage                                  | Terminal dialogues                     | Persistence            |
//! |------------------------------------------|----------------------------------------|------------------------|
//! | [`BasicDialoguesStorage`]                | kept in memory or dropped              | none                   |
//! | [`PersistDialoguesStorage`]              | kept in memory or dropped              | load on setup, dump on teardown |
//! | [`PersistDialoguesStorageWithOffloading`]| written to the terminal collection and evicted, re-read on demand | as above |
//!
//! Every storage registers itself as a terminal-state callback on the
//! dialogues it stores. The callback runs while the dialogue is locked, so
//! storages never lock a dialogue while holding their own state lock.

pub mod backend;
pub mod basic;
pub mod persistent;
pub mod offloading;

use crate::dialogue::{Dialogue, DialogueHandle, DialogueLabel};
use crate::errors::DialogueResult;
use crate::protocol::Protocol;

pub use backend::{
    Collection, FileStorage, MemoryStorage, StorageBackend, StorageContext, StorageOwner,
    TERMINAL_STATE_DIALOGUES_COLLECTION_SUFFIX,
};
pub use basic::BasicDialoguesStorage;
pub use offloading::PersistDialoguesStorageWithOffloading;
pub use persistent::{PersistDialoguesStorage, INCOMPLETE_DIALOGUES_OBJECT_NAME};

/// Storage of the dialogues of one manager
pub trait DialoguesStorage<P: Protocol>: Send + Sync {
    /// Load persisted state
    fn setup(&self) -> DialogueResult<()>;

    /// Flush state to the backing store
    fn teardown(&self) -> DialogueResult<()>;

    /// Store a dialogue under its current label and subscribe to its terminal state
    fn add(&self, dialogue: DialogueHandle<P>);

    /// Forget the dialogue stored under `label`
    fn remove(&self, label: &DialogueLabel);

    /// Dialogue stored under `label`
    fn get(&self, label: &DialogueLabel) -> Option<DialogueHandle<P>>;

    /// All dialogues kept with `counterparty`
    fn get_dialogues_with_counterparty(&self, counterparty: &str) -> Vec<DialogueHandle<P>>;

    /// Whether `label` is a known incomplete label
    fn is_in_incomplete(&self, label: &DialogueLabel) -> bool;

    /// Record that `incomplete` now resolves to `complete`
    fn set_incomplete_dialogue(&self, incomplete: DialogueLabel, complete: DialogueLabel);

    /// Forget the complete label recorded for `incomplete`
    fn remove_incomplete_dialogue(&self, incomplete: &DialogueLabel);

    /// Whether a dialogue is stored under `label`
    fn is_dialogue_present(&self, label: &DialogueLabel) -> bool;

    /// The complete label `label` resolves to, or `label` itself
    fn get_latest_label(&self, label: &DialogueLabel) -> DialogueLabel;

    /// Dialogues that have not reached a terminal performative
    fn dialogues_in_active_state(&self) -> Vec<DialogueHandle<P>>;

    /// Dialogues that reached a terminal performative and were kept
    fn dialogues_in_terminal_state(&self) -> Vec<DialogueHandle<P>>;

    /// Called when a stored dialogue appends a terminal performative
    fn dialogue_terminal_state_callback(&self, dialogue: &Dialogue<P>);
}
