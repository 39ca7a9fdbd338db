//! # Parley Dialogue-Core
//!
//! Speech-act dialogue engine for agents exchanging protocol messages.
//!
//! This crate provides:
//! - Dialogue identity ([`DialogueLabel`]) that survives the handshake in which
//!   the responder assigns its half of the dialogue reference
//! - Validation of every message against a protocol's reply graph ([`Rules`])
//!   and the signed message-id numbering of the starter and the responder
//! - A manager ([`Dialogues`]) routing inbound messages to their dialogues and
//!   opening new ones
//! - In-memory, persistent and offloading dialogue storage on top of a small
//!   key-value backend abstraction
//! - End-state statistics per protocol
//!
//! ## Quick Start
//!
//! ```rust
//! # #[cfg(feature = "fipa")]
//! # fn main() -> Result<(), parley_dialogue_core::DialogueError> {
//! use parley_dialogue_core::protocols::fipa::{self, Fipa, FipaBody};
//! use parley_dialogue_core::{Dialogues, DialoguesConfig, StorageMode};
//!
//! let new_manager = |address: &str| {
//!     Dialogues::<Fipa>::new(
//!         DialoguesConfig::new(address).with_storage_mode(StorageMode::Basic),
//!         fipa::rules(),
//!         fipa::role_inference(),
//!         None,
//!     )
//! };
//! let buyer = new_manager("buyer")?;
//! let seller = new_manager("seller")?;
//!
//! // The buyer opens a negotiation
//! let (cfp, _) = buyer.create("seller", FipaBody::Cfp { query: "apples".into() })?;
//!
//! // The seller receives it and answers
//! let dialogue = seller.update(cfp).expect("valid opening message");
//! let proposal = dialogue.reply(FipaBody::Propose { proposal: "10 FET".into() })?;
//! assert_eq!(proposal.message_id, -1);
//!
//! // The buyer's dialogue now carries the complete reference
//! let dialogue = buyer.update(proposal).expect("valid reply");
//! assert!(dialogue.label().is_complete());
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "fipa"))]
//! # fn main() {}
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Dialogues<P> ──► DialoguesStorage<P> ──► StorageBackend ──► Collection
//!      │                  │
//!      ▼                  ▼
//!  Rules<Perf>     DialogueHandle<P> = Arc<Mutex<Dialogue<P>>>
//! ```
//!
//! A protocol is described by a type implementing [`Protocol`]: its message
//! body enum (which determines the performative), the roles and the end
//! states. The reply graph is a runtime [`Rules`] value handed to the manager.
//!
//! Protocol errors (a message that does not fit its dialogue) are ordinary
//! [`DialogueError`] values and [`Dialogues::update`] turns them into `None`.
//! Misuse of the API, such as feeding `update` a message this agent sent,
//! panics.

pub mod config;
pub mod dialogue;
pub mod errors;
pub mod manager;
pub mod message;
pub mod protocol;
pub mod protocols;
pub mod storage;

pub use config::{DialoguesConfig, StorageMode};
pub use dialogue::{Dialogue, DialogueHandle, DialogueLabel, DialogueStats, Rules};
pub use errors::{DialogueError, DialogueResult};
pub use manager::Dialogues;
pub use message::{
    Address, DialogueReference, Message, MessageBody, STARTING_MESSAGE_ID, STARTING_TARGET,
    UNASSIGNED_DIALOGUE_REFERENCE,
};
pub use protocol::{Performative, Protocol, RoleFromFirstMessage};
pub use storage::{
    BasicDialoguesStorage, DialoguesStorage, FileStorage, MemoryStorage,
    PersistDialoguesStorage, PersistDialoguesStorageWithOffloading, StorageBackend,
    StorageContext, StorageOwner,
};
