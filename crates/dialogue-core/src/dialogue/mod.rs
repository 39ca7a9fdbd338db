//! Dialogue types
//!
//! - [`DialogueLabel`]: identity of a dialogue, incomplete until the responder
//!   nonce is known
//! - [`Rules`]: initial and terminal performatives plus the reply graph
//! - [`Dialogue`]: the per-conversation state machine
//! - [`DialogueHandle`]: shared, lockable reference to a live dialogue
//! - [`DialogueStats`]: end-state counters

pub mod dialogue_impl;
pub mod label;
pub mod rules;
pub mod stats;

pub use dialogue_impl::{Dialogue, DialogueHandle, TerminalStateCallback};
pub use label::{DialogueLabel, DialogueLabelRecord, NONCE_BYTES_NB};
pub use rules::Rules;
pub use stats::DialogueStats;
