//! Configuration for the dialogue manager
//!
//! [`DialoguesConfig`] collects the per-manager settings: whose dialogues are
//! tracked, what happens to dialogues that reach a terminal state, which
//! storage variant backs the manager and how long generated nonces are.
//!
//! ## Quick Start
//!
//! ```rust
//! use parley_dialogue_core::config::{DialoguesConfig, StorageMode};
//!
//! let config = DialoguesConfig::new("agent_address")
//!     .with_keep_terminal_state_dialogues(true)
//!     .with_storage_mode(StorageMode::Persistent);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.nonce_bytes, 32);
//! ```
//!
//! ## Storage modes
//!
//! ```text
//! Basic                     memory only
//! Persistent                memory, loaded on setup and dumped on teardown
//! PersistentWithOffloading  as Persistent, terminal dialogues evicted to the
//!                           terminal collection and re-read on demand
//! ```
//!
//! The persistent modes need a [`StorageContext`](crate::storage::StorageContext)
//! at construction; without one they behave like `Basic`.

use serde::{Deserialize, Serialize};

use crate::dialogue::NONCE_BYTES_NB;

/// Which storage variant backs a manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// In-memory only
    Basic,
    /// Loaded on setup, dumped on teardown
    Persistent,
    /// Persistent, with terminal dialogues offloaded to the backing store
    #[default]
    PersistentWithOffloading,
}

/// Configuration of a [`Dialogues`](crate::manager::Dialogues) manager
///
/// ## Examples
///
/// ```rust
/// use parley_dialogue_core::config::{DialoguesConfig, StorageMode};
///
/// let config: DialoguesConfig = serde_json::from_str(
///     r#"{ "self_address": "seller", "storage_mode": "basic" }"#,
/// ).unwrap();
///
/// assert_eq!(config.self_address, "seller");
/// assert_eq!(config.storage_mode, StorageMode::Basic);
/// assert!(!config.keep_terminal_state_dialogues);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialoguesConfig {
    /// Address of the agent for whom dialogues are maintained
    pub self_address: String,

    /// Keep dialogues after they reach a terminal state
    ///
    /// When false, a dialogue is dropped from storage as soon as a terminal
    /// performative is appended. When true it stays retrievable, either in
    /// memory or, with offloading, in the terminal collection.
    pub keep_terminal_state_dialogues: bool,

    /// Storage variant
    pub storage_mode: StorageMode,

    /// Random bytes per generated dialogue nonce
    pub nonce_bytes: usize,
}

impl Default for DialoguesConfig {
    fn default() -> Self {
        Self {
            self_address: String::new(),
            keep_terminal_state_dialogues: false,
            storage_mode: StorageMode::default(),
            nonce_bytes: NONCE_BYTES_NB,
        }
    }
}

impl DialoguesConfig {
    /// Create a configuration for `self_address` with defaults for everything else
    pub fn new(self_address: impl Into<String>) -> Self {
        Self {
            self_address: self_address.into(),
            ..Default::default()
        }
    }

    /// Keep or drop dialogues that reach a terminal state
    pub fn with_keep_terminal_state_dialogues(mut self, keep: bool) -> Self {
        self.keep_terminal_state_dialogues = keep;
        self
    }

    /// Set the storage variant
    pub fn with_storage_mode(mut self, storage_mode: StorageMode) -> Self {
        self.storage_mode = storage_mode;
        self
    }

    /// Set the nonce length in bytes
    pub fn with_nonce_bytes(mut self, nonce_bytes: usize) -> Self {
        self.nonce_bytes = nonce_bytes;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.self_address.is_empty() {
            return Err("self_address is not set".to_string());
        }

        if self.nonce_bytes < NONCE_BYTES_NB {
            return Err(format!(
                "nonce_bytes must be at least {}, got {}",
                NONCE_BYTES_NB, self.nonce_bytes
            ));
        }

        Ok(())
    }
}
