//! Shared helpers for dialogue-core integration tests

#![allow(dead_code)]

use std::sync::Arc;

use parley_dialogue_core::protocols::fipa::{self, Fipa, FipaBody};
use parley_dialogue_core::{
    DialogueHandle, DialogueResult, Dialogues, DialoguesConfig, MemoryStorage, StorageBackend, StorageContext,
    StorageMode, StorageOwner,
};

pub const BUYER: &str = "buyer_agent";
pub const SELLER: &str = "seller_agent";

/// Install a log subscriber honouring `RUST_LOG`; safe to call from every test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory manager for `address`
pub fn basic_dialogues(address: &str, keep_terminal: bool) -> Dialogues<Fipa> {
    Dialogues::new(
        DialoguesConfig::new(address)
            .with_storage_mode(StorageMode::Basic)
            .with_keep_terminal_state_dialogues(keep_terminal),
        fipa::rules(),
        fipa::role_inference(),
        None,
    )
    .expect("valid config")
}

/// Storage context for `address` on top of `backend`
pub fn storage_context(address: &str, backend: Arc<dyn StorageBackend>) -> StorageContext {
    StorageContext::new(
        StorageOwner::new("parley", "negotiation", address, "Model", "FipaDialogues"),
        backend,
    )
}

/// Manager for `address` persisting through `context`
pub fn persistent_dialogues(
    address: &str,
    mode: StorageMode,
    keep_terminal: bool,
    context: StorageContext,
) -> DialogueResult<Dialogues<Fipa>> {
    Dialogues::new(
        DialoguesConfig::new(address)
            .with_storage_mode(mode)
            .with_keep_terminal_state_dialogues(keep_terminal),
        fipa::rules(),
        fipa::role_inference(),
        Some(context),
    )
}

/// Fresh in-memory backend
pub fn memory_backend() -> Arc<dyn StorageBackend> {
    Arc::new(MemoryStorage::new())
}

pub fn cfp() -> FipaBody {
    FipaBody::Cfp {
        query: "apples".to_string(),
    }
}

pub fn propose() -> FipaBody {
    FipaBody::Propose {
        proposal: "price=10".to_string(),
    }
}

/// Run a successful negotiation from CFP to END, returning the buyer's and
/// the seller's dialogue
pub fn negotiate(
    buyer: &Dialogues<Fipa>,
    seller: &Dialogues<Fipa>,
) -> DialogueResult<(DialogueHandle<Fipa>, DialogueHandle<Fipa>)> {
    let (message, buyer_dialogue) = buyer.create(seller.self_address(), cfp())?;
    let seller_dialogue = seller.update(message).expect("cfp accepted");

    buyer
        .update(seller_dialogue.reply(propose())?)
        .expect("propose accepted");
    seller
        .update(buyer_dialogue.reply(FipaBody::Accept)?)
        .expect("accept accepted");
    buyer
        .update(seller_dialogue.reply(FipaBody::MatchAccept)?)
        .expect("match accept accepted");
    seller
        .update(buyer_dialogue.reply(FipaBody::Inform {
            info: [("tx".to_string(), "0xdead".to_string())].into(),
        })?)
        .expect("inform accepted");
    buyer
        .update(seller_dialogue.reply(FipaBody::End)?)
        .expect("end accepted");

    Ok((buyer_dialogue, seller_dialogue))
}
