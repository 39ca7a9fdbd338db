//! FIPA Negotiation Example
//!
//! A buyer and a seller agent negotiate over an in-process "network". The
//! buyer persists its dialogues with offloading into a directory, so a second
//! run against the same directory finds the finished negotiations in the
//! terminal collection.
//!
//! ```text
//! cargo run --example fipa_negotiation -- /tmp/parley-demo
//! RUST_LOG=debug cargo run --example fipa_negotiation
//! ```

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use parley_dialogue_core::protocols::fipa::{self, Fipa, FipaBody, FipaPerformative};
use parley_dialogue_core::{
    DialogueHandle, Dialogues, DialoguesConfig, FileStorage, Message, StorageContext, StorageMode,
    StorageOwner,
};

const BUYER: &str = "buyer";
const SELLER: &str = "seller";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let root = match std::env::args().nth(1) {
        Some(path) => std::path::PathBuf::from(path),
        None => std::env::temp_dir().join("parley-fipa-negotiation"),
    };
    info!("Storing buyer dialogues under {}", root.display());

    let backend = Arc::new(FileStorage::new(&root).context("opening storage root")?);
    let buyer = Dialogues::<Fipa>::new(
        DialoguesConfig::new(BUYER)
            .with_storage_mode(StorageMode::PersistentWithOffloading)
            .with_keep_terminal_state_dialogues(true),
        fipa::rules(),
        fipa::role_inference(),
        Some(StorageContext::new(
            StorageOwner::new("parley", "market", BUYER, "Model", "FipaDialogues"),
            backend,
        )),
    )?;
    let seller = Dialogues::<Fipa>::new(
        DialoguesConfig::new(SELLER).with_storage_mode(StorageMode::Basic),
        fipa::rules(),
        fipa::role_inference(),
        None,
    )?;

    buyer.setup()?;
    let history = buyer.get_dialogues_with_counterparty(SELLER);
    info!("Buyer remembers {} dialogue(s) with {}", history.len(), SELLER);

    for (round, price) in [("apples", 10u32), ("pears", 95)] {
        let dialogue = negotiate(&buyer, &seller, round, price)?;
        let dialogue = dialogue.lock();
        info!("Finished negotiation for {}:\n{}", round, dialogue);
    }

    let stats = buyer.dialogue_stats();
    for (end_state, count) in stats.self_initiated() {
        info!("{:>18}: {}", end_state.to_string(), count);
    }

    buyer.teardown()?;
    info!("✅ FIPA negotiation example completed");
    Ok(())
}

/// Deliver `message` to `receiver`, failing if it is dropped
fn deliver(receiver: &Dialogues<Fipa>, message: Message<FipaBody>) -> Result<DialogueHandle<Fipa>> {
    let performative = message.performative();
    match receiver.update(message) {
        Some(dialogue) => Ok(dialogue),
        None => bail!("{} dropped a {} message", receiver.self_address(), performative),
    }
}

/// The seller's side of the protocol
fn seller_reply(dialogue: &DialogueHandle<Fipa>, price: u32) -> Result<Option<Message<FipaBody>>> {
    let last = dialogue
        .lock()
        .last_incoming_message()
        .map(|message| message.performative())
        .context("seller dialogue without incoming message")?;

    let body = match last {
        FipaPerformative::Cfp => FipaBody::Propose {
            proposal: format!("price={}", price),
        },
        FipaPerformative::Accept => FipaBody::MatchAccept,
        FipaPerformative::Inform => FipaBody::End,
        _ => return Ok(None),
    };
    Ok(Some(dialogue.reply(body)?))
}

/// Run one negotiation; the buyer accepts proposals up to a price of 50
fn negotiate(
    buyer: &Dialogues<Fipa>,
    seller: &Dialogues<Fipa>,
    query: &str,
    price: u32,
) -> Result<DialogueHandle<Fipa>> {
    let (cfp, buyer_dialogue) = buyer.create(SELLER, FipaBody::Cfp {
        query: query.to_string(),
    })?;
    info!("{} -> {}: CFP for {}", BUYER, SELLER, query);

    let seller_dialogue = deliver(seller, cfp)?;
    let mut next = seller_reply(&seller_dialogue, price)?;

    while let Some(message) = next.take() {
        info!("{} -> {}: {}", SELLER, BUYER, message.performative());
        deliver(buyer, message)?;
        if buyer_dialogue.is_terminal() {
            break;
        }

        let body = match buyer_dialogue.lock().last_incoming_message().map(|m| m.body.clone()) {
            Some(FipaBody::Propose { proposal }) if price <= 50 => {
                info!("Buyer accepts {}", proposal);
                FipaBody::Accept
            }
            Some(FipaBody::Propose { proposal }) => {
                warn!("Buyer declines {}", proposal);
                FipaBody::Decline
            }
            Some(FipaBody::MatchAccept) => FipaBody::Inform {
                info: [("transaction".to_string(), "0xabc".to_string())].into(),
            },
            other => bail!("unexpected message for buyer: {:?}", other),
        };
        let reply = buyer_dialogue.reply(body)?;
        info!("{} -> {}: {}", BUYER, SELLER, reply.performative());
        deliver(seller, reply)?;
        next = seller_reply(&seller_dialogue, price)?;
    }

    Ok(buyer_dialogue)
}
