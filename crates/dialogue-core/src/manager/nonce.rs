//! Dialogue nonce generation

use rand::rngs::OsRng;
use rand::RngCore;

use crate::message::{DialogueReference, UNASSIGNED_DIALOGUE_REFERENCE};

/// Generate a hex-encoded nonce from `nonce_bytes` bytes of OS randomness
///
/// Collisions are not checked for.
pub fn generate_dialogue_nonce(nonce_bytes: usize) -> String {
    let mut bytes = vec![0u8; nonce_bytes];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Dialogue reference for a new self-initiated dialogue
pub fn new_self_initiated_dialogue_reference(nonce_bytes: usize) -> DialogueReference {
    (
        generate_dialogue_nonce(nonce_bytes),
        UNASSIGNED_DIALOGUE_REFERENCE.to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::NONCE_BYTES_NB;

    #[test]
    fn test_nonce_is_hex_of_requested_length() {
        let nonce = generate_dialogue_nonce(NONCE_BYTES_NB);
        assert_eq!(nonce.len(), NONCE_BYTES_NB * 2);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(nonce, generate_dialogue_nonce(NONCE_BYTES_NB));
    }

    #[test]
    fn test_self_initiated_reference_is_incomplete() {
        let (starter, responder) = new_self_initiated_dialogue_reference(NONCE_BYTES_NB);
        assert_eq!(starter.len(), 64);
        assert_eq!(responder, UNASSIGNED_DIALOGUE_REFERENCE);
    }
}
