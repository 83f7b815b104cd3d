use sha2::{Digest, Sha256};

use crate::salt::Salt;

/// Length in hex chars of a pseudo-identity.
pub const PSEUDO_ID_LEN: usize = 16;

/// Derive the pseudo-identity of a visitor.
///
/// Formula: `sha256(salt ‖ site_id ‖ client_address ‖ user_agent)[0..8]`
/// encoded as 16 hex chars. Each field is length-prefixed so that shifting
/// bytes between adjacent fields cannot produce the same digest.
///
/// Pure function: nothing is logged or stored. The client address must not
/// outlive the request that carried it.
pub fn identify(site_id: &str, client_address: &str, user_agent: &str, salt: &Salt) -> String {
    let mut hasher = Sha256::new();
    for field in [salt.value.as_str(), site_id, client_address, user_agent] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    let hash = hasher.finalize();
    hex::encode(&hash[..PSEUDO_ID_LEN / 2])
}
