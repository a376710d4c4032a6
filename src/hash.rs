//! Local SQLite file naming for emulated D1 databases.
//!
//! The local runtime stores every D1 database as a Durable Object backed by
//! a SQLite file. The file name is the Durable Object id derived from the
//! database id, using a keyed two-round hash:
//!
//! ```text
//! key      = SHA-256(unique_key)
//! name_mac = HMAC-SHA256(key, name)[..16]
//! check    = HMAC-SHA256(key, name_mac)[..16]
//! id       = hex(name_mac ++ check)          // 64 lowercase hex chars
//! ```
//!
//! The output has to match the runtime bit for bit, otherwise lookups in
//! `.wrangler/state/v3/d1/` point at files that do not exist.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Namespace key under which the local runtime keeps D1 databases.
pub const D1_UNIQUE_KEY: &str = "miniflare-D1DatabaseObject";

/// Derive the Durable Object id the local runtime uses for `name` within the
/// `unique_key` namespace.
///
/// ```rust
/// use d1_helpers::hash::{derive_local_id, D1_UNIQUE_KEY};
///
/// let id = derive_local_id(D1_UNIQUE_KEY, "abc123");
/// assert_eq!(id.len(), 64);
/// ```
pub fn derive_local_id(unique_key: &str, name: &str) -> String {
    let key = Sha256::digest(unique_key.as_bytes());

    let name_mac = truncated_hmac(&key, name.as_bytes());
    let check = truncated_hmac(&key, &name_mac);

    let mut id = Vec::with_capacity(32);
    id.extend_from_slice(&name_mac);
    id.extend_from_slice(&check);
    hex::encode(id)
}

/// First 16 bytes of HMAC-SHA256(key, data).
fn truncated_hmac(key: &[u8], data: &[u8]) -> [u8; 16] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    let digest = mac.finalize().into_bytes();

    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}
