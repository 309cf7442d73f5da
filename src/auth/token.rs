//! Token generation and hashing.
//!
//! The raw token goes to the client (session value or cookie); only its
//! SHA-256 digest goes to the [`TokenStore`]. A leaked store row is not
//! enough to impersonate anyone.

use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::auth::store::{TokenKind, TokenStore};
use crate::error::{StoreError, StoreResult};

const MAX_GENERATION_ATTEMPTS: usize = 3;

/// `len` random bytes from the OS, hex-encoded.
pub fn generate(len: usize) -> String {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// One-way digest used as the storage key of a raw token.
pub fn hash(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Generates a token whose hash is not already present in `kind`'s namespace.
///
/// Returns `(raw, hash)`.
pub(crate) async fn fresh(
    store: &dyn TokenStore,
    kind: TokenKind,
    len: usize,
) -> StoreResult<(String, String)> {
    for _ in 0..MAX_GENERATION_ATTEMPTS {
        let raw = generate(len);
        let hashed = hash(&raw);
        if store.find_token(kind, &hashed).await?.is_none() {
            return Ok((raw, hashed));
        }
        warn!(?kind, "generated token already in use, regenerating");
    }
    Err(StoreError::Backend(format!(
        "no unused {kind:?} token after {MAX_GENERATION_ATTEMPTS} attempts"
    )))
}
