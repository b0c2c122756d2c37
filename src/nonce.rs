use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Generates the `state` nonce correlating an authorization request with its
/// callback.
///
/// Returns a 22-character URL-safe string (16 random bytes → base64url).
#[must_use]
pub fn generate_state() -> String {
    let random_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Stable, non-reversible key for a token: `BASE64URL(SHA256(token))`.
///
/// Used to index in-flight refreshes without holding raw tokens as map keys.
#[must_use]
pub(crate) fn token_fingerprint(token: &str) -> String {
    let hash = Sha256::digest(token.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}
