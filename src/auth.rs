use sha2::{Digest, Sha256};

/// Session tokens are stored hashed (SHA-256 hex); the raw token only ever
/// travels in the `Authorization` header.
pub fn hash_access_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let out = hasher.finalize();
    hex::encode(out)
}
