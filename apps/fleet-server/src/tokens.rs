//! Opaque, prefixed, hex-encoded bearer tokens (§4.A).

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::error;

/// Generates `{prefix}_{hex}` from `n` bytes of a cryptographic RNG.
///
/// If the OS RNG fails, falls back to the deterministic `{prefix}_fallback`
/// string rather than panicking. Callers must not treat a `_fallback` token
/// as secret — a failing host RNG degrades this into a guessable value.
pub fn random_token(prefix: &str, n: usize) -> String {
    let mut buf = vec![0u8; n];
    match OsRng.try_fill_bytes(&mut buf) {
        Ok(()) => format!("{prefix}_{}", hex::encode(buf)),
        Err(error) => {
            error!(%error, "OS RNG failure generating token; using deterministic fallback");
            format!("{prefix}_fallback")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_prefixed_hex() {
        let token = random_token("dev", 16);
        let (prefix, rest) = token.split_once('_').unwrap();
        assert_eq!(prefix, "dev");
        assert_eq!(rest.len(), 32);
        assert!(rest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_are_distinct() {
        assert_ne!(random_token("op", 24), random_token("op", 24));
    }
}
