//! Preimage-against-hash verification
//!
//! A Lightning payment hash is the SHA-256 digest of a 32-byte preimage;
//! knowledge of the preimage is cryptographic proof of settlement. The
//! boolean verifier here is total: malformed input (wrong length, non-hex,
//! empty) is `false`, never a panic. Callers that must report malformed
//! input to clients pre-validate with [`require_hex32`].

use crate::{PayError, PayResult};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Verify that `preimage` SHA-256-hashes to `payment_hash`.
///
/// Both arguments are 64 hex characters (32 bytes), case-insensitive.
/// The digest comparison is constant-time with respect to the preimage.
pub fn verify(payment_hash: &str, preimage: &str) -> bool {
    let (Some(expected), Some(preimage_bytes)) = (decode_hex32(payment_hash), decode_hex32(preimage))
    else {
        return false;
    };

    let digest = Sha256::digest(preimage_bytes);
    // Comparing decoded bytes makes hex-case-insensitivity structural
    digest.as_slice().ct_eq(&expected).into()
}

/// Compute the hex-encoded SHA-256 of a 32-byte value given as hex.
///
/// Returns `None` for malformed input.
pub fn hash_of_preimage(preimage: &str) -> Option<String> {
    let bytes = decode_hex32(preimage)?;
    Some(hex::encode(Sha256::digest(bytes)))
}

/// Validate that a value is exactly 64 hex characters, for callers that
/// distinguish malformed input from a failed match
pub fn require_hex32(value: &str, field: &str) -> PayResult<()> {
    if decode_hex32(value).is_some() {
        Ok(())
    } else {
        Err(PayError::Validation(format!(
            "{field} must be exactly 64 hexadecimal characters"
        )))
    }
}

/// First 8 chars of a hash, for logs. Never log full preimages.
///
/// Total over arbitrary input: callers log hashes before format validation,
/// so this must not slice mid-character.
pub fn hash_prefix(hash: &str) -> &str {
    hash.char_indices().nth(8).map_or(hash, |(i, _)| &hash[..i])
}

fn decode_hex32(s: &str) -> Option<[u8; 32]> {
    if s.len() != 64 {
        return None;
    }
    let bytes = hex::decode(s).ok()?;
    bytes.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha256_hex(preimage_hex: &str) -> String {
        let bytes = hex::decode(preimage_hex).unwrap();
        hex::encode(Sha256::digest(bytes))
    }

    #[test]
    fn test_valid_preimage_verifies() {
        let preimage = "11".repeat(32);
        let hash = sha256_hex(&preimage);
        assert!(verify(&hash, &preimage));
    }

    #[test]
    fn test_wrong_preimage_fails() {
        let p1 = "11".repeat(32);
        let p2 = "22".repeat(32);
        let hash = sha256_hex(&p1);
        assert!(!verify(&hash, &p2));
    }

    #[test]
    fn test_case_insensitive() {
        let preimage = "ab".repeat(32);
        let hash = sha256_hex(&preimage);
        assert!(verify(&hash.to_uppercase(), &preimage));
        assert!(verify(&hash, &preimage.to_uppercase()));
        assert!(verify(&hash.to_uppercase(), &preimage.to_uppercase()));
    }

    #[test]
    fn test_malformed_input_is_false_not_panic() {
        let preimage = "11".repeat(32);
        let hash = sha256_hex(&preimage);

        assert!(!verify("", &preimage));
        assert!(!verify(&hash, ""));
        assert!(!verify("deadbeef", &preimage)); // wrong length
        assert!(!verify(&hash, &"zz".repeat(32))); // non-hex
        assert!(!verify(&hash, &"11".repeat(33))); // too long
    }

    #[test]
    fn test_require_hex32() {
        assert!(require_hex32(&"ab".repeat(32), "preimage").is_ok());
        assert!(require_hex32(&"AB".repeat(32), "preimage").is_ok());

        let err = require_hex32("nope", "preimage").unwrap_err();
        assert!(matches!(err, PayError::Validation(_)));
    }

    #[test]
    fn test_hash_of_preimage_matches_verify() {
        let preimage = "cd".repeat(32);
        let hash = hash_of_preimage(&preimage).unwrap();
        assert!(verify(&hash, &preimage));
        assert!(hash_of_preimage("short").is_none());
    }

    #[test]
    fn test_hash_prefix_truncates() {
        assert_eq!(hash_prefix("abcdef0123456789"), "abcdef01");
        assert_eq!(hash_prefix("abc"), "abc");
        assert_eq!(hash_prefix(""), "");
    }

    #[test]
    fn test_hash_prefix_multibyte_input() {
        // Handlers log submitted hashes before validating them, so garbage
        // with multibyte characters must truncate, not panic
        assert_eq!(hash_prefix("a😀😀"), "a😀😀");
        assert_eq!(hash_prefix("😀😀😀😀😀😀😀😀trailing"), "😀😀😀😀😀😀😀😀");
        assert_eq!(hash_prefix("ééééééééé"), "éééééééé");
    }
}
