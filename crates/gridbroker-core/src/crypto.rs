//! Ed25519 helpers.
//!
//! Public keys travel as hex encoded ed25519 public bytes, signatures as hex
//! encoded detached signatures.

use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH};

use crate::error::{Error, Result};

/// Parse a hex encoded ed25519 public key.
pub fn key_from_hex(pubkey: &str) -> Result<VerifyingKey> {
    let raw = hex::decode(pubkey)
        .map_err(|e| Error::InvalidInput(format!("invalid public key hex: {e}")))?;
    let raw: [u8; PUBLIC_KEY_LENGTH] = raw
        .try_into()
        .map_err(|_| Error::InvalidInput("invalid public key length".to_string()))?;
    VerifyingKey::from_bytes(&raw)
        .map_err(|e| Error::InvalidInput(format!("invalid public key: {e}")))
}

/// Verify a detached signature over `message`.
pub fn verify(key: &VerifyingKey, message: &[u8], signature: &[u8]) -> Result<()> {
    let signature = Signature::from_slice(signature)
        .map_err(|e| Error::InvalidInput(format!("invalid signature: {e}")))?;
    key.verify(message, &signature)
        .map_err(|_| Error::Unauthorized("signature verification failed".to_string()))
}

/// Decode a hex encoded signature into raw bytes.
pub fn signature_from_hex(signature: &str) -> Result<Vec<u8>> {
    hex::decode(signature)
        .map_err(|_| Error::InvalidInput("invalid signature format, expecting hex encoded string".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    #[test]
    fn verify_round_trip() {
        let sk = SigningKey::from_bytes(&[7u8; 32]);
        let vk_hex = hex::encode(sk.verifying_key().to_bytes());

        let message = b"grid reservation";
        let sig = sk.sign(message);

        let key = key_from_hex(&vk_hex).unwrap();
        verify(&key, message, &sig.to_bytes()).unwrap();
        assert!(verify(&key, b"tampered", &sig.to_bytes()).is_err());
    }

    #[test]
    fn rejects_bad_key_material() {
        assert!(key_from_hex("zz").is_err());
        assert!(key_from_hex("abcd").is_err());
    }
}
