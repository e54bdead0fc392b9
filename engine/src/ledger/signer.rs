//! # Signing Keys
//!
//! Ed25519 keypairs for the keeper's wallet. The on-disk format is the one
//! every ledger CLI writes: a JSON array of 64 integers, secret key first,
//! public key second.
//!
//! Key bytes are never logged. `Debug` prints the public half only.

use std::fmt;
use std::path::Path;

use ed25519_dalek::{Signer, SigningKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use thiserror::Error;

use super::address::Address;

/// Errors from loading or building a keypair.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid keypair bytes: expected 64, got {0}")]
    InvalidLength(usize),

    #[error("keypair validation failed: public key does not match secret key")]
    KeypairMismatch,

    #[error("failed to read keypair file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("keypair file {path} is not a JSON byte array: {source}")]
    Format {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A wallet keypair.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Parses the 64-byte `secret ‖ public` form and checks that the public
    /// half really belongs to the secret.
    pub fn from_keypair_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let arr: &[u8; 64] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidLength(bytes.len()))?;
        let signing_key =
            SigningKey::from_keypair_bytes(arr).map_err(|_| KeyError::KeypairMismatch)?;
        Ok(Self { signing_key })
    }

    /// Loads a JSON keypair file.
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| KeyError::Io {
            path: display.clone(),
            source,
        })?;
        let bytes: Vec<u8> = serde_json::from_str(&raw).map_err(|source| KeyError::Format {
            path: display,
            source,
        })?;
        Self::from_keypair_bytes(&bytes)
    }

    /// The 64-byte `secret ‖ public` form. Handle with care.
    pub fn to_keypair_bytes(&self) -> [u8; 64] {
        self.signing_key.to_keypair_bytes()
    }

    /// The wallet address.
    pub fn pubkey(&self) -> Address {
        Address::new_from_array(self.signing_key.verifying_key().to_bytes())
    }

    /// Signs `message`.
    pub fn sign_message(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl Clone for Keypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair(pub={})", self.pubkey())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier};
    use std::io::Write;

    #[test]
    fn signature_verifies_under_pubkey() {
        let kp = Keypair::generate();
        let sig = kp.sign_message(b"finalize_redeem");
        let vk = ed25519_dalek::VerifyingKey::from_bytes(kp.pubkey().as_bytes()).unwrap();
        assert!(vk.verify(b"finalize_redeem", &Signature::from_bytes(&sig)).is_ok());
    }

    #[test]
    fn loads_cli_keypair_file() {
        let kp = Keypair::from_seed(&[42; 32]);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&kp.to_keypair_bytes().to_vec()).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let loaded = Keypair::read_from_file(file.path()).unwrap();
        assert_eq!(loaded.pubkey(), kp.pubkey());
    }

    #[test]
    fn mismatched_public_half_is_rejected() {
        let mut bytes = Keypair::from_seed(&[1; 32]).to_keypair_bytes();
        bytes[40] ^= 0xff;
        assert!(matches!(
            Keypair::from_keypair_bytes(&bytes),
            Err(KeyError::KeypairMismatch)
        ));
    }

    #[test]
    fn wrong_length_and_bad_json() {
        assert!(matches!(
            Keypair::from_keypair_bytes(&[0u8; 32]),
            Err(KeyError::InvalidLength(32))
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not json").unwrap();
        assert!(matches!(
            Keypair::read_from_file(file.path()),
            Err(KeyError::Format { .. })
        ));
    }

    #[test]
    fn debug_hides_secret() {
        let kp = Keypair::from_seed(&[7; 32]);
        let rendered = format!("{:?}", kp);
        assert!(rendered.contains(&kp.pubkey().to_string()));
        assert!(!rendered.contains(&hex::encode([7u8; 32])));
    }
}
