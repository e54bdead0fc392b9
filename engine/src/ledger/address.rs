//! # Addresses
//!
//! A ledger address is 32 opaque bytes, displayed as base58. Wallets and
//! most program accounts are Ed25519 points; program-derived addresses are
//! deliberately *not* on the curve so nobody can hold a key for them.

use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use curve25519_dalek::edwards::CompressedEdwardsY;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Length of an address in bytes.
pub const ADDRESS_BYTES: usize = 32;

/// Longest base58 rendering of 32 bytes.
const MAX_BASE58_LEN: usize = 44;

/// Errors from parsing an address string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address string too long: {0} chars")]
    TooLong(usize),

    #[error("invalid base58: {0}")]
    InvalidBase58(String),

    #[error("decoded address is {0} bytes, expected 32")]
    WrongLength(usize),
}

/// A 32-byte ledger address.
///
/// Borsh-encodes as the raw 32 bytes, which is how the program stores
/// `Pubkey` fields. Serde uses the base58 string so receipts stay readable.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize,
)]
pub struct Address([u8; ADDRESS_BYTES]);

impl Address {
    /// Wraps raw bytes.
    pub const fn new_from_array(bytes: [u8; ADDRESS_BYTES]) -> Self {
        Self(bytes)
    }

    /// Parses a compile-time constant.
    ///
    /// # Panics
    ///
    /// Panics if `s` is not a valid base58 address. Only use this with
    /// string literals that are covered by a test.
    pub fn from_static(s: &'static str) -> Self {
        match s.parse() {
            Ok(address) => address,
            Err(e) => panic!("invalid static address {:?}: {}", s, e),
        }
    }

    /// Builds an address from a slice, checking the length.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, AddressError> {
        let bytes: [u8; ADDRESS_BYTES] = slice
            .try_into()
            .map_err(|_| AddressError::WrongLength(slice.len()))?;
        Ok(Self(bytes))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_BYTES] {
        &self.0
    }

    /// Copies out the raw bytes.
    pub fn to_bytes(self) -> [u8; ADDRESS_BYTES] {
        self.0
    }

    /// Whether these bytes decompress to a point on the Ed25519 curve.
    /// Program-derived addresses must return `false`.
    pub fn is_on_curve(&self) -> bool {
        CompressedEdwardsY(self.0).decompress().is_some()
    }

    /// Base58 rendering.
    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; ADDRESS_BYTES]> for Address {
    fn from(bytes: [u8; ADDRESS_BYTES]) -> Self {
        Self(bytes)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > MAX_BASE58_LEN {
            return Err(AddressError::TooLong(s.len()));
        }
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| AddressError::InvalidBase58(e.to_string()))?;
        Self::try_from_slice(&bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_base58())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base58_round_trip() {
        let addr = Address::new_from_array([7; 32]);
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn system_program_is_all_zeros() {
        let addr: Address = "11111111111111111111111111111111".parse().unwrap();
        assert_eq!(addr, Address::default());
    }

    #[test]
    fn rejects_wrong_length_and_garbage() {
        assert!(matches!(
            "1111".parse::<Address>(),
            Err(AddressError::WrongLength(_))
        ));
        assert!(matches!(
            "0OIl".parse::<Address>(),
            Err(AddressError::InvalidBase58(_))
        ));
        assert!(matches!(
            "1".repeat(45).parse::<Address>(),
            Err(AddressError::TooLong(45))
        ));
    }

    #[test]
    fn wallet_keys_are_on_curve() {
        let key = ed25519_dalek::SigningKey::from_bytes(&[9; 32]);
        let addr = Address::new_from_array(key.verifying_key().to_bytes());
        assert!(addr.is_on_curve());
    }

    #[test]
    fn serde_uses_base58_string() {
        let addr = Address::new_from_array([3; 32]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
        assert!(serde_json::from_str::<Address>("\"0OIl\"").is_err());
        assert!(serde_json::from_str::<Address>("[3, 3]").is_err());
    }

    #[test]
    fn borsh_is_raw_bytes() {
        let addr = Address::new_from_array([5; 32]);
        let encoded = borsh::to_vec(&addr).unwrap();
        assert_eq!(encoded, vec![5; 32]);
    }
}
