// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provides a wrapper type for bytes that remember the encoded string they were parsed from.
//!
//! Key IDs, signatures, and digests appear in metadata as hex strings. Comparisons and
//! cryptographic operations need the raw bytes, but re-serializing a document must reproduce
//! the original string so that canonical forms (and therefore signatures) are stable.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;

/// A string encoding scheme for byte data, e.g. hex.
pub trait Encoding {
    /// Encodes bytes as a string.
    fn encode(bytes: &[u8]) -> String;

    /// Decodes a string into bytes, failing on invalid input.
    fn decode(s: &str) -> Result<Vec<u8>, String>;
}

/// Lowercase hexadecimal encoding.
#[derive(Debug, Clone, Copy)]
pub struct Hex;

impl Encoding for Hex {
    fn encode(bytes: &[u8]) -> String {
        hex::encode(bytes)
    }

    fn decode(s: &str) -> Result<Vec<u8>, String> {
        hex::decode(s).map_err(|err| err.to_string())
    }
}

/// Decoded byte data along with the string it was decoded from.
///
/// Equality and hashing consider only the bytes, so `"00ff"` and `"00FF"` compare equal.
pub struct Decoded<E> {
    bytes: Vec<u8>,
    original: String,
    encoding: PhantomData<E>,
}

impl<E> Decoded<E> {
    /// Consumes self and returns the raw bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

impl<E: Encoding> From<Vec<u8>> for Decoded<E> {
    fn from(bytes: Vec<u8>) -> Self {
        let original = E::encode(&bytes);
        Self {
            bytes,
            original,
            encoding: PhantomData,
        }
    }
}

impl<E> AsRef<[u8]> for Decoded<E> {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<E> Deref for Decoded<E> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<E> Clone for Decoded<E> {
    fn clone(&self) -> Self {
        Self {
            bytes: self.bytes.clone(),
            original: self.original.clone(),
            encoding: PhantomData,
        }
    }
}

impl<E> fmt::Debug for Decoded<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.original, f)
    }
}

impl<E> fmt::Display for Decoded<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.original, f)
    }
}

impl<E> PartialEq for Decoded<E> {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl<E> Eq for Decoded<E> {}

impl<E> Hash for Decoded<E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl<'de, E: Encoding> Deserialize<'de> for Decoded<E> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let original = String::deserialize(deserializer)?;
        let bytes = E::decode(&original).map_err(D::Error::custom)?;
        Ok(Self {
            bytes,
            original,
            encoding: PhantomData,
        })
    }
}

impl<E> Serialize for Decoded<E> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.original)
    }
}

#[cfg(test)]
mod tests {
    use super::{Decoded, Hex};

    #[test]
    fn hex_round_trip() {
        let decoded: Decoded<Hex> = serde_json::from_str("\"00c0ffee\"").unwrap();
        assert_eq!(decoded.as_ref(), &[0x00, 0xc0, 0xff, 0xee]);
        assert_eq!(serde_json::to_string(&decoded).unwrap(), "\"00c0ffee\"");
    }

    #[test]
    fn case_insensitive_equality() {
        let lower: Decoded<Hex> = serde_json::from_str("\"00ff\"").unwrap();
        let upper: Decoded<Hex> = serde_json::from_str("\"00FF\"").unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn invalid_hex_rejected() {
        assert!(serde_json::from_str::<Decoded<Hex>>("\"zz\"").is_err());
    }
}
