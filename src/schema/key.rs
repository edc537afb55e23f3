// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Public key types used to verify metadata signatures.

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::error::{self, Result};
use olpc_cjson::CanonicalFormatter;
use ring::digest::{digest, SHA256};
use ring::signature::{UnparsedPublicKey, ED25519};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::ResultExt;
use std::collections::HashMap;

/// A public key as it appears in the `keys` map of root metadata or a targets role's
/// delegations.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "keytype")]
pub enum Key {
    /// An Ed25519 key.
    #[serde(rename = "ed25519")]
    Ed25519 {
        /// The Ed25519 key.
        keyval: Ed25519Key,
        /// Denotes the key's signature scheme.
        scheme: Ed25519Scheme,
        /// Extra arguments found during deserialization.
        ///
        /// We must store these to correctly compute the key ID, which covers the canonical
        /// form of the entire key object.
        #[serde(flatten)]
        _extra: HashMap<String, Value>,
    },
}

/// An Ed25519 public key value.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Ed25519Key {
    /// The public key, hex-encoded in metadata.
    pub public: Decoded<Hex>,

    /// Extra arguments found during deserialization.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

/// The Ed25519 signature scheme.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub enum Ed25519Scheme {
    /// The only supported scheme string, `"ed25519"`.
    #[serde(rename = "ed25519")]
    Ed25519,
}

impl Key {
    /// Verifies a detached signature over `msg` made by this key. Returns `false` for an
    /// invalid signature; only threshold accounting decides whether that matters.
    pub fn verify(&self, msg: &[u8], signature: &[u8]) -> bool {
        match self {
            Key::Ed25519 {
                keyval,
                scheme: Ed25519Scheme::Ed25519,
                ..
            } => UnparsedPublicKey::new(&ED25519, &keyval.public)
                .verify(msg, signature)
                .is_ok(),
        }
    }

    /// Computes this key's ID: the SHA-256 digest of the key's canonical JSON form.
    /// Documents claiming a different ID for this key are rejected at parse time.
    pub fn key_id(&self) -> Result<Decoded<Hex>> {
        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter::new());
        self.serialize(&mut ser).context(error::JsonSerializationSnafu {
            what: "key".to_owned(),
        })?;
        Ok(digest(&SHA256, &buf).as_ref().to_vec().into())
    }
}
