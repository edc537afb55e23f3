// Copyright 2023 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deserialization helpers that validate metadata while it is being parsed.

use crate::schema::decoded::{Decoded, Hex};
use crate::schema::error;
use crate::schema::key::Key;
use serde::{de::Error as _, Deserialize, Deserializer};
use serde_json::Value;
use snafu::ensure;
use std::collections::HashMap;
use std::fmt;

/// Deserializes a `keys` map, recomputing the ID of every key and failing the parse if a
/// claimed ID does not match or appears twice. This is the only way key material enters the
/// model, so a successfully parsed document can never carry a mis-identified key.
pub(super) fn deserialize_keys<'de, D>(
    deserializer: D,
) -> Result<HashMap<Decoded<Hex>, Key>, D::Error>
where
    D: Deserializer<'de>,
{
    fn insert_checked(
        keyid: Decoded<Hex>,
        key: Key,
        map: &mut HashMap<Decoded<Hex>, Key>,
    ) -> Result<(), error::Error> {
        let calculated = key.key_id()?;
        ensure!(
            keyid == calculated,
            error::InvalidKeyIdSnafu {
                keyid: keyid.to_string(),
                calculated: calculated.to_string(),
            }
        );
        let keyid_hex = keyid.to_string();
        ensure!(
            map.insert(keyid, key).is_none(),
            error::DuplicateKeyIdSnafu { keyid: keyid_hex }
        );
        Ok(())
    }

    struct Visitor;

    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = HashMap<Decoded<Hex>, Key>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a map of key IDs to keys")
        }

        fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
        where
            M: serde::de::MapAccess<'de>,
        {
            let mut map = HashMap::new();
            while let Some((keyid, key)) = access.next_entry()? {
                insert_checked(keyid, key, &mut map).map_err(M::Error::custom)?;
            }
            Ok(map)
        }
    }

    deserializer.deserialize_map(Visitor)
}

/// Deserializes the flattened `_extra` capture of a `_type`-tagged object. The serde tag is
/// also visible to the flatten collector; we drop it here so re-serialization does not write
/// the tag twice.
pub(super) fn extra_skip_type<'de, D>(deserializer: D) -> Result<HashMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut extra: HashMap<String, Value> = HashMap::deserialize(deserializer)?;
    extra.remove("_type");
    Ok(extra)
}
