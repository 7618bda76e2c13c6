//! Reversible string encoding for composite `(x, y)` map keys.
//!
//! JSON objects only take string keys, so tuple keys are written as
//! `"t\0(x,y)"`. The strict decoder requires the `t\0` marker; the loose
//! decoder also takes bare `"(x,y)"` or `"x,y"` as hand-written configs do.

use crate::error::{Error, Result};

const MARKER: &str = "t\0";

pub fn encode(key: (i32, i32)) -> String {
    format!("{MARKER}({},{})", key.0, key.1)
}

pub fn decode(s: &str) -> Result<(i32, i32)> {
    match s.strip_prefix(MARKER) {
        Some(rest) => parse_pair(rest).ok_or_else(|| Error::BadKey(s.to_string())),
        None => Err(Error::BadKey(s.to_string())),
    }
}

pub fn decode_loose(s: &str) -> Result<(i32, i32)> {
    let rest = s.strip_prefix(MARKER).unwrap_or(s);
    parse_pair(rest).ok_or_else(|| Error::BadKey(s.to_string()))
}

fn parse_pair(s: &str) -> Option<(i32, i32)> {
    let inner = s.trim();
    let inner = inner.strip_prefix('(').unwrap_or(inner);
    let inner = inner.strip_suffix(')').unwrap_or(inner);
    let (a, b) = inner.split_once(',')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// `#[serde(with = "tuple_keys::map")]` for maps keyed by strict tuple keys.
pub mod map {
    use super::{decode, encode};
    use serde::de::{Deserialize, Deserializer, Error as _};
    use serde::ser::{SerializeMap, Serializer};
    use serde::Serialize;
    use std::collections::BTreeMap;

    pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, s: S) -> std::result::Result<S::Ok, S::Error>
    where
        K: Copy + Into<(i32, i32)>,
        V: Serialize,
        S: Serializer,
    {
        let mut out = s.serialize_map(Some(map.len()))?;
        for (k, v) in map {
            out.serialize_entry(&encode((*k).into()), v)?;
        }
        out.end()
    }

    pub fn deserialize<'de, K, V, D>(d: D) -> std::result::Result<BTreeMap<K, V>, D::Error>
    where
        K: Ord + From<(i32, i32)>,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, V>::deserialize(d)?;
        raw.into_iter()
            .map(|(k, v)| decode(&k).map(|key| (K::from(key), v)).map_err(D::Error::custom))
            .collect()
    }
}

/// Same as [`map`] but accepts the loose key spellings on input.
pub mod loose_map {
    use super::decode_loose;
    use serde::de::{Deserialize, Deserializer, Error as _};
    use serde::ser::Serializer;
    use serde::Serialize;
    use std::collections::BTreeMap;

    pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, s: S) -> std::result::Result<S::Ok, S::Error>
    where
        K: Copy + Into<(i32, i32)>,
        V: Serialize,
        S: Serializer,
    {
        super::map::serialize(map, s)
    }

    pub fn deserialize<'de, K, V, D>(d: D) -> std::result::Result<BTreeMap<K, V>, D::Error>
    where
        K: Ord + From<(i32, i32)>,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, V>::deserialize(d)?;
        raw.into_iter()
            .map(|(k, v)| decode_loose(&k).map(|key| (K::from(key), v)).map_err(D::Error::custom))
            .collect()
    }
}
