//! Custom serde helpers for nullable `bytes::Bytes` cells using serde_bytes

use bytes::Bytes;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serializer};

/// Serialize cells as CBOR byte strings (or null)
#[allow(clippy::ptr_arg)]
pub fn serialize<S>(cells: &Vec<Option<Bytes>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut seq = serializer.serialize_seq(Some(cells.len()))?;
    for cell in cells {
        seq.serialize_element(&cell.as_deref().map(serde_bytes::Bytes::new))?;
    }
    seq.end()
}

/// Deserialize cells from CBOR byte strings (or null)
pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Option<Bytes>>, D::Error>
where
    D: Deserializer<'de>,
{
    let cells: Vec<Option<serde_bytes::ByteBuf>> = Vec::deserialize(deserializer)?;
    Ok(cells
        .into_iter()
        .map(|cell| cell.map(|buf| Bytes::from(buf.into_vec())))
        .collect())
}
