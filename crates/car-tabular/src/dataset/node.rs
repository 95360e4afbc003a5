//! Dataset node wire formats (serialized as DAG-CBOR)
//!
//! Every node carries a `type` tag so a block can be classified before it is
//! fully decoded.
//!
//! **Nullability requirement:** `Option` fields serialize as explicit `null`
//! (never skipped). Skipping vs explicit null produces different CBOR bytes and
//! therefore different CIDs for the same logical node.
//!
//! Fields are declared in alphabetical order to mirror the canonical key
//! order of the encoding.

use cid::Cid as IpldCid;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use smol_str::SmolStr;

use crate::table::{Column, Schema};

/// `type` tag of a Table Root Node
pub const TABLE_NODE: &str = "table";

/// `type` tag of a Row-Chunk Node
pub const ROW_CHUNK_NODE: &str = "row_chunk";

/// `type` tag of a Streaming Dataset Marker Node
pub const STREAMING_DATASET_NODE: &str = "streaming_dataset";

/// Just the `type` tag, for classifying a block
#[derive(Debug, Clone, Deserialize)]
pub struct NodeHeader {
    /// Node type tag
    #[serde(rename = "type")]
    pub kind: SmolStr,
}

/// A contiguous slice of table rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChunkNode {
    /// Column vectors in schema order
    pub columns: Vec<Column>,

    /// SHA-256 over the chunk's hash-column vectors, when hash columns were given
    pub key_digest: Option<ByteBuf>,

    /// Rows in this chunk
    pub num_rows: u64,

    /// Schema the columns were encoded under
    pub schema: Schema,

    /// Always [`ROW_CHUNK_NODE`]
    #[serde(rename = "type")]
    pub kind: SmolStr,
}

/// One complete table: schema plus ordered chunk links
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRootNode {
    /// Row-Chunk CIDs in row order
    pub chunks: Vec<IpldCid>,

    /// Columns that seeded the chunks' key digests
    pub hash_columns: Option<Vec<SmolStr>>,

    /// Total rows across all chunks
    pub num_rows: u64,

    /// Declared table schema
    pub schema: Schema,

    /// Always [`TABLE_NODE`]
    #[serde(rename = "type")]
    pub kind: SmolStr,
}

/// Marker for an incrementally built dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingMarkerNode {
    /// Row-Chunk CIDs in pull order
    pub chunks: Vec<IpldCid>,

    /// Total rows across all chunks
    pub num_rows: u64,

    /// Schema of the first batch; `null` when the source yielded nothing
    pub schema: Option<Schema>,

    /// Always [`STREAMING_DATASET_NODE`]
    #[serde(rename = "type")]
    pub kind: SmolStr,
}
