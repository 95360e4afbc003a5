//! Dataset serialization: tables as DAGs of DAG-CBOR blocks
//!
//! A table becomes one or more Row-Chunk blocks plus a root that lists them
//! in row order. Two roots exist:
//!
//! - [`TableRootNode`]: one complete table, written by
//!   [`DatasetSerializer::serialize_table`]
//! - [`StreamingMarkerNode`]: an incrementally built dataset, written by
//!   [`DatasetSerializer::serialize_streaming`]
//!
//! Both share the Row-Chunk format, so a chunk stored by either path may be
//! deduplicated against the other.

pub mod node;
pub(crate) mod serde_bytes_helper;
pub mod serializer;
pub mod streaming;

pub use node::{
    NodeHeader, ROW_CHUNK_NODE, RowChunkNode, STREAMING_DATASET_NODE, StreamingMarkerNode,
    TABLE_NODE, TableRootNode,
};
pub use serializer::{DEFAULT_CHUNK_ROWS, DatasetSerializer};
pub use streaming::ChunkStream;
