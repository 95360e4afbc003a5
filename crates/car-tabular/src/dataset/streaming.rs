//! Streaming serialization: batch sources <-> Streaming Dataset Marker Nodes
//!
//! Export pulls one batch at a time and commits its chunks before pulling the
//! next, so at most one batch plus the list of chunk CIDs is held in memory.
//! The marker block is written last; an interrupted export leaves no root.

use std::sync::Arc;

use cid::Cid as IpldCid;

use super::node::{STREAMING_DATASET_NODE, StreamingMarkerNode};
use super::serializer::{DatasetSerializer, load_chunk};
use crate::error::{InterchangeError, Result};
use crate::storage::BlockStore;
use crate::table::{Schema, Table};

impl<S: BlockStore + Sync> DatasetSerializer<S> {
    /// Consume a lazy batch source, committing each batch as it is pulled
    ///
    /// Every batch must share the first batch's schema. A source that yields
    /// nothing still produces a valid, empty marker.
    pub async fn serialize_streaming<I>(&self, batches: I) -> Result<IpldCid>
    where
        I: IntoIterator<Item = Result<Table>>,
    {
        let mut schema: Option<Arc<Schema>> = None;
        let mut chunks = Vec::new();
        let mut num_rows = 0u64;

        for (index, batch) in batches.into_iter().enumerate() {
            let batch = batch?;
            match &schema {
                None => schema = Some(Arc::clone(batch.schema())),
                Some(expected) if expected != batch.schema() => {
                    return Err(InterchangeError::schema_mismatch(format!(
                        "batch {} schema differs from the first batch",
                        index
                    )));
                }
                Some(_) => {}
            }

            for piece in batch.chunks(self.chunk_rows()) {
                let cid = self.put_chunk(&piece, &[]).await?;
                num_rows += piece.num_rows() as u64;
                chunks.push(cid);
            }
            tracing::trace!(batch = index, rows = batch.num_rows(), "committed batch");
        }

        let marker = StreamingMarkerNode {
            chunks,
            num_rows,
            schema: schema.map(|s| Schema::clone(&s)),
            kind: STREAMING_DATASET_NODE.into(),
        };
        let cid = self.put_node(&marker).await?;

        tracing::debug!(
            %cid,
            chunks = marker.chunks.len(),
            rows = num_rows,
            "serialized streaming dataset"
        );
        Ok(cid)
    }

    /// Open a lazy reader over the chunks of the marker at `root`
    ///
    /// Nothing beyond the marker is read until [`ChunkStream::next`] is
    /// called. Fails with `InvalidNode` if `root` is not a marker.
    pub async fn deserialize_streaming(&self, root: &IpldCid) -> Result<ChunkStream<S>> {
        let marker = self.streaming_marker(root).await?;
        Ok(ChunkStream {
            store: self.store().clone(),
            schema: marker.schema.map(Arc::new),
            chunks: marker.chunks.into_iter(),
            num_rows: marker.num_rows,
            yielded: 0,
        })
    }

    /// Decode the marker at `root` without loading chunks
    pub async fn streaming_marker(&self, root: &IpldCid) -> Result<StreamingMarkerNode> {
        self.load_node(root, STREAMING_DATASET_NODE, "streaming dataset")
            .await
    }
}

/// Lazy, single-pass reader over a streaming dataset's chunks
///
/// Yields one [`Table`] per Row-Chunk in the marker's order. To read again,
/// open a new stream.
#[derive(Debug)]
pub struct ChunkStream<S> {
    store: S,
    schema: Option<Arc<Schema>>,
    chunks: std::vec::IntoIter<IpldCid>,
    num_rows: u64,
    yielded: u64,
}

impl<S: BlockStore> ChunkStream<S> {
    /// Read the next chunk
    ///
    /// Returns `None` when the stream is exhausted. Fails with
    /// `SchemaMismatch` once the chunks hold more rows than the marker
    /// declares, or at the end if they hold fewer.
    pub async fn next(&mut self) -> Result<Option<Table>> {
        let Some(cid) = self.chunks.next() else {
            if self.yielded != self.num_rows {
                return Err(self.row_count_mismatch());
            }
            return Ok(None);
        };
        let schema = self.schema.as_ref().ok_or_else(|| {
            InterchangeError::schema_mismatch("marker lists chunks but declares no schema")
        })?;
        let chunk = load_chunk(&self.store, &cid, schema).await?;

        self.yielded += chunk.num_rows() as u64;
        if self.yielded > self.num_rows {
            return Err(self.row_count_mismatch());
        }
        Ok(Some(chunk))
    }

    fn row_count_mismatch(&self) -> InterchangeError {
        InterchangeError::schema_mismatch(format!(
            "streaming dataset declares {} rows, chunks hold {}{}",
            self.num_rows,
            self.yielded,
            if self.chunks.as_slice().is_empty() { "" } else { " or more" }
        ))
    }

    /// Schema of the dataset; `None` for an empty source
    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }

    /// Rows yielded so far
    pub fn rows_read(&self) -> u64 {
        self.yielded
    }

    /// Chunks not yet read
    pub fn remaining(&self) -> usize {
        self.chunks.len()
    }

    /// Total rows the marker declares
    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    /// Drain the rest of the stream into one table
    pub async fn collect_table(mut self) -> Result<Table> {
        let schema = self.schema.clone().unwrap_or_default();
        let mut table = Table::empty(schema);
        while let Some(chunk) = self.next().await? {
            table.append(&chunk)?;
        }
        Ok(table)
    }
}
