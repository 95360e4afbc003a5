//! Whole-table serialization: table <-> root node + row chunks

use std::sync::Arc;

use cid::Cid as IpldCid;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_bytes::ByteBuf;
use sha2::{Digest, Sha256};
use smol_str::SmolStr;

use super::node::{NodeHeader, ROW_CHUNK_NODE, RowChunkNode, TABLE_NODE, TableRootNode};
use crate::error::{InterchangeError, InterchangeErrorKind, Result, TableError};
use crate::storage::{self, BlockStore};
use crate::table::{Column, Schema, Table};

/// Rows per Row-Chunk unless configured otherwise
pub const DEFAULT_CHUNK_ROWS: usize = 8192;

/// Maps tables onto a DAG of blocks in a [`BlockStore`]
///
/// Every table is cut into Row-Chunks of at most `chunk_rows` rows. The
/// streaming path cuts batches by the same rule, so identical data chunks the
/// same way through either path.
#[derive(Debug, Clone)]
pub struct DatasetSerializer<S> {
    store: S,
    chunk_rows: usize,
}

impl<S: BlockStore + Sync> DatasetSerializer<S> {
    /// Serializer with [`DEFAULT_CHUNK_ROWS`]
    pub fn new(store: S) -> Self {
        Self::with_chunk_rows(store, DEFAULT_CHUNK_ROWS)
    }

    /// Serializer with a custom chunk size (at least one row)
    pub fn with_chunk_rows(store: S, chunk_rows: usize) -> Self {
        Self {
            store,
            chunk_rows: chunk_rows.max(1),
        }
    }

    /// The underlying block store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Maximum rows per Row-Chunk
    pub fn chunk_rows(&self) -> usize {
        self.chunk_rows
    }

    /// Write `table` as row chunks plus a Table Root Node
    ///
    /// All chunk blocks are committed before the root, and the root CID is
    /// returned only once everything is stored. `hash_columns` name the
    /// columns whose values seed each chunk's key digest; pass `&[]` for none.
    pub async fn serialize_table(&self, table: &Table, hash_columns: &[&str]) -> Result<IpldCid> {
        let hash_indices = resolve_hash_columns(table.schema(), hash_columns)?;

        let mut chunks = Vec::new();
        for piece in table.chunks(self.chunk_rows) {
            chunks.push(self.put_chunk(&piece, &hash_indices).await?);
        }

        let root = TableRootNode {
            chunks,
            hash_columns: (!hash_columns.is_empty())
                .then(|| hash_columns.iter().map(SmolStr::new).collect()),
            num_rows: table.num_rows() as u64,
            schema: Schema::clone(table.schema()),
            kind: TABLE_NODE.into(),
        };
        let cid = self.put_node(&root).await?;

        tracing::debug!(
            %cid,
            chunks = root.chunks.len(),
            rows = table.num_rows(),
            "serialized table"
        );
        Ok(cid)
    }

    /// Rebuild the table rooted at `root`
    ///
    /// A missing root block is `NotFound`; a block that is not a Table Root
    /// Node is `InvalidNode`, so callers can move on to another root.
    pub async fn deserialize_table(&self, root: &IpldCid) -> Result<Table> {
        let node: TableRootNode = self.load_node(root, TABLE_NODE, "table").await?;
        let schema = Arc::new(node.schema);

        let mut table = Table::empty(Arc::clone(&schema));
        for chunk_cid in &node.chunks {
            let chunk = load_chunk(&self.store, chunk_cid, &schema).await?;
            table.append(&chunk)?;
        }

        if table.num_rows() as u64 != node.num_rows {
            return Err(InterchangeError::schema_mismatch(format!(
                "table {} declares {} rows, chunks hold {}",
                root,
                node.num_rows,
                table.num_rows()
            )));
        }

        Ok(table)
    }

    /// Decode the Table Root Node at `root` without loading chunks
    pub async fn table_root(&self, root: &IpldCid) -> Result<TableRootNode> {
        self.load_node(root, TABLE_NODE, "table").await
    }

    /// Encode and store one Row-Chunk
    pub(crate) async fn put_chunk(&self, chunk: &Table, hash_indices: &[usize]) -> Result<IpldCid> {
        check_finite(chunk)?;

        let key_digest = if hash_indices.is_empty() {
            None
        } else {
            let keyed: Vec<&Column> = hash_indices.iter().map(|&i| &chunk.columns()[i]).collect();
            let encoded =
                serde_ipld_dagcbor::to_vec(&keyed).map_err(InterchangeError::serialization)?;
            Some(ByteBuf::from(Sha256::digest(&encoded).to_vec()))
        };

        let node = RowChunkNode {
            columns: chunk.columns().to_vec(),
            key_digest,
            num_rows: chunk.num_rows() as u64,
            schema: Schema::clone(chunk.schema()),
            kind: ROW_CHUNK_NODE.into(),
        };
        self.put_node(&node).await
    }

    pub(crate) async fn put_node<T: Serialize>(&self, node: &T) -> Result<IpldCid> {
        let data = serde_ipld_dagcbor::to_vec(node).map_err(InterchangeError::serialization)?;
        self.store.put(&data).await
    }

    pub(crate) async fn load_node<T: DeserializeOwned>(
        &self,
        cid: &IpldCid,
        kind: &str,
        what: &str,
    ) -> Result<T> {
        let data = storage::get_required(&self.store, cid).await?;
        decode_tagged(&data, cid, kind, what)
    }
}

/// Decode `data` as the node type tagged `kind`
fn decode_tagged<T: DeserializeOwned>(
    data: &[u8],
    cid: &IpldCid,
    kind: &str,
    what: &str,
) -> Result<T> {
    let header: NodeHeader = serde_ipld_dagcbor::from_slice(data)
        .map_err(|_| InterchangeError::invalid_node(what, cid))?;
    if header.kind != kind {
        return Err(InterchangeError::invalid_node(what, cid));
    }
    serde_ipld_dagcbor::from_slice(data).map_err(InterchangeError::serialization)
}

/// Load a Row-Chunk and check it against the schema its parent declares
///
/// A missing chunk is a dangling reference: the parent node links to it.
pub(crate) async fn load_chunk<S: BlockStore>(
    store: &S,
    cid: &IpldCid,
    schema: &Arc<Schema>,
) -> Result<Table> {
    let data = store
        .get(cid)
        .await?
        .ok_or_else(|| InterchangeError::dangling(cid))?;
    let node: RowChunkNode = decode_tagged(&data, cid, ROW_CHUNK_NODE, "row chunk")?;

    if node.schema != **schema {
        return Err(InterchangeError::schema_mismatch(format!(
            "chunk {} schema disagrees with its root",
            cid
        )));
    }

    let table = Table::try_new(Arc::clone(schema), node.columns)
        .map_err(|e| InterchangeError::schema_mismatch(format!("chunk {}: {}", cid, e)))?;
    if table.num_rows() as u64 != node.num_rows {
        return Err(InterchangeError::schema_mismatch(format!(
            "chunk {} declares {} rows, holds {}",
            cid,
            node.num_rows,
            table.num_rows()
        )));
    }

    Ok(table)
}

/// DAG-CBOR has no encoding for NaN or infinities
fn check_finite(chunk: &Table) -> Result<()> {
    for (field, column) in chunk.schema().fields().iter().zip(chunk.columns()) {
        if let Column::Float64(cells) = column {
            if cells.iter().flatten().any(|x| !x.is_finite()) {
                return Err(InterchangeError::new(
                    InterchangeErrorKind::Serialization,
                    Some(format!("column {} holds a non-finite float", field.name).into()),
                )
                .with_help("DAG-CBOR cannot represent NaN or infinite floats"));
            }
        }
    }
    Ok(())
}

fn resolve_hash_columns(schema: &Schema, names: &[&str]) -> Result<Vec<usize>> {
    names
        .iter()
        .map(|name| {
            schema
                .index_of(name)
                .ok_or_else(|| InterchangeError::from(TableError::UnknownColumn(name.to_string())))
        })
        .collect()
}
