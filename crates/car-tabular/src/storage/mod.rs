//! Block storage abstraction for dataset nodes and row chunks

use crate::block;
use crate::error::{InterchangeError, Result};
use bytes::Bytes;
use cid::Cid as IpldCid;
use ipld_core::ipld::Ipld;

/// Async block storage trait
///
/// Provides CID-keyed storage for table roots, streaming markers and row
/// chunks. Implementations:
/// - In-memory BTreeMap ([`MemoryBlockStore`])
/// - Disk spool with an in-memory offset index ([`SpoolBlockStore`])
///
/// Clone is required so the serializer and lazy chunk readers can share one
/// store. Clones must observe each other's writes.
///
/// # Example
///
/// ```rust,ignore
/// use car_tabular::storage::{BlockStore, MemoryBlockStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = MemoryBlockStore::new();
///
/// let cid = storage.put(b"hello world").await?;
/// assert!(storage.has(&cid).await?);
/// # Ok(())
/// # }
/// ```
#[trait_variant::make(Send)]
pub trait BlockStore: Clone {
    /// Get a block by CID
    ///
    /// Returns `None` if the block is not found.
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>>;

    /// Put a block, return its CID
    ///
    /// The CID is calculated from the data using SHA-256 hash and DAG-CBOR codec.
    /// Putting the same bytes twice returns the same CID and stores one copy.
    async fn put(&self, data: &[u8]) -> Result<IpldCid>;

    /// Check if a block exists without retrieving it
    async fn has(&self, cid: &IpldCid) -> Result<bool>;

    /// Put many blocks with pre-computed CIDs
    ///
    /// Used when registering blocks read from an archive, whose CIDs may use
    /// codecs other than DAG-CBOR. Callers verify the CIDs first.
    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send,
    ) -> Result<()>;

    /// Get multiple blocks at once
    ///
    /// Returns a vec of the same length as the input, with `None` for missing blocks.
    async fn get_many(&self, cids: &[IpldCid]) -> Result<Vec<Option<Bytes>>>;
}

/// A block store that can be opened empty on demand
///
/// The orchestrator opens one per conversion and drops it when the call
/// returns, so no blocks outlive the call that produced them.
pub trait ScratchStore: BlockStore + Sized {
    /// Open a new, empty store
    fn scratch() -> Result<Self>;
}

/// Get a block, failing with `NotFound` if it is absent
pub async fn get_required<S: BlockStore>(store: &S, cid: &IpldCid) -> Result<Bytes> {
    store
        .get(cid)
        .await?
        .ok_or_else(|| InterchangeError::not_found("block", cid))
}

/// Get a block and decode it as a generic IPLD value
///
/// Used to inspect root and marker nodes without knowing their shape.
pub async fn get_ipld<S: BlockStore>(store: &S, cid: &IpldCid) -> Result<Ipld> {
    let data = get_required(store, cid).await?;
    block::decode_ipld(&data)
}

pub mod memory;
pub mod spool;

pub use memory::MemoryBlockStore;
pub use spool::SpoolBlockStore;
