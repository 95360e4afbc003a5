//! Heap-resident block store

use crate::block::compute_cid;
use crate::error::Result;
use crate::storage::{BlockStore, ScratchStore};
use bytes::Bytes;
use cid::Cid as IpldCid;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Blocks held in a shared, CID-ordered map
///
/// The default scratch store for whole-table conversions. Every block of the
/// dataset being converted stays resident until the store is dropped; use
/// [`SpoolBlockStore`](super::SpoolBlockStore) when that is too much.
///
/// Clones share one map.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlockStore {
    blocks: Arc<RwLock<BTreeMap<IpldCid, Bytes>>>,
}

impl MemoryBlockStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with already-addressed blocks, e.g. the output of
    /// [`read_car`](crate::car::read_car)
    pub fn new_from_blocks(blocks: BTreeMap<IpldCid, Bytes>) -> Self {
        Self {
            blocks: Arc::new(RwLock::new(blocks)),
        }
    }

    /// Number of resident blocks
    pub fn len(&self) -> usize {
        self.blocks.read().unwrap().len()
    }

    /// True when no blocks are resident
    pub fn is_empty(&self) -> bool {
        self.blocks.read().unwrap().is_empty()
    }

    /// Drop every block
    pub fn clear(&self) {
        self.blocks.write().unwrap().clear();
    }

    /// Drop one block; false if it was not resident
    pub fn remove(&self, cid: &IpldCid) -> bool {
        self.blocks.write().unwrap().remove(cid).is_some()
    }
}

impl ScratchStore for MemoryBlockStore {
    fn scratch() -> Result<Self> {
        Ok(Self::new())
    }
}

impl BlockStore for MemoryBlockStore {
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        Ok(self.blocks.read().unwrap().get(cid).cloned())
    }

    async fn put(&self, data: &[u8]) -> Result<IpldCid> {
        let cid = compute_cid(data)?;
        // identical chunks from different tables share one entry
        self.blocks
            .write()
            .unwrap()
            .entry(cid)
            .or_insert_with(|| Bytes::copy_from_slice(data));
        Ok(cid)
    }

    async fn has(&self, cid: &IpldCid) -> Result<bool> {
        Ok(self.blocks.read().unwrap().contains_key(cid))
    }

    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send,
    ) -> Result<()> {
        self.blocks.write().unwrap().extend(blocks);
        Ok(())
    }

    async fn get_many(&self, cids: &[IpldCid]) -> Result<Vec<Option<Bytes>>> {
        let blocks = self.blocks.read().unwrap();
        Ok(cids.iter().map(|cid| blocks.get(cid).cloned()).collect())
    }
}
