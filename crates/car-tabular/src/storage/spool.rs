//! Disk-spooled block storage
//!
//! Block bytes are appended to an anonymous temporary file; only the
//! CID -> (offset, length) index lives in memory. This keeps streaming
//! conversions bounded in memory no matter how many chunks they produce.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use cid::Cid as IpldCid;

use crate::block::compute_cid;
use crate::error::{InterchangeError, Result};
use crate::storage::{BlockStore, ScratchStore};

/// Location of a block inside the spool file
#[derive(Debug, Clone, Copy)]
struct Extent {
    offset: u64,
    len: u64,
}

#[derive(Debug)]
struct Spool {
    file: File,
    index: HashMap<IpldCid, Extent>,
    end: u64,
}

impl Spool {
    fn append(&mut self, cid: IpldCid, data: &[u8]) -> Result<()> {
        if self.index.contains_key(&cid) {
            return Ok(());
        }

        self.file
            .seek(SeekFrom::Start(self.end))
            .map_err(InterchangeError::io)?;
        self.file.write_all(data).map_err(InterchangeError::io)?;

        let len = data.len() as u64;
        self.index.insert(
            cid,
            Extent {
                offset: self.end,
                len,
            },
        );
        self.end += len;
        Ok(())
    }

    fn read(&mut self, cid: &IpldCid) -> Result<Option<Bytes>> {
        let Some(extent) = self.index.get(cid).copied() else {
            return Ok(None);
        };

        self.file
            .seek(SeekFrom::Start(extent.offset))
            .map_err(InterchangeError::io)?;
        let mut buf = vec![0u8; extent.len as usize];
        self.file.read_exact(&mut buf).map_err(InterchangeError::io)?;
        Ok(Some(Bytes::from(buf)))
    }
}

/// Block storage backed by a temporary spool file
///
/// The spool file is unlinked on creation and reclaimed by the OS when the
/// last clone is dropped.
#[derive(Debug, Clone)]
pub struct SpoolBlockStore {
    inner: Arc<Mutex<Spool>>,
}

impl SpoolBlockStore {
    /// Create a spool in the system temporary directory
    pub fn new() -> Result<Self> {
        let file = tempfile::tempfile().map_err(InterchangeError::io)?;
        Ok(Self::from_file(file))
    }

    /// Create a spool inside `dir`
    pub fn new_in(dir: impl AsRef<Path>) -> Result<Self> {
        let file = tempfile::tempfile_in(dir).map_err(InterchangeError::io)?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: File) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Spool {
                file,
                index: HashMap::new(),
                end: 0,
            })),
        }
    }

    /// Get number of blocks stored
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().index.len()
    }

    /// Check if store is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().index.is_empty()
    }

    /// Total bytes spooled to disk
    pub fn spooled_bytes(&self) -> u64 {
        self.inner.lock().unwrap().end
    }
}

impl ScratchStore for SpoolBlockStore {
    fn scratch() -> Result<Self> {
        Self::new()
    }
}

impl BlockStore for SpoolBlockStore {
    async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
        self.inner.lock().unwrap().read(cid)
    }

    async fn put(&self, data: &[u8]) -> Result<IpldCid> {
        let cid = compute_cid(data)?;
        self.inner.lock().unwrap().append(cid, data)?;
        Ok(cid)
    }

    async fn has(&self, cid: &IpldCid) -> Result<bool> {
        Ok(self.inner.lock().unwrap().index.contains_key(cid))
    }

    async fn put_many(
        &self,
        blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send,
    ) -> Result<()> {
        let mut spool = self.inner.lock().unwrap();
        for (cid, data) in blocks {
            spool.append(cid, &data)?;
        }
        Ok(())
    }

    async fn get_many(&self, cids: &[IpldCid]) -> Result<Vec<Option<Bytes>>> {
        let mut spool = self.inner.lock().unwrap();
        let mut results = Vec::with_capacity(cids.len());
        for cid in cids {
            results.push(spool.read(cid)?);
        }
        Ok(results)
    }
}
