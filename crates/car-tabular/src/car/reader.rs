//! CAR file reading utilities
//!
//! Streams archive blocks into a [`BlockStore`], verifying each block's hash
//! and the closure of the declared roots.

use crate::block;
use crate::error::{InterchangeError, Result};
use crate::storage::BlockStore;
use bytes::Bytes;
use cid::Cid as IpldCid;
use iroh_car::CarReader;
use n0_future::stream::StreamExt;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tokio::fs::File;

/// Blocks registered per `put_many` call while importing
const IMPORT_BATCH: usize = 256;

/// Read CAR file header (roots only)
///
/// Useful for checking roots without loading all blocks.
pub async fn read_car_header(path: impl AsRef<Path>) -> Result<Vec<IpldCid>> {
    let file = File::open(path).await.map_err(InterchangeError::io)?;

    let reader = CarReader::new(file)
        .await
        .map_err(InterchangeError::malformed)?;

    Ok(reader.header().roots().to_vec())
}

/// Read entire CAR file into memory
///
/// Returns BTreeMap of CID -> block data (sorted order for determinism).
/// Blocks are not hash-verified; use [`import_from_car`] for untrusted input.
pub async fn read_car(path: impl AsRef<Path>) -> Result<BTreeMap<IpldCid, Bytes>> {
    let file = File::open(path).await.map_err(InterchangeError::io)?;

    let reader = CarReader::new(file)
        .await
        .map_err(InterchangeError::malformed)?;

    let mut blocks = BTreeMap::new();
    let stream = reader.stream();
    n0_future::pin!(stream);

    while let Some(result) = stream.next().await {
        let (cid, data) = result.map_err(InterchangeError::malformed)?;
        blocks.insert(cid, Bytes::from(data));
    }

    Ok(blocks)
}

/// Import a CAR file into `store`
///
/// Every block is hash-verified before it is registered. Once all blocks are
/// in, the transitive closure of each declared root is checked against the
/// archive's own blocks; a block the archive lacks is a `DanglingReference`
/// error even if `store` already holds it. Returns the roots in header order.
#[tracing::instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn import_from_car<S: BlockStore>(store: &S, path: &Path) -> Result<Vec<IpldCid>> {
    let file = File::open(path).await.map_err(InterchangeError::io)?;

    let reader = CarReader::new(file)
        .await
        .map_err(InterchangeError::malformed)?;

    let roots = reader.header().roots().to_vec();
    if roots.is_empty() {
        return Err(InterchangeError::malformed_msg("CAR file has no roots"));
    }

    let stream = reader.stream();
    n0_future::pin!(stream);

    let mut pending = Vec::with_capacity(IMPORT_BATCH);
    let mut contained = HashSet::new();
    while let Some(result) = stream.next().await {
        let (cid, data) = result.map_err(InterchangeError::malformed)?;
        block::verify_block(&cid, &data)?;
        contained.insert(cid);
        pending.push((cid, Bytes::from(data)));

        if pending.len() == IMPORT_BATCH {
            store.put_many(std::mem::take(&mut pending)).await?;
        }
    }
    store.put_many(pending).await?;

    walk(store, &roots, Some(&contained)).await?;

    tracing::debug!(
        blocks = contained.len(),
        roots = roots.len(),
        "imported CAR archive"
    );
    Ok(roots)
}

/// Resolve every block reachable from `roots`
///
/// Returns the CIDs in depth-first pre-order, roots first and in declared
/// order, each CID once. Fails with `DanglingReference` if any reachable
/// block is missing from `store`.
pub async fn resolve_closure<S: BlockStore>(store: &S, roots: &[IpldCid]) -> Result<Vec<IpldCid>> {
    walk(store, roots, None).await
}

/// Closure walk; with `within`, blocks outside that set count as missing
async fn walk<S: BlockStore>(
    store: &S,
    roots: &[IpldCid],
    within: Option<&HashSet<IpldCid>>,
) -> Result<Vec<IpldCid>> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut stack: Vec<IpldCid> = roots.iter().rev().copied().collect();

    while let Some(cid) = stack.pop() {
        if !seen.insert(cid) {
            continue;
        }
        order.push(cid);

        if within.is_some_and(|set| !set.contains(&cid)) {
            return Err(InterchangeError::dangling(cid));
        }
        let data = store
            .get(&cid)
            .await?
            .ok_or_else(|| InterchangeError::dangling(cid))?;

        for link in block::links(&cid, &data)?.into_iter().rev() {
            if !seen.contains(&link) {
                stack.push(link);
            }
        }
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::writer::write_car;
    use crate::error::InterchangeErrorKind;
    use crate::storage::MemoryBlockStore;
    use ipld_core::ipld::Ipld;
    use iroh_car::CarWriter;
    use tempfile::TempDir;

    fn node_with_links(links: Vec<IpldCid>) -> Vec<u8> {
        let mut map = std::collections::BTreeMap::new();
        map.insert(
            "chunks".to_string(),
            Ipld::List(links.into_iter().map(Ipld::Link).collect()),
        );
        serde_ipld_dagcbor::to_vec(&Ipld::Map(map)).unwrap()
    }

    #[tokio::test]
    async fn test_import_registers_blocks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ok.car");

        let leaf = node_with_links(vec![]);
        let leaf_cid = block::compute_cid(&leaf).unwrap();
        let root = node_with_links(vec![leaf_cid]);
        let root_cid = block::compute_cid(&root).unwrap();

        let mut blocks = BTreeMap::new();
        blocks.insert(root_cid, Bytes::from(root));
        blocks.insert(leaf_cid, Bytes::from(leaf));
        write_car(&path, vec![root_cid], blocks).await.unwrap();

        let store = MemoryBlockStore::new();
        let roots = import_from_car(&store, &path).await.unwrap();

        assert_eq!(roots, vec![root_cid]);
        assert_eq!(store.len(), 2);
        assert_eq!(read_car_header(&path).await.unwrap(), vec![root_cid]);
    }

    #[tokio::test]
    async fn test_import_missing_child_is_dangling() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("truncated.car");

        let leaf_cid = block::compute_cid(&node_with_links(vec![])).unwrap();
        let root = node_with_links(vec![leaf_cid]);
        let root_cid = block::compute_cid(&root).unwrap();

        let mut blocks = BTreeMap::new();
        blocks.insert(root_cid, Bytes::from(root));
        write_car(&path, vec![root_cid], blocks).await.unwrap();

        let store = MemoryBlockStore::new();
        let err = import_from_car(&store, &path).await.unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::DanglingReference);
    }

    #[tokio::test]
    async fn test_import_ignores_blocks_already_in_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.car");

        let leaf = node_with_links(vec![]);
        let leaf_cid = block::compute_cid(&leaf).unwrap();
        let root = node_with_links(vec![leaf_cid]);
        let root_cid = block::compute_cid(&root).unwrap();

        let mut blocks = BTreeMap::new();
        blocks.insert(root_cid, Bytes::from(root));
        write_car(&path, vec![root_cid], blocks).await.unwrap();

        let store = MemoryBlockStore::new();
        store.put(&leaf).await.unwrap();
        let err = import_from_car(&store, &path).await.unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::DanglingReference);
    }

    #[tokio::test]
    async fn test_import_checksum_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tampered.car");

        let cid = block::compute_cid(b"original").unwrap();
        let mut blocks = BTreeMap::new();
        blocks.insert(cid, Bytes::from_static(b"tampered"));
        write_car(&path, vec![cid], blocks).await.unwrap();

        let store = MemoryBlockStore::new();
        let err = import_from_car(&store, &path).await.unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::MalformedArchive);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_import_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.car");
        tokio::fs::write(&path, b"this is not a car file at all")
            .await
            .unwrap();

        let store = MemoryBlockStore::new();
        let err = import_from_car(&store, &path).await.unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::MalformedArchive);
    }

    #[tokio::test]
    async fn test_import_rejects_truncated_block() {
        let cid = block::compute_cid(b"a block long enough to cut").unwrap();
        let mut buf = Vec::new();
        let mut writer = CarWriter::new(iroh_car::CarHeader::new_v1(vec![cid]), &mut buf);
        writer.write(cid, b"a block long enough to cut").await.unwrap();
        writer.finish().await.unwrap();
        buf.truncate(buf.len() - 5);

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cut.car");
        tokio::fs::write(&path, &buf).await.unwrap();

        let store = MemoryBlockStore::new();
        let err = import_from_car(&store, &path).await.unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::MalformedArchive);
    }
}
