//! CAR file writing utilities
//!
//! Provides functions for writing blocks to CAR (Content Addressable aRchive) files.

use crate::car::reader::resolve_closure;
use crate::error::{InterchangeError, Result};
use crate::storage::BlockStore;
use bytes::Bytes;
use cid::Cid as IpldCid;
use iroh_car::CarWriter;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs::File;

/// Write blocks to CAR file
///
/// Blocks are written in sorted CID order (BTreeMap) for determinism.
/// No closure check is made; prefer [`export_to_car`] for store contents.
pub async fn write_car(
    path: impl AsRef<Path>,
    roots: Vec<IpldCid>,
    blocks: BTreeMap<IpldCid, Bytes>,
) -> Result<()> {
    let file = File::create(path).await.map_err(InterchangeError::io)?;

    let header = iroh_car::CarHeader::new_v1(roots);
    let mut writer = CarWriter::new(header, file);

    for (cid, data) in blocks {
        writer
            .write(cid, data.as_ref())
            .await
            .map_err(InterchangeError::io)?;
    }

    writer.finish().await.map_err(InterchangeError::io)?;

    Ok(())
}

/// Export the blocks reachable from `roots` to a CAR file
///
/// The closure is resolved before the file is created, so a dangling
/// reference leaves no partial archive behind. Blocks are then streamed from
/// the store one at a time. Returns the number of blocks written.
#[tracing::instrument(level = "debug", skip_all, fields(path = %path.display(), roots = roots.len()))]
pub async fn export_to_car<S: BlockStore>(
    store: &S,
    roots: &[IpldCid],
    path: &Path,
) -> Result<usize> {
    if roots.is_empty() {
        return Err(InterchangeError::invalid_input(
            "a CAR archive needs at least one root",
        ));
    }

    let order = resolve_closure(store, roots).await?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(InterchangeError::io)?;
        }
    }

    let file = File::create(path).await.map_err(InterchangeError::io)?;
    let header = iroh_car::CarHeader::new_v1(roots.to_vec());
    let mut writer = CarWriter::new(header, file);

    for cid in &order {
        let data = store
            .get(cid)
            .await?
            .ok_or_else(|| InterchangeError::dangling(cid))?;
        writer
            .write(*cid, data.as_ref())
            .await
            .map_err(InterchangeError::io)?;
    }

    writer.finish().await.map_err(InterchangeError::io)?;

    tracing::debug!(blocks = order.len(), "exported CAR archive");
    Ok(order.len())
}
