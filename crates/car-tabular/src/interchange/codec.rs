//! Codec strategies selected once per orchestrator

use std::path::Path;

use cid::Cid as IpldCid;

use super::config::CodecAvailability;
use super::json::JsonFallbackCodec;
use crate::car::{export_to_car, import_from_car};
use crate::dataset::DatasetSerializer;
use crate::error::{InterchangeError, InterchangeErrorKind, Result};
use crate::storage::BlockStore;
use crate::table::Table;

/// The strategy a [`DataInterchange`](super::DataInterchange) converts with
#[derive(Debug, Clone, Copy)]
pub enum Codec {
    /// Content-addressed CAR archives
    Real(RealCodec),
    /// JSON row files with no content addressing
    JsonFallback(JsonFallbackCodec),
}

impl Codec {
    /// Pick the strategy for `availability`
    pub fn select(availability: CodecAvailability) -> Self {
        match availability {
            CodecAvailability::Available => Codec::Real(RealCodec),
            CodecAvailability::Unavailable => Codec::JsonFallback(JsonFallbackCodec),
        }
    }

    /// The real codec, or `MissingCodec` for operations with no fallback
    pub fn real(&self, operation: &str) -> Result<&RealCodec> {
        match self {
            Codec::Real(codec) => Ok(codec),
            Codec::JsonFallback(_) => Err(InterchangeError::missing_codec(operation)),
        }
    }

    /// True in degraded mode
    pub fn is_fallback(&self) -> bool {
        matches!(self, Codec::JsonFallback(_))
    }
}

/// Tables as DAG-CBOR block graphs in CAR archives
#[derive(Debug, Clone, Copy, Default)]
pub struct RealCodec;

impl RealCodec {
    /// Serialize `table` and export its closure to a CAR file at `path`
    pub async fn export_table<S: BlockStore + Sync>(
        &self,
        serializer: &DatasetSerializer<S>,
        table: &Table,
        path: &Path,
        hash_columns: &[&str],
    ) -> Result<IpldCid> {
        let root = serializer.serialize_table(table, hash_columns).await?;
        export_to_car(serializer.store(), &[root], path).await?;
        Ok(root)
    }

    /// Import a CAR file and decode the first root that is a table
    ///
    /// Roots that are not Table Root Nodes are skipped; any other failure
    /// stops the search.
    pub async fn import_table<S: BlockStore + Sync>(
        &self,
        serializer: &DatasetSerializer<S>,
        path: &Path,
    ) -> Result<Table> {
        let roots = import_from_car(serializer.store(), path).await?;
        for root in &roots {
            match serializer.deserialize_table(root).await {
                Ok(table) => return Ok(table),
                Err(e) if e.kind() == &InterchangeErrorKind::InvalidNode => {
                    tracing::debug!(%root, "skipping root that is not a table");
                }
                Err(e) => return Err(e),
            }
        }
        Err(InterchangeError::not_found("table", path.display()))
    }
}
