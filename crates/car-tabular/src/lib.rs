//! Tabular data <-> content-addressed CAR archives
//!
//! This crate converts tables (in memory or in Parquet files) into
//! self-contained IPLD archives and back:
//!
//! - **Blocks**: DAG-CBOR payloads addressed by CIDv1 / SHA2-256
//! - **Storage**: Pluggable block storage with in-memory and disk-spooled implementations
//! - **CAR I/O**: Closure-checked import and export of CAR files
//! - **Datasets**: Tables as row chunks under a table root, or under a streaming marker for
//!   bounded-memory conversion
//! - **Interchange**: The public conversions, with path confinement and a JSON fallback
//!   when the archive codec is unavailable
//!
//! # Design Philosophy
//!
//! - One concrete [`Table`] type shared by every codec
//! - Identical data yields identical root CIDs
//! - Chunk order is row order, on the way out and the way back
//! - The root block is always written last
//!
//! # Example
//!
//! ```rust,ignore
//! use car_tabular::{Column, DataInterchange, InterchangeConfig, Table};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let interchange = DataInterchange::new(InterchangeConfig::from_env())?;
//!
//! let table = Table::from_columns([
//!     ("id", Column::Int64(vec![Some(1), Some(2), Some(3)])),
//!     ("value", Column::Float64(vec![Some(1.5), Some(2.5), Some(3.5)])),
//! ])?;
//!
//! let id = interchange.export_table_to_car(&table, "out/table.car", &["id"]).await?;
//! println!("exported {}", id);
//!
//! let restored = interchange.import_table_from_car("out/table.car").await?;
//! assert_eq!(restored.num_rows(), 3);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

/// CID computation and block verification
pub mod block;
/// CAR (Content Addressable aRchive) utilities
pub mod car;
/// Parquet reading and writing
pub mod columnar;
pub mod dataset;
pub mod error;
pub mod interchange;
/// Block storage abstraction
pub mod storage;
pub mod table;

pub use dataset::{ChunkStream, DatasetSerializer};
pub use error::{InterchangeError, InterchangeErrorKind, Result};
pub use interchange::{
    CodecAvailability, ConversionId, DataInterchange, FALLBACK_SENTINEL, InterchangeConfig,
};
pub use storage::{BlockStore, MemoryBlockStore, ScratchStore, SpoolBlockStore};
pub use table::{Column, DataType, Field, Schema, Table, Value};

/// DAG-CBOR codec identifier for CIDs (0x71)
pub const DAG_CBOR_CID_CODEC: u64 = 0x71;
