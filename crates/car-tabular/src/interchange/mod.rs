//! The public conversion surface
//!
//! [`DataInterchange`] holds the conversion settings and a path guard, and
//! exposes the six conversions:
//!
//! | operation                 | from           | to            |
//! |---------------------------|----------------|---------------|
//! | `export_table_to_car`     | [`Table`]      | CAR (or JSON) |
//! | `import_table_from_car`   | CAR (or JSON)  | [`Table`]     |
//! | `parquet_to_car`          | Parquet        | CAR           |
//! | `car_to_parquet`          | CAR            | Parquet       |
//! | `stream_parquet_to_car`   | Parquet        | CAR, chunked  |
//! | `stream_car_to_parquet`   | CAR, chunked   | Parquet       |
//!
//! Every path argument, CAR or Parquet, is checked against the safe root
//! before any file is touched. Blocks live in a scratch store opened per
//! call; nothing is retained between conversions.
//!
//! # Example
//!
//! ```ignore
//! use car_tabular::interchange::{DataInterchange, InterchangeConfig};
//!
//! let interchange = DataInterchange::new(InterchangeConfig::new().safe_root("/work").build())?;
//! let id = interchange
//!     .export_table_to_car(&table, "/work/out/table.car", &["id"])
//!     .await?;
//! let restored = interchange.import_table_from_car("/work/out/table.car").await?;
//! ```

pub mod codec;
pub mod config;
pub mod json;
pub mod path;

use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cid::Cid as IpldCid;

pub use codec::{Codec, RealCodec};
pub use config::{CodecAvailability, InterchangeConfig, SAFE_ROOT_ENV};
pub use json::JsonFallbackCodec;
pub use path::PathGuard;

use crate::car::{export_to_car, import_from_car};
use crate::columnar::{ParquetBatchReader, ParquetStreamWriter, read_parquet, write_parquet};
use crate::dataset::{ChunkStream, DatasetSerializer};
use crate::error::{InterchangeError, InterchangeErrorKind, Result};
use crate::storage::{BlockStore, MemoryBlockStore, ScratchStore, SpoolBlockStore};
use crate::table::Table;

/// Reserved identifier returned by degraded-mode exports
///
/// Not a parseable CID.
pub const FALLBACK_SENTINEL: &str = "json-fallback:unaddressed";

/// Identifier returned by a table export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionId {
    /// Root CID of the exported archive
    Cid(IpldCid),
    /// The file holds JSON rows and has no content address
    JsonFallback,
}

impl ConversionId {
    /// The root CID, if the export was content-addressed
    pub fn cid(&self) -> Option<&IpldCid> {
        match self {
            ConversionId::Cid(cid) => Some(cid),
            ConversionId::JsonFallback => None,
        }
    }

    /// True for [`ConversionId::JsonFallback`]
    pub fn is_fallback(&self) -> bool {
        matches!(self, ConversionId::JsonFallback)
    }
}

impl fmt::Display for ConversionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionId::Cid(cid) => write!(f, "{}", cid),
            ConversionId::JsonFallback => f.write_str(FALLBACK_SENTINEL),
        }
    }
}

/// Conversion orchestrator
///
/// Holds configuration only. Each conversion opens its own scratch store of
/// type `S` and drops it on return, successful or not, so memory use is
/// bounded by the dataset of the current call. Choose
/// [`SpoolBlockStore`] via [`DataInterchange::spooled`] to keep even that on
/// disk.
#[derive(Debug, Clone)]
pub struct DataInterchange<S = MemoryBlockStore> {
    chunk_rows: usize,
    codec: Codec,
    guard: PathGuard,
    store: PhantomData<fn() -> S>,
}

impl DataInterchange<MemoryBlockStore> {
    /// Orchestrator converting through in-memory scratch stores
    pub fn new(config: InterchangeConfig) -> Result<Self> {
        Self::with_scratch(config)
    }
}

impl DataInterchange<SpoolBlockStore> {
    /// Orchestrator converting through disk spools, for datasets larger than memory
    pub fn spooled(config: InterchangeConfig) -> Result<Self> {
        Self::with_scratch(config)
    }
}

impl<S: ScratchStore + Sync> DataInterchange<S> {
    /// Orchestrator converting through scratch stores of type `S`
    pub fn with_scratch(config: InterchangeConfig) -> Result<Self> {
        let guard = PathGuard::new(config.safe_root.as_deref())?;
        let codec = Codec::select(config.codec);
        let chunk_rows = config.chunk_rows.max(1);
        tracing::debug!(
            safe_root = %guard.root().display(),
            chunk_rows,
            fallback = codec.is_fallback(),
            "created data interchange"
        );
        Ok(Self {
            chunk_rows,
            codec,
            guard,
            store: PhantomData,
        })
    }

    /// Maximum rows per Row-Chunk
    pub fn chunk_rows(&self) -> usize {
        self.chunk_rows
    }

    /// The selected codec
    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Canonical safe root
    pub fn safe_root(&self) -> &Path {
        self.guard.root()
    }

    /// Serializer over a new scratch store, dropped with it
    fn scratch(&self) -> Result<DatasetSerializer<S>> {
        Ok(DatasetSerializer::with_chunk_rows(S::scratch()?, self.chunk_rows))
    }

    /// Export `table` to `output_path`
    ///
    /// Returns the root CID, or [`ConversionId::JsonFallback`] when the codec
    /// is unavailable and the file holds JSON rows instead.
    #[tracing::instrument(level = "debug", skip_all, fields(path = %output_path.as_ref().display()))]
    pub async fn export_table_to_car(
        &self,
        table: &Table,
        output_path: impl AsRef<Path>,
        hash_columns: &[&str],
    ) -> Result<ConversionId> {
        let path = self.guard.check(output_path.as_ref())?;

        match &self.codec {
            Codec::Real(codec) => {
                let root = codec
                    .export_table(&self.scratch()?, table, &path, hash_columns)
                    .await?;
                tracing::info!(%root, rows = table.num_rows(), "exported table");
                Ok(ConversionId::Cid(root))
            }
            Codec::JsonFallback(codec) => {
                tracing::warn!(
                    path = %path.display(),
                    "archive codec unavailable, writing JSON fallback"
                );
                codec.write_table(table, &path).await?;
                Ok(ConversionId::JsonFallback)
            }
        }
    }

    /// Import the table stored at `car_path`
    ///
    /// JSON fallback files are recognized by content and decoded without the
    /// archive codec. Archives try each declared root in order and fail with
    /// `NotFound` if none is a table.
    #[tracing::instrument(level = "debug", skip_all, fields(path = %car_path.as_ref().display()))]
    pub async fn import_table_from_car(&self, car_path: impl AsRef<Path>) -> Result<Table> {
        let path = self.guard.check(car_path.as_ref())?;
        self.read_table(&path, "import_table_from_car").await
    }

    /// Convert a Parquet file into a CAR archive; returns the root CID
    #[tracing::instrument(level = "debug", skip_all, fields(
        parquet = %parquet_path.as_ref().display(),
        car = %car_path.as_ref().display(),
    ))]
    pub async fn parquet_to_car(
        &self,
        parquet_path: impl AsRef<Path>,
        car_path: impl AsRef<Path>,
        hash_columns: &[&str],
    ) -> Result<IpldCid> {
        let codec = self.codec.real("parquet_to_car")?;
        let car = self.guard.check(car_path.as_ref())?;
        let parquet = self.guard.check(parquet_path.as_ref())?;

        let table = read_parquet(&parquet)?;
        let root = codec
            .export_table(&self.scratch()?, &table, &car, hash_columns)
            .await?;
        tracing::info!(%root, rows = table.num_rows(), "converted parquet to CAR");
        Ok(root)
    }

    /// Convert a CAR archive into a Parquet file; returns the resolved Parquet path
    #[tracing::instrument(level = "debug", skip_all, fields(
        car = %car_path.as_ref().display(),
        parquet = %parquet_path.as_ref().display(),
    ))]
    pub async fn car_to_parquet(
        &self,
        car_path: impl AsRef<Path>,
        parquet_path: impl AsRef<Path>,
    ) -> Result<PathBuf> {
        self.codec.real("car_to_parquet")?;
        let car = self.guard.check(car_path.as_ref())?;
        let parquet = self.guard.check(parquet_path.as_ref())?;

        let table = self.read_table(&car, "car_to_parquet").await?;
        write_parquet(&table, &parquet)?;
        tracing::info!(rows = table.num_rows(), "converted CAR to parquet");
        Ok(parquet)
    }

    /// Stream a Parquet file into a chunked CAR archive; returns the marker CID
    ///
    /// The file is read `batch_size` rows at a time and each batch is
    /// committed before the next is read.
    #[tracing::instrument(level = "debug", skip_all, fields(
        parquet = %parquet_path.as_ref().display(),
        car = %car_path.as_ref().display(),
        batch_size = batch_size,
    ))]
    pub async fn stream_parquet_to_car(
        &self,
        parquet_path: impl AsRef<Path>,
        car_path: impl AsRef<Path>,
        batch_size: usize,
    ) -> Result<IpldCid> {
        self.codec.real("stream_parquet_to_car")?;
        let car = self.guard.check(car_path.as_ref())?;
        let parquet = self.guard.check(parquet_path.as_ref())?;

        let serializer = self.scratch()?;
        let batches = ParquetBatchReader::open(&parquet, batch_size)?;
        let root = serializer.serialize_streaming(batches).await?;
        let blocks = export_to_car(serializer.store(), &[root], &car).await?;
        tracing::info!(%root, blocks, "streamed parquet to CAR");
        Ok(root)
    }

    /// Stream a chunked CAR archive into a Parquet file; returns the resolved Parquet path
    ///
    /// The first declared root that is a Streaming Dataset Marker Node is
    /// used. Chunks are read one at a time and re-cut into row groups of
    /// `batch_size` rows.
    #[tracing::instrument(level = "debug", skip_all, fields(
        car = %car_path.as_ref().display(),
        parquet = %parquet_path.as_ref().display(),
        batch_size = batch_size,
    ))]
    pub async fn stream_car_to_parquet(
        &self,
        car_path: impl AsRef<Path>,
        parquet_path: impl AsRef<Path>,
        batch_size: usize,
    ) -> Result<PathBuf> {
        self.codec.real("stream_car_to_parquet")?;
        if batch_size == 0 {
            return Err(InterchangeError::invalid_input("batch size must be at least 1"));
        }
        let car = self.guard.check(car_path.as_ref())?;
        let parquet = self.guard.check(parquet_path.as_ref())?;

        let mut stream = self.find_stream(&car).await?;
        let schema = stream.schema().cloned().ok_or_else(|| {
            InterchangeError::parquet_msg("streaming dataset is empty and declares no schema")
        })?;

        let writer = ParquetStreamWriter::create(&parquet, schema)?;
        let written = rebatch_into(&mut stream, writer, batch_size).await;

        match written {
            Ok(rows) => {
                tracing::info!(rows, "streamed CAR to parquet");
                Ok(parquet)
            }
            Err(e) => {
                if let Err(remove) = std::fs::remove_file(&parquet) {
                    tracing::warn!(path = %parquet.display(), error = %remove, "could not remove partial output");
                }
                Err(e)
            }
        }
    }

    async fn read_table(&self, path: &Path, operation: &str) -> Result<Table> {
        if json::is_fallback_file(path).await? {
            tracing::debug!(path = %path.display(), "reading JSON fallback file");
            return JsonFallbackCodec.read_table(path).await;
        }
        let codec = self.codec.real(operation)?;
        codec.import_table(&self.scratch()?, path).await
    }

    /// Import `path` into a scratch store and open its first streaming root
    ///
    /// The returned stream owns the scratch store.
    async fn find_stream(&self, path: &Path) -> Result<ChunkStream<S>> {
        let serializer = self.scratch()?;
        let roots = import_from_car(serializer.store(), path).await?;
        for root in &roots {
            match serializer.deserialize_streaming(root).await {
                Ok(stream) => return Ok(stream),
                Err(e) if e.kind() == &InterchangeErrorKind::InvalidNode => {
                    tracing::debug!(%root, "skipping root that is not a streaming dataset");
                }
                Err(e) => return Err(e),
            }
        }
        Err(InterchangeError::not_found("streaming dataset", path.display()))
    }
}

/// Drain `stream` into `writer`, re-cut into row groups of `batch_size` rows
async fn rebatch_into<S: BlockStore>(
    stream: &mut ChunkStream<S>,
    mut writer: ParquetStreamWriter,
    batch_size: usize,
) -> Result<u64> {
    let mut pending = Table::empty(Arc::clone(writer.schema()));
    while let Some(chunk) = stream.next().await? {
        pending.append(&chunk)?;
        let mut offset = 0;
        while pending.num_rows() - offset >= batch_size {
            writer.write_batch(&pending.slice(offset, batch_size))?;
            offset += batch_size;
        }
        if offset > 0 {
            pending = pending.slice(offset, pending.num_rows() - offset);
        }
    }
    writer.write_batch(&pending)?;
    writer.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;
    use bytes::Bytes;
    use parquet::file::reader::{FileReader, SerializedFileReader};
    use std::cell::{Cell, RefCell};
    use tempfile::TempDir;

    thread_local! {
        static LIVE_STORES: Cell<usize> = const { Cell::new(0) };
        static BLOCKS_AT_DROP: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
    }

    /// Records how many blocks a scratch store held when its last clone went away
    #[derive(Debug)]
    struct DropRecorder(MemoryBlockStore);

    impl Drop for DropRecorder {
        fn drop(&mut self) {
            LIVE_STORES.with(|live| live.set(live.get() - 1));
            BLOCKS_AT_DROP.with(|seen| seen.borrow_mut().push(self.0.len()));
        }
    }

    #[derive(Debug, Clone)]
    struct TrackedStore {
        blocks: MemoryBlockStore,
        _recorder: Arc<DropRecorder>,
    }

    impl ScratchStore for TrackedStore {
        fn scratch() -> Result<Self> {
            let blocks = MemoryBlockStore::new();
            LIVE_STORES.with(|live| live.set(live.get() + 1));
            Ok(Self {
                _recorder: Arc::new(DropRecorder(blocks.clone())),
                blocks,
            })
        }
    }

    impl BlockStore for TrackedStore {
        async fn get(&self, cid: &IpldCid) -> Result<Option<Bytes>> {
            self.blocks.get(cid).await
        }

        async fn put(&self, data: &[u8]) -> Result<IpldCid> {
            self.blocks.put(data).await
        }

        async fn has(&self, cid: &IpldCid) -> Result<bool> {
            self.blocks.has(cid).await
        }

        async fn put_many(
            &self,
            blocks: impl IntoIterator<Item = (IpldCid, Bytes)> + Send,
        ) -> Result<()> {
            self.blocks.put_many(blocks).await
        }

        async fn get_many(&self, cids: &[IpldCid]) -> Result<Vec<Option<Bytes>>> {
            self.blocks.get_many(cids).await
        }
    }

    fn interchange(dir: &TempDir, codec: CodecAvailability) -> DataInterchange {
        DataInterchange::new(
            InterchangeConfig::new()
                .safe_root(dir.path())
                .chunk_rows(3)
                .codec(codec)
                .build(),
        )
        .unwrap()
    }

    fn sample() -> Table {
        Table::from_columns([
            ("id", Column::Int64(vec![Some(1), Some(2), Some(3), Some(4)])),
            (
                "label",
                Column::Utf8(vec![Some("a".into()), None, Some("c".into()), Some("d".into())]),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_sentinel_is_not_a_cid() {
        assert_eq!(ConversionId::JsonFallback.to_string(), FALLBACK_SENTINEL);
        assert!(IpldCid::try_from(FALLBACK_SENTINEL).is_err());
        assert!(ConversionId::JsonFallback.cid().is_none());
    }

    #[tokio::test]
    async fn test_table_round_trip() {
        let dir = TempDir::new().unwrap();
        let interchange = interchange(&dir, CodecAvailability::Available);
        let path = dir.path().join("t.car");

        let id = interchange
            .export_table_to_car(&sample(), &path, &[])
            .await
            .unwrap();
        assert!(!id.is_fallback());
        assert_eq!(interchange.import_table_from_car(&path).await.unwrap(), sample());
    }

    #[tokio::test]
    async fn test_import_skips_non_table_roots() {
        let dir = TempDir::new().unwrap();
        let interchange = interchange(&dir, CodecAvailability::Available);
        let serializer = DatasetSerializer::new(MemoryBlockStore::new());

        let table_root = serializer.serialize_table(&sample(), &[]).await.unwrap();
        let marker = serializer
            .serialize_streaming(vec![Ok(sample())])
            .await
            .unwrap();

        let path = dir.path().join("multi.car");
        export_to_car(serializer.store(), &[marker, table_root], &path)
            .await
            .unwrap();
        assert_eq!(interchange.import_table_from_car(&path).await.unwrap(), sample());

        let only_marker = dir.path().join("marker.car");
        export_to_car(serializer.store(), &[marker], &only_marker)
            .await
            .unwrap();
        let err = interchange
            .import_table_from_car(&only_marker)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_no_streaming_root() {
        let dir = TempDir::new().unwrap();
        let interchange = interchange(&dir, CodecAvailability::Available);
        let path = dir.path().join("table.car");
        interchange
            .export_table_to_car(&sample(), &path, &[])
            .await
            .unwrap();

        let err = interchange
            .stream_car_to_parquet(&path, dir.path().join("out.parquet"), 2)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_fallback_refuses_parquet_and_streaming() {
        let dir = TempDir::new().unwrap();
        let interchange = interchange(&dir, CodecAvailability::Unavailable);
        let car = dir.path().join("x.car");
        let parquet = dir.path().join("x.parquet");

        let err = interchange.parquet_to_car(&parquet, &car, &[]).await.unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::MissingCodec);
        let err = interchange.car_to_parquet(&car, &parquet).await.unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::MissingCodec);
        let err = interchange
            .stream_parquet_to_car(&parquet, &car, 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::MissingCodec);
        let err = interchange
            .stream_car_to_parquet(&car, &parquet, 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::MissingCodec);
    }

    #[tokio::test]
    async fn test_fallback_cannot_read_real_archive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("real.car");
        interchange(&dir, CodecAvailability::Available)
            .export_table_to_car(&sample(), &path, &[])
            .await
            .unwrap();

        let err = interchange(&dir, CodecAvailability::Unavailable)
            .import_table_from_car(&path)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::MissingCodec);
    }

    #[tokio::test]
    async fn test_stream_rebatches_row_groups() {
        let dir = TempDir::new().unwrap();
        let interchange = interchange(&dir, CodecAvailability::Available);
        let source = dir.path().join("in.parquet");
        let rows = Table::from_columns([("n", Column::Int64((0..10).map(Some).collect()))]).unwrap();
        write_parquet(&rows, &source).unwrap();

        let car = dir.path().join("s.car");
        interchange.stream_parquet_to_car(&source, &car, 4).await.unwrap();

        let out = dir.path().join("out.parquet");
        interchange.stream_car_to_parquet(&car, &out, 6).await.unwrap();
        let reader = SerializedFileReader::new(std::fs::File::open(&out).unwrap()).unwrap();
        assert_eq!(reader.metadata().num_row_groups(), 2);
        assert_eq!(read_parquet(&out).unwrap(), rows);

        let err = interchange
            .stream_car_to_parquet(&car, &out, 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_scratch_store_released_after_each_call() {
        let dir = TempDir::new().unwrap();
        let interchange = DataInterchange::<TrackedStore>::with_scratch(
            InterchangeConfig::new()
                .safe_root(dir.path())
                .chunk_rows(10)
                .build(),
        )
        .unwrap();
        let table = Table::from_columns([("n", Column::Int64((0..100).map(Some).collect()))]).unwrap();

        for i in 0..5 {
            let path = dir.path().join(format!("t{i}.car"));
            interchange
                .export_table_to_car(&table, &path, &[])
                .await
                .unwrap();
            assert_eq!(LIVE_STORES.with(Cell::get), 0);
        }
        // ten chunks plus the root, every time
        assert_eq!(BLOCKS_AT_DROP.with(|seen| seen.take()), vec![11; 5]);

        assert_eq!(
            interchange
                .import_table_from_car(dir.path().join("t0.car"))
                .await
                .unwrap(),
            table
        );
        let garbage = dir.path().join("garbage.car");
        std::fs::write(&garbage, b"\x05hello").unwrap();
        let err = interchange.import_table_from_car(&garbage).await.unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::MalformedArchive);

        assert_eq!(LIVE_STORES.with(Cell::get), 0);
        assert_eq!(BLOCKS_AT_DROP.with(|seen| seen.take()), vec![11, 0]);
    }

    #[tokio::test]
    async fn test_streaming_scratch_store_released() {
        let dir = TempDir::new().unwrap();
        let interchange = DataInterchange::<TrackedStore>::with_scratch(
            InterchangeConfig::new().safe_root(dir.path()).build(),
        )
        .unwrap();
        let source = dir.path().join("in.parquet");
        write_parquet(&sample(), &source).unwrap();
        let car = dir.path().join("s.car");

        interchange.stream_parquet_to_car(&source, &car, 2).await.unwrap();
        assert_eq!(LIVE_STORES.with(Cell::get), 0);
        interchange
            .stream_car_to_parquet(&car, dir.path().join("out.parquet"), 3)
            .await
            .unwrap();
        assert_eq!(LIVE_STORES.with(Cell::get), 0);

        // the import holds exactly the blocks the export wrote
        let seen = BLOCKS_AT_DROP.with(|seen| seen.take());
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
    }

    #[tokio::test]
    async fn test_parquet_paths_confined_to_root() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let interchange = interchange(&dir, CodecAvailability::Available);

        let foreign_parquet = outside.path().join("in.parquet");
        write_parquet(&sample(), &foreign_parquet).unwrap();
        let table_car = dir.path().join("t.car");
        interchange
            .export_table_to_car(&sample(), &table_car, &[])
            .await
            .unwrap();
        let local_parquet = dir.path().join("in.parquet");
        write_parquet(&sample(), &local_parquet).unwrap();
        let stream_car = dir.path().join("s.car");
        interchange
            .stream_parquet_to_car(&local_parquet, &stream_car, 2)
            .await
            .unwrap();

        // climbs out of the root and into the sibling directory
        let escaped = dir
            .path()
            .join("..")
            .join(outside.path().file_name().unwrap())
            .join("escaped.parquet");

        let err = interchange
            .parquet_to_car(&foreign_parquet, dir.path().join("a.car"), &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::PathSecurity);

        let err = interchange
            .stream_parquet_to_car(&foreign_parquet, dir.path().join("b.car"), 2)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::PathSecurity);
        assert!(!dir.path().join("a.car").exists());
        assert!(!dir.path().join("b.car").exists());

        let err = interchange
            .car_to_parquet(&table_car, &escaped)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::PathSecurity);

        let err = interchange
            .stream_car_to_parquet(&stream_car, &escaped, 2)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::PathSecurity);
        assert!(!outside.path().join("escaped.parquet").exists());

        let inside = interchange
            .car_to_parquet(&table_car, dir.path().join("sub/../out.parquet"))
            .await
            .unwrap();
        assert_eq!(inside, interchange.safe_root().join("out.parquet"));
        assert_eq!(read_parquet(&inside).unwrap(), sample());
    }

    #[tokio::test]
    async fn test_forged_marker_row_count_rejected() {
        let dir = TempDir::new().unwrap();
        let interchange = interchange(&dir, CodecAvailability::Available);
        let serializer = DatasetSerializer::new(MemoryBlockStore::new());

        let honest = serializer
            .serialize_streaming(vec![Ok(sample())])
            .await
            .unwrap();
        let mut marker = serializer.streaming_marker(&honest).await.unwrap();
        marker.num_rows = 999;
        let forged = serializer.put_node(&marker).await.unwrap();

        let car = dir.path().join("forged.car");
        export_to_car(serializer.store(), &[forged], &car).await.unwrap();

        let out = dir.path().join("forged.parquet");
        let err = interchange
            .stream_car_to_parquet(&car, &out, 2)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &InterchangeErrorKind::SchemaMismatch);
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_rebatch_across_many_small_chunks() {
        let dir = TempDir::new().unwrap();
        let interchange = interchange(&dir, CodecAvailability::Available);
        let source = dir.path().join("in.parquet");
        let rows = Table::from_columns([("n", Column::Int64((0..100).map(Some).collect()))]).unwrap();
        write_parquet(&rows, &source).unwrap();

        let car = dir.path().join("s.car");
        interchange.stream_parquet_to_car(&source, &car, 3).await.unwrap();

        let out = dir.path().join("out.parquet");
        interchange.stream_car_to_parquet(&car, &out, 7).await.unwrap();
        let reader = SerializedFileReader::new(std::fs::File::open(&out).unwrap()).unwrap();
        let sizes: Vec<i64> = reader
            .metadata()
            .row_groups()
            .iter()
            .map(|group| group.num_rows())
            .collect();
        assert_eq!(sizes.len(), 15);
        assert!(sizes[..14].iter().all(|&n| n == 7));
        assert_eq!(sizes[14], 2);
        assert_eq!(read_parquet(&out).unwrap(), rows);
    }
}
