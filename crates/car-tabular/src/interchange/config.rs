//! Orchestrator configuration

use std::path::PathBuf;

use crate::dataset::DEFAULT_CHUNK_ROWS;

/// Environment variable naming the safe root for archive paths
pub const SAFE_ROOT_ENV: &str = "CAR_TABULAR_SAFE_ROOT";

/// Whether the CAR/columnar codec may be used
///
/// Decided once when a [`DataInterchange`](super::DataInterchange) is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CodecAvailability {
    /// Content-addressed archives and Parquet I/O
    #[default]
    Available,
    /// JSON fallback for table export/import; Parquet and streaming fail
    Unavailable,
}

/// Settings for a [`DataInterchange`](super::DataInterchange)
///
/// ```ignore
/// let config = InterchangeConfig::new()
///     .safe_root("/work")
///     .chunk_rows(1024)
///     .build();
/// ```
#[derive(Debug, Clone, bon::Builder)]
#[builder(start_fn = new)]
pub struct InterchangeConfig {
    /// Directory every archive path must resolve inside; the current
    /// directory when unset
    #[builder(into)]
    pub safe_root: Option<PathBuf>,

    /// Maximum rows per Row-Chunk
    #[builder(default = DEFAULT_CHUNK_ROWS)]
    pub chunk_rows: usize,

    /// Codec selection
    #[builder(default)]
    pub codec: CodecAvailability,
}

impl Default for InterchangeConfig {
    fn default() -> Self {
        Self::new().build()
    }
}

impl InterchangeConfig {
    /// Defaults, with the safe root taken from [`SAFE_ROOT_ENV`] when set
    pub fn from_env() -> Self {
        let safe_root = std::env::var_os(SAFE_ROOT_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self::new().maybe_safe_root(safe_root).build()
    }
}
