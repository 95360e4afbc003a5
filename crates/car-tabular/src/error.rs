//! Error types for archive conversion operations

use std::error::Error;
use std::fmt;
use std::path::Path;

/// Boxed error type for error sources
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result type alias for conversion operations
pub type Result<T> = std::result::Result<T, InterchangeError>;

/// Conversion error with rich diagnostics
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub struct InterchangeError {
    kind: InterchangeErrorKind,
    #[source]
    source: Option<BoxError>,
    #[help]
    help: Option<String>,
    context: Option<String>,
}

/// Error categories for conversion operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterchangeErrorKind {
    /// Path resolves outside the configured safe root
    PathSecurity,
    /// The archive/columnar codec is unavailable and the operation has no fallback
    MissingCodec,
    /// Archive bytes are not a valid CAR container
    MalformedArchive,
    /// A block references a CID that cannot be resolved
    DanglingReference,
    /// Chunk and root disagree about the table schema
    SchemaMismatch,
    /// Block or dataset not found
    NotFound,
    /// Block decoded, but is not the expected node type
    InvalidNode,
    /// Caller-supplied input rejected
    InvalidInput,
    /// Serialization/deserialization failed
    Serialization,
    /// Parquet read/write failed
    Parquet,
    /// JSON fallback encoding failed
    Json,
    /// I/O error
    Io,
}

impl InterchangeError {
    /// Create a new error with the given kind and optional source
    pub fn new(kind: InterchangeErrorKind, source: Option<BoxError>) -> Self {
        Self {
            kind,
            source,
            help: None,
            context: None,
        }
    }

    /// Add a help message to the error
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// Add context information to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> &InterchangeErrorKind {
        &self.kind
    }

    // Constructors for different error kinds

    /// Create a path security error
    pub fn path_security(path: &Path, root: &Path) -> Self {
        Self::new(InterchangeErrorKind::PathSecurity, None)
            .with_context(format!(
                "{} is outside safe root {}",
                path.display(),
                root.display()
            ))
            .with_help("archive paths must resolve inside the configured safe root")
    }

    /// Create a missing codec error
    pub fn missing_codec(operation: &str) -> Self {
        Self::new(InterchangeErrorKind::MissingCodec, None)
            .with_context(format!("{} requires the CAR/columnar codec", operation))
            .with_help("construct the interchange with CodecAvailability::Available")
    }

    /// Create a malformed archive error
    pub fn malformed(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(InterchangeErrorKind::MalformedArchive, Some(Box::new(source)))
            .with_context("Failed to parse CAR file".to_string())
    }

    /// Create a malformed archive error from a message
    pub fn malformed_msg(msg: impl Into<String>) -> Self {
        Self::new(InterchangeErrorKind::MalformedArchive, Some(msg.into().into()))
    }

    /// Create a dangling reference error
    pub fn dangling(cid: impl fmt::Display) -> Self {
        Self::new(InterchangeErrorKind::DanglingReference, None)
            .with_context(format!("referenced block missing: {}", cid))
            .with_help("every block reachable from an archive root must be present in the archive")
    }

    /// Create a schema mismatch error
    pub fn schema_mismatch(msg: impl Into<String>) -> Self {
        Self::new(InterchangeErrorKind::SchemaMismatch, Some(msg.into().into()))
            .with_help("the archive may be corrupted or hand-edited")
    }

    /// Create a not found error
    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        Self::new(InterchangeErrorKind::NotFound, None)
            .with_context(format!("{} not found: {}", resource, id))
    }

    /// Create an invalid node error
    pub fn invalid_node(expected: &str, id: impl fmt::Display) -> Self {
        Self::new(InterchangeErrorKind::InvalidNode, None)
            .with_context(format!("no valid {} at {}", expected, id))
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::new(InterchangeErrorKind::InvalidInput, Some(msg.into().into()))
    }

    /// Create a serialization error
    pub fn serialization(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(InterchangeErrorKind::Serialization, Some(Box::new(source)))
    }

    /// Create a parquet error
    pub fn parquet(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(InterchangeErrorKind::Parquet, Some(Box::new(source)))
    }

    /// Create a parquet error from a message
    pub fn parquet_msg(msg: impl Into<String>) -> Self {
        Self::new(InterchangeErrorKind::Parquet, Some(msg.into().into()))
    }

    /// Create a JSON error
    pub fn json(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(InterchangeErrorKind::Json, Some(Box::new(source)))
    }

    /// Create a JSON error from a message
    pub fn json_msg(msg: impl Into<String>) -> Self {
        Self::new(InterchangeErrorKind::Json, Some(msg.into().into()))
    }

    /// Create an I/O error
    pub fn io(source: impl Error + Send + Sync + 'static) -> Self {
        Self::new(InterchangeErrorKind::Io, Some(Box::new(source)))
    }
}

impl fmt::Display for InterchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;

        if let Some(ctx) = &self.context {
            write!(f, ": {}", ctx)?;
        }

        if let Some(src) = &self.source {
            write!(f, ": {}", src)?;
        }

        Ok(())
    }
}

// Internal granular errors

/// Table construction errors
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum TableError {
    /// Column count does not match schema
    #[error("Expected {expected} columns, got {got}")]
    ColumnCount {
        /// Number of schema fields
        expected: usize,
        /// Number of columns supplied
        got: usize,
    },

    /// Column type does not match the field type
    #[error("Column {name} has type {got}, schema says {expected}")]
    ColumnType {
        /// Field name
        name: String,
        /// Declared type
        expected: String,
        /// Actual column type
        got: String,
    },

    /// Columns of unequal length
    #[error("Column {name} has {got} rows, expected {expected}")]
    RaggedColumns {
        /// Field name
        name: String,
        /// Row count of the first column
        expected: usize,
        /// Row count of this column
        got: usize,
    },

    /// Null in a non-nullable column
    #[error("Column {name} is not nullable but contains nulls")]
    UnexpectedNull {
        /// Field name
        name: String,
    },

    /// Duplicate field name
    #[error("Duplicate column name: {0}")]
    DuplicateField(String),

    /// Unknown column referenced
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    /// Cell value incompatible with column type
    #[error("Column {name}: cannot store {value} as {expected}")]
    CellType {
        /// Field name
        name: String,
        /// Column type
        expected: String,
        /// Offending value, rendered
        value: String,
    },

    /// Concatenating tables with different schemas
    #[error("Cannot concatenate tables with different schemas")]
    SchemaConflict,
}

impl From<TableError> for InterchangeError {
    fn from(e: TableError) -> Self {
        InterchangeError::new(InterchangeErrorKind::InvalidInput, Some(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_context() {
        let err = InterchangeError::not_found("block", "bafy-test");
        let rendered = err.to_string();
        assert!(rendered.starts_with("NotFound"));
        assert!(rendered.contains("block not found: bafy-test"));
    }

    #[test]
    fn test_table_error_maps_to_invalid_input() {
        let err: InterchangeError = TableError::DuplicateField("id".into()).into();
        assert_eq!(err.kind(), &InterchangeErrorKind::InvalidInput);
        assert!(err.to_string().contains("Duplicate column name: id"));
    }

    #[test]
    fn test_path_security_help() {
        let err = InterchangeError::path_security(Path::new("/etc/passwd"), Path::new("/work"));
        assert_eq!(err.kind(), &InterchangeErrorKind::PathSecurity);
        assert!(err.to_string().contains("/etc/passwd"));
    }
}
