//! CAR (Content Addressable aRchive) file I/O
//!
//! Provides utilities for reading and writing CAR files, the self-contained
//! container a converted dataset travels in.
//!
//! # Examples
//!
//! Importing a CAR file into a store:
//! ```ignore
//! use car_tabular::car::import_from_car;
//!
//! let roots = import_from_car(&store, Path::new("dataset.car")).await?;
//! ```
//!
//! Exporting the closure of a root:
//! ```ignore
//! use car_tabular::car::export_to_car;
//!
//! export_to_car(&store, &[root_cid], Path::new("dataset.car")).await?;
//! ```

pub mod reader;
pub mod writer;

// Re-export commonly used functions and types
pub use reader::{import_from_car, read_car, read_car_header, resolve_closure};
pub use writer::{export_to_car, write_car};
