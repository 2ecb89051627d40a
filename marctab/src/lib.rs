//! marctab transforms SRS MARC records, stored as JSON in a source
//! database, into a partitioned relational table, and keeps that table
//! consistent with the source on subsequent runs.
//!
//! A full build streams every source record through the MARC decoder into
//! per-field spill files, bulk-loads the 1000 partitions, and atomically
//! swaps the finished table into its published name. Later runs reconcile
//! incrementally with a checksum-indexed three-way diff, falling back to a
//! full build whenever the schema version changes.

pub mod checksum;
pub mod client;
pub mod csv;
pub mod error;
pub mod inc;
pub mod macros;
pub mod marc;
pub mod pipeline;
pub mod schema;
pub mod source;
pub mod spill;
pub mod types;

pub use client::PgClient;
pub use error::{ErrorKind, MarctabError, MarctabResult};
pub use pipeline::{RunOptions, run};
