//! Datasource descriptors and connection configuration for marctab.
//!
//! Two descriptor dialects are supported: the LDP1 JSON file
//! (`ldpconf.json`) and the Metadb INI file (`metadb.conf`). Both resolve to
//! the same [`PgConnectionConfig`], which knows how to build a
//! `tokio_postgres` connection configuration.

pub mod connection;
pub mod load;
pub mod locations;

pub use connection::{PgConnectionConfig, SslModeKind};
pub use load::{LoadConfigError, load_ldp1, load_metadb};
pub use locations::Locations;
