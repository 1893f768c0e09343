pub mod backends;
pub mod config;
pub mod datastore;
mod db;
pub mod ddl;
pub mod dialect;
pub mod persist;
pub mod query;
pub mod reader;
pub mod registry;
pub mod store;

pub use tidemark_core::*;
pub use backends::{BackendManager, Engine, Session};
pub use config::{DatabaseConfig, DatabaseDescriptor, PoolConfig, StoreConfig, WriteMode};
pub use datastore::{load_or_init_config, open_builder};
pub use ddl::ReconcileReport;
pub use dialect::BackendDialect;
pub use reader::{CatchUpReport, DataListener, DataReader, ReaderSpec, ReaderState};
pub use registry::Registry;
pub use store::{StoreBuilder, TidemarkStore};
