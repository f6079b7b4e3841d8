//! Bundle lifecycle and upload pipeline for the DLC service
//!
//! Metadata lives in SQLite behind the [`BundleStorage`] trait; artifacts
//! live on the local filesystem under a configured data location.

pub mod database;
pub mod predicate;
pub mod query;
pub mod storage;
pub mod store;
pub mod upload;

pub use database::Database;
pub use predicate::{JsonPredicateBuilder, Predicate, PredicateBuilder, QueryParam};
pub use query::BundleQuery;
pub use storage::{BundleStorage, SqliteBundleStorage};
pub use store::BundleStore;
pub use upload::{BundleProducer, ChunkProducer, ReaderProducer, UploadSink};
