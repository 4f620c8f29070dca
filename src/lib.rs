//! Reconciles a gene locus registry against an Ensembl annotation release
//! and the HGNC cross-reference set.

pub mod annotation;
pub mod config;
pub mod disease_names;
pub mod engine;
pub mod error;
pub mod integrity;
pub mod pipeline;
pub mod prune;
pub mod reconcile;
pub mod registry;
pub mod registry_sqlite;
pub mod report;
pub mod sources;
pub mod xref;

pub use error::{ErrorCode, SyncError, SyncResult};
pub use locus_protocol;
