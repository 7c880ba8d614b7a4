//! # sift-hub: query language, pipeline and orchestration
//!
//! A query such as
//!
//! ```text
//! service=`api` level!=`debug` error timeout | where status >= 500 | stats count() by host
//! ```
//!
//! flows through four layers:
//!
//! - [`query`] lexes and parses the text into a [`Query`], collecting syntax
//!   highlights and completion markers on the way.
//! - [`connectors`] fetch rows matching the pre-filters and the search tree
//!   from each selected source instance.
//! - [`cache`] shares fetches between tasks whose fetch identity is equal.
//! - [`pipeline`] runs the `| stage` list over the merged rows.
//!
//! [`engine::QueryEngine`] ties them together and exposes the serializable
//! read APIs.

pub mod cache;
pub mod config;
pub mod connectors;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod query;

pub use cache::{CacheIdentity, CacheKey, CacheRecord, FetchStatus, QueryCache};
pub use config::{build_registry, Config, EngineConfig};
pub use connectors::registry::SourceRegistry;
pub use connectors::{QueryParams, QueryProvider};
pub use engine::export::ExportFormat;
pub use engine::{QueryEngine, QueryOptions, TaskHandle, TaskStatus, TaskUpdate};
pub use error::{EngineError, Result};
pub use query::ast::Query;
pub use query::{parse, ParseOutcome};
