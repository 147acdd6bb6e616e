//! # cortex-meta
//!
//! Federates many cortexes behind one query surface: a named registry
//! with hierarchical tag routing, the textual query language, and
//! concurrent fan-out over the async call surface.

pub mod meta;
pub mod query;

pub use meta::{MetaCortex, QueryEvent, EVT_QUERY_JOIN, EVT_QUERY_ROWS, EVT_QUERY_SIZE};
pub use query::QuerySpec;
