//! # cortex-storage
//!
//! Backends implementing the row/index contract (`ram://`, `sqlite://`),
//! the `Cortex` engine layered on top of them (tufo folding, type policy
//! enforcement, joins, async jobs), and the url opener.

pub mod engine;
pub mod jobs;
pub mod opener;
pub mod ram;
pub mod sqlite;

pub use engine::{Cortex, TufoApi};
pub use jobs::{ApiCall, ApiReturn, JobId};
pub use opener::{CortexCtor, CortexOpener, OpenOpts, Opened};
pub use ram::RamStore;
pub use sqlite::SqliteStore;
