//! # cortex-core
//!
//! Foundation crate for the metacortex workspace.
//! Defines the row/tufo data model, the type policy layer, hierarchical
//! tags, the synchronous event bus, the storage seam traits, and the
//! error taxonomy. Every other crate in the workspace depends on this.

pub mod bus;
pub mod errors;
pub mod row;
pub mod tags;
pub mod traits;
pub mod tufo;
pub mod types;

// Re-export the most commonly used types at the crate root.
pub use bus::{EventBus, HandlerId};
pub use errors::{CortexError, CortexResult};
pub use row::{now, Guid, Row, Valu};
pub use tufo::{fold_rows, tufo_rows, Tufo, FORM_PROP};
pub use types::{TypePolicy, TypeRegistry};
