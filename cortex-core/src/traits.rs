//! Storage seam: every backend exposes the row/index contract through
//! these traits. The engine layer builds tufos, joins, and the async
//! call surface on top.

use crate::errors::CortexResult;
use crate::row::{Guid, Row, Valu};

/// Scoped write transaction. Effects publish on `commit`; dropping the
/// scope without committing rolls back and always releases the writer.
pub trait ICoreXact {
    // --- Writes (staged until commit) ---
    fn add_rows(&mut self, rows: &[Row]) -> CortexResult<()>;
    fn del_rows_by_id_prop(&mut self, id: &Guid, prop: &str) -> CortexResult<usize>;

    // --- Reads (see the pre-scope state; engine paths read before writing) ---
    fn rows_by_id(&mut self, id: &Guid) -> CortexResult<Vec<Row>>;
    fn rows_by_prop(
        &mut self,
        prop: &str,
        valu: Option<&Valu>,
        mintime: Option<i64>,
        maxtime: Option<i64>,
        limit: Option<usize>,
    ) -> CortexResult<Vec<Row>>;

    /// Publish the scope's effects.
    fn commit(self: Box<Self>) -> CortexResult<()>;
}

/// Full row/index contract implemented by each backend. All operations
/// are safe under concurrent calls; serializability is only guaranteed
/// within a single xact scope.
pub trait IRowStore: Send + Sync {
    // --- Writes ---
    fn add_rows(&self, rows: &[Row]) -> CortexResult<()>;
    fn del_rows_by_id_prop(&self, id: &Guid, prop: &str) -> CortexResult<usize>;

    // --- Row queries ---
    fn rows_by_id(&self, id: &Guid) -> CortexResult<Vec<Row>>;
    fn rows_by_prop(
        &self,
        prop: &str,
        valu: Option<&Valu>,
        mintime: Option<i64>,
        maxtime: Option<i64>,
        limit: Option<usize>,
    ) -> CortexResult<Vec<Row>>;
    fn rows_by(
        &self,
        by: &str,
        prop: &str,
        valu: &Valu,
        limit: Option<usize>,
    ) -> CortexResult<Vec<Row>>;

    // --- Cardinality (never materializes rows) ---
    fn size_by_id(&self, id: &Guid) -> CortexResult<u64>;
    fn size_by_prop(
        &self,
        prop: &str,
        valu: Option<&Valu>,
        mintime: Option<i64>,
        maxtime: Option<i64>,
    ) -> CortexResult<u64>;
    fn size_by(&self, by: &str, prop: &str, valu: &Valu) -> CortexResult<u64>;

    // --- Transactions / lifecycle ---
    fn xact(&self) -> CortexResult<Box<dyn ICoreXact + '_>>;
    fn fini(&self);
}
