//! Cortex engine — owns a row store backend and a type registry,
//! provides tufo folding, form/prop registration, get-or-create
//! deconfliction, the ratchet policy, joins, and the async job surface.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use cortex_core::errors::{CortexError, CortexResult};
use cortex_core::row::{now, req_stor_rows, Guid, Row, Valu};
use cortex_core::traits::{ICoreXact, IRowStore};
use cortex_core::tufo::{fold_rows, Tufo, FORM_PROP};
use cortex_core::types::{ratchet, TypePolicy, TypeRegistry};

use crate::jobs::{ApiCall, ApiReturn, JobId, JobPool};
use crate::ram::RamStore;
use crate::sqlite::SqliteStore;

/// A cortex: rows indexed by prop, value, and time, plus the tufo and
/// async call surfaces. Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct Cortex {
    inner: Arc<CortexInner>,
}

impl std::fmt::Debug for Cortex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cortex").finish_non_exhaustive()
    }
}

struct CortexInner {
    store: Box<dyn IRowStore>,
    types: RwLock<TypeRegistry>,
    jobs: JobPool,
    done: AtomicBool,
}

impl Cortex {
    pub fn new(store: Box<dyn IRowStore>) -> Self {
        Self {
            inner: Arc::new(CortexInner {
                store,
                types: RwLock::new(TypeRegistry::new()),
                jobs: JobPool::new(),
                done: AtomicBool::new(false),
            }),
        }
    }

    /// An ephemeral in-memory cortex.
    pub fn open_ram() -> Self {
        Self::new(Box::new(RamStore::new()))
    }

    /// A file-backed sqlite cortex.
    pub fn open_sqlite(path: &Path, table: Option<&str>) -> CortexResult<Self> {
        Ok(Self::new(Box::new(SqliteStore::open(path, table)?)))
    }

    /// An in-memory sqlite cortex (tests).
    pub fn open_sqlite_in_memory(table: Option<&str>) -> CortexResult<Self> {
        Ok(Self::new(Box::new(SqliteStore::open_in_memory(table)?)))
    }

    fn types(&self) -> CortexResult<RwLockReadGuard<'_, TypeRegistry>> {
        self.inner
            .types
            .read()
            .map_err(|e| CortexError::storage(format!("type registry lock poisoned: {e}")))
    }

    fn types_mut(&self) -> CortexResult<RwLockWriteGuard<'_, TypeRegistry>> {
        self.inner
            .types
            .write()
            .map_err(|e| CortexError::storage(format!("type registry lock poisoned: {e}")))
    }

    // --- Row surface ---

    /// Append rows, case-folding props and enforcing the canstor
    /// predicate.
    pub fn add_rows(&self, mut rows: Vec<Row>) -> CortexResult<()> {
        for row in &mut rows {
            row.prop.make_ascii_lowercase();
        }
        req_stor_rows(&rows)?;
        self.inner.store.add_rows(&rows)
    }

    /// Append rows without waiting for persistence.
    pub fn add_rows_async(&self, rows: Vec<Row>) -> JobId {
        self.call_async_api(ApiCall::AddRows { rows })
    }

    pub fn get_rows_by_id(&self, id: &Guid) -> CortexResult<Vec<Row>> {
        self.inner.store.rows_by_id(id)
    }

    pub fn get_rows_by_prop(
        &self,
        prop: &str,
        valu: Option<&Valu>,
        mintime: Option<i64>,
        maxtime: Option<i64>,
        limit: Option<usize>,
    ) -> CortexResult<Vec<Row>> {
        self.inner
            .store
            .rows_by_prop(prop, valu, mintime, maxtime, limit)
    }

    pub fn get_rows_by(
        &self,
        by: &str,
        prop: &str,
        valu: &Valu,
        limit: Option<usize>,
    ) -> CortexResult<Vec<Row>> {
        self.inner.store.rows_by(by, prop, valu, limit)
    }

    // --- Joins: expand each matched row to all rows sharing its id ---

    pub fn get_join_by_id(&self, id: &Guid) -> CortexResult<Vec<Row>> {
        self.inner.store.rows_by_id(id)
    }

    pub fn get_join_by_prop(
        &self,
        prop: &str,
        valu: Option<&Valu>,
        mintime: Option<i64>,
        maxtime: Option<i64>,
        limit: Option<usize>,
    ) -> CortexResult<Vec<Row>> {
        let matched = self
            .inner
            .store
            .rows_by_prop(prop, valu, mintime, maxtime, limit)?;
        self.join_rows(matched)
    }

    pub fn get_join_by(
        &self,
        by: &str,
        prop: &str,
        valu: &Valu,
        limit: Option<usize>,
    ) -> CortexResult<Vec<Row>> {
        let matched = self.inner.store.rows_by(by, prop, valu, limit)?;
        self.join_rows(matched)
    }

    fn join_rows(&self, matched: Vec<Row>) -> CortexResult<Vec<Row>> {
        let mut seen: HashSet<Guid> = HashSet::new();
        let mut out = Vec::new();
        for row in matched {
            if seen.insert(row.id.clone()) {
                out.extend(self.inner.store.rows_by_id(&row.id)?);
            }
        }
        Ok(out)
    }

    // --- Sizes ---

    pub fn get_size_by_id(&self, id: &Guid) -> CortexResult<u64> {
        self.inner.store.size_by_id(id)
    }

    pub fn get_size_by_prop(
        &self,
        prop: &str,
        valu: Option<&Valu>,
        mintime: Option<i64>,
        maxtime: Option<i64>,
    ) -> CortexResult<u64> {
        self.inner.store.size_by_prop(prop, valu, mintime, maxtime)
    }

    pub fn get_size_by(&self, by: &str, prop: &str, valu: &Valu) -> CortexResult<u64> {
        self.inner.store.size_by(by, prop, valu)
    }

    // --- Schema surface ---

    pub fn add_type(
        &self,
        name: &str,
        subof: Option<&str>,
        policy: TypePolicy,
    ) -> CortexResult<()> {
        self.types_mut()?.add_type(name, subof, policy)
    }

    pub fn add_tufo_form(&self, name: &str, ptype: &str) -> CortexResult<()> {
        self.types_mut()?.add_form(name, ptype)
    }

    pub fn add_tufo_prop(&self, form: &str, name: &str, ptype: &str) -> CortexResult<()> {
        self.types_mut()?.add_prop(form, name, ptype)
    }

    // --- Tufo surface ---

    /// Get-or-create a tufo of `form` keyed by `ident`, applying
    /// `props` (frobbed to their declared types) on create. Lookup and
    /// create run under one write transaction for deconfliction.
    pub fn form_tufo_by_frob(
        &self,
        form: &str,
        ident: impl Into<Valu>,
        props: &[(&str, Valu)],
    ) -> CortexResult<Tufo> {
        let (ident, prop_valus) = {
            let types = self.types()?;
            let fd = types.form(form).ok_or_else(|| CortexError::NoSuchForm {
                form: form.to_string(),
            })?;
            let ident = types.frob_type(&fd.ptype, ident.into())?;
            let mut prop_valus = Vec::with_capacity(props.len());
            for (name, valu) in props {
                let full = format!("{form}:{name}").to_ascii_lowercase();
                let frobbed = types.frob(&full, valu.clone())?;
                prop_valus.push((full, frobbed));
            }
            (ident, prop_valus)
        };

        let mut xact = self.inner.store.xact()?;
        let hit = xact.rows_by_prop(form, Some(&ident), None, None, Some(1))?;
        if let Some(row) = hit.into_iter().next() {
            let rows = xact.rows_by_id(&row.id)?;
            xact.commit()?;
            return fold_rows(rows)
                .into_iter()
                .next()
                .ok_or_else(|| CortexError::storage("existing tufo folded to nothing"));
        }

        let id = Guid::new();
        let time = now();
        let mut rows = vec![
            Row::new(id.clone(), FORM_PROP, form, time),
            Row::new(id.clone(), form, ident, time),
        ];
        for (full, valu) in prop_valus {
            rows.push(Row::new(id.clone(), full, valu, time));
        }
        req_stor_rows(&rows)?;
        xact.add_rows(&rows)?;
        xact.commit()?;
        fold_rows(rows)
            .into_iter()
            .next()
            .ok_or_else(|| CortexError::storage("new tufo folded to nothing"))
    }

    /// Update one tufo property subject to its type policy. Returns
    /// whether the write was applied; a rejected ratchet is a silent
    /// `Ok(false)` and leaves both the store and the caller's tufo
    /// untouched.
    pub fn set_tufo_prop(
        &self,
        tufo: &mut Tufo,
        prop: &str,
        valu: impl Into<Valu>,
    ) -> CortexResult<bool> {
        let form = tufo
            .form()
            .ok_or_else(|| CortexError::InvalidParam {
                name: "tufo".to_string(),
                mesg: "missing tufo:form attribute".to_string(),
            })?
            .to_string();
        let full = format!("{form}:{prop}").to_ascii_lowercase();
        let (valu, policy) = {
            let types = self.types()?;
            (types.frob(&full, valu.into())?, types.policy(&full))
        };
        let current = tufo.props.get(&full);
        if current == Some(&valu) {
            return Ok(false);
        }
        if !ratchet(policy, current, &valu) {
            return Ok(false);
        }
        let row = Row::new(tufo.id.clone(), full.clone(), valu.clone(), now());
        req_stor_rows(std::slice::from_ref(&row))?;
        let mut xact = self.inner.store.xact()?;
        xact.del_rows_by_id_prop(&tufo.id, &full)?;
        xact.add_rows(std::slice::from_ref(&row))?;
        xact.commit()?;
        tufo.props.insert(full, valu);
        Ok(true)
    }

    /// A get/set view over a tufo bound to this cortex.
    pub fn tufo_api<'a>(&'a self, tufo: &'a mut Tufo) -> TufoApi<'a> {
        TufoApi { core: self, tufo }
    }

    /// Scoped write transaction on the backend. Effects publish on
    /// `commit`; dropping the scope rolls back. Pass the scope down by
    /// reference instead of re-acquiring it.
    pub fn get_core_xact(&self) -> CortexResult<Box<dyn ICoreXact + '_>> {
        self.inner.store.xact()
    }

    // --- Async call surface ---

    /// Dispatch a call synchronously.
    pub fn call(&self, call: ApiCall) -> CortexResult<ApiReturn> {
        match call {
            ApiCall::AddRows { rows } => {
                self.add_rows(rows)?;
                Ok(ApiReturn::Done)
            }
            ApiCall::GetRowsById { id } => Ok(ApiReturn::Rows(self.get_rows_by_id(&id)?)),
            ApiCall::GetRowsByProp {
                prop,
                valu,
                mintime,
                maxtime,
                limit,
            } => Ok(ApiReturn::Rows(self.get_rows_by_prop(
                &prop,
                valu.as_ref(),
                mintime,
                maxtime,
                limit,
            )?)),
            ApiCall::GetRowsBy {
                by,
                prop,
                valu,
                limit,
            } => Ok(ApiReturn::Rows(self.get_rows_by(&by, &prop, &valu, limit)?)),
            ApiCall::GetJoinById { id } => Ok(ApiReturn::Rows(self.get_join_by_id(&id)?)),
            ApiCall::GetJoinByProp {
                prop,
                valu,
                mintime,
                maxtime,
                limit,
            } => Ok(ApiReturn::Rows(self.get_join_by_prop(
                &prop,
                valu.as_ref(),
                mintime,
                maxtime,
                limit,
            )?)),
            ApiCall::GetJoinBy {
                by,
                prop,
                valu,
                limit,
            } => Ok(ApiReturn::Rows(self.get_join_by(&by, &prop, &valu, limit)?)),
            ApiCall::GetSizeById { id } => Ok(ApiReturn::Size(self.get_size_by_id(&id)?)),
            ApiCall::GetSizeByProp {
                prop,
                valu,
                mintime,
                maxtime,
            } => Ok(ApiReturn::Size(self.get_size_by_prop(
                &prop,
                valu.as_ref(),
                mintime,
                maxtime,
            )?)),
            ApiCall::GetSizeBy { by, prop, valu } => {
                Ok(ApiReturn::Size(self.get_size_by(&by, &prop, &valu)?))
            }
        }
    }

    /// Schedule a call and return its job id immediately.
    pub fn call_async_api(&self, call: ApiCall) -> JobId {
        let core = self.clone();
        self.inner.jobs.submit(move || core.call(call))
    }

    /// Wait for a scheduled call's value, or re-raise its error.
    pub async fn get_async_return(&self, job: &JobId) -> CortexResult<ApiReturn> {
        self.inner.jobs.retrieve(job).await
    }

    /// Idempotent teardown.
    pub fn fini(&self) {
        if self.inner.done.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("cortex fini");
        self.inner.store.fini();
    }

    pub fn is_fini(&self) -> bool {
        self.inner.done.load(Ordering::SeqCst)
    }
}

/// Get/set over a tufo, parameterized by the owning cortex. Short prop
/// names expand to `form:prop` via the tufo's form.
pub struct TufoApi<'a> {
    core: &'a Cortex,
    tufo: &'a mut Tufo,
}

impl TufoApi<'_> {
    pub fn get(&self, prop: &str) -> Option<&Valu> {
        let form = self.tufo.form()?;
        self.tufo.props.get(&format!("{form}:{prop}"))
    }

    pub fn set(&mut self, prop: &str, valu: impl Into<Valu>) -> CortexResult<bool> {
        self.core.set_tufo_prop(self.tufo, prop, valu)
    }
}
