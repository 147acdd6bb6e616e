//! Ephemeral in-memory backend: hash indexes by id and by prop.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use cortex_core::errors::{CortexError, CortexResult};
use cortex_core::row::{req_stor_rows, Guid, Row, Valu};
use cortex_core::traits::{ICoreXact, IRowStore};

#[derive(Default)]
struct RamInner {
    rows_by_id: HashMap<Guid, Vec<Row>>,
    rows_by_prop: HashMap<String, Vec<Row>>,
}

impl RamInner {
    fn apply_add(&mut self, rows: &[Row]) {
        for row in rows {
            self.rows_by_id
                .entry(row.id.clone())
                .or_default()
                .push(row.clone());
            self.rows_by_prop
                .entry(row.prop.clone())
                .or_default()
                .push(row.clone());
        }
    }

    fn apply_del(&mut self, id: &Guid, prop: &str) -> usize {
        let mut dropped = 0;
        if let Some(rows) = self.rows_by_id.get_mut(id) {
            let before = rows.len();
            rows.retain(|row| row.prop != prop);
            dropped = before - rows.len();
            if rows.is_empty() {
                self.rows_by_id.remove(id);
            }
        }
        if let Some(rows) = self.rows_by_prop.get_mut(prop) {
            rows.retain(|row| &row.id != id);
            if rows.is_empty() {
                self.rows_by_prop.remove(prop);
            }
        }
        dropped
    }

    fn select_by_prop(
        &self,
        prop: &str,
        valu: Option<&Valu>,
        mintime: Option<i64>,
        maxtime: Option<i64>,
        limit: Option<usize>,
    ) -> Vec<Row> {
        let mut out = Vec::new();
        let Some(rows) = self.rows_by_prop.get(prop) else {
            return out;
        };
        for row in rows {
            if !prop_filter(row, valu, mintime, maxtime) {
                continue;
            }
            out.push(row.clone());
            if limit.is_some_and(|cap| out.len() >= cap) {
                break;
            }
        }
        out
    }

    fn count_by_prop(
        &self,
        prop: &str,
        valu: Option<&Valu>,
        mintime: Option<i64>,
        maxtime: Option<i64>,
    ) -> u64 {
        match self.rows_by_prop.get(prop) {
            Some(rows) => rows
                .iter()
                .filter(|row| prop_filter(row, valu, mintime, maxtime))
                .count() as u64,
            None => 0,
        }
    }

    fn select_by(
        &self,
        by: &str,
        prop: &str,
        valu: &Valu,
        limit: Option<usize>,
    ) -> CortexResult<Vec<Row>> {
        let matches = by_matcher(by, valu)?;
        let mut out = Vec::new();
        if let Some(rows) = self.rows_by_prop.get(prop) {
            for row in rows {
                if !matches(&row.valu) {
                    continue;
                }
                out.push(row.clone());
                if limit.is_some_and(|cap| out.len() >= cap) {
                    break;
                }
            }
        }
        Ok(out)
    }

    fn count_by(&self, by: &str, prop: &str, valu: &Valu) -> CortexResult<u64> {
        let matches = by_matcher(by, valu)?;
        Ok(match self.rows_by_prop.get(prop) {
            Some(rows) => rows.iter().filter(|row| matches(&row.valu)).count() as u64,
            None => 0,
        })
    }
}

fn prop_filter(row: &Row, valu: Option<&Valu>, mintime: Option<i64>, maxtime: Option<i64>) -> bool {
    if valu.is_some_and(|v| &row.valu != v) {
        return false;
    }
    if mintime.is_some_and(|min| row.time < min) {
        return false;
    }
    if maxtime.is_some_and(|max| row.time >= max) {
        return false;
    }
    true
}

/// Build the predicate for a by-strategy. Cross-variant comparisons
/// never match.
fn by_matcher<'a>(by: &str, valu: &'a Valu) -> CortexResult<Box<dyn Fn(&Valu) -> bool + 'a>> {
    use CmpOrdering::{Equal, Greater, Less};
    let matches: Box<dyn Fn(&Valu) -> bool + 'a> = match by {
        "eq" => Box::new(move |v| v == valu),
        "has" => Box::new(|_| true),
        "lt" => Box::new(move |v| matches!(v.cmp_same(valu), Some(Less))),
        "le" => Box::new(move |v| matches!(v.cmp_same(valu), Some(Less | Equal))),
        "gt" => Box::new(move |v| matches!(v.cmp_same(valu), Some(Greater))),
        "ge" => Box::new(move |v| matches!(v.cmp_same(valu), Some(Greater | Equal))),
        "range" => {
            let (min, max) = range_bounds(valu)?;
            Box::new(move |v| {
                matches!(v.cmp_same(min), Some(Greater | Equal))
                    && matches!(v.cmp_same(max), Some(Less))
            })
        }
        _ => {
            return Err(CortexError::NoSuchBy {
                by: by.to_string(),
            })
        }
    };
    Ok(matches)
}

/// A `range` strategy value is a two-element list: `[min, max)`.
pub(crate) fn range_bounds(valu: &Valu) -> CortexResult<(&Valu, &Valu)> {
    match valu {
        Valu::List(pair) if pair.len() == 2 => Ok((&pair[0], &pair[1])),
        _ => Err(CortexError::InvalidParam {
            name: "valu".to_string(),
            mesg: "range expects a (min, max) pair".to_string(),
        }),
    }
}

/// In-memory row store behind a single mutex.
pub struct RamStore {
    inner: Mutex<RamInner>,
    done: AtomicBool,
}

impl RamStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RamInner::default()),
            done: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> CortexResult<MutexGuard<'_, RamInner>> {
        self.inner
            .lock()
            .map_err(|e| CortexError::storage(format!("ram store lock poisoned: {e}")))
    }
}

impl Default for RamStore {
    fn default() -> Self {
        Self::new()
    }
}

enum StagedOp {
    AddRows(Vec<Row>),
    DelIdProp(Guid, String),
}

/// Write scope over the ram store: holds the store mutex for the whole
/// scope and stages writes, so dropping without commit discards them.
struct RamXact<'a> {
    guard: MutexGuard<'a, RamInner>,
    staged: Vec<StagedOp>,
}

impl ICoreXact for RamXact<'_> {
    fn add_rows(&mut self, rows: &[Row]) -> CortexResult<()> {
        req_stor_rows(rows)?;
        self.staged.push(StagedOp::AddRows(rows.to_vec()));
        Ok(())
    }

    fn del_rows_by_id_prop(&mut self, id: &Guid, prop: &str) -> CortexResult<usize> {
        let pending = match self.guard.rows_by_id.get(id) {
            Some(rows) => rows.iter().filter(|row| row.prop == prop).count(),
            None => 0,
        };
        self.staged
            .push(StagedOp::DelIdProp(id.clone(), prop.to_string()));
        Ok(pending)
    }

    fn rows_by_id(&mut self, id: &Guid) -> CortexResult<Vec<Row>> {
        Ok(self.guard.rows_by_id.get(id).cloned().unwrap_or_default())
    }

    fn rows_by_prop(
        &mut self,
        prop: &str,
        valu: Option<&Valu>,
        mintime: Option<i64>,
        maxtime: Option<i64>,
        limit: Option<usize>,
    ) -> CortexResult<Vec<Row>> {
        Ok(self.guard.select_by_prop(prop, valu, mintime, maxtime, limit))
    }

    fn commit(mut self: Box<Self>) -> CortexResult<()> {
        let staged = std::mem::take(&mut self.staged);
        for op in staged {
            match op {
                StagedOp::AddRows(rows) => self.guard.apply_add(&rows),
                StagedOp::DelIdProp(id, prop) => {
                    self.guard.apply_del(&id, &prop);
                }
            }
        }
        Ok(())
    }
}

impl IRowStore for RamStore {
    fn add_rows(&self, rows: &[Row]) -> CortexResult<()> {
        req_stor_rows(rows)?;
        self.lock()?.apply_add(rows);
        Ok(())
    }

    fn del_rows_by_id_prop(&self, id: &Guid, prop: &str) -> CortexResult<usize> {
        Ok(self.lock()?.apply_del(id, prop))
    }

    fn rows_by_id(&self, id: &Guid) -> CortexResult<Vec<Row>> {
        Ok(self.lock()?.rows_by_id.get(id).cloned().unwrap_or_default())
    }

    fn rows_by_prop(
        &self,
        prop: &str,
        valu: Option<&Valu>,
        mintime: Option<i64>,
        maxtime: Option<i64>,
        limit: Option<usize>,
    ) -> CortexResult<Vec<Row>> {
        Ok(self
            .lock()?
            .select_by_prop(prop, valu, mintime, maxtime, limit))
    }

    fn rows_by(
        &self,
        by: &str,
        prop: &str,
        valu: &Valu,
        limit: Option<usize>,
    ) -> CortexResult<Vec<Row>> {
        self.lock()?.select_by(by, prop, valu, limit)
    }

    fn size_by_id(&self, id: &Guid) -> CortexResult<u64> {
        Ok(self
            .lock()?
            .rows_by_id
            .get(id)
            .map(|rows| rows.len() as u64)
            .unwrap_or(0))
    }

    fn size_by_prop(
        &self,
        prop: &str,
        valu: Option<&Valu>,
        mintime: Option<i64>,
        maxtime: Option<i64>,
    ) -> CortexResult<u64> {
        Ok(self.lock()?.count_by_prop(prop, valu, mintime, maxtime))
    }

    fn size_by(&self, by: &str, prop: &str, valu: &Valu) -> CortexResult<u64> {
        self.lock()?.count_by(by, prop, valu)
    }

    fn xact(&self) -> CortexResult<Box<dyn ICoreXact + '_>> {
        Ok(Box::new(RamXact {
            guard: self.lock()?,
            staged: Vec::new(),
        }))
    }

    fn fini(&self) {
        self.done.store(true, Ordering::SeqCst);
    }
}
