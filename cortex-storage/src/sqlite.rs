//! File-backed sqlite backend over the four-column persisted row schema:
//! `(id, prop, intval, strval, tstamp)` with exactly one of
//! `intval`/`strval` non-null.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use cortex_core::errors::{CortexError, CortexResult};
use cortex_core::row::{req_stor_rows, Guid, Row, Valu};
use cortex_core::traits::{ICoreXact, IRowStore};

use crate::ram::range_bounds;

/// Default table name for persisted backends.
pub const DEFAULT_TABLE: &str = "syncortex";

fn to_store_err(err: rusqlite::Error) -> CortexError {
    CortexError::storage(err.to_string())
}

/// Table names are interpolated into SQL; keep them to identifiers.
fn req_table_name(table: &str) -> CortexResult<()> {
    let mut chars = table.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Ok(());
    }
    Err(CortexError::InvalidParam {
        name: "table".to_string(),
        mesg: format!("{table:?} is not a valid table name"),
    })
}

fn init_schema(conn: &Connection, table: &str) -> CortexResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id TEXT NOT NULL,
            prop TEXT NOT NULL,
            intval INTEGER,
            strval TEXT,
            tstamp INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS {table}_prop_intval ON {table} (prop, intval);
        CREATE INDEX IF NOT EXISTS {table}_prop_strval ON {table} (prop, strval);
        CREATE INDEX IF NOT EXISTS {table}_id ON {table} (id);
        CREATE INDEX IF NOT EXISTS {table}_prop_tstamp ON {table} (prop, tstamp);"
    ))
    .map_err(to_store_err)
}

/// Split a value into the `(intval, strval)` column pair.
fn encode_valu(prop: &str, valu: &Valu) -> CortexResult<(Option<i64>, Option<String>)> {
    match valu {
        Valu::Int(v) => Ok((Some(*v), None)),
        Valu::Str(s) => Ok((None, Some(s.clone()))),
        _ => Err(CortexError::BadStorValu {
            name: prop.to_string(),
            mesg: "sql backends store integers and strings only".to_string(),
        }),
    }
}

fn decode_row(
    id: String,
    prop: String,
    intval: Option<i64>,
    strval: Option<String>,
    tstamp: i64,
) -> CortexResult<Row> {
    let valu = match (intval, strval) {
        (Some(v), None) => Valu::Int(v),
        (None, Some(s)) => Valu::Str(s),
        _ => return Err(CortexError::storage("row has invalid value columns")),
    };
    Ok(Row {
        id: Guid::parse(&id)?,
        prop,
        valu,
        time: tstamp,
    })
}

fn insert_rows(conn: &Connection, table: &str, rows: &[Row]) -> CortexResult<()> {
    req_stor_rows(rows)?;
    // Encode everything first so a non-sql-storable value rejects the
    // whole batch instead of leaving a prefix behind.
    let mut encoded = Vec::with_capacity(rows.len());
    for row in rows {
        encoded.push(encode_valu(&row.prop, &row.valu)?);
    }
    let sql =
        format!("INSERT INTO {table} (id, prop, intval, strval, tstamp) VALUES (?1, ?2, ?3, ?4, ?5)");
    let mut stmt = conn.prepare_cached(&sql).map_err(to_store_err)?;
    for (row, (intval, strval)) in rows.iter().zip(encoded) {
        stmt.execute(rusqlite::params![
            row.id.as_str(),
            row.prop,
            intval,
            strval,
            row.time
        ])
        .map_err(to_store_err)?;
    }
    Ok(())
}

fn delete_rows_by_id_prop(
    conn: &Connection,
    table: &str,
    id: &Guid,
    prop: &str,
) -> CortexResult<usize> {
    conn.execute(
        &format!("DELETE FROM {table} WHERE id = ?1 AND prop = ?2"),
        rusqlite::params![id.as_str(), prop],
    )
    .map_err(to_store_err)
}

fn query_rows(conn: &Connection, sql: &str, args: Vec<Value>) -> CortexResult<Vec<Row>> {
    let mut stmt = conn.prepare_cached(sql).map_err(to_store_err)?;
    let mut sqlrows = stmt.query(params_from_iter(args)).map_err(to_store_err)?;
    let mut out = Vec::new();
    while let Some(sqlrow) = sqlrows.next().map_err(to_store_err)? {
        let id: String = sqlrow.get(0).map_err(to_store_err)?;
        let prop: String = sqlrow.get(1).map_err(to_store_err)?;
        let intval: Option<i64> = sqlrow.get(2).map_err(to_store_err)?;
        let strval: Option<String> = sqlrow.get(3).map_err(to_store_err)?;
        let tstamp: i64 = sqlrow.get(4).map_err(to_store_err)?;
        out.push(decode_row(id, prop, intval, strval, tstamp)?);
    }
    Ok(out)
}

fn query_count(conn: &Connection, sql: &str, args: Vec<Value>) -> CortexResult<u64> {
    let mut stmt = conn.prepare_cached(sql).map_err(to_store_err)?;
    stmt.query_row(params_from_iter(args), |sqlrow| sqlrow.get::<_, i64>(0))
        .map(|count| count as u64)
        .map_err(to_store_err)
}

/// WHERE clause + args for a prop/valu/time selection. A `Bytes` value
/// never matches persisted rows; the caller short-circuits to empty.
fn prop_where(
    prop: &str,
    valu: Option<&Valu>,
    mintime: Option<i64>,
    maxtime: Option<i64>,
) -> CortexResult<Option<(String, Vec<Value>)>> {
    let mut sql = "prop = ?".to_string();
    let mut args: Vec<Value> = vec![Value::Text(prop.to_string())];
    match valu {
        None => {}
        Some(Valu::Int(v)) => {
            sql.push_str(" AND intval = ?");
            args.push(Value::Integer(*v));
        }
        Some(Valu::Str(s)) => {
            sql.push_str(" AND strval = ?");
            args.push(Value::Text(s.clone()));
        }
        Some(Valu::Bytes(_)) => return Ok(None),
        Some(Valu::List(_)) => {
            return Err(CortexError::InvalidParam {
                name: "valu".to_string(),
                mesg: "list values cannot be matched".to_string(),
            })
        }
    }
    if let Some(min) = mintime {
        sql.push_str(" AND tstamp >= ?");
        args.push(Value::Integer(min));
    }
    if let Some(max) = maxtime {
        sql.push_str(" AND tstamp < ?");
        args.push(Value::Integer(max));
    }
    Ok(Some((sql, args)))
}

/// Column + operand for a scalar comparison in a by-strategy.
fn by_operand(valu: &Valu) -> CortexResult<(&'static str, Value)> {
    match valu {
        Valu::Int(v) => Ok(("intval", Value::Integer(*v))),
        Valu::Str(s) => Ok(("strval", Value::Text(s.clone()))),
        _ => Err(CortexError::InvalidParam {
            name: "valu".to_string(),
            mesg: "by-strategy operands are integers or strings".to_string(),
        }),
    }
}

fn by_where(by: &str, prop: &str, valu: &Valu) -> CortexResult<(String, Vec<Value>)> {
    let mut sql = "prop = ?".to_string();
    let mut args: Vec<Value> = vec![Value::Text(prop.to_string())];
    match by {
        "has" => {}
        "eq" | "lt" | "le" | "gt" | "ge" => {
            let op = match by {
                "eq" => "=",
                "lt" => "<",
                "le" => "<=",
                "gt" => ">",
                _ => ">=",
            };
            let (col, arg) = by_operand(valu)?;
            sql.push_str(&format!(" AND {col} {op} ?"));
            args.push(arg);
        }
        "range" => {
            let (min, max) = range_bounds(valu)?;
            let (mincol, minarg) = by_operand(min)?;
            let (maxcol, maxarg) = by_operand(max)?;
            if mincol != maxcol {
                return Err(CortexError::InvalidParam {
                    name: "valu".to_string(),
                    mesg: "range bounds must share a type".to_string(),
                });
            }
            sql.push_str(&format!(" AND {mincol} >= ? AND {maxcol} < ?"));
            args.push(minarg);
            args.push(maxarg);
        }
        _ => {
            return Err(CortexError::NoSuchBy {
                by: by.to_string(),
            })
        }
    }
    Ok((sql, args))
}

const SELECT_COLS: &str = "id, prop, intval, strval, tstamp";

fn select_rows_by_id(conn: &Connection, table: &str, id: &Guid) -> CortexResult<Vec<Row>> {
    query_rows(
        conn,
        &format!("SELECT {SELECT_COLS} FROM {table} WHERE id = ? ORDER BY rowid"),
        vec![Value::Text(id.as_str().to_string())],
    )
}

fn select_rows_by_prop(
    conn: &Connection,
    table: &str,
    prop: &str,
    valu: Option<&Valu>,
    mintime: Option<i64>,
    maxtime: Option<i64>,
    limit: Option<usize>,
) -> CortexResult<Vec<Row>> {
    let Some((clause, mut args)) = prop_where(prop, valu, mintime, maxtime)? else {
        return Ok(Vec::new());
    };
    let mut sql = format!("SELECT {SELECT_COLS} FROM {table} WHERE {clause} ORDER BY rowid");
    if let Some(cap) = limit {
        sql.push_str(" LIMIT ?");
        args.push(Value::Integer(cap as i64));
    }
    query_rows(conn, &sql, args)
}

/// Single-connection sqlite row store. Writes serialize on the
/// connection mutex; the xact scope holds it for its whole extent.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    table: String,
    done: AtomicBool,
}

impl SqliteStore {
    /// Open a file-backed store, creating the table and indexes.
    pub fn open(path: &Path, table: Option<&str>) -> CortexResult<Self> {
        let conn = Connection::open(path).map_err(to_store_err)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )
        .map_err(to_store_err)?;
        Self::from_conn(conn, table)
    }

    /// Open an ephemeral in-memory store (tests, `sqlite://:memory:`).
    pub fn open_in_memory(table: Option<&str>) -> CortexResult<Self> {
        let conn = Connection::open_in_memory().map_err(to_store_err)?;
        Self::from_conn(conn, table)
    }

    fn from_conn(conn: Connection, table: Option<&str>) -> CortexResult<Self> {
        let table = table.unwrap_or(DEFAULT_TABLE).to_string();
        req_table_name(&table)?;
        init_schema(&conn, &table)?;
        Ok(Self {
            conn: Mutex::new(conn),
            table,
            done: AtomicBool::new(false),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn lock(&self) -> CortexResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CortexError::storage(format!("sqlite lock poisoned: {e}")))
    }
}

/// Write scope: BEGIN IMMEDIATE on entry, COMMIT on `commit`, ROLLBACK
/// when dropped uncommitted.
struct SqliteXact<'a> {
    guard: MutexGuard<'a, Connection>,
    table: String,
    done: bool,
}

impl<'a> SqliteXact<'a> {
    fn begin(guard: MutexGuard<'a, Connection>, table: String) -> CortexResult<Self> {
        guard
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(to_store_err)?;
        Ok(Self {
            guard,
            table,
            done: false,
        })
    }
}

impl ICoreXact for SqliteXact<'_> {
    fn add_rows(&mut self, rows: &[Row]) -> CortexResult<()> {
        insert_rows(&self.guard, &self.table, rows)
    }

    fn del_rows_by_id_prop(&mut self, id: &Guid, prop: &str) -> CortexResult<usize> {
        delete_rows_by_id_prop(&self.guard, &self.table, id, prop)
    }

    fn rows_by_id(&mut self, id: &Guid) -> CortexResult<Vec<Row>> {
        select_rows_by_id(&self.guard, &self.table, id)
    }

    fn rows_by_prop(
        &mut self,
        prop: &str,
        valu: Option<&Valu>,
        mintime: Option<i64>,
        maxtime: Option<i64>,
        limit: Option<usize>,
    ) -> CortexResult<Vec<Row>> {
        select_rows_by_prop(&self.guard, &self.table, prop, valu, mintime, maxtime, limit)
    }

    fn commit(mut self: Box<Self>) -> CortexResult<()> {
        self.guard.execute_batch("COMMIT").map_err(to_store_err)?;
        self.done = true;
        Ok(())
    }
}

impl Drop for SqliteXact<'_> {
    fn drop(&mut self) {
        if !self.done {
            if let Err(err) = self.guard.execute_batch("ROLLBACK") {
                tracing::warn!(error = %err, "sqlite xact rollback failed");
            }
        }
    }
}

impl IRowStore for SqliteStore {
    fn add_rows(&self, rows: &[Row]) -> CortexResult<()> {
        let guard = self.lock()?;
        insert_rows(&guard, &self.table, rows)
    }

    fn del_rows_by_id_prop(&self, id: &Guid, prop: &str) -> CortexResult<usize> {
        let guard = self.lock()?;
        delete_rows_by_id_prop(&guard, &self.table, id, prop)
    }

    fn rows_by_id(&self, id: &Guid) -> CortexResult<Vec<Row>> {
        let guard = self.lock()?;
        select_rows_by_id(&guard, &self.table, id)
    }

    fn rows_by_prop(
        &self,
        prop: &str,
        valu: Option<&Valu>,
        mintime: Option<i64>,
        maxtime: Option<i64>,
        limit: Option<usize>,
    ) -> CortexResult<Vec<Row>> {
        let guard = self.lock()?;
        select_rows_by_prop(&guard, &self.table, prop, valu, mintime, maxtime, limit)
    }

    fn rows_by(
        &self,
        by: &str,
        prop: &str,
        valu: &Valu,
        limit: Option<usize>,
    ) -> CortexResult<Vec<Row>> {
        let (clause, mut args) = by_where(by, prop, valu)?;
        let mut sql = format!(
            "SELECT {SELECT_COLS} FROM {} WHERE {clause} ORDER BY rowid",
            self.table
        );
        if let Some(cap) = limit {
            sql.push_str(" LIMIT ?");
            args.push(Value::Integer(cap as i64));
        }
        let guard = self.lock()?;
        query_rows(&guard, &sql, args)
    }

    fn size_by_id(&self, id: &Guid) -> CortexResult<u64> {
        let guard = self.lock()?;
        query_count(
            &guard,
            &format!("SELECT COUNT(*) FROM {} WHERE id = ?", self.table),
            vec![Value::Text(id.as_str().to_string())],
        )
    }

    fn size_by_prop(
        &self,
        prop: &str,
        valu: Option<&Valu>,
        mintime: Option<i64>,
        maxtime: Option<i64>,
    ) -> CortexResult<u64> {
        let Some((clause, args)) = prop_where(prop, valu, mintime, maxtime)? else {
            return Ok(0);
        };
        let guard = self.lock()?;
        query_count(
            &guard,
            &format!("SELECT COUNT(*) FROM {} WHERE {clause}", self.table),
            args,
        )
    }

    fn size_by(&self, by: &str, prop: &str, valu: &Valu) -> CortexResult<u64> {
        let (clause, args) = by_where(by, prop, valu)?;
        let guard = self.lock()?;
        query_count(
            &guard,
            &format!("SELECT COUNT(*) FROM {} WHERE {clause}", self.table),
            args,
        )
    }

    fn xact(&self) -> CortexResult<Box<dyn ICoreXact + '_>> {
        Ok(Box::new(SqliteXact::begin(
            self.lock()?,
            self.table.clone(),
        )?))
    }

    fn fini(&self) {
        self.done.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_validated() {
        assert!(req_table_name("syncortex").is_ok());
        assert!(req_table_name("cor_0").is_ok());
        assert!(req_table_name("0cor").is_err());
        assert!(req_table_name("cor; DROP TABLE x").is_err());
        assert!(req_table_name("").is_err());
    }

    #[test]
    fn bytes_values_are_rejected() {
        let store = SqliteStore::open_in_memory(None).unwrap();
        let rows = vec![Row::new(Guid::new(), "foo:bar", vec![1u8, 2], 0)];
        let err = store.add_rows(&rows).unwrap_err();
        assert_eq!(err.kind(), "BadStorValu");
    }

    #[test]
    fn xact_rollback_on_drop() {
        let store = SqliteStore::open_in_memory(None).unwrap();
        let id = Guid::new();
        {
            let mut xact = store.xact().unwrap();
            xact.add_rows(&[Row::new(id.clone(), "foo:bar", 1, 0)])
                .unwrap();
        }
        assert!(store.rows_by_id(&id).unwrap().is_empty());
    }
}
