//! Construct cortexes by url through an explicit scheme-constructor
//! registry (no process-wide ctor table).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use cortex_core::errors::{CortexError, CortexResult};

use crate::engine::Cortex;

/// Options recognized when opening a cortex url. `table` applies to
/// persisted backends only; a `?table=` url option overrides it.
#[derive(Debug, Clone, Default)]
pub struct OpenOpts {
    pub table: Option<String>,
}

/// An opened cortex, plus whether the opener owns its teardown.
/// Remote proxies report `owned: false`; their transport finalizes them.
#[derive(Debug)]
pub struct Opened {
    pub cortex: Cortex,
    pub owned: bool,
}

pub type CortexCtor = Arc<dyn Fn(&str, &OpenOpts) -> CortexResult<Opened> + Send + Sync>;

/// Scheme → constructor registry. `ram` and `sqlite` ship built in;
/// transports and server-sql backends register their own schemes.
pub struct CortexOpener {
    ctors: HashMap<String, CortexCtor>,
}

impl CortexOpener {
    pub fn new() -> Self {
        let mut opener = Self {
            ctors: HashMap::new(),
        };
        opener.add_ctor(
            "ram",
            Arc::new(|_rest, _opts| {
                Ok(Opened {
                    cortex: Cortex::open_ram(),
                    owned: true,
                })
            }),
        );
        opener.add_ctor("sqlite", Arc::new(open_sqlite_url));
        opener
    }

    pub fn add_ctor(&mut self, scheme: &str, ctor: CortexCtor) {
        self.ctors.insert(scheme.to_string(), ctor);
    }

    /// Open a cortex by url. Unknown schemes fail with `NoSuchScheme`.
    pub fn open(&self, url: &str, opts: &OpenOpts) -> CortexResult<Opened> {
        let (scheme, rest) = url.split_once("://").ok_or_else(|| CortexError::InvalidParam {
            name: "url".to_string(),
            mesg: format!("{url:?} has no scheme"),
        })?;
        let ctor = self
            .ctors
            .get(scheme)
            .ok_or_else(|| CortexError::NoSuchScheme {
                scheme: scheme.to_string(),
            })?;
        tracing::debug!(url, "opening cortex");
        ctor(rest, opts)
    }
}

impl Default for CortexOpener {
    fn default() -> Self {
        Self::new()
    }
}

fn open_sqlite_url(rest: &str, opts: &OpenOpts) -> CortexResult<Opened> {
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };
    let mut table = opts.table.clone();
    if let Some(query) = query {
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("table", name)) => table = Some(name.to_string()),
                _ => {
                    return Err(CortexError::InvalidParam {
                        name: "url".to_string(),
                        mesg: format!("unknown option {pair:?}"),
                    })
                }
            }
        }
    }
    let cortex = if path.is_empty() || path == ":memory:" {
        Cortex::open_sqlite_in_memory(table.as_deref())?
    } else {
        Cortex::open_sqlite(Path::new(path), table.as_deref())?
    };
    Ok(Opened {
        cortex,
        owned: true,
    })
}
