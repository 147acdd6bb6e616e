//! MetaCortex — a named registry of cortexes tagged with hierarchical
//! labels, routing parsed queries to every cortex under a tag and
//! aggregating the replies.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use cortex_core::bus::{EventBus, HandlerId};
use cortex_core::errors::{CortexError, CortexResult};
use cortex_core::row::Row;
use cortex_core::tags::chop_tag;
use cortex_core::tufo::{fold_rows, Tufo};
use cortex_storage::{ApiCall, ApiReturn, Cortex, CortexOpener, JobId, OpenOpts};

use crate::query::QuerySpec;

pub const EVT_QUERY_ROWS: &str = "meta:query:rows";
pub const EVT_QUERY_JOIN: &str = "meta:query:join";
pub const EVT_QUERY_SIZE: &str = "meta:query:size";

/// Mutable payload fired before each query executes. An observer that
/// clears `allow` suppresses the dispatch entirely.
#[derive(Debug, Clone)]
pub struct QueryEvent {
    pub query: QuerySpec,
    pub allow: bool,
}

struct MetaEntry {
    cortex: Cortex,
    /// Locally opened cortexes are finalized on teardown; remote
    /// proxies are the transport's to tear down.
    owned: bool,
}

#[derive(Default)]
struct Registry {
    coresbyname: HashMap<String, MetaEntry>,
    tagsbyname: HashMap<String, BTreeSet<String>>,
    /// Names in registration order per tag; dispatch order follows it.
    coresbytag: HashMap<String, Vec<String>>,
}

struct MetaInner {
    opener: CortexOpener,
    registry: RwLock<Registry>,
    bus: EventBus<QueryEvent>,
}

impl MetaInner {
    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Teardown hook: finalize every locally-owned cortex.
    fn fini_cores(&self) {
        let entries = {
            let mut reg = self.write();
            reg.coresbytag.clear();
            reg.tagsbyname.clear();
            std::mem::take(&mut reg.coresbyname)
        };
        for (name, entry) in entries {
            if entry.owned {
                tracing::debug!(name = %name, "finalizing cortex");
                entry.cortex.fini();
            }
        }
    }
}

/// Registry + router + aggregator over many cortexes.
pub struct MetaCortex {
    inner: Arc<MetaInner>,
}

impl MetaCortex {
    pub fn new() -> Self {
        Self::with_opener(CortexOpener::new())
    }

    /// Use a caller-supplied opener (extra schemes registered).
    pub fn with_opener(opener: CortexOpener) -> Self {
        let inner = Arc::new(MetaInner {
            opener,
            registry: RwLock::new(Registry::default()),
            bus: EventBus::new(),
        });
        let weak = Arc::downgrade(&inner);
        inner.bus.onfini(move || {
            if let Some(inner) = weak.upgrade() {
                inner.fini_cores();
            }
        });
        Self { inner }
    }

    // --- Event bus surface ---

    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(&mut QueryEvent) -> CortexResult<()> + Send + Sync + 'static,
    ) -> HandlerId {
        self.inner.bus.on(event, handler)
    }

    pub fn off(&self, event: &str, id: HandlerId) {
        self.inner.bus.off(event, id)
    }

    pub fn onfini(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.bus.onfini(callback)
    }

    /// Idempotent teardown; also run on drop.
    pub fn fini(&self) {
        self.inner.bus.fini()
    }

    pub fn is_fini(&self) -> bool {
        self.inner.bus.is_fini()
    }

    // --- Registry ---

    /// Open a cortex by url and record it under its name and every
    /// supplied tag, each expanded into its ancestor levels.
    pub fn add_cortex(&self, name: &str, url: &str, tags: &[&str]) -> CortexResult<Cortex> {
        let mut reg = self.inner.write();
        if reg.coresbyname.contains_key(name) {
            return Err(CortexError::DupCortexName {
                name: name.to_string(),
            });
        }
        let opened = self.inner.opener.open(url, &OpenOpts::default())?;

        let mut alltags: BTreeSet<String> = chop_tag(name).into_iter().collect();
        for tag in tags {
            alltags.extend(chop_tag(tag));
        }
        for tag in &alltags {
            reg.coresbytag
                .entry(tag.clone())
                .or_default()
                .push(name.to_string());
        }
        reg.tagsbyname.insert(name.to_string(), alltags);

        let cortex = opened.cortex.clone();
        reg.coresbyname.insert(
            name.to_string(),
            MetaEntry {
                cortex: opened.cortex,
                owned: opened.owned,
            },
        );
        Ok(cortex)
    }

    /// Remove a cortex from every tag list and finalize it if owned.
    pub fn del_cortex(&self, name: &str) -> CortexResult<()> {
        let entry = {
            let mut reg = self.inner.write();
            let entry = reg
                .coresbyname
                .remove(name)
                .ok_or_else(|| CortexError::NoSuchName {
                    name: name.to_string(),
                })?;
            if let Some(tags) = reg.tagsbyname.remove(name) {
                for tag in tags {
                    if let Some(names) = reg.coresbytag.get_mut(&tag) {
                        names.retain(|n| n != name);
                        if names.is_empty() {
                            reg.coresbytag.remove(&tag);
                        }
                    }
                }
            }
            entry
        };
        if entry.owned {
            entry.cortex.fini();
        }
        Ok(())
    }

    pub fn get_cortex(&self, name: &str) -> Option<Cortex> {
        self.inner
            .read()
            .coresbyname
            .get(name)
            .map(|entry| entry.cortex.clone())
    }

    pub fn get_cortex_names(&self) -> Vec<String> {
        self.inner.read().coresbyname.keys().cloned().collect()
    }

    /// Every cortex under a tag, in registration (dispatch) order.
    /// Unknown tags yield an empty list.
    pub fn get_cortexes(&self, tag: &str) -> Vec<Cortex> {
        let reg = self.inner.read();
        match reg.coresbytag.get(tag) {
            Some(names) => names
                .iter()
                .filter_map(|name| reg.coresbyname.get(name).map(|e| e.cortex.clone()))
                .collect(),
            None => Vec::new(),
        }
    }

    fn req_cortex(&self, name: &str) -> CortexResult<Cortex> {
        self.get_cortex(name).ok_or_else(|| CortexError::NoSuchName {
            name: name.to_string(),
        })
    }

    // --- Named delegation ---

    pub fn add_meta_rows(&self, name: &str, rows: Vec<Row>) -> CortexResult<()> {
        self.req_cortex(name)?.add_rows(rows)
    }

    /// Enqueue rows on the named cortex without waiting for persistence.
    pub fn add_meta_rows_async(&self, name: &str, rows: Vec<Row>) -> CortexResult<JobId> {
        Ok(self.req_cortex(name)?.add_rows_async(rows))
    }

    /// Delegate any api call to the named cortex; surfaces whatever the
    /// cortex raises.
    pub fn call_cor_api(&self, name: &str, call: ApiCall) -> CortexResult<ApiReturn> {
        self.req_cortex(name)?.call(call)
    }

    // --- Queries ---

    pub async fn get_rows_by_query(&self, text: &str) -> CortexResult<Vec<Row>> {
        let spec = QuerySpec::parse(text)?;
        let Some(cores) = self.query_targets(EVT_QUERY_ROWS, &spec) else {
            return Ok(Vec::new());
        };
        let call = spec.rows_call()?;
        self.collect_rows(cores, call).await
    }

    pub async fn get_join_by_query(&self, text: &str) -> CortexResult<Vec<Row>> {
        let spec = QuerySpec::parse(text)?;
        let Some(cores) = self.query_targets(EVT_QUERY_JOIN, &spec) else {
            return Ok(Vec::new());
        };
        let call = spec.join_call()?;
        self.collect_rows(cores, call).await
    }

    pub async fn get_size_by_query(&self, text: &str) -> CortexResult<u64> {
        let spec = QuerySpec::parse(text)?;
        let Some(cores) = self.query_targets(EVT_QUERY_SIZE, &spec) else {
            return Ok(0);
        };
        let call = spec.size_call()?;
        let jobs = submit_all(cores, call);
        let mut total = 0u64;
        for (core, job) in jobs {
            match core.get_async_return(&job).await {
                Ok(ApiReturn::Size(size)) => total += size,
                Ok(other) => tracing::warn!(?other, "unexpected api return"),
                Err(err) => tracing::warn!(error = %err, "cortex query failed"),
            }
        }
        Ok(total)
    }

    /// Join rows across the tag's cortexes, folded into tufos. When the
    /// same `(id, prop)` appears in multiple rows the later row wins.
    pub async fn get_tufos_by_query(&self, text: &str) -> CortexResult<Vec<Tufo>> {
        let rows = self.get_join_by_query(text).await?;
        Ok(fold_rows(rows))
    }

    /// Fire the query event and snapshot the tag's cortex list.
    /// `None` means an observer vetoed the query.
    fn query_targets(&self, event: &str, spec: &QuerySpec) -> Option<Vec<Cortex>> {
        let mut ev = QueryEvent {
            query: spec.clone(),
            allow: true,
        };
        self.inner.bus.fire(event, &mut ev);
        if !ev.allow {
            tracing::debug!(query = %spec.unparse(), "query vetoed by observer");
            return None;
        }
        Some(self.get_cortexes(&spec.tag))
    }

    async fn collect_rows(&self, cores: Vec<Cortex>, call: ApiCall) -> CortexResult<Vec<Row>> {
        let jobs = submit_all(cores, call);
        let mut out = Vec::new();
        for (core, job) in jobs {
            match core.get_async_return(&job).await {
                Ok(ApiReturn::Rows(rows)) => out.extend(rows),
                Ok(other) => tracing::warn!(?other, "unexpected api return"),
                Err(err) => tracing::warn!(error = %err, "cortex query failed"),
            }
        }
        Ok(out)
    }
}

/// Submit to every cortex before awaiting any, preserving dispatch order.
fn submit_all(cores: Vec<Cortex>, call: ApiCall) -> Vec<(Cortex, JobId)> {
    cores
        .into_iter()
        .map(|core| {
            let job = core.call_async_api(call.clone());
            (core, job)
        })
        .collect()
}

impl Default for MetaCortex {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MetaCortex {
    fn drop(&mut self) {
        self.fini();
    }
}
