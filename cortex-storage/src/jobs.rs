//! Fire-and-wait async call surface.
//!
//! `submit` schedules a blocking call and hands back an opaque job id;
//! `retrieve` waits for the terminal outcome and returns the value or
//! re-raises the job's error. Cancellation is not exposed.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use cortex_core::errors::{CortexError, CortexResult};
use cortex_core::row::{Guid, Row, Valu};

/// Opaque job identifier, unique per cortex.
pub type JobId = Guid;

/// The closed set of calls a cortex accepts over the async surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "api", content = "args", rename_all = "snake_case")]
pub enum ApiCall {
    AddRows {
        rows: Vec<Row>,
    },
    GetRowsById {
        id: Guid,
    },
    GetRowsByProp {
        prop: String,
        valu: Option<Valu>,
        mintime: Option<i64>,
        maxtime: Option<i64>,
        limit: Option<usize>,
    },
    GetRowsBy {
        by: String,
        prop: String,
        valu: Valu,
        limit: Option<usize>,
    },
    GetJoinById {
        id: Guid,
    },
    GetJoinByProp {
        prop: String,
        valu: Option<Valu>,
        mintime: Option<i64>,
        maxtime: Option<i64>,
        limit: Option<usize>,
    },
    GetJoinBy {
        by: String,
        prop: String,
        valu: Valu,
        limit: Option<usize>,
    },
    GetSizeById {
        id: Guid,
    },
    GetSizeByProp {
        prop: String,
        valu: Option<Valu>,
        mintime: Option<i64>,
        maxtime: Option<i64>,
    },
    GetSizeBy {
        by: String,
        prop: String,
        valu: Valu,
    },
}

/// What a completed call hands back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiReturn {
    Rows(Vec<Row>),
    Size(u64),
    Done,
}

/// Per-cortex table of in-flight jobs.
pub(crate) struct JobPool {
    jobs: DashMap<JobId, JoinHandle<CortexResult<ApiReturn>>>,
}

impl JobPool {
    pub(crate) fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }

    /// Schedule a blocking call on the runtime's blocking pool.
    pub(crate) fn submit<F>(&self, work: F) -> JobId
    where
        F: FnOnce() -> CortexResult<ApiReturn> + Send + 'static,
    {
        let job = JobId::new();
        let handle = tokio::task::spawn_blocking(work);
        self.jobs.insert(job.clone(), handle);
        job
    }

    /// Wait for a job's terminal outcome. Each job may be retrieved once.
    pub(crate) async fn retrieve(&self, job: &JobId) -> CortexResult<ApiReturn> {
        let (_, handle) = self.jobs.remove(job).ok_or_else(|| CortexError::NoSuchJob {
            job: job.to_string(),
        })?;
        handle
            .await
            .map_err(|e| CortexError::Task {
                mesg: e.to_string(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_calls_round_trip_through_json() {
        let call = ApiCall::GetRowsByProp {
            prop: "foo:bar".to_string(),
            valu: Some(Valu::Int(10)),
            mintime: Some(0),
            maxtime: None,
            limit: Some(5),
        };
        let wire = serde_json::to_string(&call).unwrap();
        let back: ApiCall = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, call);
    }
}
