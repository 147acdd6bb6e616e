//! Error taxonomy shared by every crate in the workspace.

use thiserror::Error;

pub type CortexResult<T> = Result<T, CortexError>;

/// All failure kinds surfaced by cortexes and the meta layer.
/// Variants carry the structured info for the violation; `Display`
/// renders the message and [`CortexError::kind`] the stable kind name.
#[derive(Debug, Error)]
pub enum CortexError {
    #[error("no cortex registered under {name:?}")]
    NoSuchName { name: String },

    #[error("no constructor for scheme {scheme:?}")]
    NoSuchScheme { scheme: String },

    #[error("no such property {prop:?}")]
    NoSuchProp { prop: String },

    #[error("no such type {name:?}")]
    NoSuchType { name: String },

    #[error("no such form {form:?}")]
    NoSuchForm { form: String },

    #[error("no such by-strategy {by:?}")]
    NoSuchBy { by: String },

    #[error("no such job {job}")]
    NoSuchJob { job: String },

    #[error("cortex name {name:?} already registered")]
    DupCortexName { name: String },

    #[error("value for {name:?} is not storable: {mesg}")]
    BadStorValu { name: String, mesg: String },

    #[error("{name} invalid: {mesg}")]
    InvalidParam { name: String, mesg: String },

    #[error("bad query {query:?}: {mesg}")]
    BadQuerySyntax { query: String, mesg: String },

    #[error("storage error: {mesg}")]
    Storage { mesg: String },

    #[error("task error: {mesg}")]
    Task { mesg: String },
}

impl CortexError {
    /// Stable kind name for wire forms and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            CortexError::NoSuchName { .. } => "NoSuchName",
            CortexError::NoSuchScheme { .. } => "NoSuchScheme",
            CortexError::NoSuchProp { .. } => "NoSuchProp",
            CortexError::NoSuchType { .. } => "NoSuchType",
            CortexError::NoSuchForm { .. } => "NoSuchForm",
            CortexError::NoSuchBy { .. } => "NoSuchBy",
            CortexError::NoSuchJob { .. } => "NoSuchJob",
            CortexError::DupCortexName { .. } => "DupCortexName",
            CortexError::BadStorValu { .. } => "BadStorValu",
            CortexError::InvalidParam { .. } => "InvalidParam",
            CortexError::BadQuerySyntax { .. } => "BadQuerySyntax",
            CortexError::Storage { .. } => "Storage",
            CortexError::Task { .. } => "Task",
        }
    }

    /// Wrap a backend failure message.
    pub fn storage(mesg: impl Into<String>) -> Self {
        CortexError::Storage { mesg: mesg.into() }
    }
}
