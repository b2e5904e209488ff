use thiserror::Error;

/// Fatal analysis failures. Every variant aborts the run; there is no recovery path
/// because the input snapshot is fixed and an approximation would produce a wrong
/// document.
#[derive(Error, Debug)]
pub(crate) enum AnalysisError {
    #[error("duplicate class name encountered while loading: {0}")]
    DuplicateClass(String),

    #[error("failed to decode class {name}: {reason}")]
    Decode { name: String, reason: String },

    #[error("could not locate class {0}")]
    ClassNotFound(String),

    #[error("invalid descriptor {descriptor}: {reason}")]
    Descriptor { descriptor: String, reason: String },

    #[error("class hierarchy of {0} is cyclic: {1}")]
    HierarchyCycle(String, String),

    #[error("unrecognized {construct} in {location}: {detail}")]
    Unrecognized {
        construct: &'static str,
        location: String,
        detail: String,
    },

    #[error("could not match expected idiom {idiom} in {location}\n{dump}")]
    IdiomNotMatched {
        idiom: &'static str,
        location: String,
        dump: String,
    },

    #[error("{owner}#{name}{descriptor} has no known implementations (called from {call_path})")]
    UnboundedDispatch {
        owner: String,
        name: String,
        descriptor: String,
        call_path: String,
    },

    #[error("call graph exceeded depth {limit} at {call_path}")]
    CallDepthExceeded { limit: usize, call_path: String },

    #[error("schema name {name} was already taken by {existing}, cannot reuse it for {requested}")]
    SchemaNameCollision {
        name: String,
        existing: String,
        requested: String,
    },
}

impl AnalysisError {
    pub(crate) fn unrecognized(
        construct: &'static str,
        location: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        AnalysisError::Unrecognized {
            construct,
            location: location.into(),
            detail: detail.into(),
        }
    }
}

pub(crate) type Result<T> = std::result::Result<T, AnalysisError>;
